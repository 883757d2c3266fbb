//! Multigranularity locking.
//!
//! Three layers, leaf to root:
//!
//! - [`LockManager`] grants and queues locks on opaque [`ResourceName`]s.
//! - [`LockContext`] nodes mirror the resource hierarchy (database, table,
//!   page) and enforce intent-lock rules, promotion and escalation.
//! - [`ensure_sufficient_lock_held`] computes the minimal lock operations
//!   for a desired access level.
//!
//! ## Compatibility
//!
//! ```text
//!        NL   IS   IX   S    SIX  X
//!  NL    T    T    T    T    T    T
//!  IS    T    T    T    T    T    F
//!  IX    T    T    T    F    F    F
//!  S     T    T    F    T    F    F
//!  SIX   T    T    F    F    F    F
//!  X     T    F    F    F    F    F
//! ```
//!
//! Blocked requests wait indefinitely; there is no deadlock detection.

mod context;
mod lock_type;
mod manager;
mod policy;
mod resource;

pub use context::{ContextId, LockContext};
pub use lock_type::LockType;
pub use manager::LockManager;
pub use policy::{
    ensure_sufficient_lock_held, ensure_write_intent, AUTO_ESCALATE_MIN_CAPACITY,
    AUTO_ESCALATE_SATURATION,
};
pub use resource::{Lock, ResourceName};
