//! Transaction handles and id allocation.
//!
//! A [`TransactionContext`] is shared between the thread running the
//! transaction, the lock manager (which parks and wakes it) and the recovery
//! manager (which tracks its status). Handles are passed explicitly; there is
//! no ambient "current transaction".

mod manager;
mod state;

pub use manager::{TransactionFactory, TransactionManager};
pub use state::{CleanupHook, TransactionContext, TransactionStatus};
