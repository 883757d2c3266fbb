//! # Tessera Core
//!
//! Transactional core of the Tessera storage engine.
//!
//! This crate provides:
//! - Multigranularity locking (lock manager, lock context tree, lock policy)
//! - A write-ahead log with LSN-addressed records and a master record
//! - ARIES recovery: forward-processing logging and restart
//!   (analysis, redo, undo)
//! - In-memory page cache and disk allocator used by recovery
//!
//! Transactions are explicit [`transaction::TransactionContext`] handles
//! passed into every call; nothing is looked up from thread-local state.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod concurrency;
mod config;
mod error;
pub mod log;
pub mod recovery;
pub mod transaction;
mod types;

pub use config::{Config, PAGE_HEADER_SIZE};
pub use error::{CoreError, CoreResult};
pub use types::{Lsn, PageNum, PartitionId, TransactionId};
