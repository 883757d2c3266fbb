//! # Tessera Testkit
//!
//! Test utilities for Tessera.
//!
//! This crate provides:
//! - [`TestEngine`], which wires a lock manager, log, page cache, disk and
//!   recovery manager together and can simulate a crash
//! - A storage backend that tears writes at a chosen byte
//! - Property-based generators for lock types and transaction workloads
//! - Lock manager stress runs
//! - A workload runner with a model of the expected page contents
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! let engine = TestEngine::memory();
//! let txn = engine.begin();
//! engine.alloc_page(&txn, page(0)).unwrap();
//! engine.write(&txn, page(0), 0, b"hello").unwrap();
//! engine.commit(&txn).unwrap();
//!
//! let engine = engine.crash_and_recover().unwrap();
//! assert_eq!(engine.read(page(0), 0, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;
pub mod workload;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
    pub use crate::workload::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
pub use workload::*;
