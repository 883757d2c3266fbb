//! # Tessera Storage
//!
//! Byte-store backends that hold the Tessera write-ahead log.
//!
//! Backends are **opaque byte stores**: they know nothing about log records,
//! LSNs or checkpoints. The log manager in `tessera_core` owns the framing.
//!
//! ## Design Principles
//!
//! - Appends are the common path; positional overwrite exists only so the
//!   fixed-size master record at offset 0 can be rewritten in place
//! - `flush` is the durability barrier
//! - Backends must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and crash simulation
//! - [`FileBackend`] - For persistent logs using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tessera_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.append(b"master--").unwrap();
//! backend.write_at(0, b"MASTER").unwrap();
//! assert_eq!(backend.read_at(0, 8).unwrap(), b"MASTER--");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
