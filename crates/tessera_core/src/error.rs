//! Error types for Tessera core.

use crate::concurrency::ResourceName;
use crate::types::{PageNum, PartitionId, TransactionId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Tessera core operations.
///
/// The lock-protocol variants are precondition violations by the caller and
/// are never retried. The corruption variants are fatal: recovery stops
/// rather than continuing on a best-effort basis.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] tessera_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transaction already holds a lock on the resource.
    #[error("{txn} already holds a lock on {name}")]
    DuplicateLock {
        /// Requesting transaction.
        txn: TransactionId,
        /// Resource the lock was requested on.
        name: ResourceName,
    },

    /// The transaction holds no lock on the resource.
    #[error("{txn} holds no lock on {name}")]
    NoLockHeld {
        /// Requesting transaction.
        txn: TransactionId,
        /// Resource named in the request.
        name: ResourceName,
    },

    /// The request violates multigranularity constraints.
    #[error("invalid lock request: {message}")]
    InvalidLock {
        /// Description of the violation.
        message: String,
    },

    /// The lock context does not allow mutation.
    #[error("unsupported operation: {message}")]
    UnsupportedOperation {
        /// Description of the rejected operation.
        message: String,
    },

    /// Rolling back to a savepoint that was never taken.
    #[error("{txn} has no savepoint named {name:?}")]
    SavepointNotFound {
        /// Owning transaction.
        txn: TransactionId,
        /// Savepoint name.
        name: String,
    },

    /// A transaction-table entry that must exist is missing.
    #[error("{txn} is not in the transaction table")]
    TransactionNotFound {
        /// The missing transaction.
        txn: TransactionId,
    },

    /// The log is corrupted or a record chain is malformed.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch on a log record.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        actual: u32,
    },

    /// A page that is not allocated was accessed.
    #[error("{page} is not allocated")]
    PageNotAllocated {
        /// The page.
        page: PageNum,
    },

    /// A partition that is not allocated was accessed.
    #[error("{partition} is not allocated")]
    PartitionNotAllocated {
        /// The partition.
        partition: PartitionId,
    },

    /// Invalid operation or argument.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid lock error.
    pub fn invalid_lock(message: impl Into<String>) -> Self {
        Self::InvalidLock {
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error signals log or bookkeeping corruption.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransactionNotFound { .. }
                | Self::LogCorruption { .. }
                | Self::ChecksumMismatch { .. }
        )
    }
}
