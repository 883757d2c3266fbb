//! Write-ahead log.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. A record's LSN is the byte offset of its
//! frame. Offset 0 holds the master record, a fixed-size frame that is
//! rewritten in place to point at the latest checkpoint. Chain pointers
//! (`prev_lsn`, `undo_next_lsn`) encode "none" as 0, which can never be
//! the LSN of an ordinary record.
//!
//! ## Recovery Policy
//!
//! - A frame cut short by the end of the log is the tail of a write that
//!   never became durable. It is discarded when the log is opened.
//! - Bad magic, an unknown version or type, and a CRC mismatch on a complete
//!   frame are fatal: the log refuses to open.

mod apply;
mod iterator;
mod manager;
mod record;

pub use iterator::LogScan;
pub use manager::LogManager;
pub use record::{
    end_checkpoint_size, fits_in_one_record, LogRecord, LogRecordType, LOG_MAGIC, LOG_VERSION,
};
