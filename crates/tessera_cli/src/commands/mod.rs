//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod verify;

use serde::Serialize;
use std::path::{Path, PathBuf};
use tessera_core::log::{LogManager, LogRecord};
use tessera_core::{Config, CoreError};
use tessera_storage::{FileBackend, InMemoryBackend, StorageBackend};
use thiserror::Error;
use tracing::debug;

/// Errors reported by the commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The log file does not exist.
    #[error("log file not found: {0}")]
    LogNotFound(PathBuf),

    /// The log could not be read.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Output could not be encoded.
    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerifyFailed(usize),
}

/// Opens a copy of the log at `path`, leaving the file untouched.
///
/// A torn tail is dropped from the copy only.
pub fn open_log(path: &Path) -> Result<LogManager, CliError> {
    if !path.exists() {
        return Err(CliError::LogNotFound(path.to_path_buf()));
    }
    let file = FileBackend::open_existing(path).map_err(CoreError::from)?;
    let size = file.size().map_err(CoreError::from)?;
    let bytes = file
        .read_at(0, size as usize)
        .map_err(CoreError::from)?;
    debug!(path = %path.display(), size, "read log file");
    Ok(LogManager::open(
        Box::new(InMemoryBackend::with_data(bytes)),
        &Config::default(),
    )?)
}

/// Log record representation for output.
#[derive(Debug, Clone, Serialize)]
pub struct RecordInfo {
    /// LSN of the record.
    pub lsn: u64,
    /// Record type.
    pub record_type: String,
    /// Transaction ID (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn: Option<u64>,
    /// Previous record of the transaction (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_lsn: Option<u64>,
    /// Next record to undo (compensation records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_next_lsn: Option<u64>,
    /// Page touched (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    /// Partition allocated or freed (if applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<u32>,
    /// Type-specific details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RecordInfo {
    /// Describes `record` stored at `lsn`.
    pub fn new(lsn: u64, record: &LogRecord) -> Self {
        let detail = match record {
            LogRecord::Master { last_checkpoint } => Some(format!("checkpoint={last_checkpoint}")),
            LogRecord::UpdatePage {
                offset,
                before,
                after,
                ..
            } => Some(format!(
                "offset={offset} len={} undo={} redo={}",
                before.as_ref().or(after.as_ref()).map_or(0, Vec::len),
                before.is_some(),
                after.is_some()
            )),
            LogRecord::UndoUpdatePage { offset, after, .. } => {
                Some(format!("offset={offset} len={}", after.len()))
            }
            LogRecord::BeginCheckpoint { txn_counter } => Some(format!("next_txn={txn_counter}")),
            LogRecord::EndCheckpoint {
                dirty_pages,
                transactions,
                touched_pages,
            } => Some(format!(
                "dirty_pages={} transactions={} touched_pages={}",
                dirty_pages.len(),
                transactions.len(),
                touched_pages.values().map(Vec::len).sum::<usize>()
            )),
            _ => None,
        };
        Self {
            lsn,
            record_type: format!("{:?}", record.record_type()),
            txn: record.txn().map(|t| t.as_u64()),
            prev_lsn: record.prev_lsn().map(|l| l.as_u64()),
            undo_next_lsn: record.undo_next_lsn().map(|l| l.as_u64()),
            page: record.page_num().map(|p| p.to_string()),
            partition: record.partition().map(|p| p.as_u32()),
            detail,
        }
    }

    /// Prints the record on one line.
    pub fn print_line(&self) {
        print!("[{:08}] {:16}", self.lsn, self.record_type);
        if let Some(txn) = self.txn {
            print!(" txn={}", txn);
        }
        if let Some(prev) = self.prev_lsn {
            print!(" prev={}", prev);
        }
        if let Some(next) = self.undo_next_lsn {
            print!(" undo_next={}", next);
        }
        if let Some(ref page) = self.page {
            print!(" {}", page);
        }
        if let Some(partition) = self.partition {
            print!(" partition={}", partition);
        }
        if let Some(ref detail) = self.detail {
            print!(" {}", detail);
        }
        println!();
    }
}
