//! Inspect command implementation.

use super::{open_log, CliError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tessera_core::log::{LogManager, LogRecord};
use tessera_core::{CoreError, CoreResult, Lsn};

/// Summary of a log's master record and last checkpoint.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// LSN the master record points at.
    pub master_checkpoint: u64,
    /// Transaction counter stored at the start of the checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_counter: Option<u64>,
    /// Number of end-checkpoint records in the checkpoint.
    pub end_records: usize,
    /// Dirty pages and their recovery LSNs.
    pub dirty_pages: BTreeMap<String, u64>,
    /// Active transactions with status and last LSN.
    pub transactions: BTreeMap<u64, TransactionInfo>,
    /// Record counts by type over the whole log.
    pub record_counts: BTreeMap<String, usize>,
    /// Offset just past the last record.
    pub log_end: u64,
}

/// A transaction as recorded by a checkpoint.
#[derive(Debug, Default, Serialize)]
pub struct TransactionInfo {
    /// Status name.
    pub status: String,
    /// Last LSN written by the transaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lsn: Option<u64>,
    /// Pages the transaction holds write locks on.
    pub touched_pages: Vec<String>,
}

/// Reads the master record and the checkpoint it points at.
pub fn inspect_log(log: &LogManager) -> CoreResult<InspectResult> {
    let master = log.master_record()?;
    let mut result = InspectResult {
        master_checkpoint: master.as_u64(),
        log_end: log.next_lsn().as_u64(),
        ..InspectResult::default()
    };

    for item in log.iter() {
        let (_, record) = item?;
        *result
            .record_counts
            .entry(format!("{:?}", record.record_type()))
            .or_default() += 1;
    }

    if master == Lsn::MASTER {
        return Ok(result);
    }

    let mut scan = log.scan_from(master);
    match scan.next().transpose()? {
        Some((_, LogRecord::BeginCheckpoint { txn_counter })) => {
            result.txn_counter = Some(txn_counter);
        }
        other => {
            return Err(CoreError::log_corruption(format!(
                "master record points at {master}, which holds {:?}",
                other.map(|(_, record)| record.record_type())
            )));
        }
    }

    for item in scan {
        let (_, record) = item?;
        match record {
            LogRecord::EndCheckpoint {
                dirty_pages,
                transactions,
                touched_pages,
            } => {
                result.end_records += 1;
                for (page, rec_lsn) in dirty_pages {
                    result.dirty_pages.insert(page.to_string(), rec_lsn.as_u64());
                }
                for (txn, (status, last_lsn)) in transactions {
                    let info = result.transactions.entry(txn.as_u64()).or_default();
                    info.status = status.to_string();
                    info.last_lsn = last_lsn.map(Lsn::as_u64);
                }
                for (txn, pages) in touched_pages {
                    let info = result.transactions.entry(txn.as_u64()).or_default();
                    info.touched_pages
                        .extend(pages.into_iter().map(|page| page.to_string()));
                }
            }
            LogRecord::BeginCheckpoint { .. } => break,
            _ => {}
        }
    }

    Ok(result)
}

/// Prints the master record and last checkpoint of the log at `path`.
pub fn run(path: &Path, format: &str) -> Result<(), CliError> {
    let log = open_log(path)?;
    let result = inspect_log(&log)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Log: {}", path.display());
    println!("Log end: {}", result.log_end);
    println!();

    println!("Records:");
    for (record_type, count) in &result.record_counts {
        println!("  {:16} {}", record_type, count);
    }
    println!();

    if result.master_checkpoint == Lsn::MASTER.as_u64() {
        println!("No checkpoint taken");
        return Ok(());
    }

    println!("Checkpoint at LSN {}", result.master_checkpoint);
    if let Some(counter) = result.txn_counter {
        println!("  Next transaction: {}", counter);
    }
    println!("  End records: {}", result.end_records);
    println!();

    println!("Dirty pages ({}):", result.dirty_pages.len());
    for (page, rec_lsn) in &result.dirty_pages {
        println!("  {} rec_lsn={}", page, rec_lsn);
    }
    println!();

    println!("Transactions ({}):", result.transactions.len());
    for (txn, info) in &result.transactions {
        print!("  txn={} status={}", txn, info.status);
        if let Some(last) = info.last_lsn {
            print!(" last_lsn={}", last);
        }
        if !info.touched_pages.is_empty() {
            print!(" pages=[{}]", info.touched_pages.join(", "));
        }
        println!();
    }

    Ok(())
}
