//! Verify command implementation.

use super::{open_log, CliError};
use std::collections::HashMap;
use std::path::Path;
use tessera_core::log::{LogManager, LogRecord, LogRecordType};
use tessera_core::{Lsn, TransactionId};
use tracing::debug;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Records read, master included.
    pub records: usize,
    /// Distinct transactions seen.
    pub transactions: usize,
    /// Problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Returns true if no problems were found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Walks the whole log and checks its internal links.
///
/// Every record must decode, each transaction's `prev_lsn` must point at
/// the transaction's previous record, compensation records must point
/// backwards, and the master record must point at a begin-checkpoint.
pub fn verify_log(log: &LogManager) -> VerifyResult {
    let mut result = VerifyResult::default();
    let mut last_seen: HashMap<TransactionId, Lsn> = HashMap::new();
    let mut seen = 0usize;

    for item in log.iter() {
        let (lsn, record) = match item {
            Ok(entry) => entry,
            Err(e) => {
                result.errors.push(format!("unreadable record: {e}"));
                break;
            }
        };
        result.records += 1;

        if let Some(next) = record.undo_next_lsn() {
            if next >= lsn {
                result
                    .errors
                    .push(format!("{lsn}: undo_next_lsn {next} does not point backwards"));
            }
        }

        let Some(txn) = record.txn() else {
            continue;
        };
        let expected = last_seen.get(&txn).copied();
        if expected.is_none() {
            seen += 1;
        }
        if record.prev_lsn() != expected {
            result.errors.push(format!(
                "{lsn}: txn {txn} prev_lsn is {:?}, expected {:?}",
                record.prev_lsn(),
                expected
            ));
        }
        if record.record_type() == LogRecordType::End {
            last_seen.remove(&txn);
        } else {
            last_seen.insert(txn, lsn);
        }
    }
    result.transactions = seen;

    match log.master_record() {
        Ok(master) if master == Lsn::MASTER => {}
        Ok(master) => match log.fetch(master) {
            Ok(LogRecord::BeginCheckpoint { .. }) => {}
            Ok(other) => result.errors.push(format!(
                "master record points at {master}, which holds {:?}",
                other.record_type()
            )),
            Err(e) => result
                .errors
                .push(format!("master record points at {master}: {e}")),
        },
        Err(e) => result.errors.push(format!("unreadable master record: {e}")),
    }

    debug!(records = result.records, errors = result.errors.len(), "verified log");
    result
}

/// Verifies the log at `path` and prints the outcome.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying log: {}", path.display());
    println!();

    let log = open_log(path)?;
    let result = verify_log(&log);

    println!("Records: {}", result.records);
    println!("Transactions: {}", result.transactions);
    println!();

    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        for error in &result.errors {
            println!("  - {}", error);
        }
        Err(CliError::VerifyFailed(result.errors.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::Config;
    use tessera_storage::InMemoryBackend;

    fn open() -> LogManager {
        LogManager::open(Box::new(InMemoryBackend::new()), &Config::default()).unwrap()
    }

    #[test]
    fn linked_chains_pass() {
        let log = open();
        let txn = TransactionId::new(1);
        let commit = log
            .append(&LogRecord::Commit {
                txn,
                prev_lsn: None,
            })
            .unwrap();
        log.append(&LogRecord::End {
            txn,
            prev_lsn: Some(commit),
        })
        .unwrap();
        log.flush_to_lsn(log.next_lsn()).unwrap();

        let result = verify_log(&log);
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.records, 3);
        assert_eq!(result.transactions, 1);
    }

    #[test]
    fn broken_chain_is_reported() {
        let log = open();
        let txn = TransactionId::new(1);
        log.append(&LogRecord::Abort {
            txn,
            prev_lsn: None,
        })
        .unwrap();
        log.append(&LogRecord::End {
            txn,
            prev_lsn: None,
        })
        .unwrap();
        log.flush_to_lsn(log.next_lsn()).unwrap();

        let result = verify_log(&log);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("prev_lsn"));
    }

    #[test]
    fn master_must_point_at_a_checkpoint() {
        let log = open();
        let commit = log
            .append(&LogRecord::Commit {
                txn: TransactionId::new(2),
                prev_lsn: None,
            })
            .unwrap();
        log.flush_to_lsn(log.next_lsn()).unwrap();
        log.rewrite_master_record(commit).unwrap();

        let result = verify_log(&log);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("master record"));
    }
}
