//! Benchmark utilities.

use rand::Rng;
use tessera_core::log::LogRecord;
use tessera_core::{PageNum, PartitionId, TransactionId};

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a chain of page updates for one transaction, without LSNs.
///
/// `prev_lsn` is left empty; callers link the chain as they append.
pub fn update_records(txn: TransactionId, count: usize, size: usize) -> Vec<LogRecord> {
    let partition = PartitionId::new(1);
    (0..count)
        .map(|i| LogRecord::UpdatePage {
            txn,
            prev_lsn: None,
            page: PageNum::new(partition, (i % 16) as u64),
            offset: 0,
            before: Some(random_data(size)),
            after: Some(random_data(size)),
        })
        .collect()
}
