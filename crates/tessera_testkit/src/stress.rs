//! Stress runs for the lock manager.
//!
//! Threads run transactions that lock random tables through the lock
//! policy and check, after every grant, that the granted locks on that
//! table are pairwise compatible. Tables are locked in ascending order so
//! the run cannot deadlock.

use rand::seq::index::sample;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tessera_core::concurrency::{ensure_sufficient_lock_held, LockContext, LockManager, LockType};
use tessera_core::transaction::TransactionManager;
use tessera_core::CoreResult;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Transactions that ran to completion.
    pub transactions: usize,
    /// Locks granted, including intent locks.
    pub grants: usize,
    /// Grants that broke compatibility with another transaction's lock.
    pub violations: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub transactions_per_second: f64,
}

impl StressTestResult {
    fn new(transactions: usize, grants: usize, violations: usize, duration: Duration) -> Self {
        let transactions_per_second = if duration.as_secs_f64() > 0.0 {
            transactions as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            transactions,
            grants,
            violations,
            duration,
            transactions_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Transactions: {}", self.transactions);
        println!("Grants: {}", self.grants);
        println!("Violations: {}", self.violations);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} txn/sec", self.transactions_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub transactions: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of tables under the database.
    pub tables: u64,
    /// Tables locked per transaction.
    pub locks_per_transaction: usize,
    /// Probability that a table lock is exclusive.
    pub write_ratio: f64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            transactions: 200,
            threads: 4,
            tables: 8,
            locks_per_transaction: 3,
            write_ratio: 0.3,
        }
    }
}

/// Runs the lock stress workload and reports what it saw.
pub fn stress_table_locks(config: &StressConfig) -> CoreResult<StressTestResult> {
    let locks = Arc::new(LockManager::new());
    let transactions = Arc::new(TransactionManager::new(Arc::clone(&locks)));
    let grants = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));
    let tables = usize::try_from(config.tables).unwrap_or(usize::MAX).max(1);
    let per_txn = config.locks_per_transaction.clamp(1, tables);

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let locks = Arc::clone(&locks);
            let transactions = Arc::clone(&transactions);
            let grants = Arc::clone(&grants);
            let violations = Arc::clone(&violations);
            let config = config.clone();
            thread::spawn(move || -> CoreResult<usize> {
                let mut rng = rand::thread_rng();
                let database = locks.database_context();
                for _ in 0..config.transactions {
                    let txn = transactions.begin();
                    let mut picked = sample(&mut rng, tables, per_txn).into_vec();
                    picked.sort_unstable();
                    for table in picked {
                        let ctx = database.child_context(&format!("table{table}"), table as u64);
                        let request = if rng.gen_bool(config.write_ratio) {
                            LockType::Exclusive
                        } else {
                            LockType::Shared
                        };
                        ensure_sufficient_lock_held(&ctx, Some(&txn), request)?;
                        grants.fetch_add(1, Ordering::Relaxed);
                        if !granted_locks_compatible(&locks, &ctx) {
                            violations.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    txn.cleanup();
                }
                Ok(config.transactions)
            })
        })
        .collect();

    let mut finished = 0;
    for handle in handles {
        finished += handle.join().expect("stress thread panicked")?;
    }

    Ok(StressTestResult::new(
        finished,
        grants.load(Ordering::Relaxed),
        violations.load(Ordering::Relaxed),
        start.elapsed(),
    ))
}

fn granted_locks_compatible(locks: &LockManager, ctx: &LockContext) -> bool {
    let granted = locks.locks_on(&ctx.name());
    granted.iter().enumerate().all(|(i, a)| {
        granted[i + 1..]
            .iter()
            .all(|b| a.txn == b.txn || LockType::compatible(a.lock_type, b.lock_type))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_run_has_no_violations() {
        let result = stress_table_locks(&StressConfig {
            transactions: 20,
            threads: 3,
            tables: 4,
            locks_per_transaction: 2,
            write_ratio: 0.5,
        })
        .unwrap();
        assert_eq!(result.transactions, 60);
        assert_eq!(result.violations, 0);
        assert!(result.grants >= 120);
    }
}
