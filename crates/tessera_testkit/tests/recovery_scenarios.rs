//! End-to-end crash and restart scenarios.

use std::sync::Arc;
use tessera_core::buffer::{DiskSpaceManager, MemoryDiskManager};
use tessera_core::log::{LogManager, LogRecord, LogRecordType};
use tessera_core::transaction::TransactionStatus;
use tessera_core::{Config, CoreError};
use tessera_testkit::prelude::*;

fn record_types(engine: &TestEngine) -> Vec<LogRecordType> {
    engine
        .log()
        .iter()
        .map(|item| item.unwrap().1.record_type())
        .collect()
}

#[test]
fn uncommitted_write_is_undone_and_committed_write_is_redone() {
    let engine = TestEngine::memory();
    setup_pages(&engine, 2).unwrap();
    let p = page(0);
    let q = page(1);

    // T1 writes P and crashes before committing, after P reached disk.
    let t1 = engine.begin();
    engine.write(&t1, p, 0, b"XXXXXXXX").unwrap();
    engine.flush_pages().unwrap();
    let engine = engine.crash_and_recover().unwrap();
    assert_eq!(engine.read(p, 0, 8).unwrap(), vec![0; 8]);
    assert!(engine.recovery.transaction_table().is_empty());

    // T2 writes Q and commits; Q never reaches disk before the crash.
    let t2 = engine.begin();
    engine.write(&t2, q, 0, b"YYYYYYYY").unwrap();
    engine.commit(&t2).unwrap();

    let crashed = engine.crash().unwrap();
    let undo = crashed.recovery.restart().unwrap();
    assert!(undo.losers().is_empty());
    assert_eq!(crashed.read(q, 0, 8).unwrap(), b"YYYYYYYY");
    undo.run().unwrap();
    assert_eq!(crashed.read(q, 0, 8).unwrap(), b"YYYYYYYY");
    assert_eq!(crashed.read(p, 0, 8).unwrap(), vec![0; 8]);
}

#[test]
fn interleaved_losers_are_undone_newest_first() {
    let engine = TestEngine::memory();
    setup_pages(&engine, 3).unwrap();
    let a = engine.begin();
    let b = engine.begin();
    engine.write(&a, page(0), 0, b"a1").unwrap();
    engine.write(&b, page(1), 0, b"b1").unwrap();
    engine.write(&a, page(0), 2, b"a2").unwrap();
    engine.write(&b, page(2), 0, b"b2").unwrap();
    engine.flush_pages().unwrap();

    let crashed = engine.crash().unwrap();
    let resume = crashed.log().next_lsn();
    let undo = crashed.recovery.restart().unwrap();
    assert_eq!(undo.losers(), vec![a.id(), b.id()]);
    undo.run().unwrap();

    let undone_pages: Vec<u64> = crashed
        .log()
        .scan_from(resume)
        .map(|item| item.unwrap().1)
        .filter(|record| record.record_type() == LogRecordType::UndoUpdatePage)
        .filter_map(|record| record.page_num().map(|p| p.index()))
        .collect();
    assert_eq!(undone_pages, vec![2, 0, 1, 0]);
    for i in 0..3 {
        assert_eq!(crashed.read(page(i), 0, 4).unwrap(), vec![0; 4]);
    }
}

#[test]
fn crash_during_restart_undo_is_recoverable() {
    let engine = TestEngine::memory();
    setup_pages(&engine, 1).unwrap();
    let txn = engine.begin();
    for i in 0..4u8 {
        engine
            .write(&txn, page(0), u16::from(i) * 4, &[i + 1; 4])
            .unwrap();
    }
    engine.flush_pages().unwrap();

    // First restart gets through analysis and redo, then the machine dies
    // before the undo pass.
    let first = engine.crash().unwrap();
    drop(first.recovery.restart().unwrap());
    first.flush_log().unwrap();

    let second = first.crash_and_recover().unwrap();
    assert_eq!(second.read(page(0), 0, 16).unwrap(), vec![0; 16]);
    let ends = record_types(&second)
        .into_iter()
        .filter(|kind| *kind == LogRecordType::End)
        .count();
    // Setup transaction plus the loser.
    assert_eq!(ends, 2);
}

#[test]
fn committed_but_not_ended_transaction_is_finished() {
    let engine = TestEngine::memory();
    setup_pages(&engine, 1).unwrap();
    let txn = engine.begin();
    engine.write(&txn, page(0), 0, b"done").unwrap();
    engine.recovery.commit(txn.id()).unwrap();
    assert_eq!(txn.status(), TransactionStatus::Committing);

    let recovered = engine.crash_and_recover().unwrap();
    assert_eq!(recovered.read(page(0), 0, 4).unwrap(), b"done");
    let last_end = recovered
        .log()
        .iter()
        .map(|item| item.unwrap().1)
        .filter(|record| matches!(record, LogRecord::End { .. }))
        .last()
        .unwrap();
    assert_eq!(last_end.txn(), Some(txn.id()));
}

#[test]
fn torn_log_tail_is_discarded() {
    let (backend, handle) = CrashableBackend::new();
    let config = Config::default().page_size(256);
    let disk = Arc::new(MemoryDiskManager::new(config.page_size));
    let engine = TestEngine::from_parts(Box::new(backend), Arc::clone(&disk), config.clone()).unwrap();
    engine.recovery.initialize().unwrap();
    setup_pages(&engine, 1).unwrap();

    let committed = engine.begin();
    engine.write(&committed, page(0), 0, b"safe").unwrap();
    engine.commit(&committed).unwrap();

    let torn = engine.begin();
    engine.write(&torn, page(0), 8, b"torn").unwrap();
    handle.crash_after(5);
    let err = engine.recovery.commit(torn.id()).unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    assert!(handle.has_crashed());

    let (backend, _) = CrashableBackend::with_data(handle.surviving_bytes());
    let recovered = TestEngine::from_parts(Box::new(backend), disk, config).unwrap();
    recovered.recovery.restart().unwrap().run().unwrap();
    assert_eq!(recovered.read(page(0), 0, 4).unwrap(), b"safe");
    assert_eq!(recovered.read(page(0), 8, 4).unwrap(), vec![0; 4]);
}

#[test]
fn checkpoint_tables_survive_a_restart() {
    let engine = TestEngine::memory_with(
        Config::default()
            .page_size(256)
            .checkpoint_record_budget(64),
    );
    setup_pages(&engine, 6).unwrap();
    let writers: Vec<_> = (0..3).map(|_| engine.begin()).collect();
    for (i, txn) in writers.iter().enumerate() {
        let first = page(2 * i as u64);
        let second = page(2 * i as u64 + 1);
        engine.write(txn, first, 0, b"one").unwrap();
        engine.write(txn, second, 0, b"two").unwrap();
    }
    let dirty = engine.recovery.dirty_page_table();
    let table = engine.recovery.transaction_table();
    let begin = engine.recovery.checkpoint().unwrap();

    let end_records = engine
        .log()
        .scan_from(begin)
        .filter(|item| matches!(item, Ok((_, LogRecord::EndCheckpoint { .. }))))
        .count();
    assert!(end_records > 1);

    let crashed = engine.crash().unwrap();
    let undo = crashed.recovery.restart().unwrap();
    let recovered = crashed.recovery.transaction_table();
    for (id, summary) in &table {
        let after = &recovered[id];
        assert_eq!(after.status, TransactionStatus::RecoveryAborting);
        assert_eq!(after.touched_pages, summary.touched_pages);
        assert!(after.last_lsn > summary.last_lsn);
    }
    for page_num in dirty.keys() {
        assert!(crashed.recovery.dirty_page_table().contains_key(page_num));
    }
    undo.run().unwrap();
    for i in 0..6 {
        assert_eq!(crashed.read(page(i), 0, 3).unwrap(), vec![0; 3]);
    }
}

#[test]
fn rollback_to_savepoint_is_durable() {
    let engine = TestEngine::memory();
    setup_pages(&engine, 1).unwrap();
    let txn = engine.begin();
    engine.write(&txn, page(0), 0, b"base").unwrap();
    engine.recovery.savepoint(txn.id(), "sp").unwrap();
    engine.write(&txn, page(0), 4, b"temp").unwrap();
    engine.recovery.rollback_to_savepoint(txn.id(), "sp").unwrap();
    engine.commit(&txn).unwrap();

    let recovered = engine.crash_and_recover().unwrap();
    assert_eq!(recovered.read(page(0), 0, 8).unwrap(), b"base\0\0\0\0");
}

#[test]
fn freed_page_stays_free_after_restart() {
    let engine = TestEngine::memory();
    setup_pages(&engine, 2).unwrap();
    let txn = engine.begin();
    engine.write(&txn, page(1), 0, b"bye").unwrap();
    engine.free_page(&txn, page(1)).unwrap();
    engine.commit(&txn).unwrap();

    let recovered = engine.crash_and_recover().unwrap();
    assert!(!recovered.disk.is_page_allocated(page(1)));
    assert!(recovered.disk.is_page_allocated(page(0)));
}

#[test]
fn close_leaves_a_clean_checkpoint() {
    let engine = TestEngine::file();
    setup_pages(&engine, 1).unwrap();
    let txn = engine.begin();
    engine.write(&txn, page(0), 0, b"closed").unwrap();
    engine.commit(&txn).unwrap();
    engine.recovery.close().unwrap();

    let master = engine.log().master_record().unwrap();
    assert_eq!(
        engine.log().fetch(master).unwrap().record_type(),
        LogRecordType::BeginCheckpoint
    );
    let recovered = engine.crash_and_recover().unwrap();
    assert_eq!(recovered.read(page(0), 0, 6).unwrap(), b"closed");
}

#[test]
fn damaged_log_is_rejected() {
    let engine = TestEngine::memory();
    setup_pages(&engine, 1).unwrap();
    let mut bytes = engine.log().durable_contents().unwrap();
    // Last byte belongs to the checksum of the last record.
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;

    let result = LogManager::open(
        Box::new(tessera_storage::InMemoryBackend::with_data(bytes)),
        engine.config(),
    );
    let err = result.unwrap_err();
    assert!(err.is_fatal(), "unexpected error {err:?}");
}
