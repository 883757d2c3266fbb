//! Log record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionStatus;
use crate::types::{Lsn, PageNum, PartitionId, TransactionId};
use std::collections::BTreeMap;

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"TLOG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Fixed bytes of an end-checkpoint payload: three u32 entry counts.
const END_CHECKPOINT_FIXED: usize = 12;
/// Dirty-page entry: page u64 + recLSN u64.
const DPT_ENTRY_SIZE: usize = 16;
/// Transaction entry: id u64 + status u8 + lastLSN u64.
const TXN_ENTRY_SIZE: usize = 17;
/// Touched-pages header: id u64 + page count u32.
const TOUCHED_TXN_SIZE: usize = 12;
/// One touched page number.
const TOUCHED_PAGE_SIZE: usize = 8;

/// Type byte of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogRecordType {
    /// Pointer to the latest checkpoint.
    Master = 1,
    /// Partition allocation.
    AllocPart = 2,
    /// Compensation for a partition allocation.
    UndoAllocPart = 3,
    /// Partition deallocation.
    FreePart = 4,
    /// Compensation for a partition deallocation.
    UndoFreePart = 5,
    /// Page allocation.
    AllocPage = 6,
    /// Compensation for a page allocation.
    UndoAllocPage = 7,
    /// Page deallocation.
    FreePage = 8,
    /// Compensation for a page deallocation.
    UndoFreePage = 9,
    /// Byte-range update of a page.
    UpdatePage = 10,
    /// Compensation for a page update.
    UndoUpdatePage = 11,
    /// Transaction commit.
    Commit = 12,
    /// Transaction abort.
    Abort = 13,
    /// Transaction end.
    End = 14,
    /// Start of a checkpoint.
    BeginCheckpoint = 15,
    /// Checkpoint contents.
    EndCheckpoint = 16,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Master),
            2 => Some(Self::AllocPart),
            3 => Some(Self::UndoAllocPart),
            4 => Some(Self::FreePart),
            5 => Some(Self::UndoFreePart),
            6 => Some(Self::AllocPage),
            7 => Some(Self::UndoAllocPage),
            8 => Some(Self::FreePage),
            9 => Some(Self::UndoFreePage),
            10 => Some(Self::UpdatePage),
            11 => Some(Self::UndoUpdatePage),
            12 => Some(Self::Commit),
            13 => Some(Self::Abort),
            14 => Some(Self::End),
            15 => Some(Self::BeginCheckpoint),
            16 => Some(Self::EndCheckpoint),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for compensation records.
    #[must_use]
    pub const fn is_compensation(self) -> bool {
        matches!(
            self,
            Self::UndoAllocPart
                | Self::UndoFreePart
                | Self::UndoAllocPage
                | Self::UndoFreePage
                | Self::UndoUpdatePage
        )
    }
}

/// A log record.
///
/// `prev_lsn` links a transaction's records backwards; `None` marks its first
/// record. Compensation records (`Undo*`) also carry `undo_next_lsn`, the
/// next record of the transaction still to be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Pointer to the begin-checkpoint record restart starts from.
    Master {
        /// Latest complete checkpoint.
        last_checkpoint: Lsn,
    },

    /// A partition was allocated.
    AllocPart {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The partition.
        partition: PartitionId,
    },

    /// Compensation for [`LogRecord::AllocPart`]: frees the partition.
    UndoAllocPart {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The partition.
        partition: PartitionId,
        /// Next record to undo.
        undo_next_lsn: Option<Lsn>,
    },

    /// A partition was freed.
    FreePart {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The partition.
        partition: PartitionId,
    },

    /// Compensation for [`LogRecord::FreePart`]: reallocates the partition.
    UndoFreePart {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The partition.
        partition: PartitionId,
        /// Next record to undo.
        undo_next_lsn: Option<Lsn>,
    },

    /// A page was allocated.
    AllocPage {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The page.
        page: PageNum,
    },

    /// Compensation for [`LogRecord::AllocPage`]: frees the page.
    UndoAllocPage {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The page.
        page: PageNum,
        /// Next record to undo.
        undo_next_lsn: Option<Lsn>,
    },

    /// A page was freed.
    FreePage {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The page.
        page: PageNum,
    },

    /// Compensation for [`LogRecord::FreePage`]: reallocates the page.
    UndoFreePage {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The page.
        page: PageNum,
        /// Next record to undo.
        undo_next_lsn: Option<Lsn>,
    },

    /// A byte range of a page changed.
    ///
    /// A record without `after` is undo-only and one without `before` is
    /// redo-only; large writes are logged as such a pair.
    UpdatePage {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The page.
        page: PageNum,
        /// Offset in the page's data region.
        offset: u16,
        /// Bytes before the write.
        before: Option<Vec<u8>>,
        /// Bytes after the write.
        after: Option<Vec<u8>>,
    },

    /// Compensation for [`LogRecord::UpdatePage`]: restores the old bytes.
    UndoUpdatePage {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
        /// The page.
        page: PageNum,
        /// Offset in the page's data region.
        offset: u16,
        /// Bytes written back.
        after: Vec<u8>,
        /// Next record to undo.
        undo_next_lsn: Option<Lsn>,
    },

    /// The transaction committed.
    Commit {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
    },

    /// The transaction aborted.
    Abort {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
    },

    /// The transaction finished.
    End {
        /// Owning transaction.
        txn: TransactionId,
        /// Previous record of the transaction.
        prev_lsn: Option<Lsn>,
    },

    /// A checkpoint started.
    BeginCheckpoint {
        /// Next transaction id at checkpoint time.
        txn_counter: u64,
    },

    /// Part of a checkpoint's table snapshot.
    EndCheckpoint {
        /// Page to recLSN.
        dirty_pages: BTreeMap<PageNum, Lsn>,
        /// Transaction to status and lastLSN.
        transactions: BTreeMap<TransactionId, (TransactionStatus, Option<Lsn>)>,
        /// Transaction to pages it has touched.
        touched_pages: BTreeMap<TransactionId, Vec<PageNum>>,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Master { .. } => LogRecordType::Master,
            Self::AllocPart { .. } => LogRecordType::AllocPart,
            Self::UndoAllocPart { .. } => LogRecordType::UndoAllocPart,
            Self::FreePart { .. } => LogRecordType::FreePart,
            Self::UndoFreePart { .. } => LogRecordType::UndoFreePart,
            Self::AllocPage { .. } => LogRecordType::AllocPage,
            Self::UndoAllocPage { .. } => LogRecordType::UndoAllocPage,
            Self::FreePage { .. } => LogRecordType::FreePage,
            Self::UndoFreePage { .. } => LogRecordType::UndoFreePage,
            Self::UpdatePage { .. } => LogRecordType::UpdatePage,
            Self::UndoUpdatePage { .. } => LogRecordType::UndoUpdatePage,
            Self::Commit { .. } => LogRecordType::Commit,
            Self::Abort { .. } => LogRecordType::Abort,
            Self::End { .. } => LogRecordType::End,
            Self::BeginCheckpoint { .. } => LogRecordType::BeginCheckpoint,
            Self::EndCheckpoint { .. } => LogRecordType::EndCheckpoint,
        }
    }

    /// Returns the owning transaction, if the record has one.
    #[must_use]
    pub fn txn(&self) -> Option<TransactionId> {
        match self {
            Self::AllocPart { txn, .. }
            | Self::UndoAllocPart { txn, .. }
            | Self::FreePart { txn, .. }
            | Self::UndoFreePart { txn, .. }
            | Self::AllocPage { txn, .. }
            | Self::UndoAllocPage { txn, .. }
            | Self::FreePage { txn, .. }
            | Self::UndoFreePage { txn, .. }
            | Self::UpdatePage { txn, .. }
            | Self::UndoUpdatePage { txn, .. }
            | Self::Commit { txn, .. }
            | Self::Abort { txn, .. }
            | Self::End { txn, .. } => Some(*txn),
            Self::Master { .. } | Self::BeginCheckpoint { .. } | Self::EndCheckpoint { .. } => {
                None
            }
        }
    }

    /// Returns the previous record of the same transaction.
    #[must_use]
    pub fn prev_lsn(&self) -> Option<Lsn> {
        match self {
            Self::AllocPart { prev_lsn, .. }
            | Self::UndoAllocPart { prev_lsn, .. }
            | Self::FreePart { prev_lsn, .. }
            | Self::UndoFreePart { prev_lsn, .. }
            | Self::AllocPage { prev_lsn, .. }
            | Self::UndoAllocPage { prev_lsn, .. }
            | Self::FreePage { prev_lsn, .. }
            | Self::UndoFreePage { prev_lsn, .. }
            | Self::UpdatePage { prev_lsn, .. }
            | Self::UndoUpdatePage { prev_lsn, .. }
            | Self::Commit { prev_lsn, .. }
            | Self::Abort { prev_lsn, .. }
            | Self::End { prev_lsn, .. } => *prev_lsn,
            Self::Master { .. } | Self::BeginCheckpoint { .. } | Self::EndCheckpoint { .. } => {
                None
            }
        }
    }

    /// Returns the next record to undo, for compensation records.
    #[must_use]
    pub fn undo_next_lsn(&self) -> Option<Lsn> {
        match self {
            Self::UndoAllocPart { undo_next_lsn, .. }
            | Self::UndoFreePart { undo_next_lsn, .. }
            | Self::UndoAllocPage { undo_next_lsn, .. }
            | Self::UndoFreePage { undo_next_lsn, .. }
            | Self::UndoUpdatePage { undo_next_lsn, .. } => *undo_next_lsn,
            _ => None,
        }
    }

    /// Returns the next record of the transaction to visit when rolling back
    /// past this one.
    ///
    /// For compensation records this is `undo_next_lsn`, even when it is
    /// `None`, so already compensated work is skipped.
    #[must_use]
    pub fn undo_chain_next(&self) -> Option<Lsn> {
        if self.record_type().is_compensation() {
            self.undo_next_lsn()
        } else {
            self.prev_lsn()
        }
    }

    /// Returns the page the record touches.
    #[must_use]
    pub fn page_num(&self) -> Option<PageNum> {
        match self {
            Self::AllocPage { page, .. }
            | Self::UndoAllocPage { page, .. }
            | Self::FreePage { page, .. }
            | Self::UndoFreePage { page, .. }
            | Self::UpdatePage { page, .. }
            | Self::UndoUpdatePage { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Returns the partition the record allocates or frees.
    #[must_use]
    pub fn partition(&self) -> Option<PartitionId> {
        match self {
            Self::AllocPart { partition, .. }
            | Self::UndoAllocPart { partition, .. }
            | Self::FreePart { partition, .. }
            | Self::UndoFreePart { partition, .. } => Some(*partition),
            _ => None,
        }
    }

    /// Returns true if replaying the record changes disk or page state.
    #[must_use]
    pub fn is_redoable(&self) -> bool {
        match self {
            Self::UpdatePage { after, .. } => after.is_some(),
            Self::AllocPart { .. }
            | Self::UndoAllocPart { .. }
            | Self::FreePart { .. }
            | Self::UndoFreePart { .. }
            | Self::AllocPage { .. }
            | Self::UndoAllocPage { .. }
            | Self::FreePage { .. }
            | Self::UndoFreePage { .. }
            | Self::UndoUpdatePage { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the record can be rolled back.
    ///
    /// Compensation records never are.
    #[must_use]
    pub fn is_undoable(&self) -> bool {
        match self {
            Self::UpdatePage { before, .. } => before.is_some(),
            Self::AllocPart { .. }
            | Self::FreePart { .. }
            | Self::AllocPage { .. }
            | Self::FreePage { .. } => true,
            _ => false,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a byte range is longer than `u32::MAX`.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Master { last_checkpoint } => {
                buf.extend_from_slice(&last_checkpoint.as_u64().to_le_bytes());
            }

            Self::AllocPart {
                txn,
                prev_lsn,
                partition,
            }
            | Self::FreePart {
                txn,
                prev_lsn,
                partition,
            } => {
                put_chain(&mut buf, *txn, *prev_lsn);
                buf.extend_from_slice(&partition.as_u32().to_le_bytes());
            }

            Self::UndoAllocPart {
                txn,
                prev_lsn,
                partition,
                undo_next_lsn,
            }
            | Self::UndoFreePart {
                txn,
                prev_lsn,
                partition,
                undo_next_lsn,
            } => {
                put_chain(&mut buf, *txn, *prev_lsn);
                buf.extend_from_slice(&partition.as_u32().to_le_bytes());
                put_lsn(&mut buf, *undo_next_lsn);
            }

            Self::AllocPage {
                txn,
                prev_lsn,
                page,
            }
            | Self::FreePage {
                txn,
                prev_lsn,
                page,
            } => {
                put_chain(&mut buf, *txn, *prev_lsn);
                buf.extend_from_slice(&page.as_u64().to_le_bytes());
            }

            Self::UndoAllocPage {
                txn,
                prev_lsn,
                page,
                undo_next_lsn,
            }
            | Self::UndoFreePage {
                txn,
                prev_lsn,
                page,
                undo_next_lsn,
            } => {
                put_chain(&mut buf, *txn, *prev_lsn);
                buf.extend_from_slice(&page.as_u64().to_le_bytes());
                put_lsn(&mut buf, *undo_next_lsn);
            }

            Self::UpdatePage {
                txn,
                prev_lsn,
                page,
                offset,
                before,
                after,
            } => {
                put_chain(&mut buf, *txn, *prev_lsn);
                buf.extend_from_slice(&page.as_u64().to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                put_optional_bytes(&mut buf, before.as_deref())?;
                put_optional_bytes(&mut buf, after.as_deref())?;
            }

            Self::UndoUpdatePage {
                txn,
                prev_lsn,
                page,
                offset,
                after,
                undo_next_lsn,
            } => {
                put_chain(&mut buf, *txn, *prev_lsn);
                buf.extend_from_slice(&page.as_u64().to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                put_bytes(&mut buf, after)?;
                put_lsn(&mut buf, *undo_next_lsn);
            }

            Self::Commit { txn, prev_lsn }
            | Self::Abort { txn, prev_lsn }
            | Self::End { txn, prev_lsn } => {
                put_chain(&mut buf, *txn, *prev_lsn);
            }

            Self::BeginCheckpoint { txn_counter } => {
                buf.extend_from_slice(&txn_counter.to_le_bytes());
            }

            Self::EndCheckpoint {
                dirty_pages,
                transactions,
                touched_pages,
            } => {
                put_count(&mut buf, dirty_pages.len())?;
                put_count(&mut buf, transactions.len())?;
                put_count(&mut buf, touched_pages.len())?;
                for (page, rec_lsn) in dirty_pages {
                    buf.extend_from_slice(&page.as_u64().to_le_bytes());
                    buf.extend_from_slice(&rec_lsn.as_u64().to_le_bytes());
                }
                for (txn, (status, last_lsn)) in transactions {
                    buf.extend_from_slice(&txn.as_u64().to_le_bytes());
                    buf.push(status.as_byte());
                    put_lsn(&mut buf, *last_lsn);
                }
                for (txn, pages) in touched_pages {
                    buf.extend_from_slice(&txn.as_u64().to_le_bytes());
                    put_count(&mut buf, pages.len())?;
                    for page in pages {
                        buf.extend_from_slice(&page.as_u64().to_le_bytes());
                    }
                }
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] if the payload is short, has
    /// trailing bytes, or holds an invalid value.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut r = Reader::new(payload);

        let record = match record_type {
            LogRecordType::Master => Self::Master {
                last_checkpoint: Lsn::new(r.u64()?),
            },

            LogRecordType::AllocPart | LogRecordType::FreePart => {
                let (txn, prev_lsn) = r.chain()?;
                let partition = PartitionId::new(r.u32()?);
                if record_type == LogRecordType::AllocPart {
                    Self::AllocPart {
                        txn,
                        prev_lsn,
                        partition,
                    }
                } else {
                    Self::FreePart {
                        txn,
                        prev_lsn,
                        partition,
                    }
                }
            }

            LogRecordType::UndoAllocPart | LogRecordType::UndoFreePart => {
                let (txn, prev_lsn) = r.chain()?;
                let partition = PartitionId::new(r.u32()?);
                let undo_next_lsn = r.lsn()?;
                if record_type == LogRecordType::UndoAllocPart {
                    Self::UndoAllocPart {
                        txn,
                        prev_lsn,
                        partition,
                        undo_next_lsn,
                    }
                } else {
                    Self::UndoFreePart {
                        txn,
                        prev_lsn,
                        partition,
                        undo_next_lsn,
                    }
                }
            }

            LogRecordType::AllocPage | LogRecordType::FreePage => {
                let (txn, prev_lsn) = r.chain()?;
                let page = PageNum::from_raw(r.u64()?);
                if record_type == LogRecordType::AllocPage {
                    Self::AllocPage {
                        txn,
                        prev_lsn,
                        page,
                    }
                } else {
                    Self::FreePage {
                        txn,
                        prev_lsn,
                        page,
                    }
                }
            }

            LogRecordType::UndoAllocPage | LogRecordType::UndoFreePage => {
                let (txn, prev_lsn) = r.chain()?;
                let page = PageNum::from_raw(r.u64()?);
                let undo_next_lsn = r.lsn()?;
                if record_type == LogRecordType::UndoAllocPage {
                    Self::UndoAllocPage {
                        txn,
                        prev_lsn,
                        page,
                        undo_next_lsn,
                    }
                } else {
                    Self::UndoFreePage {
                        txn,
                        prev_lsn,
                        page,
                        undo_next_lsn,
                    }
                }
            }

            LogRecordType::UpdatePage => {
                let (txn, prev_lsn) = r.chain()?;
                let page = PageNum::from_raw(r.u64()?);
                let offset = r.u16()?;
                let before = r.optional_bytes()?;
                let after = r.optional_bytes()?;
                Self::UpdatePage {
                    txn,
                    prev_lsn,
                    page,
                    offset,
                    before,
                    after,
                }
            }

            LogRecordType::UndoUpdatePage => {
                let (txn, prev_lsn) = r.chain()?;
                let page = PageNum::from_raw(r.u64()?);
                let offset = r.u16()?;
                let after = r.bytes()?;
                let undo_next_lsn = r.lsn()?;
                Self::UndoUpdatePage {
                    txn,
                    prev_lsn,
                    page,
                    offset,
                    after,
                    undo_next_lsn,
                }
            }

            LogRecordType::Commit => {
                let (txn, prev_lsn) = r.chain()?;
                Self::Commit { txn, prev_lsn }
            }

            LogRecordType::Abort => {
                let (txn, prev_lsn) = r.chain()?;
                Self::Abort { txn, prev_lsn }
            }

            LogRecordType::End => {
                let (txn, prev_lsn) = r.chain()?;
                Self::End { txn, prev_lsn }
            }

            LogRecordType::BeginCheckpoint => Self::BeginCheckpoint {
                txn_counter: r.u64()?,
            },

            LogRecordType::EndCheckpoint => {
                let num_dirty = r.u32()?;
                let num_txns = r.u32()?;
                let num_touched = r.u32()?;

                let mut dirty_pages = BTreeMap::new();
                for _ in 0..num_dirty {
                    let page = PageNum::from_raw(r.u64()?);
                    dirty_pages.insert(page, Lsn::new(r.u64()?));
                }
                let mut transactions = BTreeMap::new();
                for _ in 0..num_txns {
                    let txn = TransactionId::new(r.u64()?);
                    let status = TransactionStatus::from_byte(r.u8()?)?;
                    transactions.insert(txn, (status, r.lsn()?));
                }
                let mut touched_pages = BTreeMap::new();
                for _ in 0..num_touched {
                    let txn = TransactionId::new(r.u64()?);
                    let count = r.u32()?;
                    let pages = (0..count)
                        .map(|_| r.u64().map(PageNum::from_raw))
                        .collect::<CoreResult<Vec<_>>>()?;
                    touched_pages.insert(txn, pages);
                }
                Self::EndCheckpoint {
                    dirty_pages,
                    transactions,
                    touched_pages,
                }
            }
        };

        r.finish(record_type)?;
        Ok(record)
    }
}

/// Serialized payload size of an end-checkpoint record.
#[must_use]
pub fn end_checkpoint_size(
    dirty_pages: usize,
    transactions: usize,
    touched_txns: usize,
    touched_pages: usize,
) -> usize {
    END_CHECKPOINT_FIXED
        + dirty_pages * DPT_ENTRY_SIZE
        + transactions * TXN_ENTRY_SIZE
        + touched_txns * TOUCHED_TXN_SIZE
        + touched_pages * TOUCHED_PAGE_SIZE
}

/// Returns true if an end-checkpoint record with these entry counts fits in
/// `budget` payload bytes.
#[must_use]
pub fn fits_in_one_record(
    dirty_pages: usize,
    transactions: usize,
    touched_txns: usize,
    touched_pages: usize,
    budget: usize,
) -> bool {
    end_checkpoint_size(dirty_pages, transactions, touched_txns, touched_pages) <= budget
}

fn put_lsn(buf: &mut Vec<u8>, lsn: Option<Lsn>) {
    buf.extend_from_slice(&Lsn::encode_optional(lsn).to_le_bytes());
}

fn put_chain(buf: &mut Vec<u8>, txn: TransactionId, prev_lsn: Option<Lsn>) {
    buf.extend_from_slice(&txn.as_u64().to_le_bytes());
    put_lsn(buf, prev_lsn);
}

fn put_count(buf: &mut Vec<u8>, count: usize) -> CoreResult<()> {
    let count = u32::try_from(count)
        .map_err(|_| CoreError::invalid_operation("too many entries for one record"))?;
    buf.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> CoreResult<()> {
    put_count(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

fn put_optional_bytes(buf: &mut Vec<u8>, bytes: Option<&[u8]>) -> CoreResult<()> {
    match bytes {
        Some(bytes) => {
            buf.push(1);
            put_bytes(buf, bytes)
        }
        None => {
            buf.push(0);
            Ok(())
        }
    }
}

struct Reader<'a> {
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, cursor: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.cursor + n > self.payload.len() {
            return Err(CoreError::log_corruption("unexpected end of payload"));
        }
        let slice = &self.payload[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CoreResult<u16> {
        let bytes: [u8; 2] = self
            .take(2)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u16"))?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn u32(&mut self) -> CoreResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn lsn(&mut self) -> CoreResult<Option<Lsn>> {
        Ok(Lsn::decode_optional(self.u64()?))
    }

    fn chain(&mut self) -> CoreResult<(TransactionId, Option<Lsn>)> {
        let txn = TransactionId::new(self.u64()?);
        Ok((txn, self.lsn()?))
    }

    fn bytes(&mut self) -> CoreResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn optional_bytes(&mut self) -> CoreResult<Option<Vec<u8>>> {
        match self.u8()? {
            0 => Ok(None),
            1 => self.bytes().map(Some),
            other => Err(CoreError::log_corruption(format!(
                "invalid presence flag {other}"
            ))),
        }
    }

    fn finish(&self, record_type: LogRecordType) -> CoreResult<()> {
        if self.cursor != self.payload.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {record_type:?} record: expected {} bytes, got {}",
                self.cursor,
                self.payload.len()
            )));
        }
        Ok(())
    }
}
