//! Core type definitions for Tessera.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are handed out in increasing order and never reused, even
/// across restarts (the counter is persisted in begin-checkpoint records).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Log sequence number: the byte offset of a record in the log.
///
/// LSN 0 is the master record slot. Every other record lives past it, so a
/// chain that has no predecessor is written as `Option<Lsn>::None` and never
/// as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The fixed position of the master record.
    pub const MASTER: Lsn = Lsn(0);

    /// Creates a new LSN.
    #[must_use]
    pub const fn new(lsn: u64) -> Self {
        Self(lsn)
    }

    /// Returns the raw offset.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Encodes an optional LSN, using 0 for `None`.
    #[must_use]
    pub const fn encode_optional(lsn: Option<Lsn>) -> u64 {
        match lsn {
            Some(Lsn(v)) => v,
            None => 0,
        }
    }

    /// Decodes an optional LSN written by [`Lsn::encode_optional`].
    #[must_use]
    pub const fn decode_optional(raw: u64) -> Option<Lsn> {
        if raw == 0 {
            None
        } else {
            Some(Lsn(raw))
        }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

/// Identifier of a disk partition.
///
/// Partition 0 holds the log itself and is never logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

impl PartitionId {
    /// The partition that stores the log.
    pub const LOG: PartitionId = PartitionId(0);

    /// Creates a new partition ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true for the log partition.
    #[must_use]
    pub const fn is_log(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part:{}", self.0)
    }
}

/// Virtual page number: a partition and a page index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNum(pub u64);

impl PageNum {
    /// Number of page indices reserved for each partition.
    pub const PARTITION_FACTOR: u64 = 10_000_000_000;

    /// Builds a page number from a partition and an index inside it.
    #[must_use]
    pub const fn new(partition: PartitionId, index: u64) -> Self {
        Self(partition.0 as u64 * Self::PARTITION_FACTOR + index)
    }

    /// Wraps a raw page number.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw page number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the partition holding this page.
    #[must_use]
    pub const fn partition(self) -> PartitionId {
        PartitionId((self.0 / Self::PARTITION_FACTOR) as u32)
    }

    /// Returns the index of this page inside its partition.
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0 % Self::PARTITION_FACTOR
    }
}

impl fmt::Display for PageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}.{}", self.partition().0, self.index())
    }
}
