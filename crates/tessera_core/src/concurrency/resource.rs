//! Hierarchical resource names and lock values.

use super::lock_type::LockType;
use crate::types::TransactionId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A path of `(label, id)` segments from the root of the resource tree,
/// e.g. `database/3/30000000017`.
///
/// Identity is carried by the ids alone. Labels are for display, so
/// `("table", 3)` and `("3", 3)` name the same resource.
#[derive(Debug, Clone)]
pub struct ResourceName {
    segments: Vec<(String, u64)>,
}

impl ResourceName {
    /// Creates a top-level name.
    #[must_use]
    pub fn root(label: impl Into<String>, id: u64) -> Self {
        Self {
            segments: vec![(label.into(), id)],
        }
    }

    /// Creates a name from `(label, id)` segments, root first.
    ///
    /// An empty list yields a name no lock context can resolve.
    #[must_use]
    pub fn from_segments(segments: Vec<(String, u64)>) -> Self {
        Self { segments }
    }

    /// Creates the name of a child of `self`.
    #[must_use]
    pub fn child(&self, label: impl Into<String>, id: u64) -> Self {
        let mut segments = self.segments.clone();
        segments.push((label.into(), id));
        Self { segments }
    }

    /// Returns the name of the parent resource, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns the `(label, id)` segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[(String, u64)] {
        &self.segments
    }

    /// Returns the id of the last segment.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.segments.last().map_or(0, |(_, id)| *id)
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Returns true if `self` is a strict descendant of `other`.
    #[must_use]
    pub fn is_descendant_of(&self, other: &ResourceName) -> bool {
        self.segments.len() > other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|((_, a), (_, b))| a == b)
    }

    /// Returns true if `self` is the direct child of `other`.
    #[must_use]
    pub fn is_child_of(&self, other: &ResourceName) -> bool {
        self.segments.len() == other.segments.len() + 1 && self.is_descendant_of(other)
    }
}

impl PartialEq for ResourceName {
    fn eq(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|((_, a), (_, b))| a == b)
    }
}

impl Eq for ResourceName {}

impl Hash for ResourceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.len().hash(state);
        for (_, id) in &self.segments {
            id.hash(state);
        }
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (label, _)) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(label)?;
        }
        Ok(())
    }
}

/// A granted lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// Locked resource.
    pub name: ResourceName,
    /// Granted mode.
    pub lock_type: LockType,
    /// Owning transaction.
    pub txn: TransactionId,
}

impl Lock {
    /// Creates a lock value.
    #[must_use]
    pub fn new(name: ResourceName, lock_type: LockType, txn: TransactionId) -> Self {
        Self {
            name,
            lock_type,
            txn,
        }
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}({})", self.txn, self.lock_type, self.name)
    }
}
