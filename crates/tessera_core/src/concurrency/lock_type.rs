//! Lock modes and their compatibility lattice.

use std::fmt;

/// A lock mode.
///
/// The modes form the lattice `NL < IS, IX < S, SIX < X`, with the intent
/// modes incomparable to `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LockType {
    /// No lock held.
    NoLock = 0,
    /// Intent to take shared locks below.
    IntentShared = 1,
    /// Intent to take exclusive locks below.
    IntentExclusive = 2,
    /// Shared.
    Shared = 3,
    /// Shared, with intent to take exclusive locks below.
    SharedIntentExclusive = 4,
    /// Exclusive.
    Exclusive = 5,
}

use LockType::{
    Exclusive as X, IntentExclusive as IX, IntentShared as IS, NoLock as NL, Shared as S,
    SharedIntentExclusive as SIX,
};

impl LockType {
    /// Every lock mode, weakest first.
    pub const ALL: [LockType; 6] = [NL, IS, IX, S, SIX, X];

    /// Returns true if `a` and `b` can be held on one resource by two
    /// different transactions.
    #[must_use]
    pub const fn compatible(a: LockType, b: LockType) -> bool {
        match (a, b) {
            (NL, _) | (_, NL) => true,
            (IS, X) | (X, IS) => false,
            (IS, _) | (_, IS) => true,
            (IX, IX) => true,
            (IX, _) | (_, IX) => false,
            (S, S) => true,
            _ => false,
        }
    }

    /// Returns the intent mode a parent must hold for a child to hold `self`.
    #[must_use]
    pub const fn parent_lock(self) -> LockType {
        match self {
            NL => NL,
            IS | S => IS,
            IX | SIX | X => IX,
        }
    }

    /// Returns true if holding `parent` on a resource allows holding `child`
    /// on one of its children.
    #[must_use]
    pub const fn can_be_parent(parent: LockType, child: LockType) -> bool {
        match (parent, child) {
            (_, NL) => true,
            (IS, IS | S) => true,
            (IX, _) => true,
            (SIX, IX | SIX | X) => true,
            _ => false,
        }
    }

    /// Returns true if `substitute` grants at least the access of `required`.
    #[must_use]
    pub const fn substitutable(substitute: LockType, required: LockType) -> bool {
        match (substitute, required) {
            (_, NL) => true,
            (X, _) => true,
            (SIX, IS | IX | S | SIX) => true,
            (S, IS | S) => true,
            (IX, IS | IX) => true,
            (IS, IS) => true,
            _ => false,
        }
    }

    /// Returns true for `IS` and `IX`.
    #[must_use]
    pub const fn is_intent(self) -> bool {
        matches!(self, IS | IX)
    }

    /// Short name used in diagnostics.
    #[must_use]
    pub const fn abbreviation(self) -> &'static str {
        match self {
            NL => "NL",
            IS => "IS",
            IX => "IX",
            S => "S",
            SIX => "SIX",
            X => "X",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lock_type() -> impl Strategy<Value = LockType> {
        prop::sample::select(LockType::ALL.to_vec())
    }

    #[test]
    fn compatibility_matrix() {
        let expected = [
            //      NL    IS     IX     S      SIX    X
            [true, true, true, true, true, true],        // NL
            [true, true, true, true, true, false],       // IS
            [true, true, true, false, false, false],     // IX
            [true, true, false, true, false, false],     // S
            [true, true, false, false, false, false],    // SIX
            [true, false, false, false, false, false],   // X
        ];
        for (i, a) in LockType::ALL.iter().enumerate() {
            for (j, b) in LockType::ALL.iter().enumerate() {
                assert_eq!(LockType::compatible(*a, *b), expected[i][j], "{a} vs {b}");
            }
        }
    }

    #[test]
    fn substitutability_examples() {
        assert!(LockType::substitutable(SIX, S));
        assert!(LockType::substitutable(SIX, IX));
        assert!(!LockType::substitutable(S, X));
        assert!(!LockType::substitutable(IX, S));
        assert!(!LockType::substitutable(S, IX));
        for t in LockType::ALL {
            assert!(LockType::substitutable(X, t));
        }
    }

    #[test]
    fn parenting() {
        assert!(LockType::can_be_parent(IS, S));
        assert!(!LockType::can_be_parent(IS, X));
        assert!(LockType::can_be_parent(IX, SIX));
        assert!(LockType::can_be_parent(SIX, X));
        assert!(!LockType::can_be_parent(SIX, S));
        assert!(!LockType::can_be_parent(S, IS));
        assert!(!LockType::can_be_parent(NL, IS));
        for t in LockType::ALL {
            assert!(LockType::can_be_parent(t, NL));
            assert!(LockType::can_be_parent(t.parent_lock(), t) || t == NL);
        }
    }

    proptest! {
        #[test]
        fn compatible_is_symmetric(a in lock_type(), b in lock_type()) {
            prop_assert_eq!(LockType::compatible(a, b), LockType::compatible(b, a));
        }

        #[test]
        fn exclusive_conflicts_with_every_real_lock(a in lock_type()) {
            prop_assert_eq!(LockType::compatible(X, a), a == NL);
        }

        #[test]
        fn substitutable_is_reflexive(a in lock_type()) {
            prop_assert!(LockType::substitutable(a, a));
        }

        #[test]
        fn substitutable_is_antisymmetric(a in lock_type(), b in lock_type()) {
            if LockType::substitutable(a, b) && LockType::substitutable(b, a) {
                prop_assert_eq!(a, b);
            }
        }

        #[test]
        fn substitutable_is_transitive(a in lock_type(), b in lock_type(), c in lock_type()) {
            if LockType::substitutable(a, b) && LockType::substitutable(b, c) {
                prop_assert!(LockType::substitutable(a, c));
            }
        }
    }
}
