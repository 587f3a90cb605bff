//! Aggregate root trait and optimistic concurrency expectation.

/// Aggregate root marker + minimal interface.
///
/// An aggregate root is the only object a store writes with a version check;
/// everything hanging off it is mutated through it.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's stored state.
    ///
    /// `0` means "never persisted"; every successful store write increments it.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Require the stored aggregate to be at an exact version (`0` = absent).
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for writing over `aggregate` as it was loaded.
    pub fn of<A: AggregateRoot>(aggregate: &A) -> Self {
        ExpectedVersion::Exact(aggregate.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_same_version() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));
        assert!(!ExpectedVersion::Exact(0).matches(1));
    }

    struct Counter(u64);

    impl AggregateRoot for Counter {
        type Id = u64;

        fn id(&self) -> &u64 {
            &0
        }

        fn version(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn expectation_follows_loaded_version() {
        assert_eq!(ExpectedVersion::of(&Counter(0)), ExpectedVersion::Exact(0));
        assert!(ExpectedVersion::of(&Counter(7)).matches(7));
    }
}
