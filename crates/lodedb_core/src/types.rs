//! Core type definitions for lodedb.

use std::fmt;

/// Logical identifier of a record slot.
///
/// Record ids are stable: once returned by `create`, an id keeps naming the
/// same record until it is removed. Removed ids are reused by later
/// allocations, so callers must not assume ids are contiguous or ordered by
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Creates a new record id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_ordering() {
        let a = RecordId::new(1);
        let b = RecordId::new(2);
        assert!(a < b);
    }

    #[test]
    fn record_id_display() {
        let id = RecordId::new(42);
        assert_eq!(format!("{id}"), "rec:42");
    }
}
