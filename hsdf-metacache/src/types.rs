//! Common types used throughout the metadata cache

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Address of a metadata object within a container file
///
/// Two addresses compare equal iff they refer to the same byte offset in the
/// backing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addr(u64);

impl Addr {
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    pub const fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Kind of metadata object a cache entry holds
///
/// Closed enumeration; extended only by recompiling the subsystem. Each kind
/// carries a stable small-integer identifier used to index the per-kind
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// B-tree node
    BtreeNode,
    /// Symbol table node
    SymbolTableNode,
    /// Object or name heap
    Heap,
    /// Object header
    ObjectHeader,
}

impl EntryKind {
    /// Number of entry kinds
    pub const COUNT: usize = 4;

    /// Every kind, in identifier order
    pub const ALL: [Self; Self::COUNT] = [
        Self::BtreeNode,
        Self::SymbolTableNode,
        Self::Heap,
        Self::ObjectHeader,
    ];

    /// Stable identifier in `0..COUNT`
    pub const fn id(self) -> usize {
        match self {
            Self::BtreeNode => 0,
            Self::SymbolTableNode => 1,
            Self::Heap => 2,
            Self::ObjectHeader => 3,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::BtreeNode => "b-tree node",
            Self::SymbolTableNode => "symbol table node",
            Self::Heap => "heap",
            Self::ObjectHeader => "object header",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A cached metadata object, type-erased
///
/// The cache never looks inside an object; decoding, mutation, and the dirty
/// flag that tells a flush callback whether write-back is required all belong
/// to the object itself. Handles returned by `find` share the allocation
/// with the resident entry and stay allocated after an eviction, but are
/// logically valid only until the next operation that may evict their slot;
/// `protect` is the mechanism for a stable handle.
pub type Object = Arc<dyn Any + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_displays_as_hex_offset() {
        assert_eq!(Addr::new(0x1f40).to_string(), "0x00001f40");
        assert_eq!(Addr::new(0).to_string(), "0x00000000");
    }

    #[test]
    fn addr_equality_follows_offset() {
        assert_eq!(Addr::new(96), Addr::new(96));
        assert_ne!(Addr::new(96), Addr::new(97));
    }

    #[test]
    fn kind_ids_are_stable_and_dense() {
        for (position, kind) in EntryKind::ALL.iter().enumerate() {
            assert_eq!(kind.id(), position);
        }
        assert_eq!(EntryKind::ALL.len(), EntryKind::COUNT);
    }

    #[test]
    fn kind_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            EntryKind::ALL.iter().map(|kind| kind.name()).collect();
        assert_eq!(names.len(), EntryKind::COUNT);
    }
}
