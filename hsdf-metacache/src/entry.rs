//! Entry-type descriptors and the closed type registry
//!
//! Every kind of cached object has one immortal descriptor carrying its load
//! and flush callbacks. Descriptors compare by identity, never by content:
//! two descriptors for the same kind are still distinct types as far as the
//! cache is concerned, and dispatching through a descriptor the cache was
//! not created with is a fatal programming error.

use std::any::Any;
use std::sync::Arc;

use crate::container::Container;
use crate::error::EntryError;
use crate::types::{Addr, EntryKind, Object};

/// Load/flush dispatch for one kind of cached metadata object
///
/// `load` decodes a fresh in-memory object from the container at `addr`.
/// `udata1` is read-only caller-supplied context and `udata2` an in/out
/// scratch channel; the cache forwards both verbatim and attaches no
/// semantics to them.
///
/// `flush` writes the object back iff the object's internally-held dirty
/// flag is set, and clears that flag on success. The cache keeps no dirty
/// bit of its own, so a flush callback must tolerate being invoked on a
/// clean object and perform no I/O for it. When `destroy` is true the cache
/// drops its reference to the object after the callback returns; the flag is
/// passed through so a callback can account for the eviction.
pub trait EntryType: Send + Sync {
    /// The kind this descriptor caches
    fn kind(&self) -> EntryKind;

    /// Decode a fresh object from the container at `addr`
    fn load(
        &self,
        container: &Container,
        addr: Addr,
        udata1: Option<&dyn Any>,
        udata2: Option<&mut dyn Any>,
    ) -> Result<Object, EntryError>;

    /// Write `object` back if dirty, clearing its dirty flag on success
    fn flush(
        &self,
        container: &Container,
        destroy: bool,
        addr: Addr,
        object: &Object,
    ) -> Result<(), EntryError>;
}

/// The closed set of descriptors a cache dispatches through
///
/// One descriptor per [`EntryKind`], fixed for the lifetime of the cache.
pub struct EntryTypeRegistry {
    types: [Arc<dyn EntryType>; EntryKind::COUNT],
}

impl EntryTypeRegistry {
    /// Build a registry from one descriptor per kind
    ///
    /// The descriptor at each position must report the kind with that
    /// identifier; a mismatch aborts.
    pub fn new(types: [Arc<dyn EntryType>; EntryKind::COUNT]) -> Self {
        for (position, ty) in types.iter().enumerate() {
            assert_eq!(
                ty.kind().id(),
                position,
                "descriptor registered at position {position} reports kind {}",
                ty.kind(),
            );
        }
        Self { types }
    }

    /// The canonical descriptor for `kind`
    pub fn get(&self, kind: EntryKind) -> &Arc<dyn EntryType> {
        &self.types[kind.id()]
    }

    /// Verify that `ty` is a registered descriptor, by identity
    ///
    /// Aborts on a stranger: dispatching through an unregistered descriptor
    /// would corrupt per-kind diagnostics and flush dispatch.
    pub(crate) fn verify(&self, ty: &Arc<dyn EntryType>) -> EntryKind {
        let kind = ty.kind();
        if !Arc::ptr_eq(ty, &self.types[kind.id()]) {
            panic!("descriptor for {kind} is not the one this cache was created with");
        }
        kind
    }
}
