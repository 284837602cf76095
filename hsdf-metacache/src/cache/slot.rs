//! Direct-mapped slot table and per-slot protect bookkeeping

use std::sync::Arc;

use crate::entry::EntryType;
use crate::types::{Addr, Object};

/// One resident cache entry
pub(crate) struct SlotEntry {
    pub ty: Arc<dyn EntryType>,
    pub addr: Addr,
    pub object: Object,
}

impl SlotEntry {
    /// Whether this entry is keyed by exactly (`ty`, `addr`)
    ///
    /// Descriptor comparison is by identity.
    pub fn holds(&self, ty: &Arc<dyn EntryType>, addr: Addr) -> bool {
        Arc::ptr_eq(&self.ty, ty) && self.addr == addr
    }
}

/// One pinned (type, addr, object) triple
pub(crate) struct ProtectRecord {
    pub ty: Arc<dyn EntryType>,
    pub addr: Addr,
    pub object: Object,
}

impl ProtectRecord {
    pub fn matches(&self, ty: &Arc<dyn EntryType>, addr: Addr, object: &Object) -> bool {
        Arc::ptr_eq(&self.ty, ty) && self.addr == addr && Arc::ptr_eq(&self.object, object)
    }
}

/// One slot of the table: empty, or one entry plus its protect-set
#[derive(Default)]
pub(crate) struct Slot {
    pub entry: Option<SlotEntry>,
    pub protects: Vec<ProtectRecord>,
}

impl Slot {
    pub fn is_protected(&self) -> bool {
        !self.protects.is_empty()
    }
}

/// Fixed-size direct-mapped table of slots
///
/// Never resized after creation. An address maps to the slot at its offset
/// modulo the (prime) slot count; colliding keys displace the previous
/// occupant rather than probing.
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new(nslots: usize) -> Self {
        debug_assert!(nslots >= 2);
        let mut slots = Vec::with_capacity(nslots);
        slots.resize_with(nslots, Slot::default);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Slot index an address maps to
    #[inline]
    pub fn index_of(&self, addr: Addr) -> usize {
        (addr.offset() % self.slots.len() as u64) as usize
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    /// Number of slots currently holding an entry
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }
}
