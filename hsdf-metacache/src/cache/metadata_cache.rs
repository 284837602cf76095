//! Operations facade for the metadata object cache

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, trace};

use super::diagnostics::{CacheReport, Diagnostics, KindCounters};
use super::slot::{ProtectRecord, SlotEntry, SlotTable};
use crate::config::CacheConfig;
use crate::container::Container;
use crate::entry::{EntryType, EntryTypeRegistry};
use crate::error::{CacheError, FlushPhase, Result};
use crate::types::{Addr, EntryKind, Object};

/// Write-back cache of decoded metadata objects, keyed by container address
///
/// The table is direct-mapped: an address hashes to exactly one slot, and a
/// colliding key displaces the previous occupant after flushing it. The slot
/// count is large relative to the working set of any single operation, so
/// displacement is rare and its cost is dominated by the flush I/O.
///
/// Objects own their dirty flags; the cache owns placement, the protect
/// bookkeeping, and per-kind diagnostics. Handles returned by [`find`] are
/// logically valid only until the next operation that may evict their slot;
/// [`protect`] pins an entry for a stable handle.
///
/// A cache must be driven from one thread at a time. Load and flush
/// callbacks must treat the cache as locked for their duration and must not
/// call back into it.
///
/// [`find`]: MetadataCache::find
/// [`protect`]: MetadataCache::protect
pub struct MetadataCache {
    slots: SlotTable,
    registry: EntryTypeRegistry,
    /// Total protect records across all slots
    nprots: usize,
    diagnostics: Diagnostics,
}

impl MetadataCache {
    /// Create a cache with every slot empty
    pub fn new(registry: EntryTypeRegistry, config: &CacheConfig) -> Self {
        Self {
            slots: SlotTable::new(config.slot_count()),
            registry,
            nprots: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Slot table size
    pub fn nslots(&self) -> usize {
        self.slots.len()
    }

    /// Outstanding protect records across all slots
    pub fn nprots(&self) -> usize {
        self.nprots
    }

    /// Counters for one entry kind
    pub fn counters(&self, kind: EntryKind) -> KindCounters {
        self.diagnostics.kind(kind)
    }

    /// The registry this cache dispatches through
    pub fn registry(&self) -> &EntryTypeRegistry {
        &self.registry
    }

    /// Slot index `addr` maps to
    pub fn slot_index(&self, addr: Addr) -> usize {
        self.slots.index_of(addr)
    }

    /// Find the object of `ty` at `addr`, loading it on a miss
    ///
    /// On a hit the resident object is returned directly. On a miss a
    /// colliding occupant is displaced (flushed with destroy), the loader
    /// runs, and the result is installed. A loader failure is surfaced as
    /// [`CacheError::Load`] and leaves the target slot unfilled.
    ///
    /// The returned handle is valid only until the next operation that may
    /// evict this slot; use [`protect`](Self::protect) for a handle that is
    /// stable across operations.
    pub fn find(
        &mut self,
        container: &Container,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        udata1: Option<&dyn Any>,
        udata2: Option<&mut dyn Any>,
    ) -> Result<Object> {
        let kind = self.registry.verify(ty);
        let index = self.slots.index_of(addr);

        if let Some(object) = self.lookup_hit(index, ty, addr, kind) {
            trace!("cache hit: {kind} at {addr} in slot {index}");
            return Ok(object);
        }
        self.load_into_slot(container, index, kind, ty, addr, udata1, udata2, "find")
    }

    /// Install a fully-formed object at (`ty`, `addr`)
    ///
    /// The object must be in the shape `ty`'s flush callback expects. Any
    /// current occupant of the slot is displaced first, unless it is the
    /// very object being installed, in which case only the key is
    /// rewritten.
    pub fn set(
        &mut self,
        container: &Container,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        object: Object,
    ) -> Result<()> {
        let kind = self.registry.verify(ty);
        let index = self.slots.index_of(addr);

        let (occupied, same_object, same_key) = {
            let slot = self.slots.slot(index);
            match &slot.entry {
                None => (false, false, false),
                Some(entry) => (
                    true,
                    Arc::ptr_eq(&entry.object, &object),
                    entry.holds(ty, addr),
                ),
            }
        };
        if occupied && !(same_object && same_key) && self.slots.slot(index).is_protected() {
            self.fatal_protected(index, "set", ty, addr);
        }
        if occupied && !same_object {
            if let Some(occupant) = self.slots.slot_mut(index).entry.take() {
                self.evict(container, index, occupant)?;
            }
        }

        self.diagnostics.record_init(kind);
        self.slots.slot_mut(index).entry = Some(SlotEntry {
            ty: Arc::clone(ty),
            addr,
            object,
        });
        trace!("installed metadata object: {kind} at {addr} in slot {index}");
        Ok(())
    }

    /// Pin the object of `ty` at `addr`, loading it on a miss
    ///
    /// The returned handle is guaranteed stable until the matching
    /// [`unprotect`](Self::unprotect). While any protect record is
    /// outstanding on a slot, an operation that would displace or destroy
    /// its entry aborts.
    pub fn protect(
        &mut self,
        container: &Container,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        udata1: Option<&dyn Any>,
        udata2: Option<&mut dyn Any>,
    ) -> Result<Object> {
        let kind = self.registry.verify(ty);
        let index = self.slots.index_of(addr);

        let object = match self.lookup_hit(index, ty, addr, kind) {
            Some(object) => object,
            None => {
                self.load_into_slot(container, index, kind, ty, addr, udata1, udata2, "protect")?
            }
        };

        self.slots.slot_mut(index).protects.push(ProtectRecord {
            ty: Arc::clone(ty),
            addr,
            object: Arc::clone(&object),
        });
        self.nprots += 1;
        trace!(
            "protected {kind} at {addr} in slot {index} ({} outstanding)",
            self.nprots
        );
        Ok(object)
    }

    /// Release the most recent protect record matching (`ty`, `addr`, `object`)
    ///
    /// The object itself stays resident; only the pin is removed. Aborts if
    /// no matching record exists, which means the triple was never protected
    /// or was already unprotected.
    pub fn unprotect(&mut self, ty: &Arc<dyn EntryType>, addr: Addr, object: &Object) {
        let kind = self.registry.verify(ty);
        let index = self.slots.index_of(addr);
        let nprots = self.nprots;
        let slot = self.slots.slot_mut(index);
        let Some(position) = slot
            .protects
            .iter()
            .rposition(|record| record.matches(ty, addr, object))
        else {
            panic!(
                "unprotect without a matching protect: no record for {kind} at {addr} in slot \
                 {index} ({} record(s) outstanding there, {nprots} cache-wide)",
                slot.protects.len(),
            );
        };
        slot.protects.remove(position);
        self.nprots -= 1;
        trace!(
            "unprotected {kind} at {addr} in slot {index} ({} outstanding)",
            self.nprots
        );
    }

    /// Flush the single entry keyed by (`ty`, `addr`)
    ///
    /// No-op if the slot does not hold that key. With `destroy` the entry is
    /// dropped after a successful flush; destroying a protected entry
    /// aborts.
    pub fn flush_entry(
        &mut self,
        container: &Container,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        destroy: bool,
    ) -> Result<()> {
        self.registry.verify(ty);
        let index = self.slots.index_of(addr);
        let resident = self
            .slots
            .slot(index)
            .entry
            .as_ref()
            .is_some_and(|entry| entry.holds(ty, addr));
        if !resident {
            return Ok(());
        }
        self.flush_slot(container, index, destroy, FlushPhase::Explicit)
    }

    /// Flush every resident entry of `ty`'s kind, in ascending slot order
    pub fn flush_kind(
        &mut self,
        container: &Container,
        ty: &Arc<dyn EntryType>,
        destroy: bool,
    ) -> Result<()> {
        self.registry.verify(ty);
        for index in 0..self.slots.len() {
            let matches = self
                .slots
                .slot(index)
                .entry
                .as_ref()
                .is_some_and(|entry| Arc::ptr_eq(&entry.ty, ty));
            if matches {
                self.flush_slot(container, index, destroy, FlushPhase::Explicit)?;
            }
        }
        Ok(())
    }

    /// Flush every resident entry, in ascending slot order
    ///
    /// Slot order is an implementation detail: flush order across distinct
    /// (type, addr) pairs carries no semantic guarantee. Callers with
    /// ordering requirements between kinds must flush by kind in an explicit
    /// sequence or serialise above this layer.
    pub fn flush_all(&mut self, container: &Container, destroy: bool) -> Result<()> {
        for index in 0..self.slots.len() {
            if self.slots.slot(index).entry.is_some() {
                self.flush_slot(container, index, destroy, FlushPhase::Explicit)?;
            }
        }
        Ok(())
    }

    /// Re-key the entry at (`ty`, `old_addr`) to (`ty`, `new_addr`)
    ///
    /// The object moves without re-invoking the loader, and protect records
    /// follow it with their address rewritten, so a protected entry may be
    /// renamed. No-op if the entry was already evicted. An occupant of the
    /// destination slot is displaced first.
    pub fn rename(
        &mut self,
        container: &Container,
        ty: &Arc<dyn EntryType>,
        old_addr: Addr,
        new_addr: Addr,
    ) -> Result<()> {
        let kind = self.registry.verify(ty);
        let old_index = self.slots.index_of(old_addr);
        let new_index = self.slots.index_of(new_addr);

        let resident = self
            .slots
            .slot(old_index)
            .entry
            .as_ref()
            .is_some_and(|entry| entry.holds(ty, old_addr));
        if !resident {
            trace!("rename of evicted {kind} entry ignored: {old_addr} -> {new_addr}");
            return Ok(());
        }

        if old_index == new_index {
            let slot = self.slots.slot_mut(old_index);
            if let Some(entry) = slot.entry.as_mut() {
                entry.addr = new_addr;
            }
            for record in &mut slot.protects {
                record.addr = new_addr;
            }
            debug!("renamed {kind} in place: {old_addr} -> {new_addr} in slot {old_index}");
            return Ok(());
        }

        if self.slots.slot(new_index).entry.is_some() {
            if self.slots.slot(new_index).is_protected() {
                self.fatal_protected(new_index, "rename", ty, new_addr);
            }
            if let Some(occupant) = self.slots.slot_mut(new_index).entry.take() {
                self.evict(container, new_index, occupant)?;
            }
        }

        let old_slot = self.slots.slot_mut(old_index);
        let Some(mut entry) = old_slot.entry.take() else {
            return Ok(());
        };
        entry.addr = new_addr;
        let mut migrated = std::mem::take(&mut old_slot.protects);
        for record in &mut migrated {
            record.addr = new_addr;
        }

        let new_slot = self.slots.slot_mut(new_index);
        debug_assert!(new_slot.protects.is_empty());
        new_slot.entry = Some(entry);
        new_slot.protects = migrated;
        debug!("renamed {kind}: {old_addr} -> {new_addr} (slot {old_index} -> {new_index})");
        Ok(())
    }

    /// Flush every entry with destroy in preparation for teardown
    ///
    /// Aborts if any protect record is outstanding.
    pub fn destroy(&mut self, container: &Container) -> Result<()> {
        if self.nprots != 0 {
            panic!(
                "destroying cache with {} outstanding protect record(s)",
                self.nprots
            );
        }
        for index in 0..self.slots.len() {
            if self.slots.slot(index).entry.is_some() {
                self.flush_slot(container, index, true, FlushPhase::Shutdown)?;
            }
        }
        Ok(())
    }

    /// Diagnostic report: per-kind counters plus table occupancy
    pub fn report(&self) -> CacheReport {
        CacheReport {
            nslots: self.slots.len(),
            occupied: self.slots.occupied(),
            nprots: self.nprots,
            kinds: self.diagnostics.snapshot(),
        }
    }

    /// Emit the diagnostic report through `tracing`
    pub fn log_report(&self) {
        for line in self.report().to_string().lines() {
            debug!("{line}");
        }
    }

    /// Fast-path hit check: resident entry with the exact key
    #[inline]
    fn lookup_hit(
        &mut self,
        index: usize,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        kind: EntryKind,
    ) -> Option<Object> {
        match &self.slots.slot(index).entry {
            Some(entry) if entry.holds(ty, addr) => {
                self.diagnostics.record_hit(kind);
                Some(Arc::clone(&entry.object))
            }
            _ => None,
        }
    }

    /// Slow path shared by `find` and `protect`: count the miss, displace a
    /// colliding occupant, run the loader, install the result
    #[allow(clippy::too_many_arguments)]
    fn load_into_slot(
        &mut self,
        container: &Container,
        index: usize,
        kind: EntryKind,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        udata1: Option<&dyn Any>,
        udata2: Option<&mut dyn Any>,
        operation: &'static str,
    ) -> Result<Object> {
        // The loader runs whether or not it succeeds, so both counters tick
        // up front.
        self.diagnostics.record_miss(kind);
        self.diagnostics.record_init(kind);

        self.displace_if_colliding(container, index, ty, addr, operation)?;

        let object = ty
            .load(container, addr, udata1, udata2)
            .map_err(|source| CacheError::Load { kind, addr, source })?;
        debug!("loaded metadata object: {kind} at {addr} into slot {index}");
        self.slots.slot_mut(index).entry = Some(SlotEntry {
            ty: Arc::clone(ty),
            addr,
            object: Arc::clone(&object),
        });
        Ok(object)
    }

    /// Displace the occupant of `index` unless it already holds (`ty`, `addr`)
    fn displace_if_colliding(
        &mut self,
        container: &Container,
        index: usize,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        operation: &'static str,
    ) -> Result<()> {
        {
            let slot = self.slots.slot(index);
            let Some(entry) = &slot.entry else {
                return Ok(());
            };
            if entry.holds(ty, addr) {
                return Ok(());
            }
            if slot.is_protected() {
                self.fatal_protected(index, operation, ty, addr);
            }
        }
        if let Some(occupant) = self.slots.slot_mut(index).entry.take() {
            self.evict(container, index, occupant)?;
        }
        Ok(())
    }

    /// Destroying flush of a displaced occupant
    ///
    /// The slot has already been emptied; a flush failure is surfaced to the
    /// caller but the occupant is gone either way.
    fn evict(&mut self, container: &Container, index: usize, occupant: SlotEntry) -> Result<()> {
        let kind = occupant.ty.kind();
        debug!("displacing {kind} at {} from slot {index}", occupant.addr);
        self.diagnostics.record_flush(kind);
        occupant
            .ty
            .flush(container, true, occupant.addr, &occupant.object)
            .map_err(|source| CacheError::Flush {
                kind,
                addr: occupant.addr,
                phase: FlushPhase::Displacement,
                source,
            })
    }

    /// Invoke the flush callback for the entry resident at `index`
    fn flush_slot(
        &mut self,
        container: &Container,
        index: usize,
        destroy: bool,
        phase: FlushPhase,
    ) -> Result<()> {
        let Some(entry) = self.slots.slot(index).entry.as_ref() else {
            return Ok(());
        };
        let ty = Arc::clone(&entry.ty);
        let addr = entry.addr;
        let object = Arc::clone(&entry.object);
        let kind = ty.kind();

        if destroy && self.slots.slot(index).is_protected() {
            let protects = self.slots.slot(index).protects.len();
            panic!(
                "destroying flush of a pinned entry: slot {index} holds {kind} at {addr} with \
                 {protects} outstanding protect record(s)"
            );
        }

        self.diagnostics.record_flush(kind);
        ty.flush(container, destroy, addr, &object)
            .map_err(|source| CacheError::Flush {
                kind,
                addr,
                phase,
                source,
            })?;
        if destroy {
            self.slots.slot_mut(index).entry = None;
            trace!("flushed and destroyed {kind} at {addr} in slot {index}");
        } else {
            trace!("flushed {kind} at {addr} in slot {index}");
        }
        Ok(())
    }

    /// Abort on an attempt to displace or overwrite a pinned entry
    fn fatal_protected(
        &self,
        index: usize,
        operation: &str,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
    ) -> ! {
        let slot = self.slots.slot(index);
        let held = slot.entry.as_ref().map_or_else(
            || "no entry".to_string(),
            |entry| format!("{} at {}", entry.ty.kind(), entry.addr),
        );
        panic!(
            "pinned entry may not be displaced: slot {index} holds {held} with {} outstanding \
             protect record(s); {operation} targeting {} at {addr} must wait for unprotect",
            slot.protects.len(),
            ty.kind(),
        );
    }
}
