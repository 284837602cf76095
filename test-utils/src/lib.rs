//! Test helpers for hsdf-metacache
//!
//! Provides instrumented entry types that record every load and flush,
//! payload objects with real dirty flags, and container-seeding helpers
//! shared by the integration tests.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use hsdf_metacache::{
    Addr, CacheConfig, Container, EntryError, EntryKind, EntryType, EntryTypeRegistry, Object,
};

/// A cached test object: a byte payload plus the dirty flag its flush
/// callback inspects
///
/// The cache never sees the flag; mutators set it and the flush callback
/// clears it after write-back, exactly as a real decoded structure would.
#[derive(Debug)]
pub struct TestObject {
    payload: Mutex<Vec<u8>>,
    dirty: AtomicBool,
}

impl TestObject {
    /// Fresh clean object
    pub fn new(payload: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(payload.into()),
            dirty: AtomicBool::new(false),
        })
    }

    /// Fresh object that already needs writing back
    pub fn new_dirty(payload: impl Into<Vec<u8>>) -> Arc<Self> {
        let object = Self::new(payload);
        object.dirty.store(true, Ordering::Relaxed);
        object
    }

    /// Downcast an object handed out by the cache
    pub fn from_object(object: &Object) -> Arc<Self> {
        Arc::clone(object)
            .downcast::<Self>()
            .unwrap_or_else(|_| panic!("cache object is not a TestObject"))
    }

    pub fn payload(&self) -> Vec<u8> {
        self.payload.lock().clone()
    }

    /// Replace the payload, marking the object dirty
    pub fn set_payload(&self, payload: impl Into<Vec<u8>>) {
        *self.payload.lock() = payload.into();
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Relaxed);
    }
}

/// Record of one flush callback invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushCall {
    pub addr: Addr,
    pub destroy: bool,
    /// Whether the object was dirty and actually written back
    pub wrote: bool,
}

/// Log of every load and flush one recording entry type performed
#[derive(Debug, Default)]
pub struct CallLog {
    loads: Mutex<Vec<Addr>>,
    flushes: Mutex<Vec<FlushCall>>,
}

impl CallLog {
    pub fn loads(&self) -> Vec<Addr> {
        self.loads.lock().clone()
    }

    pub fn flushes(&self) -> Vec<FlushCall> {
        self.flushes.lock().clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.lock().len()
    }

    pub fn clear(&self) {
        self.loads.lock().clear();
        self.flushes.lock().clear();
    }
}

/// Entry type that loads block payloads into [`TestObject`]s and records
/// every callback invocation
///
/// Individual addresses can be made to fail loading or flushing, for
/// exercising the cache's error paths.
pub struct RecordingEntryType {
    kind: EntryKind,
    log: CallLog,
    fail_loads: Mutex<HashSet<Addr>>,
    fail_flushes: Mutex<HashSet<Addr>>,
}

impl RecordingEntryType {
    pub fn new(kind: EntryKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            log: CallLog::default(),
            fail_loads: Mutex::new(HashSet::new()),
            fail_flushes: Mutex::new(HashSet::new()),
        })
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Make loads of `addr` fail until cleared
    pub fn fail_load_at(&self, addr: Addr) {
        self.fail_loads.lock().insert(addr);
    }

    /// Make flushes of `addr` fail until cleared
    pub fn fail_flush_at(&self, addr: Addr) {
        self.fail_flushes.lock().insert(addr);
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        self.fail_loads.lock().clear();
        self.fail_flushes.lock().clear();
    }
}

impl EntryType for RecordingEntryType {
    fn kind(&self) -> EntryKind {
        self.kind
    }

    fn load(
        &self,
        container: &Container,
        addr: Addr,
        _udata1: Option<&dyn Any>,
        _udata2: Option<&mut dyn Any>,
    ) -> Result<Object, EntryError> {
        self.log.loads.lock().push(addr);
        if self.fail_loads.lock().contains(&addr) {
            return Err(format!("injected load failure at {addr}").into());
        }
        let payload = container.read_block(addr)?;
        let object: Object = TestObject::new(payload.to_vec());
        Ok(object)
    }

    fn flush(
        &self,
        container: &Container,
        destroy: bool,
        addr: Addr,
        object: &Object,
    ) -> Result<(), EntryError> {
        if self.fail_flushes.lock().contains(&addr) {
            self.log.flushes.lock().push(FlushCall {
                addr,
                destroy,
                wrote: false,
            });
            return Err(format!("injected flush failure at {addr}").into());
        }
        let object = TestObject::from_object(object);
        let wrote = object.is_dirty();
        if wrote {
            container.write_block(addr, object.payload());
            object.clear_dirty();
        }
        self.log.flushes.lock().push(FlushCall {
            addr,
            destroy,
            wrote,
        });
        Ok(())
    }
}

/// The four recording descriptors backing one registry
pub struct RecordingTypes {
    pub btree: Arc<RecordingEntryType>,
    pub symbol_table: Arc<RecordingEntryType>,
    pub heap: Arc<RecordingEntryType>,
    pub object_header: Arc<RecordingEntryType>,
}

impl RecordingTypes {
    pub fn get(&self, kind: EntryKind) -> &Arc<RecordingEntryType> {
        match kind {
            EntryKind::BtreeNode => &self.btree,
            EntryKind::SymbolTableNode => &self.symbol_table,
            EntryKind::Heap => &self.heap,
            EntryKind::ObjectHeader => &self.object_header,
        }
    }

    /// The descriptor for `kind`, as the erased handle the cache API takes
    ///
    /// Clones share the allocation with the registered descriptor, so the
    /// cache's identity check accepts them.
    pub fn descriptor(&self, kind: EntryKind) -> Arc<dyn EntryType> {
        Arc::clone(self.get(kind)) as Arc<dyn EntryType>
    }

    /// Total loader invocations across every kind
    pub fn total_loads(&self) -> usize {
        EntryKind::ALL
            .iter()
            .map(|&kind| self.get(kind).log().load_count())
            .sum()
    }

    /// Total flush invocations across every kind
    pub fn total_flushes(&self) -> usize {
        EntryKind::ALL
            .iter()
            .map(|&kind| self.get(kind).log().flush_count())
            .sum()
    }
}

/// Build a registry of recording entry types, returning the instrumented
/// descriptors alongside it
pub fn recording_registry() -> (EntryTypeRegistry, RecordingTypes) {
    let types = RecordingTypes {
        btree: RecordingEntryType::new(EntryKind::BtreeNode),
        symbol_table: RecordingEntryType::new(EntryKind::SymbolTableNode),
        heap: RecordingEntryType::new(EntryKind::Heap),
        object_header: RecordingEntryType::new(EntryKind::ObjectHeader),
    };
    let registry = EntryTypeRegistry::new([
        types.descriptor(EntryKind::BtreeNode),
        types.descriptor(EntryKind::SymbolTableNode),
        types.descriptor(EntryKind::Heap),
        types.descriptor(EntryKind::ObjectHeader),
    ]);
    (registry, types)
}

/// A container with a cache of recording types installed
pub fn cache_fixture(size_hint: usize) -> (Container, RecordingTypes) {
    let container = Container::new();
    let (registry, types) = recording_registry();
    container
        .create_cache(registry, CacheConfig::with_size_hint(size_hint))
        .expect("fresh container has no cache");
    (container, types)
}

/// Deterministic payload derived from an address
pub fn payload_for(addr: Addr) -> Vec<u8> {
    format!("block@{addr}").into_bytes()
}

/// Seed one block per address with its deterministic payload
pub fn seed_blocks(container: &Container, addrs: impl IntoIterator<Item = Addr>) {
    for addr in addrs {
        container.write_block(addr, payload_for(addr));
    }
}
