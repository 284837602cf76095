//! Container handle and the shared state a cache is installed on
//!
//! The real container manager (space allocation, the format decoders, the
//! outer API) lives above this crate. The handle modelled here carries
//! exactly what the cache and its callbacks need: a shared block store with
//! read/write primitives, and the cache cell that `create_cache` publishes
//! into. Cloning a handle yields another view of the same shared state.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::cache::{CacheReport, KindCounters, MetadataCache};
use crate::config::CacheConfig;
use crate::entry::{EntryType, EntryTypeRegistry};
use crate::error::{CacheError, Result};
use crate::types::{Addr, EntryKind, Object};

/// Handle to an open container
///
/// All handles cloned from one container share a single block store and a
/// single metadata cache. A container and its cache must be driven from one
/// thread at a time; distinct containers are fully independent, each with
/// its own cache and diagnostics.
#[derive(Clone, Default)]
pub struct Container {
    shared: Arc<SharedState>,
}

/// State shared by every handle to one container
#[derive(Default)]
struct SharedState {
    /// Block storage keyed by container address. Entry-type callbacks use it
    /// for their I/O; the cache itself never touches it.
    blocks: RwLock<HashMap<Addr, Bytes>>,
    /// The metadata cache published by `create_cache`
    cache: Mutex<Option<MetadataCache>>,
}

impl Container {
    /// Open a fresh in-memory container with no cache installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the block stored at `addr`
    pub fn read_block(&self, addr: Addr) -> Result<Bytes> {
        self.shared
            .blocks
            .read()
            .get(&addr)
            .cloned()
            .ok_or(CacheError::BlockNotFound(addr))
    }

    /// Write a block at `addr`, replacing any previous content
    pub fn write_block(&self, addr: Addr, data: impl Into<Bytes>) {
        self.shared.blocks.write().insert(addr, data.into());
    }

    /// Whether a block is stored at `addr`
    pub fn contains_block(&self, addr: Addr) -> bool {
        self.shared.blocks.read().contains_key(&addr)
    }

    /// Create a metadata cache and publish it on this container
    pub fn create_cache(&self, registry: EntryTypeRegistry, config: CacheConfig) -> Result<()> {
        let mut cell = self.lock_cache();
        if cell.is_some() {
            return Err(CacheError::CacheExists);
        }
        let cache = MetadataCache::new(registry, &config);
        debug!("metadata cache created with {} slots", cache.nslots());
        *cell = Some(cache);
        Ok(())
    }

    /// Flush every entry with destroy and tear the cache down
    ///
    /// Aborts if any entry is still protected. On a flush failure the error
    /// is surfaced and the cache stays installed.
    pub fn destroy_cache(&self) -> Result<()> {
        let mut cell = self.lock_cache();
        let Some(cache) = cell.as_mut() else {
            return Err(CacheError::CacheMissing);
        };
        cache.destroy(self)?;
        debug!("metadata cache destroyed");
        *cell = None;
        Ok(())
    }

    /// Find the object of `ty` at `addr`, loading it on a miss
    ///
    /// See [`MetadataCache::find`] for the full contract.
    pub fn find(
        &self,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        udata1: Option<&dyn Any>,
        udata2: Option<&mut dyn Any>,
    ) -> Result<Object> {
        self.with_cache(|cache| cache.find(self, ty, addr, udata1, udata2))?
    }

    /// Install a fully-formed object at (`ty`, `addr`)
    pub fn set(&self, ty: &Arc<dyn EntryType>, addr: Addr, object: Object) -> Result<()> {
        self.with_cache(|cache| cache.set(self, ty, addr, object))?
    }

    /// Pin the object of `ty` at `addr`, loading it on a miss
    pub fn protect(
        &self,
        ty: &Arc<dyn EntryType>,
        addr: Addr,
        udata1: Option<&dyn Any>,
        udata2: Option<&mut dyn Any>,
    ) -> Result<Object> {
        self.with_cache(|cache| cache.protect(self, ty, addr, udata1, udata2))?
    }

    /// Release the most recent protect record matching (`ty`, `addr`, `object`)
    pub fn unprotect(&self, ty: &Arc<dyn EntryType>, addr: Addr, object: &Object) -> Result<()> {
        self.with_cache(|cache| cache.unprotect(ty, addr, object))
    }

    /// Flush the single entry keyed by (`ty`, `addr`)
    pub fn flush_entry(&self, ty: &Arc<dyn EntryType>, addr: Addr, destroy: bool) -> Result<()> {
        self.with_cache(|cache| cache.flush_entry(self, ty, addr, destroy))?
    }

    /// Flush every resident entry of `ty`'s kind
    pub fn flush_kind(&self, ty: &Arc<dyn EntryType>, destroy: bool) -> Result<()> {
        self.with_cache(|cache| cache.flush_kind(self, ty, destroy))?
    }

    /// Flush every resident entry
    pub fn flush_all(&self, destroy: bool) -> Result<()> {
        self.with_cache(|cache| cache.flush_all(self, destroy))?
    }

    /// Re-key the entry at (`ty`, `old_addr`) to (`ty`, `new_addr`)
    pub fn rename(&self, ty: &Arc<dyn EntryType>, old_addr: Addr, new_addr: Addr) -> Result<()> {
        self.with_cache(|cache| cache.rename(self, ty, old_addr, new_addr))?
    }

    /// Diagnostic report for the installed cache
    pub fn cache_report(&self) -> Result<CacheReport> {
        self.with_cache(|cache| cache.report())
    }

    /// Counters for one entry kind
    pub fn cache_counters(&self, kind: EntryKind) -> Result<KindCounters> {
        self.with_cache(|cache| cache.counters(kind))
    }

    /// Emit the cache's diagnostic report through `tracing`
    pub fn log_cache_report(&self) -> Result<()> {
        self.with_cache(|cache| cache.log_report())
    }

    /// Run `f` against the installed cache
    fn with_cache<R>(&self, f: impl FnOnce(&mut MetadataCache) -> R) -> Result<R> {
        let mut cell = self.lock_cache();
        match cell.as_mut() {
            Some(cache) => Ok(f(cache)),
            None => Err(CacheError::CacheMissing),
        }
    }

    /// Acquire the cache cell
    ///
    /// The cache is never contended in correct use: it is single-threaded
    /// per container and callbacks must not call back into it. A failed
    /// acquisition therefore means a callback re-entered the facade, which
    /// is a fatal contract violation, not something to wait out.
    fn lock_cache(&self) -> MutexGuard<'_, Option<MetadataCache>> {
        self.shared.cache.try_lock().unwrap_or_else(|| {
            panic!(
                "metadata cache is locked by an in-flight operation; a load or flush callback \
                 must not call back into the cache"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EntryError;

    #[test]
    fn block_store_round_trips() {
        let container = Container::new();
        let addr = Addr::new(96);
        assert!(!container.contains_block(addr));
        assert!(matches!(
            container.read_block(addr),
            Err(CacheError::BlockNotFound(missing)) if missing == addr
        ));

        container.write_block(addr, b"node".to_vec());
        assert!(container.contains_block(addr));
        let read = container.read_block(addr).expect("block present");
        assert_eq!(read.as_ref(), b"node");
    }

    #[test]
    fn cloned_handles_share_blocks() {
        let container = Container::new();
        let other = container.clone();
        container.write_block(Addr::new(8), b"shared".to_vec());
        assert!(other.contains_block(Addr::new(8)));
    }

    struct InertEntryType {
        kind: EntryKind,
    }

    impl EntryType for InertEntryType {
        fn kind(&self) -> EntryKind {
            self.kind
        }

        fn load(
            &self,
            _container: &Container,
            addr: Addr,
            _udata1: Option<&dyn Any>,
            _udata2: Option<&mut dyn Any>,
        ) -> std::result::Result<Object, EntryError> {
            Err(format!("no loader for {addr}").into())
        }

        fn flush(
            &self,
            _container: &Container,
            _destroy: bool,
            _addr: Addr,
            _object: &Object,
        ) -> std::result::Result<(), EntryError> {
            Ok(())
        }
    }

    fn inert_registry() -> EntryTypeRegistry {
        EntryTypeRegistry::new([
            Arc::new(InertEntryType {
                kind: EntryKind::BtreeNode,
            }),
            Arc::new(InertEntryType {
                kind: EntryKind::SymbolTableNode,
            }),
            Arc::new(InertEntryType {
                kind: EntryKind::Heap,
            }),
            Arc::new(InertEntryType {
                kind: EntryKind::ObjectHeader,
            }),
        ])
    }

    #[test]
    fn cache_lifecycle_is_guarded() {
        let container = Container::new();
        assert!(matches!(
            container.destroy_cache(),
            Err(CacheError::CacheMissing)
        ));
        assert!(matches!(
            container.cache_report(),
            Err(CacheError::CacheMissing)
        ));

        container
            .create_cache(inert_registry(), CacheConfig::with_size_hint(17))
            .expect("first create succeeds");
        assert!(matches!(
            container.create_cache(inert_registry(), CacheConfig::default()),
            Err(CacheError::CacheExists)
        ));

        let report = container.cache_report().expect("cache installed");
        assert_eq!(report.nslots, 17);
        assert_eq!(report.occupied, 0);

        container.destroy_cache().expect("destroy succeeds");
        assert!(matches!(
            container.cache_report(),
            Err(CacheError::CacheMissing)
        ));
    }

    #[test]
    fn fresh_cache_after_destroy_can_resize() {
        let container = Container::new();
        container
            .create_cache(inert_registry(), CacheConfig::with_size_hint(17))
            .expect("create");
        container.destroy_cache().expect("destroy");
        container
            .create_cache(inert_registry(), CacheConfig::with_size_hint(100))
            .expect("recreate");
        let report = container.cache_report().expect("cache installed");
        assert_eq!(report.nslots, 101);
    }
}
