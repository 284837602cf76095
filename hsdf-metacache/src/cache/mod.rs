//! The metadata object cache
//!
//! A process-local write-back cache that sits between a container manager
//! and its decoded on-disk structures. It amortises the cost of decoding
//! binary structures into live objects, centralises write-back so a flush of
//! the container writes exactly the mutated structures, and exposes a
//! protect/unprotect contract for pinning an entry to a stable handle for
//! the duration of a logical operation.
//!
//! The replacement policy is intentionally minimal: the table is
//! direct-mapped with one-way displacement and no probing, chains, or
//! overflow region. Dirty tracking lives in the cached objects themselves,
//! so the cache can flush a whole kind without knowing which entries are
//! dirty; the flush callbacks elide I/O for clean objects.

mod diagnostics;
mod metadata_cache;
mod slot;

pub use diagnostics::{CacheReport, KindCounters, KindSnapshot};
pub use metadata_cache::MetadataCache;
