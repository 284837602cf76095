//! Write-back metadata object cache for HSDF container files
//!
//! The cache sits between a container manager and its decoded on-disk
//! structures (B-tree nodes, symbol table nodes, heaps, object headers). It
//! amortises decode cost, centralises dirty write-back through per-kind
//! flush callbacks, and provides a protect/unprotect contract for pinning
//! entries across logical operations.
//!
//! Each container carries its own cache, published onto the container's
//! shared state by [`Container::create_cache`]. Entry kinds are a closed
//! set; their load/flush behaviour is supplied through [`EntryType`]
//! descriptors fixed at cache creation.

pub mod cache;
pub mod config;
pub mod container;
pub mod entry;
pub mod error;
pub mod types;
pub mod utils;

pub use cache::{CacheReport, KindCounters, KindSnapshot, MetadataCache};
pub use config::{CacheConfig, DEFAULT_SIZE_HINT};
pub use container::Container;
pub use entry::{EntryType, EntryTypeRegistry};
pub use error::{CacheError, EntryError, FlushPhase, Result};
pub use types::{Addr, EntryKind, Object};
