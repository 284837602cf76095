//! Error types for metadata cache operations
//!
//! Recoverable failures (a loader or flusher reporting an I/O problem, a
//! missing block, lifecycle misuse of the container facade) are expressed
//! through [`CacheError`]. Programmer-contract violations - displacing a
//! protected entry, unprotecting a record that was never protected,
//! destroying a cache with outstanding protects, dispatching through an
//! unregistered descriptor - are not recoverable and abort with a diagnostic
//! instead of returning an error.

use std::fmt;

use thiserror::Error;

use crate::types::{Addr, EntryKind};

/// Error a load or flush callback may return
pub type EntryError = Box<dyn std::error::Error + Send + Sync>;

/// Phase in which a flush callback was running when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPhase {
    /// Flush requested through the operations facade
    Explicit,
    /// Eviction of a slot occupant to make room for a colliding key
    Displacement,
    /// Cache destruction
    Shutdown,
}

impl fmt::Display for FlushPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Explicit => "an explicit flush",
            Self::Displacement => "displacement",
            Self::Shutdown => "shutdown",
        })
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// A loader failed to materialise an object
    #[error("load failed for {kind} at {addr}: {source}")]
    Load {
        kind: EntryKind,
        addr: Addr,
        #[source]
        source: EntryError,
    },

    /// A flusher failed to write an object back
    #[error("flush failed for {kind} at {addr} during {phase}: {source}")]
    Flush {
        kind: EntryKind,
        addr: Addr,
        phase: FlushPhase,
        #[source]
        source: EntryError,
    },

    /// A metadata cache is already installed on this container
    #[error("a metadata cache is already installed on this container")]
    CacheExists,

    /// No metadata cache has been created for this container
    #[error("no metadata cache is installed on this container")]
    CacheMissing,

    /// No block is stored at the given address
    #[error("no block stored at {0}")]
    BlockNotFound(Addr),
}

pub type Result<T> = std::result::Result<T, CacheError>;
