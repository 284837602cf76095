//! Configuration for the metadata cache

use crate::utils::next_prime;

/// Default slot-count hint, the traditional table size for this format
pub const DEFAULT_SIZE_HINT: usize = 10_330;

/// Configuration for a metadata cache
///
/// A single option is recognised: the slot-count hint. The hint is rounded
/// up to a prime when the cache is created and the table is never resized
/// afterwards; creating a fresh cache is the way to get a different size.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Requested slot count; rounded up to a prime at creation
    pub size_hint: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size_hint: DEFAULT_SIZE_HINT,
        }
    }
}

impl CacheConfig {
    /// Configuration with an explicit slot-count hint
    pub fn with_size_hint(size_hint: usize) -> Self {
        Self { size_hint }
    }

    /// Final slot count: the smallest prime >= the hint
    ///
    /// A prime count keeps power-of-two-aligned addresses from clustering
    /// onto a few slots.
    pub(crate) fn slot_count(&self) -> usize {
        next_prime(self.size_hint.max(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hint_rounds_to_a_prime() {
        assert_eq!(CacheConfig::default().slot_count(), 10_331);
    }

    #[test]
    fn explicit_hints_round_up() {
        assert_eq!(CacheConfig::with_size_hint(16).slot_count(), 17);
        assert_eq!(CacheConfig::with_size_hint(17).slot_count(), 17);
        assert_eq!(CacheConfig::with_size_hint(0).slot_count(), 2);
    }
}
