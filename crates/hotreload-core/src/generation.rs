use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter advanced whenever the loadable name set or any
/// bytecode changes. Derived query caches compare against it instead of
/// recomputing on every request.
#[derive(Debug, Default)]
pub struct WorldGeneration(AtomicU64);

impl WorldGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advance and return the new generation
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_monotonic() {
        let generation = WorldGeneration::new();
        assert_eq!(generation.current(), 0);
        assert_eq!(generation.advance(), 1);
        assert_eq!(generation.advance(), 2);
        assert_eq!(generation.current(), 2);
    }
}
