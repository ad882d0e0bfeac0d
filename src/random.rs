//! Injectable randomness for the `random` selection strategy and the racing
//! engine's racer ordering. A trait object rather than a seeded global RNG so
//! tests can supply deterministic sequences.

use rand::RngExt;

/// Source of randomness consulted wherever a `random` strategy picks among candidates
pub trait RandomSource: Send + Sync {
    /// Pick an index in `0..len`; `len` is always greater than zero
    fn pick_index(&self, len: usize) -> usize;
}

/// Default [`RandomSource`] backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn pick_index(&self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Deterministic [`RandomSource`] for tests: always returns the configured index
#[derive(Debug, Clone, Copy)]
pub struct FixedRandomSource(pub usize);

impl RandomSource for FixedRandomSource {
    fn pick_index(&self, len: usize) -> usize {
        self.0 % len.max(1)
    }
}

/// Deterministic [`RandomSource`] for tests: cycles through a fixed sequence of indices
pub struct CyclingRandomSource {
    sequence: Vec<usize>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl CyclingRandomSource {
    /// Build a source that replays `sequence` (mod its own length) forever
    #[must_use]
    pub fn new(sequence: Vec<usize>) -> Self {
        Self {
            sequence,
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl RandomSource for CyclingRandomSource {
    fn pick_index(&self, len: usize) -> usize {
        if self.sequence.is_empty() {
            return 0;
        }
        let i = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            % self.sequence.len();
        self.sequence[i] % len.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_wraps_into_range() {
        let source = FixedRandomSource(5);
        assert_eq!(source.pick_index(3), 2);
    }

    #[test]
    fn cycling_source_replays_its_sequence() {
        let source = CyclingRandomSource::new(vec![0, 1, 0]);
        assert_eq!(source.pick_index(2), 0);
        assert_eq!(source.pick_index(2), 1);
        assert_eq!(source.pick_index(2), 0);
        assert_eq!(source.pick_index(2), 0);
    }

    #[test]
    fn thread_source_stays_in_bounds() {
        let source = ThreadRandomSource;
        for _ in 0..50 {
            assert!(source.pick_index(7) < 7);
        }
    }
}
