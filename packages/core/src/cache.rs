use std::sync::{PoisonError, RwLock};

/// Single-slot memo for one clonable value, cleared on demand.
///
/// Every [`invalidate`](MemoCache::invalidate) bumps a generation counter.
/// A miss hands out the generation it observed, and [`fill`](MemoCache::fill)
/// only stores a value computed under that same generation, so a lookup
/// that raced a write can never park pre-write data in the slot.
pub struct MemoCache<T: Clone> {
    slot: RwLock<Slot<T>>,
}

struct Slot<T> {
    value: Option<T>,
    generation: u64,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Hit(T),
    Miss { generation: u64 },
}

impl<T: Clone> MemoCache<T> {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                value: None,
                generation: 0,
            }),
        }
    }

    pub fn lookup(&self) -> Lookup<T> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match &slot.value {
            Some(value) => Lookup::Hit(value.clone()),
            None => Lookup::Miss {
                generation: slot.generation,
            },
        }
    }

    /// Returns the cached value, if any.
    pub fn get(&self) -> Option<T> {
        match self.lookup() {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss { .. } => None,
        }
    }

    /// Store `value` if nothing invalidated the slot since `generation`
    /// was observed. Returns whether the value was stored.
    pub fn fill(&self, generation: u64, value: T) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            return false;
        }
        slot.value = Some(value);
        true
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.value = None;
        slot.generation = slot.generation.wrapping_add(1);
    }

    pub fn generation(&self) -> u64 {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }
}

impl<T: Clone> Default for MemoCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lookup_misses_when_cache_is_empty() {
        let cache = MemoCache::<u64>::new();
        assert_eq!(cache.lookup(), Lookup::Miss { generation: 0 });
        assert!(cache.get().is_none());
    }

    #[test]
    fn fill_then_lookup_hits() {
        let cache = MemoCache::new();
        assert!(cache.fill(0, 42_u64));

        assert_eq!(cache.lookup(), Lookup::Hit(42));
        assert_eq!(cache.get(), Some(42));
    }

    #[test]
    fn absent_values_are_cached_too() {
        let cache = MemoCache::<Option<u64>>::new();
        assert!(cache.fill(0, None));
        assert_eq!(cache.lookup(), Lookup::Hit(None));
    }

    #[test]
    fn invalidate_clears_cached_value() {
        let cache = MemoCache::new();
        cache.fill(0, 42_u64);
        cache.invalidate();

        assert!(cache.get().is_none());
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn fill_from_before_invalidation_is_discarded() {
        let cache = MemoCache::new();
        let generation = match cache.lookup() {
            Lookup::Miss { generation } => generation,
            Lookup::Hit(_) => panic!("expected a miss"),
        };

        // A writer lands between the miss and the fill.
        cache.invalidate();

        assert!(!cache.fill(generation, 1_u64));
        assert!(cache.get().is_none());
        assert!(cache.fill(cache.generation(), 2_u64));
        assert_eq!(cache.get(), Some(2));
    }

    #[test]
    fn concurrent_readers_see_whole_values() {
        let cache = Arc::new(MemoCache::new());
        cache.fill(0, (1_u64, 1_u64));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        if let Some((a, b)) = cache.get() {
                            assert_eq!(a, b);
                        }
                    }
                })
            })
            .collect();

        for n in 2..200_u64 {
            cache.invalidate();
            cache.fill(cache.generation(), (n, n));
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
