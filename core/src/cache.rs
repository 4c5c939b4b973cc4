//! Race-safe keyed get-or-create.
//!
//! Every process-wide cache in the engine (descriptors, dispatch instances,
//! transports, sessions) is a `KeyedCache`. The map lock is only held long
//! enough to fetch or insert a per-key `OnceCell`; creation runs under that
//! cell alone, so concurrent callers for one key wait for a single creation
//! while other keys proceed.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

pub struct KeyedCache<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    fn cell(&self, key: K) -> Arc<OnceCell<V>> {
        Arc::clone(&self.cells.entry(key).or_default())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let cell = self.cells.get(key).map(|c| Arc::clone(&c))?;
        cell.get().cloned()
    }

    pub fn get_or_init(&self, key: K, init: impl FnOnce() -> V) -> V {
        self.cell(key).get_or_init(init).clone()
    }

    /// A failed `init` caches nothing; the next caller tries again.
    pub fn get_or_try_init<E>(
        &self,
        key: K,
        init: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        self.cell(key).get_or_try_init(init).cloned()
    }

    /// Install `value`, returning the previous one if any.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        let cell = Arc::new(OnceCell::with_value(value));
        self.cells
            .insert(key, cell)
            .and_then(|old| old.get().cloned())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.cells
            .remove(key)
            .and_then(|(_, old)| old.get().cloned())
    }

    /// Every initialized value.
    pub fn values(&self) -> Vec<V> {
        self.cells
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cells.iter().filter(|e| e.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn concurrent_callers_share_one_creation() {
        let cache: Arc<KeyedCache<&'static str, Arc<usize>>> = Arc::new(KeyedCache::new());
        let created = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let created = Arc::clone(&created);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_init("k", || {
                        created.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(10));
                        Arc::new(42)
                    })
                })
            })
            .collect();

        let values: Vec<Arc<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let cache: KeyedCache<u8, u32> = KeyedCache::new();
        let err: Result<u32, &str> = cache.get_or_try_init(1, || Err("boom"));
        assert!(err.is_err());
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get_or_try_init::<&str>(1, || Ok(7)), Ok(7));
        assert_eq!(cache.get(&1), Some(7));
    }

    #[test]
    fn replace_returns_previous() {
        let cache: KeyedCache<u8, u32> = KeyedCache::new();
        cache.get_or_init(1, || 1);
        assert_eq!(cache.replace(1, 2), Some(1));
        assert_eq!(cache.get(&1), Some(2));
        assert_eq!(cache.values(), vec![2]);
        assert_eq!(cache.remove(&1), Some(2));
        assert!(cache.is_empty());
    }
}
