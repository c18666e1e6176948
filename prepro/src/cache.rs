//! A small thread-safe LRU cache.
//!
//! One mutex serializes all access; a `VecDeque` keeps the recency order
//! with the least-recently-used key at the front. The include manager uses
//! this to avoid re-scanning the search path for repeated headers.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Inner<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

/// A bounded least-recently-used cache.
///
/// `get` counts as a use. When an insert pushes the size past capacity, the
/// least-recently-used entry is evicted. All methods take `&self`, so a
/// shared cache can be used from several threads at once.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: NonZeroUsize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// A cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        LruCache {
            capacity,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Like [`LruCache::new`], clamping a zero capacity up to one entry.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch a value, marking the key as most recently used.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let value = inner.map.get(key).cloned()?;
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        inner.order.push_back(key.clone());
        Some(value)
    }

    /// Insert a value, evicting the least-recently-used entry if full.
    pub fn put(&self, key: K, value: V) {
        let mut inner = self.lock();
        if inner.map.insert(key.clone(), value).is_some() {
            if let Some(pos) = inner.order.iter().position(|k| *k == key) {
                inner.order.remove(pos);
            }
        }
        inner.order.push_back(key);
        while inner.map.len() > self.capacity.get() {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Remove a key, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let value = inner.map.remove(key)?;
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        Some(value)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
