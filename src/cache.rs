//! Bounded in-memory cache of decoded response values, keyed by URL.
//!
//! Values are stored type-erased so the cache can hold whatever a
//! [`DataResource`](crate::resource::DataResource) decodes to. A hit is
//! served without a network round-trip and without re-authorization.

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

const DEFAULT_CAPACITY: usize = 15;

type Entry = (String, Arc<dyn Any + Send + Sync>);

/// LRU cache of decoded values. Least recently used entries are evicted
/// once the capacity is reached.
pub struct DecodedCache {
    // most recently used entry last
    entries: Mutex<Vec<Entry>>,
    capacity: usize,
}

impl DecodedCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Look up the value cached for `url`, promoting it to most recent.
    ///
    /// Returns `None` when the URL is absent or the cached value is of a
    /// different type than requested.
    pub fn get<A: Clone + Send + Sync + 'static>(&self, url: &str) -> Option<A> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|(key, _)| key == url)?;
        let (key, value) = entries.remove(index);
        let hit = value.downcast_ref::<A>().cloned();
        entries.push((key, value));
        hit
    }

    /// Insert a decoded value for `url`, replacing any previous entry.
    pub fn insert<A: Send + Sync + 'static>(&self, url: impl Into<String>, value: A) {
        let url = url.into();
        let mut entries = self.entries.lock();
        entries.retain(|(key, _)| *key != url);
        entries.push((url, Arc::new(value)));
        if entries.len() > self.capacity {
            entries.remove(0);
        }
    }

    /// Drop every cached value.
    pub fn invalidate(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DecodedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DecodedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
