use parking_lot::Mutex;
use std::collections::HashMap;

/// A string-to-string map guarded by a single lock.
#[derive(Debug, Default)]
pub struct Map {
    cache: Mutex<HashMap<String, String>>,
}

// === impl Map ===

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.cache.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.cache.lock().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.cache.lock().contains_key(key)
    }

    pub fn delete(&self, key: &str) -> Option<String> {
        self.cache.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.cache.lock().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<String> {
        self.cache.lock().values().cloned().collect()
    }

    /// Copies the current contents out of the map.
    pub fn copy(&self) -> HashMap<String, String> {
        self.cache.lock().clone()
    }

    /// Invokes `f` for each entry of a snapshot taken when the call starts.
    ///
    /// The lock is released before `f` runs, so `f` may use this map; writes made meanwhile are
    /// not observed by the iteration.
    pub fn range(&self, mut f: impl FnMut(&str, &str)) {
        for (k, v) in self.copy().iter() {
            f(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Map {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let cache = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<HashMap<_, _>>();
        Self {
            cache: Mutex::new(cache),
        }
    }
}
