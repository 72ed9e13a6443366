use crate::MapOfMaps;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Maps a key to a [`MapOfMaps`], e.g. identity -> cluster -> endpoint -> namespace.
#[derive(Debug, Default)]
pub struct MapOfMapOfMaps {
    cache: Mutex<HashMap<String, Arc<MapOfMaps>>>,
}

// === impl MapOfMapOfMaps ===

impl MapOfMapOfMaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &self,
        key: impl Into<String>,
        middle: impl Into<String>,
        inner: impl Into<String>,
        value: impl Into<String>,
    ) {
        let branch = self.cache.lock().entry(key.into()).or_default().clone();
        branch.put(middle, inner, value);
    }

    /// Grafts a prebuilt branch at `key`, replacing whatever was stored there.
    pub fn put_map_of_maps(&self, key: impl Into<String>, branch: Arc<MapOfMaps>) {
        self.cache.lock().insert(key.into(), branch);
    }

    pub fn get(&self, key: &str) -> Option<Arc<MapOfMaps>> {
        self.cache.lock().get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> Option<Arc<MapOfMaps>> {
        self.cache.lock().remove(key)
    }

    /// Returns the number of outer keys.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn range(&self, mut f: impl FnMut(&str, &Arc<MapOfMaps>)) {
        let snapshot = self
            .cache
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        for (k, v) in snapshot.iter() {
            f(k, v);
        }
    }
}
