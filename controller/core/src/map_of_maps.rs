use crate::Map;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// Maps a key to a [`Map`].
///
/// The outer lock only guards which inner maps exist. Inner maps are shared out as `Arc`s and
/// written under their own lock after the outer lock has been released.
#[derive(Debug, Default)]
pub struct MapOfMaps {
    cache: Mutex<HashMap<String, Arc<Map>>>,
}

// === impl MapOfMaps ===

impl MapOfMaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `value` at `key -> inner`, creating the inner map on first use.
    pub fn put(&self, key: impl Into<String>, inner: impl Into<String>, value: impl Into<String>) {
        self.get_or_default(key).put(inner, value);
    }

    /// Replaces the inner map stored at `key`.
    pub fn put_map(&self, key: impl Into<String>, map: Arc<Map>) {
        self.cache.lock().insert(key.into(), map);
    }

    pub fn get(&self, key: &str) -> Option<Arc<Map>> {
        self.cache.lock().get(key).cloned()
    }

    /// Removes the whole inner map stored at `key`.
    pub fn delete(&self, key: &str) -> Option<Arc<Map>> {
        self.cache.lock().remove(key)
    }

    /// Removes a single inner entry.
    ///
    /// The outer key is retained even when its inner map becomes empty.
    pub fn delete_map(&self, key: &str, inner: &str) -> Option<String> {
        let map = self.get(key)?;
        map.delete(inner)
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

    /// Invokes `f` for each inner map present when the call starts.
    pub fn range(&self, mut f: impl FnMut(&str, &Arc<Map>)) {
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

    fn get_or_default(&self, key: impl Into<String>) -> Arc<Map> {
        // Creation happens under the outer lock so that racing writers share one inner map.
        self.cache.lock().entry(key.into()).or_default().clone()
    }
}
