use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// An egress target that a sidecar must be able to reach.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SidecarEgress {
    pub namespace: String,
    pub fqdn: String,
    pub cnames: BTreeMap<String, String>,
}

/// Egress targets indexed by dependency, then by cluster/namespace.
pub type DependencyEgress = HashMap<String, HashMap<String, SidecarEgress>>;

/// Maps a source identity to the egress targets of its dependencies.
///
/// Values are plain data: `get` and `range` hand out copies taken under the lock.
#[derive(Debug, Default)]
pub struct SidecarEgressMap {
    cache: Mutex<HashMap<String, DependencyEgress>>,
}

// === impl SidecarEgressMap ===

impl SidecarEgressMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges an egress target into `key -> dependency -> namespace`.
    ///
    /// An existing target keeps its CNAMEs and gains the new ones; its FQDN is replaced.
    pub fn put(
        &self,
        key: impl Into<String>,
        dependency: impl Into<String>,
        namespace: impl Into<String>,
        fqdn: impl Into<String>,
        cnames: impl IntoIterator<Item = (String, String)>,
    ) {
        let namespace = namespace.into();
        let mut cache = self.cache.lock();
        let egress = cache
            .entry(key.into())
            .or_default()
            .entry(dependency.into())
            .or_default()
            .entry(namespace.clone())
            .or_insert_with(|| SidecarEgress {
                namespace,
                ..Default::default()
            });
        egress.fqdn = fqdn.into();
        egress.cnames.extend(cnames);
    }

    pub fn get(&self, key: &str) -> Option<DependencyEgress> {
        self.cache.lock().get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> Option<DependencyEgress> {
        self.cache.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn range(&self, mut f: impl FnMut(&str, &DependencyEgress)) {
        let snapshot = self.cache.lock().clone();
        for (k, v) in snapshot.iter() {
            f(k, v);
        }
    }
}
