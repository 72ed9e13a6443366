use crate::{Error, Params};
use admiral_controller_core::{K8sObject, ProcessingStatus};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, trace};

/// Tracks the processing status of every admitted resource, keyed by mesh identity and then by
/// namespace.
///
/// Entries are only removed when their identity is off-boarded.
#[derive(Debug)]
pub struct ResourceCache {
    params: Arc<Params>,
    cache: Mutex<HashMap<String, ResourceEntry>>,
}

/// All records sharing a mesh identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceEntry {
    pub identity: String,
    pub objects: HashMap<String, K8sObject>,
}

// === impl ResourceCache ===

impl ResourceCache {
    pub fn new(params: Arc<Params>) -> Self {
        Self {
            params,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn identity(&self, obj: &K8sObject) -> String {
        self.params.global_identifier(&obj.annotations, &obj.labels)
    }

    /// Inserts a record unless one already exists for its identity and namespace.
    ///
    /// Returns the cached record, which is the existing one when the identity and namespace were
    /// already known.
    pub fn put(&self, obj: K8sObject) -> K8sObject {
        let identity = self.identity(&obj);
        let mut cache = self.cache.lock();
        let entry = cache
            .entry(identity.clone())
            .or_insert_with(|| ResourceEntry {
                identity,
                objects: HashMap::new(),
            });
        entry
            .objects
            .entry(obj.namespace.clone())
            .or_insert(obj)
            .clone()
    }

    pub fn get(&self, identity: &str, namespace: &str) -> Option<K8sObject> {
        self.cache
            .lock()
            .get(identity)
            .and_then(|e| e.objects.get(namespace))
            .cloned()
    }

    /// Returns a snapshot of every record sharing `identity`.
    pub fn get_entry(&self, identity: &str) -> Option<ResourceEntry> {
        self.cache.lock().get(identity).cloned()
    }

    /// Returns the cached status of the record's identity and namespace, or `NotProcessed` when it
    /// has not been cached.
    pub fn get_process_status(&self, obj: &K8sObject) -> ProcessingStatus {
        let identity = self.identity(obj);
        self.cache
            .lock()
            .get(&identity)
            .and_then(|e| e.objects.get(&obj.namespace))
            .map(|o| o.status)
            .unwrap_or_default()
    }

    /// Records `status` for the record's identity and namespace.
    ///
    /// Fails when the identity is unknown. When only the namespace is unknown, the record is
    /// inserted carrying `status`.
    pub fn update_process_status(
        &self,
        obj: &K8sObject,
        status: ProcessingStatus,
    ) -> Result<(), Error> {
        let identity = self.identity(obj);
        let mut cache = self.cache.lock();
        let entry = cache
            .get_mut(&identity)
            .ok_or_else(|| Error::NotFoundInCache {
                op: "UpdateStatus",
                kind: obj.resource_type,
                name: obj.name.clone(),
                namespace: obj.namespace.clone(),
            })?;

        match entry.objects.get_mut(&obj.namespace) {
            Some(cached) => cached.status = status,
            None => {
                entry
                    .objects
                    .insert(obj.namespace.clone(), obj.clone().with_status(status));
            }
        }
        trace!(%identity, ns = %obj.namespace, name = %obj.name, %status, "Updated status");
        Ok(())
    }

    /// Drops every record for an off-boarded identity so that its resources are processed again
    /// when they are rediscovered.
    pub fn remove(&self, identity: &str) -> Option<ResourceEntry> {
        let entry = self.cache.lock().remove(identity)?;
        debug!(%identity, records = entry.objects.len(), "Removed identity");
        Some(entry)
    }

    /// Returns the number of cached identities.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn identities(&self) -> Vec<String> {
        self.cache.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admiral_controller_core::ResourceType;
    use std::collections::BTreeMap;

    fn mk_job(ns: &str, name: &str, identity: &str) -> K8sObject {
        let annotations = Some(("sidecar.istio.io/inject", "true"))
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        let labels = Some(("identity", identity))
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        K8sObject::new(ResourceType::Job, ns, name, annotations, labels)
    }

    fn mk_cache() -> ResourceCache {
        ResourceCache::new(Arc::new(Params::default()))
    }

    #[test]
    fn put_creates_identity_and_namespace() {
        let cache = mk_cache();
        assert!(cache.is_empty());

        cache.put(mk_job("ns-a", "job-a", "checkout"));
        cache.put(mk_job("ns-b", "job-b", "checkout"));
        cache.put(mk_job("ns-a", "job-c", "payments"));

        assert_eq!(cache.len(), 2);
        let entry = cache.get_entry("checkout").expect("identity must be cached");
        assert_eq!(entry.identity, "checkout");
        assert_eq!(entry.objects.len(), 2);
        assert_eq!(cache.get("checkout", "ns-b").unwrap().name, "job-b");
        assert!(cache.get("checkout", "ns-c").is_none());
        assert!(cache.get("unknown", "ns-a").is_none());

        let mut ids = cache.identities();
        ids.sort();
        assert_eq!(ids, vec!["checkout", "payments"]);
    }

    #[test]
    fn put_is_not_destructive() {
        let cache = mk_cache();
        cache.put(mk_job("ns-a", "job-a", "checkout"));
        cache
            .update_process_status(&mk_job("ns-a", "job-a", "checkout"), ProcessingStatus::Processed)
            .unwrap();

        // A second record for the same identity and namespace doesn't replace the first.
        let cached = cache.put(mk_job("ns-a", "job-z", "checkout"));
        assert_eq!(cached.name, "job-a");
        assert_eq!(cached.status, ProcessingStatus::Processed);
    }

    #[test]
    fn status_defaults_to_not_processed() {
        let cache = mk_cache();
        let job = mk_job("ns-a", "job-a", "checkout");
        assert_eq!(cache.get_process_status(&job), ProcessingStatus::NotProcessed);

        cache.put(job.clone());
        cache
            .update_process_status(&job, ProcessingStatus::ProcessingInProgress)
            .unwrap();
        assert_eq!(
            cache.get_process_status(&job),
            ProcessingStatus::ProcessingInProgress
        );
    }

    #[test]
    fn update_requires_a_known_identity() {
        let cache = mk_cache();
        let job = mk_job("ns-a", "job-a", "checkout");
        let err = cache
            .update_process_status(&job, ProcessingStatus::Processed)
            .expect_err("identity is not cached");
        assert!(matches!(err, Error::NotFoundInCache { .. }));
        assert!(err.to_string().contains("Job not found in cache"));
        assert!(cache.is_empty());
    }

    #[test]
    fn update_synthesizes_missing_namespaces() {
        let cache = mk_cache();
        cache.put(mk_job("ns-a", "job-a", "checkout"));

        let job = mk_job("ns-b", "job-b", "checkout");
        cache
            .update_process_status(&job, ProcessingStatus::Failed)
            .unwrap();
        let cached = cache.get("checkout", "ns-b").expect("record must be inserted");
        assert_eq!(cached.name, "job-b");
        assert_eq!(cached.status, ProcessingStatus::Failed);
    }

    #[test]
    fn removed_identities_are_forgotten() {
        let cache = mk_cache();
        let job = mk_job("ns-a", "job-a", "checkout");
        cache.put(job.clone());
        cache.put(mk_job("ns-a", "job-b", "payments"));
        cache
            .update_process_status(&job, ProcessingStatus::Processed)
            .unwrap();

        let entry = cache.remove("checkout").expect("identity must be cached");
        assert_eq!(entry.objects.len(), 1);
        assert!(cache.remove("checkout").is_none());
        assert_eq!(cache.identities(), vec!["payments"]);
        assert_eq!(cache.get_process_status(&job), ProcessingStatus::NotProcessed);

        // The next put starts from scratch.
        assert_eq!(cache.put(job).status, ProcessingStatus::NotProcessed);
    }

    #[test]
    fn concurrent_writers() {
        let cache = Arc::new(mk_cache());
        let handles = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let job = mk_job(&format!("ns-{}", i), "job", &format!("id-{}", t));
                        cache.put(job.clone());
                        cache
                            .update_process_status(&job, ProcessingStatus::Processed)
                            .unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.len(), 4);
        for t in 0..4 {
            let entry = cache.get_entry(&format!("id-{}", t)).unwrap();
            assert_eq!(entry.objects.len(), 50);
            assert!(entry
                .objects
                .values()
                .all(|o| o.status == ProcessingStatus::Processed));
        }
    }
}
