use crate::{delegator::Context, job::ClientDiscoveryHandler, Params};
use admiral_controller_core::{K8sObject, MapOfMapOfMaps};
use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::info;

/// Indexes discovered mesh clients by identity, then cluster, then namespace.
///
/// A single registry is shared by the controllers of every watched cluster.
#[derive(Debug)]
pub struct ClientRegistry {
    params: Arc<Params>,
    clients: MapOfMapOfMaps,
}

// === impl ClientRegistry ===

impl ClientRegistry {
    pub fn new(params: Arc<Params>) -> Self {
        Self {
            params,
            clients: MapOfMapOfMaps::new(),
        }
    }

    /// Returns the clusters in which `identity` has clients.
    pub fn clusters(&self, identity: &str) -> Vec<String> {
        self.clients
            .get(identity)
            .map(|clusters| clusters.keys())
            .unwrap_or_default()
    }

    /// Returns the namespaces, and the name of the client in each, for `identity` in `cluster`.
    pub fn namespaces(&self, identity: &str, cluster: &str) -> Vec<(String, String)> {
        let mut namespaces = self
            .clients
            .get(identity)
            .and_then(|clusters| clusters.get(cluster))
            .map(|nss| nss.copy().into_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        namespaces.sort();
        namespaces
    }

    pub fn identities(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.clients.len());
        self.clients.range(|id, _| ids.push(id.to_string()));
        ids
    }

    /// Forgets every client of `identity`.
    ///
    /// Controllers still hold the identity's records as processed. Clear them with
    /// [`ResourceCache::remove`](crate::ResourceCache::remove) so that the identity's Jobs are
    /// registered again when they are next observed.
    pub fn offboard(&self, identity: &str) -> bool {
        self.clients.delete(identity).is_some()
    }
}

#[async_trait::async_trait]
impl ClientDiscoveryHandler for ClientRegistry {
    async fn added(&self, ctx: &Context, obj: &K8sObject) -> Result<()> {
        let identity = self.params.global_identifier(&obj.annotations, &obj.labels);
        if identity.is_empty() {
            bail!(
                "{} {}/{} has no identity",
                obj.resource_type,
                obj.namespace,
                obj.name
            );
        }

        self.clients
            .put(identity.as_str(), ctx.cluster(), obj.namespace.as_str(), obj.name.as_str());
        info!(
            %identity,
            cluster = ctx.cluster(),
            ns = %obj.namespace,
            name = %obj.name,
            tx_id = ctx.tx_id(),
            "Registered mesh client"
        );
        Ok(())
    }
}
