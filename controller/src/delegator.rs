use crate::{k8s::Resource, Error};
use admiral_controller_core::{K8sObject, ProcessingStatus};
use std::{fmt, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Carries the correlation id and cluster of a single processed event.
#[derive(Clone, Debug)]
pub struct Context {
    tx_id: Arc<str>,
    cluster: Arc<str>,
    shutdown: CancellationToken,
}

/// A resource's current state, as read by [`Delegator::get`].
#[derive(Clone, Debug, PartialEq)]
pub enum Current<T> {
    /// The normalized record from the controller's cache.
    Cached(K8sObject),

    /// The object as read from the cluster API.
    Live(T),
}

/// Per-resource-type behavior plugged into a [`Controller`](crate::Controller).
///
/// The driver owns classification, filtering and retries; implementations only normalize objects,
/// track their status and run business logic. Handlers must not retry on their own.
#[async_trait::async_trait]
pub trait Delegator: Send + Sync + 'static {
    type Resource: Resource<DynamicType = ()> + Clone + fmt::Debug + Send + Sync + 'static;

    async fn added(&self, ctx: &Context, obj: &Self::Resource) -> Result<(), Error>;

    async fn updated(
        &self,
        ctx: &Context,
        obj: &Self::Resource,
        old: &Self::Resource,
    ) -> Result<(), Error>;

    async fn deleted(&self, ctx: &Context, obj: &Self::Resource) -> Result<(), Error>;

    /// Indicates that an update leaves the object's generation unchanged and may be skipped.
    fn does_generation_match(
        &self,
        obj: &Self::Resource,
        old: &Self::Resource,
    ) -> Result<bool, Error>;

    /// Indicates that an update only scaled the resource.
    fn is_only_replica_count_changed(
        &self,
        _obj: &Self::Resource,
        _old: &Self::Resource,
    ) -> Result<bool, Error> {
        Ok(false)
    }

    fn get_process_item_status(&self, obj: &Self::Resource) -> Result<ProcessingStatus, Error>;

    fn update_process_item_status(
        &self,
        obj: &Self::Resource,
        status: ProcessingStatus,
    ) -> Result<(), Error>;

    /// Logs objects explicitly excluded from the mesh. Never changes state.
    fn log_value_of_admiral_io_ignore(&self, obj: &Self::Resource);

    /// Indicates that an object is excluded from processing entirely.
    fn should_ignore(&self, obj: &Self::Resource) -> bool;

    /// Reads the object's current state.
    ///
    /// Retries read only from the cache. Otherwise the cluster API is consulted.
    async fn get(
        &self,
        ctx: &Context,
        is_retry: bool,
        obj: &Self::Resource,
    ) -> Result<Option<Current<Self::Resource>>, Error>;
}

// === impl Context ===

impl Context {
    pub fn new(cluster: impl Into<Arc<str>>, shutdown: CancellationToken) -> Self {
        Self {
            tx_id: uuid::Uuid::new_v4().to_string().into(),
            cluster: cluster.into(),
            shutdown,
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

// === impl Current ===

impl<T> Current<T> {
    /// Returns the cached processing status, if this was read from the cache.
    pub fn cached_status(&self) -> Option<ProcessingStatus> {
        match self {
            Self::Cached(obj) => Some(obj.status),
            Self::Live(_) => None,
        }
    }
}
