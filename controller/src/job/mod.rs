#[cfg(test)]
mod tests;

use crate::{
    cache::ResourceCache,
    delegator::{Context, Current, Delegator},
    k8s::{Api, Client, Job, ResourceExt},
    params::{Params, ADMIRAL_IGNORE_ANNOTATION},
    Error,
};
use admiral_controller_core::{K8sObject, ProcessingStatus, ResourceType};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Business logic run for every newly admitted Job.
#[async_trait::async_trait]
pub trait ClientDiscoveryHandler: Send + Sync + 'static {
    async fn added(&self, ctx: &Context, obj: &K8sObject) -> anyhow::Result<()>;
}

/// Registers Jobs as mesh clients.
///
/// Jobs are registered when they're first seen. Their annotations are fixed at creation, so
/// updates carry nothing new, and deleted Jobs are cleaned up by asset off-boarding.
pub struct JobController {
    cluster: Arc<str>,
    client: Option<Client>,
    handler: Arc<dyn ClientDiscoveryHandler>,
    cache: ResourceCache,
    params: Arc<Params>,
}

/// Normalizes a Job from its pod template's metadata.
pub fn mk_k8s_object(job: &Job) -> K8sObject {
    let meta = job.spec.as_ref().and_then(|s| s.template.metadata.as_ref());
    let annotations = meta.and_then(|m| m.annotations.clone()).unwrap_or_default();
    let labels = meta.and_then(|m| m.labels.clone()).unwrap_or_default();
    K8sObject::new(
        ResourceType::Job,
        job.namespace().unwrap_or_default(),
        job.name_any(),
        annotations,
        labels,
    )
}

// === impl JobController ===

impl JobController {
    pub fn new(
        cluster: impl Into<Arc<str>>,
        client: Option<Client>,
        handler: Arc<dyn ClientDiscoveryHandler>,
        params: Arc<Params>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            client,
            handler,
            cache: ResourceCache::new(params.clone()),
            params,
        }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }
}

#[async_trait::async_trait]
impl Delegator for JobController {
    type Resource = Job;

    #[instrument(skip(self, ctx, job), fields(tx_id = ctx.tx_id(), ns = ?job.namespace(), name = %job.name_any()))]
    async fn added(&self, ctx: &Context, job: &Job) -> Result<(), Error> {
        let obj = mk_k8s_object(job);
        if self.params.should_ignore(&obj.annotations, &obj.labels) {
            return Ok(());
        }

        let obj = self.cache.put(obj);
        self.cache
            .update_process_status(&obj, ProcessingStatus::ProcessingInProgress)?;
        let obj = obj.with_status(ProcessingStatus::ProcessingInProgress);
        self.handler.added(ctx, &obj).await.map_err(Error::Handler)
    }

    async fn updated(&self, _: &Context, _: &Job, _: &Job) -> Result<(), Error> {
        // Registration happens when the Job is added.
        Ok(())
    }

    async fn deleted(&self, _: &Context, _: &Job) -> Result<(), Error> {
        // Handled by asset off-boarding.
        Ok(())
    }

    fn does_generation_match(&self, job: &Job, old: &Job) -> Result<bool, Error> {
        if !self.params.do_generation_check() {
            debug!(op = "DoesGenerationMatch", "Generation check is disabled");
            return Ok(false);
        }
        if job.metadata.generation == old.metadata.generation {
            info!(
                op = "DoesGenerationMatch",
                name = %job.name_any(),
                "Old and new generation matched"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn get_process_item_status(&self, job: &Job) -> Result<ProcessingStatus, Error> {
        Ok(self.cache.get_process_status(&mk_k8s_object(job)))
    }

    fn update_process_item_status(
        &self,
        job: &Job,
        status: ProcessingStatus,
    ) -> Result<(), Error> {
        self.cache
            .update_process_status(&mk_k8s_object(job), status)
    }

    fn log_value_of_admiral_io_ignore(&self, job: &Job) {
        let obj = mk_k8s_object(job);
        if obj.annotations.get(ADMIRAL_IGNORE_ANNOTATION).map(String::as_str) == Some("true") {
            info!(
                op = "admiralIoIgnoreAnnotationCheck",
                kind = %obj.resource_type,
                name = %obj.name,
                namespace = %obj.namespace,
                cluster = %self.cluster,
                "Value=true"
            );
        }
    }

    fn should_ignore(&self, job: &Job) -> bool {
        let obj = mk_k8s_object(job);
        self.params.should_ignore(&obj.annotations, &obj.labels)
    }

    async fn get(
        &self,
        ctx: &Context,
        is_retry: bool,
        job: &Job,
    ) -> Result<Option<Current<Job>>, Error> {
        if is_retry {
            let obj = mk_k8s_object(job);
            let identity = self.params.global_identifier(&obj.annotations, &obj.labels);
            return Ok(self
                .cache
                .get(&identity, &obj.namespace)
                .map(Current::Cached));
        }

        let client = self
            .client
            .clone()
            .ok_or_else(|| Error::ClientNotInitialized {
                tx_id: ctx.tx_id().to_string(),
            })?;
        let ns = job.namespace().unwrap_or_default();
        let live = Api::<Job>::namespaced(client, &ns)
            .get(&job.name_any())
            .await?;
        Ok(Some(Current::Live(live)))
    }
}
