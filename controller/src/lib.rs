#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Admiral identity controller
//!
//! Watches workloads in each cluster, derives the mesh identity each one belongs to and records
//! which workloads have been processed, so that mesh configuration can be computed without
//! reprocessing unchanged resources. Per-resource-type behavior is supplied by a [`Delegator`];
//! the [`Controller`] driver handles classification, filtering, retries and shutdown.

pub mod cache;
pub mod delegator;
pub mod driver;
mod error;
pub mod job;
pub mod k8s;
pub mod params;
pub mod registry;

pub use self::{
    cache::{ResourceCache, ResourceEntry},
    delegator::{Context, Current, Delegator},
    driver::Controller,
    error::Error,
    job::{ClientDiscoveryHandler, JobController},
    params::{LabelSet, Params, RetryPolicy},
    registry::ClientRegistry,
};
pub use admiral_controller_core::{K8sObject, ProcessingStatus, ResourceType};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds a Job controller for a cluster.
///
/// Returns the controller, whose cache may be inspected while it runs, and a task that drives it
/// from a watch on all of the cluster's Jobs until `shutdown` is cancelled.
pub fn jobs(
    cluster: impl Into<Arc<str>>,
    client: k8s::Client,
    handler: Arc<dyn ClientDiscoveryHandler>,
    params: Arc<Params>,
    shutdown: CancellationToken,
) -> (Arc<JobController>, impl std::future::Future<Output = ()>) {
    let cluster = cluster.into();
    let watch = k8s::jobs(client.clone());
    let ctrl = Arc::new(JobController::new(
        cluster.clone(),
        Some(client),
        handler,
        params.clone(),
    ));
    let driver = Controller::new("job-ctrl", cluster, ctrl.clone(), &params, shutdown);
    (ctrl, driver.run(watch))
}
