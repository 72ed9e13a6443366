#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Shared model for the mesh identity controller.
//!
//! Holds the normalized resource record that controllers write into their caches and the
//! concurrency-safe maps used to index identities across clusters. Every map owns exactly one
//! lock; nested maps hand out `Arc`s to their children so that no lock is ever held while another
//! map's lock is taken.

mod map;
mod map_of_map_of_maps;
mod map_of_maps;
mod sidecar_egress;

pub use self::{
    map::Map,
    map_of_map_of_maps::MapOfMapOfMaps,
    map_of_maps::MapOfMaps,
    sidecar_egress::{DependencyEgress, SidecarEgress, SidecarEgressMap},
};
use anyhow::{anyhow, Error, Result};
use std::{collections::BTreeMap, fmt};

/// Where a resource is in its reconciliation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ProcessingStatus {
    #[default]
    NotProcessed,
    ProcessingInProgress,
    Processed,
    Failed,
}

/// The kind of workload a record was derived from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Deployment,
    Rollout,
    Job,
    Vertex,
    MonoVertex,
}

/// A watched resource reduced to the fields needed to derive its mesh identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct K8sObject {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub status: ProcessingStatus,
    pub resource_type: ResourceType,
}

// === impl ProcessingStatus ===

impl ProcessingStatus {
    /// Indicates that no further work is expected for the current attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NotProcessed" => Ok(Self::NotProcessed),
            "ProcessingInProgress" => Ok(Self::ProcessingInProgress),
            "Processed" => Ok(Self::Processed),
            "Failed" => Ok(Self::Failed),
            s => Err(anyhow!("invalid processing status: {}", s)),
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotProcessed => "NotProcessed".fmt(f),
            Self::ProcessingInProgress => "ProcessingInProgress".fmt(f),
            Self::Processed => "Processed".fmt(f),
            Self::Failed => "Failed".fmt(f),
        }
    }
}

// === impl ResourceType ===

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployment => "Deployment".fmt(f),
            Self::Rollout => "Rollout".fmt(f),
            Self::Job => "Job".fmt(f),
            Self::Vertex => "Vertex".fmt(f),
            Self::MonoVertex => "MonoVertex".fmt(f),
        }
    }
}

// === impl K8sObject ===

impl K8sObject {
    pub fn new(
        resource_type: ResourceType,
        namespace: impl Into<String>,
        name: impl Into<String>,
        annotations: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            annotations,
            labels,
            status: ProcessingStatus::NotProcessed,
            resource_type,
        }
    }

    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = status;
        self
    }
}
