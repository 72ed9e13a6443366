//! Identity derivation, ignore policy and controller tuning.

use std::{collections::BTreeMap, time::Duration};

/// Marks a workload (or one of its templates) as excluded from the mesh.
pub const ADMIRAL_IGNORE_ANNOTATION: &str = "admiral.io/ignore";

const IDENTITY_SEPARATOR: &str = ".";

/// The annotation and label keys the controllers read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSet {
    /// Label (or annotation) holding a workload's identity.
    pub workload_identity_key: String,

    /// Annotation (or label) scoping an identity to a partition.
    pub identity_partition_key: String,

    pub admiral_ignore_label: String,

    /// Annotation that must be `"true"` for a workload to be part of the mesh.
    pub deployment_annotation: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first failure.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Params {
    pub label_set: LabelSet,

    /// Skips updates whose generation did not change.
    pub enable_generation_check: bool,

    pub retry: RetryPolicy,

    /// Number of workers processing events for each watched cluster.
    pub workers: usize,
}

// === impl LabelSet ===

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            workload_identity_key: "identity".to_string(),
            identity_partition_key: "admiral.io/identityPartition".to_string(),
            admiral_ignore_label: ADMIRAL_IGNORE_ANNOTATION.to_string(),
            deployment_annotation: "sidecar.istio.io/inject".to_string(),
        }
    }
}

// === impl RetryPolicy ===

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Doubles `delay`, capped at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.max_delay)
    }
}

// === impl Params ===

impl Default for Params {
    fn default() -> Self {
        Self {
            label_set: LabelSet::default(),
            enable_generation_check: true,
            retry: RetryPolicy::default(),
            workers: 2,
        }
    }
}

impl Params {
    pub fn do_generation_check(&self) -> bool {
        self.enable_generation_check
    }

    /// Reads a workload's identity, preferring labels over annotations.
    pub fn workload_identifier<'m>(
        &self,
        annotations: &'m BTreeMap<String, String>,
        labels: &'m BTreeMap<String, String>,
    ) -> &'m str {
        let key = &self.label_set.workload_identity_key;
        labels
            .get(key)
            .filter(|v| !v.is_empty())
            .or_else(|| annotations.get(key))
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Reads a workload's identity partition, preferring annotations over labels.
    pub fn identity_partition<'m>(
        &self,
        annotations: &'m BTreeMap<String, String>,
        labels: &'m BTreeMap<String, String>,
    ) -> Option<&'m str> {
        let key = &self.label_set.identity_partition_key;
        annotations
            .get(key)
            .filter(|v| !v.is_empty())
            .or_else(|| labels.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Derives the mesh identity shared by a workload's instances across clusters.
    ///
    /// Partitioned identities are lowercased and prefixed with their partition.
    pub fn global_identifier(
        &self,
        annotations: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> String {
        let identity = self.workload_identifier(annotations, labels);
        match self.identity_partition(annotations, labels) {
            Some(partition) => {
                format!(
                    "{}{}{}",
                    partition,
                    IDENTITY_SEPARATOR,
                    identity.to_lowercase()
                )
            }
            None => identity.to_string(),
        }
    }

    /// Indicates whether a workload must be excluded from mesh processing.
    pub fn should_ignore(
        &self,
        annotations: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        let ls = &self.label_set;
        let is_true =
            |m: &BTreeMap<String, String>, k: &str| m.get(k).map(String::as_str) == Some("true");

        if is_true(labels, &ls.admiral_ignore_label)
            || is_true(annotations, &ls.admiral_ignore_label)
            || is_true(annotations, ADMIRAL_IGNORE_ANNOTATION)
        {
            return true;
        }

        if !is_true(annotations, &ls.deployment_annotation) {
            return true;
        }

        self.workload_identifier(annotations, labels).is_empty()
    }
}
