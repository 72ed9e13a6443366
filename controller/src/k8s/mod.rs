use crate::Error;
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::warn;

mod watch;

pub use self::watch::{Event, Watch};
pub use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::PodTemplateSpec,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
pub use kube::{
    api::{Api, DynamicObject, Resource, ResourceExt},
    Client,
};

/// Identifies an object within a cluster.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

/// Watches all Jobs in the cluster.
pub fn jobs(client: Client) -> Watch<Job> {
    watcher(Api::<Job>::all(client), watcher::Config::default()).into()
}

/// Validates an untyped object as a `K`.
///
/// The object's kind must match `K`'s before its contents are decoded, so that a mismatched
/// payload is reported as such rather than as a decoding failure.
pub fn parse_object<K>(obj: DynamicObject) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let expected = K::kind(&()).into_owned();
    let found = obj
        .types
        .as_ref()
        .map(|t| t.kind.clone())
        .unwrap_or_default();
    if found != expected {
        return Err(Error::TypeMismatch { expected, found });
    }

    let decode = |e: serde_json::Error| Error::Decode {
        kind: expected.clone(),
        reason: e.to_string(),
    };
    let value = serde_json::to_value(&obj).map_err(decode)?;
    serde_json::from_value(value).map_err(decode)
}

/// Converts an untyped watch event into a typed one.
///
/// Objects in a restart listing that fail validation are skipped so that a single bad object
/// doesn't discard the whole listing.
pub fn parse_event<K>(event: Event<DynamicObject>) -> Result<Event<K>, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match event {
        Event::Applied(obj) => parse_object(obj).map(Event::Applied),
        Event::Deleted(obj) => parse_object(obj).map(Event::Deleted),
        Event::Restarted(objs) => {
            let objs = objs
                .into_iter()
                .filter_map(|obj| match parse_object(obj) {
                    Ok(obj) => Some(obj),
                    Err(error) => {
                        warn!(%error, "Skipping invalid object");
                        None
                    }
                })
                .collect();
            Ok(Event::Restarted(objs))
        }
    }
}

// === impl ObjectKey ===

impl ObjectKey {
    pub fn from_resource<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
