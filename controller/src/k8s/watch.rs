use super::{parse_event, DynamicObject, Resource};
use futures::prelude::*;
use serde::de::DeserializeOwned;
use std::pin::Pin;
use tokio::time;
use tracing::{info, warn};

pub use kube_runtime::watcher::{Event, Result};

/// Wraps a resource event stream.
pub struct Watch<T>(Pin<Box<dyn Stream<Item = Result<Event<T>>> + Send + 'static>>);

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Watch(watch.boxed())
    }
}

impl<K> Watch<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned + Send + 'static,
{
    /// Adapts an untyped watch, dropping events whose objects are not a `K`.
    pub fn from_dynamic<W>(watch: W) -> Self
    where
        W: Stream<Item = Result<Event<DynamicObject>>> + Send + 'static,
    {
        watch
            .filter_map(|res| {
                future::ready(match res {
                    Ok(ev) => match parse_event::<K>(ev) {
                        Ok(ev) => Some(Ok(ev)),
                        Err(error) => {
                            warn!(%error, "Dropping event");
                            None
                        }
                    },
                    Err(error) => Some(Err(error)),
                })
            })
            .into()
    }
}

impl<T> Watch<T> {
    /// Receive the next event in the stream.
    ///
    /// If the stream fails, log the error and sleep for 1s before polling for a reset event.
    /// Returns `None` once the underlying stream has terminated.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        loop {
            match self.0.next().await? {
                Ok(ev) => return Some(ev),
                Err(error) => {
                    info!(%error, "Disconnected");
                    time::sleep(time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
