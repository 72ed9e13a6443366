
use crate::{
    delegator::{Context, Delegator},
    k8s::{Event, ObjectKey, Watch},
    params::{Params, RetryPolicy},
    Error,
};
use admiral_controller_core::ProcessingStatus;
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};
use tokio::{sync::mpsc, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Bounds the number of admitted events buffered for each worker.
const QUEUE_CAPACITY: usize = 64;

/// Drives a [`Delegator`] from a resource watch.
///
/// A single dispatcher classifies watch events into adds, updates and deletes, filters them and
/// hands admitted work to a fixed pool of workers. Work is sharded by object so that events for
/// the same object are always processed in order.
pub struct Controller<D> {
    name: &'static str,
    cluster: Arc<str>,
    delegator: Arc<D>,
    retry: RetryPolicy,
    workers: usize,
    shutdown: CancellationToken,
}

#[derive(Clone, Debug, PartialEq)]
enum Work<T> {
    Add(T),
    Update { obj: T, old: T },
    Delete(T),
}

// === impl Controller ===

impl<D: Delegator> Controller<D> {
    pub fn new(
        name: &'static str,
        cluster: impl Into<Arc<str>>,
        delegator: Arc<D>,
        params: &Params,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name,
            cluster: cluster.into(),
            delegator,
            retry: params.retry.clone(),
            workers: params.workers.max(1),
            shutdown,
        }
    }

    /// Processes events until the watch ends or the controller is shut down.
    ///
    /// Work that was already admitted is drained before this returns.
    pub async fn run(self, mut watch: Watch<D::Resource>) {
        let this = Arc::new(self);

        let mut queues = Vec::with_capacity(this.workers);
        let mut workers = Vec::with_capacity(this.workers);
        for id in 0..this.workers {
            let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
            queues.push(tx);
            let span = info_span!("worker", controller = this.name, cluster = %this.cluster, id);
            workers.push(tokio::spawn(this.clone().work(rx).instrument(span)));
        }

        let mut seen = HashMap::new();
        loop {
            let event = tokio::select! {
                _ = this.shutdown.cancelled() => {
                    debug!(controller = this.name, "Shutting down");
                    break;
                }
                event = watch.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!(controller = this.name, cluster = %this.cluster, "Watch terminated");
                        break;
                    }
                },
            };

            for work in classify(&mut seen, event) {
                if let Some(work) = this.admit(work) {
                    let idx = shard(&work.key(), queues.len());
                    if queues[idx].send(work).await.is_err() {
                        warn!(controller = this.name, shard = idx, "Worker stopped");
                    }
                }
            }
        }

        drop(queues);
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(%error, "Worker failed");
            }
        }
    }

    async fn work(self: Arc<Self>, mut rx: mpsc::Receiver<Work<D::Resource>>) {
        while let Some(work) = rx.recv().await {
            match self.process(work).await {
                Ok(()) => {}
                Err(Error::Cancelled) => debug!("Abandoned work after shutdown"),
                Err(error) => warn!(%error, "Failed to process event"),
            }
        }
    }

    /// Filters a classified event before it is handed to a worker.
    ///
    /// Ignored objects are dropped without touching the cache.
    fn admit(&self, work: Work<D::Resource>) -> Option<Work<D::Resource>> {
        if let Work::Delete(_) = work {
            return Some(work);
        }

        let obj = work.obj();
        self.delegator.log_value_of_admiral_io_ignore(obj);
        if self.delegator.should_ignore(obj) {
            debug!(key = %ObjectKey::from_resource(obj), "Ignoring");
            return None;
        }
        Some(work)
    }

    /// Decides what an admitted event requires, given the object's cached status.
    ///
    /// This runs on the object's worker so that it observes the outcome of earlier events for the
    /// same object. Processed objects are not added again and their updates are skipped unless the
    /// generation changed. Objects that were never processed successfully are added again, so a
    /// relist resumes work that previously failed.
    fn resolve(&self, work: Work<D::Resource>) -> Option<Work<D::Resource>> {
        if let Work::Delete(_) = work {
            return Some(work);
        }

        let status = match self.delegator.get_process_item_status(work.obj()) {
            Ok(status) => Some(status),
            Err(error) => {
                debug!(%error, "Status not tracked");
                None
            }
        };

        match work {
            Work::Add(obj) => {
                if status == Some(ProcessingStatus::Processed) {
                    debug!("Already processed");
                    return None;
                }
                Some(Work::Add(obj))
            }

            Work::Update { obj, old } => {
                if let Some(status) = status.filter(|s| *s != ProcessingStatus::Processed) {
                    debug!(%status, "Not processed; adding again");
                    return Some(Work::Add(obj));
                }

                match self.delegator.does_generation_match(&obj, &old) {
                    Ok(true) => {
                        debug!("Generation unchanged");
                        return None;
                    }
                    Ok(false) => {}
                    Err(error) => warn!(%error, "Failed to compare generations"),
                }
                match self.delegator.is_only_replica_count_changed(&obj, &old) {
                    Ok(true) => {
                        debug!("Only the replica count changed");
                        return None;
                    }
                    Ok(false) => {}
                    Err(error) => warn!(%error, "Failed to compare replicas"),
                }
                self.set_status(&obj, ProcessingStatus::NotProcessed);
                Some(Work::Update { obj, old })
            }

            Work::Delete(obj) => Some(Work::Delete(obj)),
        }
    }

    /// Invokes the delegator, retrying failed adds and updates with backoff.
    ///
    /// Updates of objects that were never processed are retried as adds.
    ///
    /// Before each retry the cached record is consulted, without reading from the cluster, and
    /// the retry stops when the record has been processed in the meantime.
    #[instrument(skip(self, work), fields(controller = self.name, cluster = %self.cluster, key = %work.key()))]
    async fn process(&self, work: Work<D::Resource>) -> Result<(), Error> {
        let work = match self.resolve(work) {
            Some(work) => work,
            None => return Ok(()),
        };

        let mut delay = self.retry.initial_delay;
        let mut attempt = 0;
        loop {
            if self.shutdown.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let ctx = Context::new(self.cluster.clone(), self.shutdown.clone());
            if attempt > 0 {
                match self.delegator.get(&ctx, true, work.obj()).await {
                    Ok(Some(current))
                        if current.cached_status() == Some(ProcessingStatus::Processed) =>
                    {
                        debug!(tx_id = ctx.tx_id(), "Processed before retry");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(error) => debug!(tx_id = ctx.tx_id(), %error, "Failed to read cached state"),
                }
            }

            let res = match &work {
                Work::Add(obj) => self.delegator.added(&ctx, obj).await,
                Work::Update { obj, old } => self.delegator.updated(&ctx, obj, old).await,
                Work::Delete(obj) => return self.delegator.deleted(&ctx, obj).await,
            };

            match res {
                Ok(()) => {
                    self.set_status(work.obj(), ProcessingStatus::Processed);
                    return Ok(());
                }
                Err(error) => {
                    self.set_status(work.obj(), ProcessingStatus::Failed);
                    if attempt >= self.retry.max_retries {
                        return Err(error);
                    }
                    attempt += 1;
                    warn!(tx_id = ctx.tx_id(), %error, attempt, ?delay, "Retrying");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                        _ = time::sleep(delay) => {}
                    }
                    delay = self.retry.next_delay(delay);
                }
            }
        }
    }

    fn set_status(&self, obj: &D::Resource, status: ProcessingStatus) {
        if let Err(error) = self.delegator.update_process_item_status(obj, status) {
            debug!(%error, %status, "Status not tracked");
        }
    }
}

/// Classifies a watch event against the objects seen so far.
///
/// A restart lists every object that currently exists: objects not seen before are added, known
/// ones are updated and previously seen objects missing from the list are deleted.
fn classify<T>(seen: &mut HashMap<ObjectKey, T>, event: Event<T>) -> Vec<Work<T>>
where
    T: crate::k8s::Resource + Clone,
{
    match event {
        Event::Applied(obj) => {
            let key = ObjectKey::from_resource(&obj);
            let work = match seen.insert(key, obj.clone()) {
                Some(old) => Work::Update { obj, old },
                None => Work::Add(obj),
            };
            vec![work]
        }

        Event::Deleted(obj) => {
            seen.remove(&ObjectKey::from_resource(&obj));
            vec![Work::Delete(obj)]
        }

        Event::Restarted(objs) => {
            let mut prior = std::mem::take(seen);
            let mut work = Vec::with_capacity(objs.len());
            for obj in objs.into_iter() {
                let key = ObjectKey::from_resource(&obj);
                seen.insert(key.clone(), obj.clone());
                match prior.remove(&key) {
                    Some(old) => work.push(Work::Update { obj, old }),
                    None => work.push(Work::Add(obj)),
                }
            }
            work.extend(prior.into_values().map(Work::Delete));
            work
        }
    }
}

fn shard(key: &ObjectKey, n: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % n as u64) as usize
}

// === impl Work ===

impl<T: crate::k8s::Resource> Work<T> {
    fn obj(&self) -> &T {
        match self {
            Self::Add(obj) | Self::Update { obj, .. } | Self::Delete(obj) => obj,
        }
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::from_resource(self.obj())
    }
}
