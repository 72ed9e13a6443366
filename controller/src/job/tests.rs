use super::*;
use crate::{
    driver::Controller,
    k8s::{DynamicObject, Event, JobSpec, ObjectMeta, PodTemplateSpec, Watch},
    params::RetryPolicy,
};
use futures::prelude::*;
use kube_runtime::watcher;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorder {
    fail: AtomicBool,
    added: Mutex<Vec<K8sObject>>,
}

#[async_trait::async_trait]
impl ClientDiscoveryHandler for Recorder {
    async fn added(&self, _: &Context, obj: &K8sObject) -> anyhow::Result<()> {
        self.added.lock().push(obj.clone());
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("registry unavailable");
        }
        Ok(())
    }
}

fn kvs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn mk_job(
    ns: &str,
    name: &str,
    generation: i64,
    annotations: &[(&str, &str)],
    labels: &[(&str, &str)],
) -> Job {
    Job {
        metadata: ObjectMeta {
            namespace: Some(ns.to_string()),
            name: Some(name.to_string()),
            generation: Some(generation),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: Some(kvs(annotations)),
                    labels: Some(kvs(labels)),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mk_checkout_job(ns: &str, name: &str) -> Job {
    mk_job(
        ns,
        name,
        1,
        &[("sidecar.istio.io/inject", "true")],
        &[("identity", "checkout")],
    )
}

fn mk_controller(params: Params) -> (Arc<Recorder>, Arc<JobController>) {
    let recorder = Arc::new(Recorder::default());
    let ctrl = JobController::new("cluster-0", None, recorder.clone(), Arc::new(params));
    (recorder, Arc::new(ctrl))
}

fn mk_context() -> Context {
    Context::new("cluster-0", CancellationToken::new())
}

fn driver(ctrl: &Arc<JobController>) -> Controller<JobController> {
    let params = Params {
        retry: RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Default::default()
        },
        ..Default::default()
    };
    Controller::new(
        "job-ctrl",
        "cluster-0",
        ctrl.clone(),
        &params,
        CancellationToken::new(),
    )
}

/// Returns a watch that yields the events sent on the returned channel and ends when it's dropped.
fn watch_channel() -> (mpsc::UnboundedSender<Event<Job>>, Watch<Job>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let events = stream::unfold(rx, |mut rx| async move {
        let ev = rx.recv().await?;
        Some((Ok::<_, watcher::Error>(ev), rx))
    });
    (tx, events.into())
}

async fn wait_for(mut ready: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting for the controller");
}

fn cached_status(ctrl: &JobController, identity: &str, ns: &str) -> Option<ProcessingStatus> {
    ctrl.cache().get(identity, ns).map(|o| o.status)
}

#[test]
fn normalizes_from_the_pod_template() {
    let mut job = mk_checkout_job("ns-0", "job-0");
    job.metadata.labels = Some(kvs(&[("identity", "from-job-metadata")]));

    let obj = mk_k8s_object(&job);
    assert_eq!(obj.resource_type, ResourceType::Job);
    assert_eq!(obj.namespace, "ns-0");
    assert_eq!(obj.name, "job-0");
    assert_eq!(obj.labels, kvs(&[("identity", "checkout")]));
    assert_eq!(obj.status, ProcessingStatus::NotProcessed);

    // Jobs without a template carry no metadata.
    let bare = Job {
        metadata: ObjectMeta {
            namespace: Some("ns-0".to_string()),
            name: Some("bare".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let obj = mk_k8s_object(&bare);
    assert!(obj.annotations.is_empty() && obj.labels.is_empty());
}

#[tokio::test]
async fn added_jobs_are_processed() {
    let (recorder, ctrl) = mk_controller(Params::default());
    let job = mk_checkout_job("ns-0", "job-0");

    let events = vec![Ok::<_, watcher::Error>(Event::Applied(job.clone()))];
    driver(&ctrl).run(stream::iter(events).into()).await;

    // The handler observes the record while it's in progress.
    let added = recorder.added.lock().clone();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].name, "job-0");
    assert_eq!(added[0].status, ProcessingStatus::ProcessingInProgress);

    let cached = ctrl.cache().get("checkout", "ns-0").expect("job must be cached");
    assert_eq!(cached.status, ProcessingStatus::Processed);

    // Retries are served from the cache; there is no client to read from.
    match ctrl.get(&mk_context(), true, &job).await {
        Ok(Some(Current::Cached(obj))) => {
            assert_eq!(obj.name, "job-0");
            assert_eq!(obj.status, ProcessingStatus::Processed);
        }
        res => panic!("expected a cached record, got {:?}", res),
    }
}

#[tokio::test]
async fn added_marks_in_progress() {
    let (recorder, ctrl) = mk_controller(Params::default());
    recorder.fail.store(true, Ordering::SeqCst);
    let job = mk_checkout_job("ns-0", "job-0");

    let err = ctrl
        .added(&mk_context(), &job)
        .await
        .expect_err("handler must fail");
    assert!(matches!(err, Error::Handler(_)));
    assert_eq!(
        ctrl.get_process_item_status(&job).unwrap(),
        ProcessingStatus::ProcessingInProgress
    );
}

#[tokio::test]
async fn handler_failures_are_recorded() {
    let (recorder, ctrl) = mk_controller(Params::default());
    recorder.fail.store(true, Ordering::SeqCst);
    let job = mk_checkout_job("ns-0", "job-0");

    let events = vec![Ok::<_, watcher::Error>(Event::Applied(job.clone()))];
    driver(&ctrl).run(stream::iter(events).into()).await;

    // One attempt plus the default number of retries.
    assert_eq!(
        recorder.added.lock().len(),
        1 + Params::default().retry.max_retries as usize
    );
    assert_eq!(
        ctrl.get_process_item_status(&job).unwrap(),
        ProcessingStatus::Failed
    );
}

#[tokio::test]
async fn relists_retry_failed_jobs() {
    let (recorder, ctrl) = mk_controller(Params::default());
    recorder.fail.store(true, Ordering::SeqCst);
    let job = mk_checkout_job("ns-0", "job-0");

    let (tx, watch) = watch_channel();
    let task = tokio::spawn(driver(&ctrl).run(watch));

    tx.send(Event::Applied(job.clone())).unwrap();
    let attempts = 1 + Params::default().retry.max_retries as usize;
    wait_for(|| {
        recorder.added.lock().len() == attempts
            && cached_status(&ctrl, "checkout", "ns-0") == Some(ProcessingStatus::Failed)
    })
    .await;

    // The registry recovers and the watch is relisted with the same Job.
    recorder.fail.store(false, Ordering::SeqCst);
    tx.send(Event::Restarted(vec![job])).unwrap();
    drop(tx);
    task.await.unwrap();

    assert_eq!(recorder.added.lock().len(), attempts + 1);
    assert_eq!(
        cached_status(&ctrl, "checkout", "ns-0"),
        Some(ProcessingStatus::Processed)
    );
}

#[tokio::test]
async fn unchanged_generations_are_not_reprocessed() {
    let (recorder, ctrl) = mk_controller(Params::default());
    let job = mk_job(
        "ns-0",
        "job-0",
        5,
        &[("sidecar.istio.io/inject", "true")],
        &[("identity", "checkout")],
    );
    assert!(ctrl.does_generation_match(&job, &job).unwrap());

    let (tx, watch) = watch_channel();
    let task = tokio::spawn(driver(&ctrl).run(watch));

    tx.send(Event::Applied(job.clone())).unwrap();
    wait_for(|| cached_status(&ctrl, "checkout", "ns-0") == Some(ProcessingStatus::Processed))
        .await;
    let before = ctrl.cache().get("checkout", "ns-0");

    tx.send(Event::Applied(job)).unwrap();
    drop(tx);
    task.await.unwrap();

    assert_eq!(recorder.added.lock().len(), 1);
    assert_eq!(ctrl.cache().get("checkout", "ns-0"), before);
}

#[tokio::test]
async fn removed_identities_are_registered_again() {
    let (recorder, ctrl) = mk_controller(Params::default());
    let job = mk_checkout_job("ns-0", "job-0");

    let (tx, watch) = watch_channel();
    let task = tokio::spawn(driver(&ctrl).run(watch));

    tx.send(Event::Applied(job.clone())).unwrap();
    wait_for(|| cached_status(&ctrl, "checkout", "ns-0") == Some(ProcessingStatus::Processed))
        .await;

    // Off-boarding clears the identity; the Job is registered on its next event.
    assert!(ctrl.cache().remove("checkout").is_some());
    tx.send(Event::Applied(job)).unwrap();
    drop(tx);
    task.await.unwrap();

    assert_eq!(recorder.added.lock().len(), 2);
    assert_eq!(
        cached_status(&ctrl, "checkout", "ns-0"),
        Some(ProcessingStatus::Processed)
    );
}

#[tokio::test]
async fn ignored_jobs_are_not_cached() {
    let (recorder, ctrl) = mk_controller(Params::default());

    let ignored = mk_job(
        "ns-0",
        "ignored",
        1,
        &[("sidecar.istio.io/inject", "true"), ("admiral.io/ignore", "true")],
        &[("identity", "checkout")],
    );
    let not_injected = mk_job("ns-0", "plain", 1, &[], &[("identity", "checkout")]);
    let anonymous = mk_job("ns-0", "anonymous", 1, &[("sidecar.istio.io/inject", "true")], &[]);

    for job in &[&ignored, &not_injected, &anonymous] {
        assert!(ctrl.should_ignore(job));
        ctrl.added(&mk_context(), job).await.unwrap();
        ctrl.log_value_of_admiral_io_ignore(job);
    }

    assert!(recorder.added.lock().is_empty());
    assert!(ctrl.cache().is_empty());
}

#[test]
fn generation_check() {
    let (_, ctrl) = mk_controller(Params::default());
    let job = mk_checkout_job("ns-0", "job-0");
    let mut newer = job.clone();
    newer.metadata.generation = Some(6);
    let mut same = job.clone();
    same.metadata.generation = Some(1);

    assert!(ctrl.does_generation_match(&same, &job).unwrap());
    assert!(!ctrl.does_generation_match(&newer, &job).unwrap());
    assert!(!ctrl.is_only_replica_count_changed(&newer, &job).unwrap());

    let (_, ctrl) = mk_controller(Params {
        enable_generation_check: false,
        ..Default::default()
    });
    assert!(!ctrl.does_generation_match(&same, &job).unwrap());
}

#[tokio::test]
async fn updates_and_deletes_are_noops() {
    let (recorder, ctrl) = mk_controller(Params::default());
    let job = mk_checkout_job("ns-0", "job-0");
    let ctx = mk_context();

    ctrl.updated(&ctx, &job, &job).await.unwrap();
    ctrl.deleted(&ctx, &job).await.unwrap();
    assert!(recorder.added.lock().is_empty());
    assert!(ctrl.cache().is_empty());
}

#[test]
fn status_updates_require_a_cached_identity() {
    let (_, ctrl) = mk_controller(Params::default());
    let job = mk_checkout_job("ns-0", "job-0");
    assert_eq!(
        ctrl.get_process_item_status(&job).unwrap(),
        ProcessingStatus::NotProcessed
    );

    let err = ctrl
        .update_process_item_status(&job, ProcessingStatus::Processed)
        .expect_err("identity is not cached");
    assert_eq!(
        err.to_string(),
        "op=UpdateStatus type=Job name=job-0 namespace=ns-0 message=nothing to update, Job not found in cache"
    );

    // A second namespace for a known identity is inserted.
    ctrl.cache().put(mk_k8s_object(&job));
    let other = mk_checkout_job("ns-1", "job-1");
    ctrl.update_process_item_status(&other, ProcessingStatus::Processed)
        .unwrap();
    assert_eq!(
        ctrl.cache().get("checkout", "ns-1").map(|o| o.status),
        Some(ProcessingStatus::Processed)
    );
}

#[tokio::test]
async fn live_reads_require_a_client() {
    let (_, ctrl) = mk_controller(Params::default());
    let ctx = mk_context();
    let job = mk_checkout_job("ns-0", "job-0");

    match ctrl.get(&ctx, false, &job).await {
        Err(Error::ClientNotInitialized { tx_id }) => assert_eq!(tx_id, ctx.tx_id()),
        res => panic!("expected a missing client, got {:?}", res),
    }

    // Retries never need a client, even for uncached jobs.
    assert!(ctrl.get(&ctx, true, &job).await.unwrap().is_none());
}

#[tokio::test]
async fn untyped_watches_drop_other_kinds() {
    let (recorder, ctrl) = mk_controller(Params::default());

    let job: DynamicObject = serde_json::from_value(serde_json::json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": { "name": "job-0", "namespace": "ns-0", "generation": 1 },
        "spec": {
            "template": {
                "metadata": {
                    "annotations": { "sidecar.istio.io/inject": "true" },
                    "labels": { "identity": "checkout" }
                }
            }
        }
    }))
    .unwrap();
    let pod: DynamicObject = serde_json::from_value(serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "pod-0", "namespace": "ns-0" }
    }))
    .unwrap();

    let events = vec![
        Ok::<_, watcher::Error>(Event::Applied(pod)),
        Ok(Event::Applied(job)),
    ];
    driver(&ctrl)
        .run(Watch::from_dynamic(stream::iter(events)))
        .await;

    let added = recorder.added.lock().clone();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].name, "job-0");
}
