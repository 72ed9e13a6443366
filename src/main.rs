#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use admiral_controller::{ClientRegistry, LabelSet, Params, RetryPolicy};
use anyhow::{Context, Result};
use futures::future;
use kube::config::{Config, KubeConfigOptions};
use std::{sync::Arc, time::Duration};
use structopt::StructOpt;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
#[structopt(name = "admiral", about = "Multi-cluster mesh identity controller")]
struct Args {
    /// Kubeconfig contexts to watch. The default context is used when none are given.
    #[structopt(long = "cluster")]
    clusters: Vec<String>,

    #[structopt(long, default_value = "true", parse(try_from_str))]
    enable_generation_check: bool,

    #[structopt(long, default_value = "identity")]
    workload_identity_key: String,

    #[structopt(long, default_value = "admiral.io/identityPartition")]
    identity_partition_key: String,

    #[structopt(long, default_value = "2")]
    max_retries: u32,

    #[structopt(long, default_value = "100")]
    retry_backoff_ms: u64,

    #[structopt(long, default_value = "2")]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Args {
        clusters,
        enable_generation_check,
        workload_identity_key,
        identity_partition_key,
        max_retries,
        retry_backoff_ms,
        workers,
    } = Args::from_args();

    let params = Arc::new(Params {
        label_set: LabelSet {
            workload_identity_key,
            identity_partition_key,
            ..Default::default()
        },
        enable_generation_check,
        retry: RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(retry_backoff_ms),
            ..Default::default()
        },
        workers,
    });

    let mut clients = Vec::new();
    if clusters.is_empty() {
        let client = kube::Client::try_default()
            .await
            .context("failed to initialize kubernetes client")?;
        clients.push(("default".to_string(), client));
    }
    for context in clusters.into_iter() {
        let config = Config::from_kubeconfig(&KubeConfigOptions {
            context: Some(context.clone()),
            ..Default::default()
        })
        .await
        .with_context(|| format!("failed to load kubeconfig context {}", context))?;
        let client = kube::Client::try_from(config)
            .with_context(|| format!("failed to initialize client for {}", context))?;
        clients.push((context, client));
    }

    let registry = Arc::new(ClientRegistry::new(params.clone()));
    let shutdown = CancellationToken::new();

    let mut tasks = Vec::with_capacity(clients.len());
    for (cluster, client) in clients.into_iter() {
        let (_, task) = admiral_controller::jobs(
            cluster.clone(),
            client,
            registry.clone(),
            params.clone(),
            shutdown.clone(),
        );
        info!(%cluster, "Watching jobs");
        tasks.push(tokio::spawn(
            task.instrument(info_span!("jobs", %cluster)),
        ));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    let term = async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => term.recv().await,
            _ => future::pending().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = term => info!("Received SIGTERM"),
    }

    shutdown.cancel();
    for task in tasks.into_iter() {
        task.await.context("controller task failed")?;
    }
    info!(identities = registry.identities().len(), "Shutdown complete");
    Ok(())
}
