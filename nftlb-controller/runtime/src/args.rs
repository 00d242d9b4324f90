use crate::{
    alias::AliasManager,
    dispatch::Dispatcher,
    exec::{KubeExec, KubePods},
    index::{self, Registry, Settings},
    k8s::{self, watcher},
    metrics::{AliasMetrics, SinkMetrics},
    reconcile::Reconciler,
    sink::{HttpSink, Retry, RetryPolicy},
    watch::Classifier,
};
use anyhow::{bail, ensure, Result};
use clap::Parser;
use prometheus_client::registry::Registry as Prometheus;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "nftlb-controller", about = "Projects cluster services onto an nftlb load balancer")]
pub struct Args {
    #[clap(
        long,
        default_value = "nftlb=info,warn",
        env = "NFTLB_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Base URL of the load balancer's API.
    #[clap(long, default_value = "http://127.0.0.1:5555", env = "NFTLB_URL")]
    nftlb_url: String,

    /// Key sent with every load balancer request.
    #[clap(long, env = "NFTLB_KEY", hide_env_values = true)]
    nftlb_key: String,

    /// Interface that direct-server-return farms forward through.
    #[clap(long, default_value = "nftlb0")]
    dsr_iface: String,

    /// Label used to find a service's pods before its endpoints are known.
    #[clap(long, default_value = "app")]
    dsr_pod_label: String,

    /// Names of objects that are never projected.
    #[clap(
        long,
        default_value = "kubernetes,kube-dns,kube-controller-manager,kube-scheduler",
        value_delimiter = ','
    )]
    ignored_services: Vec<String>,

    /// Number of notification workers.
    #[clap(long, default_value = "4")]
    workers: usize,

    #[clap(long, default_value = "3")]
    sink_attempts: u32,

    #[clap(long, default_value = "100")]
    sink_backoff_ms: u64,

    #[clap(long, default_value = "5000")]
    sink_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            nftlb_url,
            nftlb_key,
            dsr_iface,
            dsr_pod_label,
            ignored_services,
            workers,
            sink_attempts,
            sink_backoff_ms,
            sink_timeout_ms,
        } = self;

        ensure!(workers > 0, "--workers must be at least 1");
        ensure!(sink_attempts > 0, "--sink-attempts must be at least 1");

        let registry = Registry::shared();

        let mut prom = <Prometheus>::default();
        index::registry::metrics::register(
            prom.sub_registry_with_prefix("registry"),
            registry.clone(),
        );
        let sink_metrics = SinkMetrics::register(prom.sub_registry_with_prefix("sink"));
        let alias_metrics = AliasMetrics::register(prom.sub_registry_with_prefix("dsr"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let sink = Retry::new(
            HttpSink::new(
                nftlb_url.clone(),
                nftlb_key,
                Duration::from_millis(sink_timeout_ms),
            ),
            RetryPolicy {
                attempts: sink_attempts,
                backoff: Duration::from_millis(sink_backoff_ms),
            },
            sink_metrics,
        );
        let aliases = AliasManager::new(
            registry.clone(),
            KubeExec::new(runtime.client()),
            KubePods::new(runtime.client()),
            alias_metrics,
        );
        let reconciler = Reconciler::new(
            registry,
            Settings {
                dsr_iface,
                dsr_pod_label,
            },
            ignored_services,
            sink,
            aliases,
        );
        let dispatcher = Dispatcher::spawn(workers, Arc::new(reconciler));
        let classifier = Classifier::shared(dispatcher);

        // Spawn resource watches.

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(classifier.clone(), services)
                .instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(classifier.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let network_policies =
            runtime.watch_all::<k8s::NetworkPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(classifier, network_policies)
                .instrument(info_span!("networkpolicies")),
        );

        info!(url = %nftlb_url, workers, "Projecting services onto load balancer");

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
