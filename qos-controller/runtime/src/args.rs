use crate::{
    controller::Controller,
    core::{
        workqueue::{FastSlow, QueueMetrics},
        WorkQueue, DEFAULT_CONTROLLER_NAME,
    },
    health, healthcheck,
    index::{metrics::IndexMetrics, ClusterInfo, Index, Queues, ServiceHealthIndex},
    k8s,
    metrics::ReconcileMetrics,
    nbdb::{self, memory, ovsdb},
    reconcile::Reconciler,
    synthesize::QosSynthesizer,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "netqos", about = "A NetworkQoS resource controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "netqos=info,warn",
        env = "NETQOS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The zone this controller programs. Only pods on nodes in this zone are handled.
    #[clap(long, default_value = k8s::annotations::DEFAULT_ZONE, env = "NETQOS_ZONE")]
    zone: String,

    /// Written as the owner controller of every database row this controller creates.
    #[clap(long, default_value = DEFAULT_CONTROLLER_NAME)]
    controller_name: String,

    #[clap(long, default_value = k8s::DEFAULT_NETWORK)]
    network: String,

    /// The number of workers per queue.
    #[clap(long, default_value = "4")]
    workers: usize,

    /// The northbound database: `tcp:<host>:<port>`, `unix:<path>`, or `memory`.
    #[clap(long, default_value = "unix:/var/run/ovn/ovnnb_db.sock", env = "NETQOS_NBDB")]
    nbdb: String,

    /// How long to wait for the northbound database to answer a request.
    #[clap(long, default_value = "10")]
    nbdb_timeout_secs: u64,

    /// How often every policy is reconciled regardless of events. Zero disables resyncs.
    #[clap(long, default_value = "300")]
    resync_period_secs: u64,

    #[clap(long, default_value = "60")]
    cache_sync_timeout_secs: u64,

    /// Serves service health checks for this node when set.
    #[clap(long, env = "NETQOS_NODE_NAME")]
    node_name: Option<String>,
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
            zone,
            controller_name,
            network,
            workers,
            nbdb,
            nbdb_timeout_secs,
            resync_period_secs,
            cache_sync_timeout_secs,
            node_name,
        } = self;

        let mut prom = <Registry>::default();
        let queue_metrics = QueueMetrics::register(prom.sub_registry_with_prefix("workqueue"));
        let reconcile_metrics =
            ReconcileMetrics::register(prom.sub_registry_with_prefix("reconciler"));

        let queues = Queues::new(FastSlow::default(), &queue_metrics);
        let index = Index::shared(ClusterInfo { zone, network }, queues);
        let indexed =
            IndexMetrics::register(index.clone(), prom.sub_registry_with_prefix("index")).shared();

        let health_index = node_name.map(|node| {
            let updates = WorkQueue::new("healthcheck", FastSlow::default(), &queue_metrics);
            let health_index = ServiceHealthIndex::shared(node, updates);
            let indexed = IndexMetrics::register(
                health_index.clone(),
                prom.sub_registry_with_prefix("service_health_index"),
            )
            .shared();
            (health_index, indexed)
        });

        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        let policies = runtime.watch_all::<k8s::NetworkQoS>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexed.clone(), policies)
                .instrument(info_span!("networkqoses")),
        );

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(indexed.clone(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(indexed.clone(), pods).instrument(info_span!("pods")),
        );

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(indexed, nodes).instrument(info_span!("nodes")));

        if let Some((health_index, indexed)) = health_index {
            let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed.clone(), services)
                    .instrument(info_span!("services")),
            );

            let slices = runtime.watch_all::<k8s::EndpointSlice>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(indexed, slices)
                    .instrument(info_span!("endpointslices")),
            );

            let server = healthcheck::Server::new(healthcheck::TcpListen::default());
            tokio::spawn(
                health::run(health_index, server, runtime.shutdown_handle())
                    .instrument(info_span!("healthcheck")),
            );
        }

        let client = connect(&nbdb, Duration::from_secs(nbdb_timeout_secs))?;
        info!(%nbdb, "Using northbound database");
        let reconciler = Reconciler::new(
            index,
            client,
            controller_name,
            Arc::new(QosSynthesizer::default()),
            reconcile_metrics,
        );
        let resync_period =
            (resync_period_secs > 0).then(|| Duration::from_secs(resync_period_secs));
        let controller = Controller::new(
            reconciler,
            workers,
            resync_period,
            Duration::from_secs(cache_sync_timeout_secs),
        );
        let mut controller = tokio::spawn(
            controller
                .run(runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting. The controller only completes early when startup
        // fails.
        let runtime = runtime.run();
        tokio::pin!(runtime);
        tokio::select! {
            res = &mut runtime => {
                if res.is_err() {
                    bail!("Aborted");
                }
            }
            res = &mut controller => {
                res.context("controller panicked")??;
                if runtime.await.is_err() {
                    bail!("Aborted");
                }
            }
        }

        Ok(())
    }
}

fn connect(endpoint: &str, timeout: Duration) -> Result<Arc<dyn nbdb::Client>> {
    if endpoint == "memory" {
        return Ok(Arc::new(memory::Database::default()));
    }
    let endpoint = endpoint
        .parse::<ovsdb::Endpoint>()
        .context("invalid --nbdb")?;
    Ok(Arc::new(ovsdb::JsonRpcClient::new(endpoint, timeout)))
}
