use crate::{
    core::{KeyedLock, ReconciliationKey},
    index::{queues::PolicyQueue, CacheSynced, SharedIndex},
    reconcile::Reconciler,
    repair, workers,
};
use anyhow::{bail, Result};
use tokio::{
    task::JoinSet,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tracing::{debug, info, info_span, warn, Instrument};

/// Drives the worker pools that keep the database converged with the index.
pub struct Controller {
    reconciler: Reconciler,
    locks: KeyedLock<ReconciliationKey>,
    workers: usize,
    resync_period: Option<Duration>,
    cache_sync_timeout: Duration,
}

// === impl Controller ===

impl Controller {
    pub fn new(
        reconciler: Reconciler,
        workers: usize,
        resync_period: Option<Duration>,
        cache_sync_timeout: Duration,
    ) -> Self {
        Self {
            reconciler,
            locks: KeyedLock::default(),
            workers: workers.max(1),
            resync_period,
            cache_sync_timeout,
        }
    }

    /// Waits for the caches to sync, repairs stale rows, and then processes every queue until
    /// `drain` is signaled.
    ///
    /// Fails only when the caches do not sync in time. On shutdown, the queues stop handing out
    /// items and in-flight reconciliations complete before the drain is released.
    pub async fn run(self, drain: drain::Watch) -> Result<()> {
        let (synced, queues) = {
            let index = self.reconciler.index().read();
            (index.cache_synced(), index.queues().clone())
        };
        self.wait_for_caches(synced).await?;

        match repair::repair(&self.reconciler).await {
            Ok(rows) => debug!(rows, "Repaired"),
            Err(error) => warn!(%error, "Failed to repair stale rows"),
        }
        let live = {
            let index = self.reconciler.index().read();
            index
                .policy_keys()
                .into_iter()
                .filter(|key| index.is_live_policy(key))
                .collect::<Vec<_>>()
        };
        info!(policies = live.len(), "Caches synced");
        for key in live {
            queues.policies.add(key, ());
        }

        let mut tasks = JoinSet::new();
        for worker in 0..self.workers {
            let reconciler = self.reconciler.clone();
            let locks = self.locks.clone();
            tasks.spawn(
                workers::run(queues.policies.clone(), reconciler, locks, workers::policy)
                    .instrument(info_span!("networkqos", worker)),
            );

            let reconciler = self.reconciler.clone();
            let locks = self.locks.clone();
            tasks.spawn(
                workers::run(queues.namespaces.clone(), reconciler, locks, workers::namespace)
                    .instrument(info_span!("namespaces", worker)),
            );

            let reconciler = self.reconciler.clone();
            let locks = self.locks.clone();
            tasks.spawn(
                workers::run(queues.pods.clone(), reconciler, locks, workers::pod)
                    .instrument(info_span!("pods", worker)),
            );

            let reconciler = self.reconciler.clone();
            let locks = self.locks.clone();
            tasks.spawn(
                workers::run(queues.nodes.clone(), reconciler, locks, workers::node)
                    .instrument(info_span!("nodes", worker)),
            );
        }

        let resync = self.resync_period.map(|period| {
            let index = self.reconciler.index().clone();
            let queue = queues.policies.clone();
            tokio::spawn(resync(index, queue, period).instrument(info_span!("resync")))
        });

        let release = drain.signaled().await;
        info!("Shutting down");
        queues.shutdown();
        if let Some(task) = resync {
            task.abort();
        }
        release
            .release_after(async move {
                while let Some(res) = tasks.join_next().await {
                    if let Err(error) = res {
                        warn!(%error, "Worker failed");
                    }
                }
            })
            .await;
        Ok(())
    }

    async fn wait_for_caches(&self, synced: CacheSynced) -> Result<()> {
        match time::timeout(self.cache_sync_timeout, synced.clone().wait()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => bail!("index closed before caches synced"),
            Err(_) => bail!(
                "timed out after {:?} waiting for caches to sync: {}",
                self.cache_sync_timeout,
                synced.pending().join(", ")
            ),
        }
    }
}

/// Periodically requeues every cached policy so that drift in the database is repaired.
async fn resync(index: SharedIndex, queue: PolicyQueue, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let keys = index.read().policy_keys();
        debug!(policies = keys.len(), "Resyncing");
        for key in keys {
            queue.add(key, ());
        }
    }
}
