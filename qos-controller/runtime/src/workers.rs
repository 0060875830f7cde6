use crate::{
    core::{workqueue::Coalesce, KeyedLock, PendingEvent, ReconciliationKey, ResourceId, WorkQueue},
    index::{Index, NamespaceRecord, PodRecord},
    reconcile::Reconciler,
};
use anyhow::Result;
use std::{collections::BTreeSet, fmt, hash::Hash};
use tracing::{debug, trace, warn};

/// The number of times a failed item is requeued before it is dropped.
pub const MAX_REQUEUES: u32 = 15;

/// Processes items from `queue` until it shuts down.
///
/// Each item is translated into the policies it affects, which are reconciled one at a time
/// while holding their key. When any reconciliation fails the whole item is requeued with
/// backoff, carrying its payload so that the same policies are recomputed on retry.
pub async fn run<K, V, F>(
    queue: WorkQueue<K, V>,
    reconciler: Reconciler,
    locks: KeyedLock<ReconciliationKey>,
    affected: F,
) where
    K: Clone + Eq + Hash + fmt::Display + Send + 'static,
    V: Coalesce + Send + 'static,
    F: Fn(&Index, &K, &V) -> BTreeSet<ReconciliationKey>,
{
    while let Some((item, value)) = queue.get().await {
        let keys = affected(&*reconciler.index().read(), &item, &value);
        trace!(%item, policies = keys.len(), "Processing");

        match reconcile_all(&reconciler, &locks, keys).await {
            Ok(()) => queue.forget(&item),
            Err(error) if queue.num_requeues(&item) < MAX_REQUEUES => {
                debug!(%item, %error, "Requeueing");
                queue.add_rate_limited(item.clone(), value);
            }
            Err(error) => {
                warn!(%item, %error, "Dropping item after {MAX_REQUEUES} retries");
                queue.drop_item(&item);
            }
        }
        queue.done(&item);
    }
    debug!(queue = %queue.name(), "Queue shut down");
}

/// Every key is attempted even after a failure. The first error is returned.
async fn reconcile_all(
    reconciler: &Reconciler,
    locks: &KeyedLock<ReconciliationKey>,
    keys: BTreeSet<ReconciliationKey>,
) -> Result<()> {
    let mut failed = None;
    for key in keys {
        let _guard = locks.acquire(&key).await;
        if let Err(error) = reconciler.reconcile(&key).await {
            debug!(%key, %error, "Reconciliation failed");
            failed.get_or_insert(error);
        }
    }
    failed.map_or(Ok(()), Err)
}

// Translators from queue items to the policies they affect.

pub fn policy(_: &Index, key: &ReconciliationKey, _: &()) -> BTreeSet<ReconciliationKey> {
    BTreeSet::from([key.clone()])
}

pub fn namespace(
    index: &Index,
    _: &String,
    events: &Vec<PendingEvent<NamespaceRecord>>,
) -> BTreeSet<ReconciliationKey> {
    index.policies_for_namespace_events(events)
}

pub fn pod(
    index: &Index,
    _: &ResourceId,
    events: &Vec<PendingEvent<PodRecord>>,
) -> BTreeSet<ReconciliationKey> {
    index.policies_for_pod_events(events)
}

pub fn node(index: &Index, name: &String, _: &()) -> BTreeSet<ReconciliationKey> {
    index.policies_for_node(name)
}
