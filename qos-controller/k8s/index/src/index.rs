use crate::{ClusterInfo, NamespaceRecord, NodeRecord, PodRecord, PolicyRecord, Queues};
use ahash::AHashMap as HashMap;
use netqos_controller_core::{ReconciliationKey, ResourceId};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds the cached cluster state and the queues that its changes feed.
#[derive(Debug)]
pub struct Index {
    pub(crate) cluster: ClusterInfo,
    pub(crate) policies: HashMap<ResourceId, PolicyRecord>,
    pub(crate) namespaces: HashMap<String, NamespaceRecord>,
    /// Pods by namespace, then by name.
    pub(crate) pods: HashMap<String, HashMap<String, PodRecord>>,
    pub(crate) nodes: HashMap<String, NodeRecord>,
    pub(crate) queues: Queues,
    pub(crate) synced: Synced,
}

/// Records whether each watch has delivered its initial list.
#[derive(Debug)]
pub(crate) struct Synced {
    pub policies: watch::Sender<bool>,
    pub namespaces: watch::Sender<bool>,
    pub pods: watch::Sender<bool>,
    pub nodes: watch::Sender<bool>,
}

/// Completes once every watched kind has been listed.
#[derive(Clone, Debug)]
pub struct CacheSynced {
    kinds: Vec<(&'static str, watch::Receiver<bool>)>,
}

// === impl Index ===

impl Index {
    pub fn new(cluster: ClusterInfo, queues: Queues) -> Self {
        Self {
            cluster,
            policies: HashMap::default(),
            namespaces: HashMap::default(),
            pods: HashMap::default(),
            nodes: HashMap::default(),
            queues,
            synced: Synced::default(),
        }
    }

    pub fn shared(cluster: ClusterInfo, queues: Queues) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(cluster, queues)))
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn cache_synced(&self) -> CacheSynced {
        CacheSynced {
            kinds: vec![
                ("networkqos", self.synced.policies.subscribe()),
                ("namespace", self.synced.namespaces.subscribe()),
                ("pod", self.synced.pods.subscribe()),
                ("node", self.synced.nodes.subscribe()),
            ],
        }
    }

    pub fn policy(&self, id: &ResourceId) -> Option<&PolicyRecord> {
        self.policies.get(id)
    }

    /// The keys of every cached policy, including those pending deletion.
    pub fn policy_keys(&self) -> Vec<ReconciliationKey> {
        let mut keys = self
            .policies
            .values()
            .map(PolicyRecord::key)
            .collect::<Vec<_>>();
        keys.sort_by_key(|k| k.to_string());
        keys
    }

    /// Whether the key names a cached policy that is not pending deletion.
    pub fn is_live_policy(&self, key: &ReconciliationKey) -> bool {
        key.resource_id()
            .and_then(|id| self.policies.get(id))
            .is_some_and(|p| !p.deleting)
    }

    pub fn namespace(&self, name: &str) -> Option<&NamespaceRecord> {
        self.namespaces.get(name)
    }

    pub fn pod(&self, id: &ResourceId) -> Option<&PodRecord> {
        self.pods.get(&id.namespace)?.get(&id.name)
    }

    pub fn node(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.get(name)
    }

    pub(crate) fn iter_pods(&self) -> impl Iterator<Item = &PodRecord> {
        self.pods.values().flat_map(|pods| pods.values())
    }
}

// === impl Synced ===

impl Default for Synced {
    fn default() -> Self {
        Self {
            policies: watch::channel(false).0,
            namespaces: watch::channel(false).0,
            pods: watch::channel(false).0,
            nodes: watch::channel(false).0,
        }
    }
}

// === impl CacheSynced ===

impl CacheSynced {
    /// Waits for every kind to be listed. Fails if the index is dropped first.
    pub async fn wait(mut self) -> Result<(), watch::error::RecvError> {
        for (kind, rx) in &mut self.kinds {
            rx.wait_for(|synced| *synced).await?;
            debug!(%kind, "Cache synced");
        }
        Ok(())
    }

    /// The kinds that have not yet been listed.
    pub fn pending(&self) -> Vec<&'static str> {
        self.kinds
            .iter()
            .filter(|(_, rx)| !*rx.borrow())
            .map(|(kind, _)| *kind)
            .collect()
    }
}
