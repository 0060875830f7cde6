use crate::Index;
use kube::ResourceExt;
use kubert::index::{ClusterRemoved, IndexClusterResource};
use netqos_controller_core::ReconciliationKey;
use netqos_controller_k8s_api::{self as k8s, annotations};
use std::collections::BTreeSet;
use tracing::{debug, instrument, trace};

/// The cached state of a `Node`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub zone: String,
    pub resource_version: Option<String>,
    pub deleting: bool,
}

// === impl NodeRecord ===

impl NodeRecord {
    pub fn from_resource(node: &k8s::Node) -> Self {
        Self {
            name: node.name_unchecked(),
            zone: annotations::node_zone(node).to_string(),
            resource_version: node.metadata.resource_version.clone(),
            deleting: node.metadata.deletion_timestamp.is_some(),
        }
    }

    /// A node update matters only when it moves the node into or out of `local_zone`.
    pub(crate) fn is_significant_update(&self, new: &Self, local_zone: &str) -> bool {
        if self.resource_version == new.resource_version || new.deleting {
            return false;
        }
        if self.zone != local_zone && new.zone != local_zone {
            return false;
        }
        self.zone != new.zone
    }
}

// === impl Index ===

impl Index {
    /// The policies that select a pod scheduled on the node. These pods change locality with the
    /// node's zone.
    pub fn policies_for_node(&self, node: &str) -> BTreeSet<ReconciliationKey> {
        let mut keys = BTreeSet::new();
        for pod in self.iter_pods() {
            if pod.node_name.as_deref() != Some(node) {
                continue;
            }
            let ns_labels = self.namespaces.get(&pod.id.namespace).map(|ns| &ns.labels);
            for policy in self.policies.values() {
                if policy.selects_pod(ns_labels, pod) {
                    keys.insert(policy.key());
                }
            }
        }
        keys
    }
}

impl IndexClusterResource<k8s::Node> for Index {
    #[instrument(skip_all, fields(name = %node.name_any()))]
    fn apply(&mut self, node: k8s::Node) {
        let record = NodeRecord::from_resource(&node);
        let name = record.name.clone();
        // Node additions only populate the cache.
        let Some(old) = self.nodes.insert(name.clone(), record.clone()) else {
            return;
        };
        if !old.is_significant_update(&record, &self.cluster.zone) {
            trace!("Ignoring insignificant node update");
            return;
        }
        debug!(from = %old.zone, to = %record.zone, "Node changed zones");
        self.queues.nodes.add(name, ());
    }

    fn delete(&mut self, name: String) {
        self.nodes.remove(&name);
    }

    fn reset(&mut self, nodes: Vec<k8s::Node>, removed: ClusterRemoved) {
        for node in nodes {
            self.apply(node);
        }
        for name in removed {
            IndexClusterResource::<k8s::Node>::delete(self, name);
        }
        self.synced.nodes.send_replace(true);
    }
}
