use crate::{Index, NodeRecord, PodRecord};

impl Index {
    pub fn is_node_local(&self, node: &NodeRecord) -> bool {
        node.zone == self.cluster.zone
    }

    /// Unscheduled pods and pods on nodes that have not been observed are never local.
    pub fn is_pod_local(&self, pod: &PodRecord) -> bool {
        pod.node_name
            .as_deref()
            .and_then(|name| self.nodes.get(name))
            .is_some_and(|node| self.is_node_local(node))
    }
}
