use crate::{NamespaceRecord, PodRecord};
use netqos_controller_core::{
    workqueue::{FastSlow, QueueMetrics},
    PendingEvent, ReconciliationKey, ResourceId, WorkQueue,
};

pub type PolicyQueue = WorkQueue<ReconciliationKey>;
pub type NamespaceQueue = WorkQueue<String, Vec<PendingEvent<NamespaceRecord>>>;
pub type PodQueue = WorkQueue<ResourceId, Vec<PendingEvent<PodRecord>>>;
pub type NodeQueue = WorkQueue<String>;

/// The work queues fed by the index, one per watched kind.
///
/// Namespace and pod items carry every admitted event for the object, in arrival order, so that
/// workers can compute the policies affected by both the old and new state.
#[derive(Clone, Debug)]
pub struct Queues {
    pub policies: PolicyQueue,
    pub namespaces: NamespaceQueue,
    pub pods: PodQueue,
    pub nodes: NodeQueue,
}

// === impl Queues ===

impl Queues {
    pub fn new(limiter: FastSlow, metrics: &QueueMetrics) -> Self {
        Self {
            policies: WorkQueue::new("networkqos", limiter, metrics),
            namespaces: WorkQueue::new("networkqosnamespace", limiter, metrics),
            pods: WorkQueue::new("networkqospod", limiter, metrics),
            nodes: WorkQueue::new("networkqosnode", limiter, metrics),
        }
    }

    /// Stops every queue. Waiting workers observe the shutdown and exit.
    pub fn shutdown(&self) {
        self.policies.shutdown();
        self.namespaces.shutdown();
        self.pods.shutdown();
        self.nodes.shutdown();
    }
}
