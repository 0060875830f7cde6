use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct QueueMetrics {
    depth: Family<QueueLabels, Gauge>,
    adds: Family<QueueLabels, Counter>,
    retries: Family<QueueLabels, Counter>,
    drops: Family<QueueLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct QueueLabels {
    queue: String,
}

/// Metrics for a single named queue.
#[derive(Clone, Debug, Default)]
pub(super) struct Metrics {
    pub depth: Gauge,
    pub adds: Counter,
    pub retries: Counter,
    pub drops: Counter,
}

// === impl QueueMetrics ===

impl QueueMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let depth = Family::default();
        prom.register(
            "depth",
            "Gauge of the number of items waiting in the queue",
            depth.clone(),
        );

        let adds = Family::default();
        prom.register("adds", "Count of items added to the queue", adds.clone());

        let retries = Family::default();
        prom.register(
            "retries",
            "Count of items requeued after a failure",
            retries.clone(),
        );

        let drops = Family::default();
        prom.register(
            "drops",
            "Count of items dropped after exhausting their retries",
            drops.clone(),
        );

        Self {
            depth,
            adds,
            retries,
            drops,
        }
    }

    pub(super) fn queue(&self, name: &str) -> Metrics {
        let labels = QueueLabels {
            queue: name.to_string(),
        };
        Metrics {
            depth: self.depth.get_or_create(&labels).clone(),
            adds: self.adds.get_or_create(&labels).clone(),
            retries: self.retries.get_or_create(&labels).clone(),
            drops: self.drops.get_or_create(&labels).clone(),
        }
    }
}
