use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    reconciles: Family<ResultLabels, Counter>,
    duration: Histogram,
    transactions: Counter,
    repaired: Counter,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Converged,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: Outcome,
}

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<ResultLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Total number of policy reconciliations by result",
            reconciles.clone(),
        );

        let duration = Histogram::new([0.001, 0.01, 0.1, 1.0, 10.0]);
        reg.register_with_unit(
            "reconcile_duration",
            "Histogram of policy reconciliation latency",
            Unit::Seconds,
            duration.clone(),
        );

        let transactions = Counter::default();
        reg.register(
            "transactions",
            "Total number of database transactions committed",
            transactions.clone(),
        );

        let repaired = Counter::default();
        reg.register(
            "repaired_rows",
            "Total number of orphaned rows deleted at startup",
            repaired.clone(),
        );

        Self {
            reconciles,
            duration,
            transactions,
            repaired,
        }
    }

    pub(crate) fn observe(&self, result: Outcome, elapsed: Duration) {
        self.reconciles
            .get_or_create(&ResultLabels { result })
            .inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn committed(&self) {
        self.transactions.inc();
    }

    pub(crate) fn repaired(&self, rows: usize) {
        self.repaired.inc_by(rows as u64);
    }
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
