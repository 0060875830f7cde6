use crate::Index;
use kube::ResourceExt;
use kubert::index::{ClusterRemoved, IndexClusterResource};
use netqos_controller_core::{PendingEvent, ReconciliationKey};
use netqos_controller_k8s_api::{self as k8s, Labels};
use std::collections::BTreeSet;
use tracing::{debug, instrument, trace};

/// The cached state of a `Namespace`.
#[derive(Clone, Debug, PartialEq)]
pub struct NamespaceRecord {
    pub name: String,
    pub labels: Labels,
    pub resource_version: Option<String>,
    pub deleting: bool,
}

// === impl NamespaceRecord ===

impl NamespaceRecord {
    pub fn from_resource(ns: k8s::Namespace) -> Self {
        Self {
            name: ns.name_unchecked(),
            labels: ns.metadata.labels.into(),
            resource_version: ns.metadata.resource_version,
            deleting: ns.metadata.deletion_timestamp.is_some(),
        }
    }

    /// Only label changes can change which policies select a namespace.
    pub(crate) fn is_significant_update(&self, new: &Self) -> bool {
        if self.resource_version == new.resource_version || new.deleting {
            return false;
        }
        self.labels != new.labels
    }
}

// === impl Index ===

impl Index {
    /// The policies that select pods from any snapshot of the namespace.
    pub fn policies_for_namespace_events(
        &self,
        events: &[PendingEvent<NamespaceRecord>],
    ) -> BTreeSet<ReconciliationKey> {
        let mut keys = BTreeSet::new();
        for ns in events.iter().flat_map(PendingEvent::snapshots) {
            for policy in self.policies.values() {
                if policy.selects_namespace(&ns.name, &ns.labels) {
                    keys.insert(policy.key());
                }
            }
        }
        keys
    }
}

impl IndexClusterResource<k8s::Namespace> for Index {
    #[instrument(skip_all, fields(name = %ns.name_any()))]
    fn apply(&mut self, ns: k8s::Namespace) {
        let record = NamespaceRecord::from_resource(ns);
        let name = record.name.clone();
        let event = match self.namespaces.insert(name.clone(), record.clone()) {
            None => PendingEvent::Created { new: record },
            Some(old) if old.is_significant_update(&record) => PendingEvent::Updated {
                old,
                new: record,
            },
            Some(_) => {
                trace!("Ignoring insignificant namespace update");
                return;
            }
        };
        debug!("Namespace changed");
        self.queues.namespaces.add(name, vec![event]);
    }

    #[instrument(skip(self))]
    fn delete(&mut self, name: String) {
        if let Some(old) = self.namespaces.remove(&name) {
            debug!("Namespace deleted");
            self.queues
                .namespaces
                .add(name, vec![PendingEvent::Deleted { old }]);
        }
    }

    fn reset(&mut self, namespaces: Vec<k8s::Namespace>, removed: ClusterRemoved) {
        for ns in namespaces {
            self.apply(ns);
        }
        for name in removed {
            IndexClusterResource::<k8s::Namespace>::delete(self, name);
        }
        self.synced.namespaces.send_replace(true);
    }
}
