use crate::Index;
use ahash::AHashMap as HashMap;
use kube::ResourceExt;
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use netqos_controller_core::{PendingEvent, ReconciliationKey, ResourceId};
use netqos_controller_k8s_api::{self as k8s, annotations, Labels};
use std::{collections::BTreeSet, net::IpAddr};
use tracing::{debug, instrument, trace, warn};

/// The cached state of a `Pod`, projected onto a single network.
#[derive(Clone, Debug, PartialEq)]
pub struct PodRecord {
    pub id: ResourceId,
    pub labels: Labels,
    pub resource_version: Option<String>,
    pub deleting: bool,
    pub node_name: Option<String>,
    pub ips: Vec<IpAddr>,
    pub completed: bool,
}

// === impl PodRecord ===

impl PodRecord {
    pub fn from_resource(pod: &k8s::Pod, network: &str) -> Option<Self> {
        let namespace = pod.namespace()?;
        Some(Self {
            id: ResourceId::new(namespace, pod.name_unchecked()),
            labels: pod.metadata.labels.clone().into(),
            resource_version: pod.metadata.resource_version.clone(),
            deleting: pod.metadata.deletion_timestamp.is_some(),
            node_name: annotations::pod_node_name(pod).map(Into::into),
            ips: annotations::pod_ips(pod, network),
            completed: annotations::is_pod_completed(pod),
        })
    }

    /// The name of the pod's logical switch port.
    pub fn logical_port(&self) -> String {
        format!("{}_{}", self.id.namespace, self.id.name)
    }

    /// A pod update matters when its labels, its number of addresses, or its completion changes.
    pub(crate) fn is_significant_update(&self, new: &Self) -> bool {
        if self.resource_version == new.resource_version || new.deleting {
            return false;
        }
        self.labels != new.labels
            || self.ips.len() != new.ips.len()
            || self.completed != new.completed
    }
}

// === impl Index ===

impl Index {
    /// The policies that select any snapshot of the pod.
    pub fn policies_for_pod_events(
        &self,
        events: &[PendingEvent<PodRecord>],
    ) -> BTreeSet<ReconciliationKey> {
        let mut keys = BTreeSet::new();
        for pod in events.iter().flat_map(PendingEvent::snapshots) {
            let ns_labels = self
                .namespaces
                .get(&pod.id.namespace)
                .map(|ns| &ns.labels);
            for policy in self.policies.values() {
                if policy.selects_pod(ns_labels, pod) {
                    keys.insert(policy.key());
                }
            }
        }
        keys
    }
}

impl IndexNamespacedResource<k8s::Pod> for Index {
    #[instrument(skip_all, fields(ns = ?pod.namespace(), name = %pod.name_any()))]
    fn apply(&mut self, pod: k8s::Pod) {
        let Some(record) = PodRecord::from_resource(&pod, &self.cluster.network) else {
            warn!("Ignoring pod without a namespace");
            return;
        };
        let id = record.id.clone();
        let event = match self
            .pods
            .entry(id.namespace.clone())
            .or_insert_with(HashMap::default)
            .insert(id.name.clone(), record.clone())
        {
            None => PendingEvent::Created { new: record },
            Some(old) if old.is_significant_update(&record) => PendingEvent::Updated {
                old,
                new: record,
            },
            Some(_) => {
                trace!("Ignoring insignificant pod update");
                return;
            }
        };
        debug!("Pod changed");
        self.queues.pods.add(id, vec![event]);
    }

    #[instrument(skip(self))]
    fn delete(&mut self, namespace: String, name: String) {
        let Some(pods) = self.pods.get_mut(&namespace) else {
            return;
        };
        let Some(old) = pods.remove(&name) else {
            return;
        };
        if pods.is_empty() {
            self.pods.remove(&namespace);
        }
        debug!("Pod deleted");
        self.queues.pods.add(
            ResourceId::new(namespace, name),
            vec![PendingEvent::Deleted { old }],
        );
    }

    fn reset(&mut self, pods: Vec<k8s::Pod>, removed: NamespacedRemoved) {
        for pod in pods {
            self.apply(pod);
        }
        for (namespace, names) in removed {
            for name in names {
                IndexNamespacedResource::<k8s::Pod>::delete(self, namespace.clone(), name);
            }
        }
        self.synced.pods.send_replace(true);
    }
}
