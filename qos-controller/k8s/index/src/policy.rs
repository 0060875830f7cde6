use crate::{Index, PodRecord};
use kube::ResourceExt;
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use netqos_controller_core::{ReconciliationKey, ResourceId};
use netqos_controller_k8s_api::{self as k8s, Labels, NetworkQoSSpec};
use tracing::{debug, instrument, trace, warn};

/// The cached state of a `NetworkQoS`.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyRecord {
    pub id: ResourceId,
    pub resource_version: Option<String>,
    pub deleting: bool,
    pub spec: NetworkQoSSpec,
}

// === impl PolicyRecord ===

impl PolicyRecord {
    pub fn from_resource(policy: k8s::NetworkQoS) -> Option<Self> {
        let namespace = policy.namespace()?;
        let name = policy.name_unchecked();
        Some(Self {
            id: ResourceId::new(namespace, name),
            resource_version: policy.metadata.resource_version,
            deleting: policy.metadata.deletion_timestamp.is_some(),
            spec: policy.spec,
        })
    }

    pub fn key(&self) -> ReconciliationKey {
        ReconciliationKey::Namespaced(self.id.clone())
    }

    /// An update matters only when the spec itself changes. Resyncs and objects that are being
    /// deleted never count as spec changes.
    pub(crate) fn is_significant_update(&self, new: &Self) -> bool {
        if self.resource_version == new.resource_version || new.deleting {
            return false;
        }
        self.spec != new.spec
    }

    /// Whether pods in the given namespace are eligible for selection.
    pub fn selects_namespace(&self, namespace: &str, labels: &Labels) -> bool {
        match &self.spec.namespace_selector {
            Some(selector) => selector.matches(labels),
            None => self.id.namespace == namespace,
        }
    }

    /// Whether the pod is selected, given the labels of its namespace (if cached).
    pub fn selects_pod(&self, namespace_labels: Option<&Labels>, pod: &PodRecord) -> bool {
        let namespace_selected = match (&self.spec.namespace_selector, namespace_labels) {
            (Some(selector), Some(labels)) => selector.matches(labels),
            (Some(_), None) => false,
            (None, _) => self.id.namespace == pod.id.namespace,
        };
        namespace_selected && self.spec.pod_selector.matches(&pod.labels)
    }
}

// === impl Index ===

impl Index {
    /// The cached pods that a policy currently applies to: selected, still running, and
    /// scheduled in the local zone.
    pub fn selected_pods(&self, policy: &PolicyRecord) -> Vec<PodRecord> {
        let mut pods = self
            .iter_pods()
            .filter(|pod| !pod.completed && self.is_pod_local(pod))
            .filter(|pod| {
                let ns_labels = self.namespaces.get(&pod.id.namespace).map(|ns| &ns.labels);
                policy.selects_pod(ns_labels, pod)
            })
            .cloned()
            .collect::<Vec<_>>();
        pods.sort_by(|a, b| a.id.cmp(&b.id));
        pods
    }
}

impl IndexNamespacedResource<k8s::NetworkQoS> for Index {
    #[instrument(skip_all, fields(ns = ?policy.namespace(), name = %policy.name_any()))]
    fn apply(&mut self, policy: k8s::NetworkQoS) {
        let Some(record) = PolicyRecord::from_resource(policy) else {
            warn!("Ignoring NetworkQoS without a namespace");
            return;
        };

        let key = record.key();
        match self.policies.insert(record.id.clone(), record.clone()) {
            None => {
                debug!("Policy created");
                self.queues.policies.add(key, ());
            }
            Some(old) if old.is_significant_update(&record) => {
                debug!("Policy updated");
                self.queues.policies.add(key, ());
            }
            Some(_) => trace!("Ignoring insignificant policy update"),
        }
    }

    #[instrument(skip(self))]
    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        if self.policies.remove(&id).is_some() {
            debug!("Policy deleted");
        }
        // Queued even if the policy was never cached.
        self.queues.policies.add(ReconciliationKey::Namespaced(id), ());
    }

    fn reset(&mut self, policies: Vec<k8s::NetworkQoS>, removed: NamespacedRemoved) {
        for policy in policies {
            self.apply(policy);
        }
        for (namespace, names) in removed {
            for name in names {
                IndexNamespacedResource::<k8s::NetworkQoS>::delete(
                    self,
                    namespace.clone(),
                    name,
                );
            }
        }
        self.synced.policies.send_replace(true);
    }
}
