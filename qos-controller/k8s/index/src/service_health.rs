//! Tracks the services that ask for node-local health checks and how many of their endpoints are
//! ready on this node.

use crate::metrics::SizedIndex;
use ahash::AHashMap as HashMap;
use kube::ResourceExt;
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use netqos_controller_core::{ResourceId, WorkQueue};
use netqos_controller_k8s_api::{self as k8s, SERVICE_NAME_LABEL};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub type SharedServiceHealthIndex = Arc<RwLock<ServiceHealthIndex>>;

#[derive(Debug)]
pub struct ServiceHealthIndex {
    node_name: String,
    /// Health check ports of services with a local traffic policy.
    services: HashMap<ResourceId, u16>,
    slices: HashMap<ResourceId, Slice>,
    /// Signaled whenever the tracked services or their local endpoint counts change.
    updates: WorkQueue<()>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Slice {
    service: ResourceId,
    local_ready: usize,
}

// === impl ServiceHealthIndex ===

impl ServiceHealthIndex {
    pub fn new(node_name: impl Into<String>, updates: WorkQueue<()>) -> Self {
        Self {
            node_name: node_name.into(),
            services: HashMap::default(),
            slices: HashMap::default(),
            updates,
        }
    }

    pub fn shared(
        node_name: impl Into<String>,
        updates: WorkQueue<()>,
    ) -> SharedServiceHealthIndex {
        Arc::new(RwLock::new(Self::new(node_name, updates)))
    }

    pub fn updates(&self) -> &WorkQueue<()> {
        &self.updates
    }

    pub fn services(&self) -> Vec<(ResourceId, u16)> {
        self.services
            .iter()
            .map(|(id, port)| (id.clone(), *port))
            .collect()
    }

    /// Ready endpoints on this node, per tracked service.
    pub fn local_endpoints(&self) -> Vec<(ResourceId, usize)> {
        let mut counts = self
            .services
            .keys()
            .map(|id| (id.clone(), 0))
            .collect::<HashMap<_, _>>();
        for slice in self.slices.values() {
            if let Some(count) = counts.get_mut(&slice.service) {
                *count += slice.local_ready;
            }
        }
        counts.into_iter().collect()
    }

    fn notify(&self) {
        self.updates.add((), ());
    }
}

fn health_check_port(svc: &k8s::Service) -> Option<u16> {
    let spec = svc.spec.as_ref()?;
    if spec.external_traffic_policy.as_deref() != Some("Local") {
        return None;
    }
    let port = spec.health_check_node_port?;
    match u16::try_from(port) {
        Ok(port) if port != 0 => Some(port),
        _ => {
            warn!(port, "Ignoring invalid health check node port");
            None
        }
    }
}

impl IndexNamespacedResource<k8s::Service> for ServiceHealthIndex {
    #[instrument(skip_all, fields(ns = ?svc.namespace(), name = %svc.name_any()))]
    fn apply(&mut self, svc: k8s::Service) {
        let Some(namespace) = svc.namespace() else {
            return;
        };
        let id = ResourceId::new(namespace, svc.name_unchecked());
        let changed = match health_check_port(&svc) {
            Some(port) => self.services.insert(id, port) != Some(port),
            None => self.services.remove(&id).is_some(),
        };
        if changed {
            debug!("Health-checked service changed");
            self.notify();
        }
    }

    #[instrument(skip(self))]
    fn delete(&mut self, namespace: String, name: String) {
        if self
            .services
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            debug!("Health-checked service deleted");
            self.notify();
        }
    }

    fn reset(&mut self, services: Vec<k8s::Service>, removed: NamespacedRemoved) {
        for svc in services {
            self.apply(svc);
        }
        for (namespace, names) in removed {
            for name in names {
                IndexNamespacedResource::<k8s::Service>::delete(self, namespace.clone(), name);
            }
        }
    }
}

impl IndexNamespacedResource<k8s::EndpointSlice> for ServiceHealthIndex {
    #[instrument(skip_all, fields(ns = ?slice.namespace(), name = %slice.name_any()))]
    fn apply(&mut self, slice: k8s::EndpointSlice) {
        let Some(namespace) = slice.namespace() else {
            return;
        };
        let id = ResourceId::new(namespace.clone(), slice.name_unchecked());
        let Some(service) = slice.labels().get(SERVICE_NAME_LABEL) else {
            if self.slices.remove(&id).is_some() {
                self.notify();
            }
            return;
        };
        let local_ready = slice
            .endpoints
            .iter()
            .filter(|ep| ep.node_name.as_deref() == Some(self.node_name.as_str()))
            // Endpoints with an unknown readiness are considered ready.
            .filter(|ep| ep.conditions.as_ref().and_then(|c| c.ready) != Some(false))
            .count();
        let record = Slice {
            service: ResourceId::new(namespace, service.clone()),
            local_ready,
        };
        if self.slices.insert(id, record.clone()).as_ref() != Some(&record) {
            debug!(local_ready, "Endpoint slice changed");
            self.notify();
        }
    }

    #[instrument(skip(self))]
    fn delete(&mut self, namespace: String, name: String) {
        if self
            .slices
            .remove(&ResourceId::new(namespace, name))
            .is_some()
        {
            debug!("Endpoint slice deleted");
            self.notify();
        }
    }

    fn reset(&mut self, slices: Vec<k8s::EndpointSlice>, removed: NamespacedRemoved) {
        for slice in slices {
            self.apply(slice);
        }
        for (namespace, names) in removed {
            for name in names {
                IndexNamespacedResource::<k8s::EndpointSlice>::delete(
                    self,
                    namespace.clone(),
                    name,
                );
            }
        }
    }
}

impl SizedIndex<k8s::Service> for ServiceHealthIndex {
    fn size(&self, namespace: &str) -> usize {
        self.services
            .keys()
            .filter(|id| id.namespace == namespace)
            .count()
    }
}

impl SizedIndex<k8s::EndpointSlice> for ServiceHealthIndex {
    fn size(&self, namespace: &str) -> usize {
        self.slices
            .keys()
            .filter(|id| id.namespace == namespace)
            .count()
    }
}
