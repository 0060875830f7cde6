use std::sync::Arc;

use kube::ResourceExt;
use kubert::index::{ClusterRemoved, NamespacedRemoved};
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Wraps an index to record its applies, deletes, resets, and size.
pub struct IndexMetrics<T> {
    inner: T,

    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

/// Cluster-scoped kinds are recorded with an empty namespace.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

pub trait SizedClusterIndex<R> {
    fn cluster_size(&self) -> usize;
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }
}

impl<T, R> SizedClusterIndex<R> for Arc<RwLock<T>>
where
    T: SizedClusterIndex<R>,
{
    fn cluster_size(&self) -> usize {
        self.read().cluster_size()
    }
}

impl<T> IndexMetrics<T> {
    pub fn register(inner: T, prom: &mut Registry) -> Self {
        let index_size = Family::default();
        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            index_size.clone(),
        );

        let index_applies = Family::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            index_applies.clone(),
        );

        let index_deletes = Family::default();
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            index_deletes.clone(),
        );

        let index_resets = Family::default();
        prom.register(
            "index_resets",
            "Count of resets to the index",
            index_resets.clone(),
        );

        Self {
            inner,
            index_size,
            index_applies,
            index_deletes,
            index_resets,
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    fn labels<R: kube::Resource<DynamicType = ()>>(namespace: &str) -> NamespacedIndexLabels {
        NamespacedIndexLabels {
            namespace: namespace.to_string(),
            kind: R::kind(&()).to_string(),
        }
    }

    fn record_reset<R: kube::Resource<DynamicType = ()>>(&self) {
        self.index_resets
            .get_or_create(&IndexLabels {
                kind: R::kind(&()).to_string(),
            })
            .inc();
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let namespace = resource.namespace().unwrap_or_default();
        let labels = Self::labels::<R>(&namespace);
        self.index_applies.get_or_create(&labels).inc();
        self.inner.write().apply(resource);
        let size = self.inner.size(&namespace);
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let labels = Self::labels::<R>(&namespace);
        self.index_deletes.get_or_create(&labels).inc();
        self.inner.write().delete(namespace.clone(), name);
        let size = self.inner.size(&namespace);
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<Vec<_>>();
        self.record_reset::<R>();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            let size = self.inner.size(&ns);
            self.index_size
                .get_or_create(&Self::labels::<R>(&ns))
                .set(size as i64);
        }
    }
}

impl<R, T> kubert::index::IndexClusterResource<R> for IndexMetrics<Arc<RwLock<T>>>
where
    T: SizedClusterIndex<R>,
    T: kubert::index::IndexClusterResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let labels = Self::labels::<R>("");
        self.index_applies.get_or_create(&labels).inc();
        self.inner.write().apply(resource);
        let size = self.inner.cluster_size();
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    fn delete(&mut self, name: String) {
        let labels = Self::labels::<R>("");
        self.index_deletes.get_or_create(&labels).inc();
        self.inner.write().delete(name);
        let size = self.inner.cluster_size();
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        self.record_reset::<R>();
        self.inner.write().reset(resources, removed);
        let size = self.inner.cluster_size();
        self.index_size
            .get_or_create(&Self::labels::<R>(""))
            .set(size as i64);
    }
}

// === impl Index ===

impl SizedIndex<netqos_controller_k8s_api::NetworkQoS> for crate::Index {
    fn size(&self, namespace: &str) -> usize {
        self.policies
            .keys()
            .filter(|id| id.namespace == namespace)
            .count()
    }
}

impl SizedIndex<netqos_controller_k8s_api::Pod> for crate::Index {
    fn size(&self, namespace: &str) -> usize {
        self.pods.get(namespace).map_or(0, |pods| pods.len())
    }
}

impl SizedClusterIndex<netqos_controller_k8s_api::Namespace> for crate::Index {
    fn cluster_size(&self) -> usize {
        self.namespaces.len()
    }
}

impl SizedClusterIndex<netqos_controller_k8s_api::Node> for crate::Index {
    fn cluster_size(&self) -> usize {
        self.nodes.len()
    }
}
