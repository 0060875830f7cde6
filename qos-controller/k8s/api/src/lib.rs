#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod labels;
pub mod network_qos;

pub use self::{
    labels::Labels,
    network_qos::{NetworkQoS, NetworkQoSSpec},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            Namespace, Node, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
        },
        discovery::v1::{Endpoint, EndpointConditions, EndpointSlice},
    },
    apimachinery::pkg::apis::meta::v1::Time,
};
pub use kube::{
    api::{ObjectMeta, Resource, ResourceExt},
    runtime::watcher,
    Client,
};

/// The name under which the cluster's primary network is addressed.
pub const DEFAULT_NETWORK: &str = "default";

/// Label set on endpoint slices naming the service they belong to.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
