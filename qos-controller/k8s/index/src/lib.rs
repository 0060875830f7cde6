//! NetworkQoS controller cluster index
//!
//! The index holds the controller's view of the cluster resources that determine QoS state:
//!
//! - Each `NetworkQoS` selects pods by label, either within its own namespace or across every
//!   namespace matched by its namespace selector.
//! - `Namespace` labels decide which namespaces a policy's namespace selector matches.
//! - `Pod` labels, addresses, and completion decide which pods a policy covers.
//! - `Node` zone annotations decide which pods are scheduled in the local zone and therefore
//!   handled by this controller.
//!
//! ```text
//! [ Node ] <- [ Pod ] <- [ NetworkQoS ] -> [ Namespace ]
//! ```
//!
//! Watch events are applied to the index, which always updates its cached snapshot and then
//! decides whether the change is significant. Significant changes are translated into work items
//! on one of four rate-limited [`Queues`](queues::Queues). Workers read the index to learn which
//! policies an event affects and what a policy currently selects.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_info;
mod index;
pub mod metrics;
pub mod namespace;
pub mod node;
pub mod pod;
pub mod policy;
pub mod queues;
pub mod service_health;
mod zone;


pub use self::{
    cluster_info::ClusterInfo,
    index::{CacheSynced, Index, SharedIndex},
    namespace::NamespaceRecord,
    node::NodeRecord,
    pod::PodRecord,
    policy::PolicyRecord,
    queues::Queues,
    service_health::{ServiceHealthIndex, SharedServiceHealthIndex},
};
