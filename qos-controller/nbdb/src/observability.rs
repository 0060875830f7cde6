//! Renders access rules as human-readable descriptions of the traffic they act on.

use crate::model::Acl;
use netqos_controller_core::{
    owner::POLICY_DIRECTION_KEY, DecodeError, Direction, OwnerId, OwnerName, OwnerType,
};
use std::fmt;

/// Describes the verdict an access rule applied to a packet and the policy it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclEvent {
    pub action: String,
    pub owner: OwnerId,
    pub direction: String,
}

impl AclEvent {
    /// Decodes the owner of an access rule. A malformed owner name is returned unchanged as the
    /// decode error.
    pub fn new(acl: &Acl) -> Result<Self, DecodeError> {
        let owner = OwnerId::from_external_ids(&acl.external_ids)?;
        let direction = match owner.owner_type() {
            OwnerType::EgressFirewall => Direction::Egress.to_string(),
            OwnerType::NetpolNode => Direction::Ingress.to_string(),
            _ => acl
                .external_ids
                .get(POLICY_DIRECTION_KEY)
                .cloned()
                .unwrap_or_default(),
        };
        Ok(Self {
            action: verdict(&acl.action),
            owner,
            direction,
        })
    }
}

fn verdict(action: &str) -> String {
    match action {
        "allow" | "allow-related" | "allow-stateless" => "Allowed".to_string(),
        "drop" => "Dropped".to_string(),
        "pass" => "Delegated to network policy".to_string(),
        other => format!("Action {other}"),
    }
}

impl fmt::Display for AclEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            action,
            owner,
            direction,
        } = self;
        write!(f, "{action} by ")?;
        match (owner.owner_type(), owner.name()) {
            (OwnerType::NetworkPolicy, OwnerName::Namespaced(id)) => write!(
                f,
                "network policy {} in namespace {}, direction {direction}",
                id.name, id.namespace
            ),
            (OwnerType::NetworkQos, OwnerName::Namespaced(id)) => write!(
                f,
                "network QoS {} in namespace {}, direction {direction}",
                id.name, id.namespace
            ),
            (OwnerType::AdminNetworkPolicy, OwnerName::Cluster(name)) => {
                write!(f, "admin network policy {name}, direction {direction}")
            }
            (OwnerType::BaselineAdminNetworkPolicy, OwnerName::Cluster(name)) => {
                write!(f, "baseline admin network policy {name}, direction {direction}")
            }
            (OwnerType::EgressFirewall, OwnerName::Namespace(ns)) => {
                write!(f, "egress firewall in namespace {ns}")
            }
            (OwnerType::NetpolNode, _) => write!(
                f,
                "default allow from local node policy, direction {direction}"
            ),
            (OwnerType::NetpolNamespace, OwnerName::Namespace(ns)) => write!(
                f,
                "network policies isolation in namespace {ns}, direction {direction}"
            ),
            (OwnerType::MulticastNamespace, OwnerName::Namespace(ns)) => {
                write!(f, "multicast in namespace {ns}, direction {direction}")
            }
            (OwnerType::MulticastCluster, _) => {
                write!(f, "cluster multicast policy, direction {direction}")
            }
            (OwnerType::UdnIsolation, OwnerName::Cluster(name)) => {
                write!(f, "UDN isolation of type {name}")
            }
            (owner_type, _) => write!(f, "{owner_type} {}", owner.owner_name()),
        }
    }
}
