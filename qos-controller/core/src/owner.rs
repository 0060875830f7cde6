//! Owner tags written in the `external_ids` of every network database row.
//!
//! A row's owner is described by an owner type and an owner name. How the name is laid out depends
//! on the owner type: namespaced owners are written as `<namespace>:<name>`, namespace-scoped
//! owners carry the namespace itself as the name, and singleton owners carry no name at all.

use crate::{ReconciliationKey, ResourceId};
use std::{collections::BTreeMap, fmt, str::FromStr};

pub const OWNER_CONTROLLER_KEY: &str = "k8s.ovn.org/owner-controller";
pub const OWNER_TYPE_KEY: &str = "k8s.ovn.org/owner-type";
pub const OBJECT_NAME_KEY: &str = "k8s.ovn.org/name";
pub const PRIMARY_ID_KEY: &str = "k8s.ovn.org/id";
pub const POLICY_DIRECTION_KEY: &str = "direction";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerType {
    NetworkPolicy,
    AdminNetworkPolicy,
    BaselineAdminNetworkPolicy,
    EgressFirewall,
    NetpolNode,
    NetpolNamespace,
    MulticastNamespace,
    MulticastCluster,
    UdnIsolation,
    NetworkQos,
}

/// The decoded owner name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OwnerName {
    Namespaced(ResourceId),
    Cluster(String),
    Namespace(String),
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId {
    owner_type: OwnerType,
    name: OwnerName,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected format namespace:name for Object Name, but found: {0}")]
    MalformedName(String),

    #[error("unknown owner type: {0:?}")]
    UnknownOwnerType(String),

    #[error("missing {0} external id")]
    MissingExternalId(&'static str),

    #[error("unknown policy direction: {0:?}")]
    UnknownDirection(String),

    #[error("owner type {0} cannot be named {1:?}")]
    MismatchedName(OwnerType, OwnerName),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NameFormat {
    Namespaced,
    Cluster,
    Namespace,
    None,
}

// === impl OwnerType ===

impl OwnerType {
    pub const ALL: [Self; 10] = [
        Self::NetworkPolicy,
        Self::AdminNetworkPolicy,
        Self::BaselineAdminNetworkPolicy,
        Self::EgressFirewall,
        Self::NetpolNode,
        Self::NetpolNamespace,
        Self::MulticastNamespace,
        Self::MulticastCluster,
        Self::UdnIsolation,
        Self::NetworkQos,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkPolicy => "NetworkPolicy",
            Self::AdminNetworkPolicy => "AdminNetworkPolicy",
            Self::BaselineAdminNetworkPolicy => "BaselineAdminNetworkPolicy",
            Self::EgressFirewall => "EgressFirewall",
            Self::NetpolNode => "NetpolNode",
            Self::NetpolNamespace => "NetpolNamespace",
            Self::MulticastNamespace => "MulticastNamespace",
            Self::MulticastCluster => "MulticastCluster",
            Self::UdnIsolation => "UDNIsolation",
            Self::NetworkQos => "NetworkQoS",
        }
    }

    /// Sentinel reconciliation key used by owner types that have a single instance per cluster.
    pub fn singleton_key(&self) -> Option<&'static str> {
        match self {
            Self::NetpolNode => Some("netpol-node"),
            Self::MulticastCluster => Some("multicast-cluster"),
            _ => None,
        }
    }

    fn name_format(&self) -> NameFormat {
        match self {
            Self::NetworkPolicy | Self::NetworkQos => NameFormat::Namespaced,
            Self::AdminNetworkPolicy | Self::BaselineAdminNetworkPolicy | Self::UdnIsolation => {
                NameFormat::Cluster
            }
            Self::EgressFirewall | Self::NetpolNamespace | Self::MulticastNamespace => {
                NameFormat::Namespace
            }
            Self::NetpolNode | Self::MulticastCluster => NameFormat::None,
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerType {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DecodeError::UnknownOwnerType(s.to_string()))
    }
}

// === impl OwnerId ===

impl OwnerId {
    pub fn new(owner_type: OwnerType, name: OwnerName) -> Result<Self, DecodeError> {
        let valid = matches!(
            (owner_type.name_format(), &name),
            (NameFormat::Namespaced, OwnerName::Namespaced(_))
                | (NameFormat::Cluster, OwnerName::Cluster(_))
                | (NameFormat::Namespace, OwnerName::Namespace(_))
                | (NameFormat::None, OwnerName::None)
        );
        if !valid {
            return Err(DecodeError::MismatchedName(owner_type, name));
        }
        Ok(Self { owner_type, name })
    }

    pub fn namespaced(owner_type: OwnerType, id: ResourceId) -> Result<Self, DecodeError> {
        Self::new(owner_type, OwnerName::Namespaced(id))
    }

    /// Decodes an owner from its owner type and owner name tags.
    ///
    /// Singleton owner types ignore the name entirely.
    pub fn decode(owner_type: &str, owner_name: &str) -> Result<Self, DecodeError> {
        let owner_type = owner_type.parse::<OwnerType>()?;
        let name = match owner_type.name_format() {
            NameFormat::Namespaced => match owner_name.split_once(':') {
                Some((namespace, name)) => OwnerName::Namespaced(ResourceId::new(namespace, name)),
                None => return Err(DecodeError::MalformedName(owner_name.to_string())),
            },
            NameFormat::Cluster => OwnerName::Cluster(owner_name.to_string()),
            NameFormat::Namespace => OwnerName::Namespace(owner_name.to_string()),
            NameFormat::None => OwnerName::None,
        };
        Ok(Self { owner_type, name })
    }

    /// Decodes the owner recorded in a row's external ids.
    pub fn from_external_ids(ids: &BTreeMap<String, String>) -> Result<Self, DecodeError> {
        let owner_type = ids
            .get(OWNER_TYPE_KEY)
            .ok_or(DecodeError::MissingExternalId(OWNER_TYPE_KEY))?;
        let owner_name = ids.get(OBJECT_NAME_KEY).map(String::as_str).unwrap_or("");
        Self::decode(owner_type, owner_name)
    }

    pub fn owner_type(&self) -> OwnerType {
        self.owner_type
    }

    pub fn name(&self) -> &OwnerName {
        &self.name
    }

    /// Encodes the owner name tag. Singleton owners have an empty name.
    pub fn owner_name(&self) -> String {
        match &self.name {
            OwnerName::Namespaced(ResourceId { namespace, name }) => format!("{namespace}:{name}"),
            OwnerName::Cluster(name) | OwnerName::Namespace(name) => name.clone(),
            OwnerName::None => String::new(),
        }
    }

    /// The owner tags written on a row created by `controller`.
    pub fn external_ids(&self, controller: &str) -> BTreeMap<String, String> {
        let mut ids = BTreeMap::new();
        ids.insert(OWNER_CONTROLLER_KEY.to_string(), controller.to_string());
        ids.insert(
            OWNER_TYPE_KEY.to_string(),
            self.owner_type.as_str().to_string(),
        );
        ids.insert(OBJECT_NAME_KEY.to_string(), self.owner_name());
        ids
    }

    /// Maps the owner back onto the key its rows are reconciled under.
    ///
    /// Cluster-named and namespace-named owners are not reconciled by key.
    pub fn key(&self) -> Option<ReconciliationKey> {
        match &self.name {
            OwnerName::Namespaced(id) => Some(ReconciliationKey::Namespaced(id.clone())),
            OwnerName::None => self
                .owner_type
                .singleton_key()
                .map(|s| ReconciliationKey::Singleton(s.to_string())),
            OwnerName::Cluster(_) | OwnerName::Namespace(_) => None,
        }
    }
}

// === impl Direction ===

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "Ingress",
            Self::Egress => "Egress",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ingress" => Ok(Self::Ingress),
            "Egress" => Ok(Self::Egress),
            _ => Err(DecodeError::UnknownDirection(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    #[test]
    fn namespaced_owner_requires_separator() {
        let error = OwnerId::decode("NetworkPolicy", "foo").unwrap_err();
        assert_eq!(
            error.to_string(),
            "expected format namespace:name for Object Name, but found: foo"
        );

        let owner = OwnerId::decode("NetworkPolicy", "bar:foo").unwrap();
        assert_eq!(
            owner.name(),
            &OwnerName::Namespaced(ResourceId::new("bar", "foo"))
        );
        assert_eq!(owner.owner_name(), "bar:foo");
    }

    #[test]
    fn namespaced_owner_splits_at_first_separator() {
        let owner = OwnerId::decode("NetworkQoS", "ns:qos:extra").unwrap();
        assert_eq!(
            owner.name(),
            &OwnerName::Namespaced(ResourceId::new("ns", "qos:extra"))
        );
    }

    #[test]
    fn name_formats_by_owner_type() {
        assert_eq!(
            OwnerId::decode("AdminNetworkPolicy", "foo").unwrap().name(),
            &OwnerName::Cluster("foo".into())
        );
        assert_eq!(
            OwnerId::decode("EgressFirewall", "foo").unwrap().name(),
            &OwnerName::Namespace("foo".into())
        );
        assert_eq!(
            OwnerId::decode("NetpolNode", "").unwrap().name(),
            &OwnerName::None
        );
        assert_eq!(
            OwnerId::decode("NetpolNode", "ignored").unwrap().owner_name(),
            ""
        );
    }

    #[test]
    fn rejects_unknown_owner_type() {
        assert_eq!(
            OwnerId::decode("Widget", "a:b"),
            Err(DecodeError::UnknownOwnerType("Widget".into()))
        );
    }

    #[test]
    fn encodes_external_ids() {
        let owner =
            OwnerId::namespaced(OwnerType::NetworkQos, ResourceId::new("ns-0", "qos-0")).unwrap();
        let ids = owner.external_ids("default-network-controller");
        assert_eq!(
            ids,
            btreemap! {
                OWNER_CONTROLLER_KEY.to_string() => "default-network-controller".to_string(),
                OWNER_TYPE_KEY.to_string() => "NetworkQoS".to_string(),
                OBJECT_NAME_KEY.to_string() => "ns-0:qos-0".to_string(),
            }
        );
        assert_eq!(OwnerId::from_external_ids(&ids), Ok(owner.clone()));
        assert_eq!(
            owner.key(),
            Some(ReconciliationKey::namespaced("ns-0", "qos-0"))
        );
    }

    #[test]
    fn rejects_names_in_the_wrong_format() {
        assert!(OwnerId::new(OwnerType::NetworkQos, OwnerName::Cluster("x".into())).is_err());
        assert!(OwnerId::new(OwnerType::NetpolNode, OwnerName::None).is_ok());
    }

    #[test]
    fn singleton_owners_map_to_sentinel_keys() {
        assert_eq!(
            OwnerId::decode("MulticastCluster", "").unwrap().key(),
            Some(ReconciliationKey::Singleton("multicast-cluster".into()))
        );
        assert_eq!(
            OwnerId::decode("UDNIsolation", "foo").unwrap().key(),
            None
        );
    }
}
