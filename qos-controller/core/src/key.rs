use std::{fmt, str::FromStr};

#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

/// Identifies one unit of serialized reconciliation work.
///
/// Namespaced policies are keyed by `namespace/name`. Cluster-scoped singleton policies use a
/// well-known sentinel that never contains a `/`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum ReconciliationKey {
    Namespaced(ResourceId),
    Singleton(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid reconciliation key: {0:?}")]
pub struct InvalidKey(String);

// === impl ResourceId ===

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl ReconciliationKey ===

impl ReconciliationKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Namespaced(ResourceId::new(namespace, name))
    }

    pub fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            Self::Namespaced(id) => Some(id),
            Self::Singleton(_) => None,
        }
    }
}

impl From<ResourceId> for ReconciliationKey {
    fn from(id: ResourceId) -> Self {
        Self::Namespaced(id)
    }
}

impl fmt::Display for ReconciliationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Namespaced(id) => id.fmt(f),
            Self::Singleton(sentinel) => f.write_str(sentinel),
        }
    }
}

impl FromStr for ReconciliationKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::namespaced(ns, name))
            }
            None if !s.is_empty() => Ok(Self::Singleton(s.to_string())),
            _ => Err(InvalidKey(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys() {
        assert_eq!(
            "ns-0/qos-0".parse::<ReconciliationKey>(),
            Ok(ReconciliationKey::namespaced("ns-0", "qos-0"))
        );
        assert_eq!(
            "netpol-node".parse::<ReconciliationKey>(),
            Ok(ReconciliationKey::Singleton("netpol-node".to_string()))
        );
        for invalid in ["", "/qos", "ns/", "a/b/c"] {
            assert!(
                invalid.parse::<ReconciliationKey>().is_err(),
                "{invalid:?} must not parse"
            );
        }
    }

    #[test]
    fn displays_keys() {
        assert_eq!(
            ReconciliationKey::namespaced("ns-0", "qos-0").to_string(),
            "ns-0/qos-0"
        );
        assert_eq!(
            ReconciliationKey::Singleton("netpol-node".into()).to_string(),
            "netpol-node"
        );
    }
}
