use crate::labels;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Describes the traffic-shaping rules applied to the egress traffic of a set of pods.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "k8s.ovn.org",
    version = "v1alpha1",
    kind = "NetworkQoS",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkQoSSpec {
    /// Networks the policy applies to. When unset, the policy applies to the default network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_attachment_refs: Option<Vec<String>>,

    /// When set, pods are selected from every namespace matching the selector instead of the
    /// policy's own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<labels::Selector>,

    #[serde(default)]
    pub pod_selector: labels::Selector,

    pub priority: u16,

    #[serde(default)]
    pub egress: Vec<Rule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub dscp: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<Classifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<Bandwidth>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Classifier {
    /// Destination CIDRs. Empty matches every destination.
    #[serde(default)]
    pub to: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bandwidth {
    /// Kilobits per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,

    /// Kilobits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
}

impl NetworkQoSSpec {
    /// Whether the policy applies to `network`, the name of a network attachment or `default`.
    pub fn applies_to_network(&self, network: &str) -> bool {
        match &self.network_attachment_refs {
            None => network == crate::DEFAULT_NETWORK,
            Some(refs) => refs.iter().any(|r| r == network),
        }
    }
}
