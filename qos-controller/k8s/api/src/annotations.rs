//! Cluster object fields maintained by the network plugin.

use crate::{Node, Pod};
use serde::Deserialize;
use std::{collections::BTreeMap, net::IpAddr};
use tracing::debug;

/// The zone a node belongs to.
pub const ZONE_ANNOTATION: &str = "k8s.ovn.org/zone-name";

/// Nodes without a zone annotation belong to the single cluster-wide zone.
pub const DEFAULT_ZONE: &str = "global";

/// Per-network addressing assigned to a pod, keyed by network name.
pub const POD_NETWORKS_ANNOTATION: &str = "k8s.ovn.org/pod-networks";

#[derive(Debug, Deserialize)]
struct PodNetwork {
    #[serde(default)]
    ip_addresses: Vec<String>,
}

pub fn node_zone(node: &Node) -> &str {
    node.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ZONE_ANNOTATION))
        .map(String::as_str)
        .unwrap_or(DEFAULT_ZONE)
}

/// A pod has completed once it reaches a terminal phase.
pub fn is_pod_completed(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded" | "Failed")
    )
}

pub fn pod_node_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref()?.node_name.as_deref()
}

/// The IPs assigned to a pod on `network`.
///
/// Addresses are read from the pod-networks annotation. On the default network, pods that have
/// not been annotated yet fall back to the addresses reported in the pod's status.
pub fn pod_ips(pod: &Pod, network: &str) -> Vec<IpAddr> {
    if let Some(ips) = annotated_pod_ips(pod, network) {
        return ips;
    }
    if network != crate::DEFAULT_NETWORK {
        return Vec::new();
    }
    pod.status
        .iter()
        .flat_map(|s| s.pod_ips.iter().flatten())
        .filter_map(|ip| ip.ip.parse().ok())
        .collect()
}

fn annotated_pod_ips(pod: &Pod, network: &str) -> Option<Vec<IpAddr>> {
    let value = pod.metadata.annotations.as_ref()?.get(POD_NETWORKS_ANNOTATION)?;
    let networks = match serde_json::from_str::<BTreeMap<String, PodNetwork>>(value) {
        Ok(networks) => networks,
        Err(error) => {
            debug!(%error, "Ignoring malformed pod networks annotation");
            return None;
        }
    };
    let network = networks.get(network)?;
    let ips = network
        .ip_addresses
        .iter()
        .filter_map(|cidr| {
            let addr = cidr.split_once('/').map_or(cidr.as_str(), |(addr, _)| addr);
            addr.parse().ok()
        })
        .collect();
    Some(ips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::core::v1::PodIP, ObjectMeta, PodSpec, PodStatus};
    use maplit::btreemap;

    fn mk_pod(annotations: Option<BTreeMap<String, String>>, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                annotations,
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-0".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ips: Some(vec![PodIP {
                    ip: "192.0.2.9".to_string(),
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn reads_annotated_ips() {
        let pod = mk_pod(
            Some(btreemap! {
                POD_NETWORKS_ANNOTATION.to_string() => r#"{
                    "default": {"ip_addresses": ["10.244.0.5/24", "fd00::5/64"]},
                    "ns-0/blue": {"ip_addresses": ["10.10.0.3/16"]}
                }"#.to_string(),
            }),
            "Running",
        );
        assert_eq!(
            pod_ips(&pod, "default"),
            vec![
                "10.244.0.5".parse::<IpAddr>().unwrap(),
                "fd00::5".parse().unwrap()
            ]
        );
        assert_eq!(
            pod_ips(&pod, "ns-0/blue"),
            vec!["10.10.0.3".parse::<IpAddr>().unwrap()]
        );
        assert!(pod_ips(&pod, "ns-0/red").is_empty());
    }

    #[test]
    fn falls_back_to_status_ips() {
        let pod = mk_pod(None, "Running");
        assert_eq!(
            pod_ips(&pod, "default"),
            vec!["192.0.2.9".parse::<IpAddr>().unwrap()]
        );
        assert!(pod_ips(&pod, "ns-0/blue").is_empty());
    }

    #[test]
    fn terminal_phases_complete_pods() {
        assert!(is_pod_completed(&mk_pod(None, "Succeeded")));
        assert!(is_pod_completed(&mk_pod(None, "Failed")));
        assert!(!is_pod_completed(&mk_pod(None, "Running")));
        assert_eq!(pod_node_name(&mk_pod(None, "Pending")), Some("node-0"));
    }

    #[test]
    fn missing_zone_is_global() {
        let mut node = Node::default();
        assert_eq!(node_zone(&node), DEFAULT_ZONE);
        node.metadata.annotations = Some(btreemap! {
            ZONE_ANNOTATION.to_string() => "zone-a".to_string(),
        });
        assert_eq!(node_zone(&node), "zone-a");
    }
}
