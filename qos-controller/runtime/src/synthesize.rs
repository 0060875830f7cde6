//! Derives the database rows a policy should own.

use crate::{
    core::{owner::PRIMARY_ID_KEY, OwnerId},
    index::{PodRecord, PolicyRecord},
    k8s::network_qos::Rule,
    nbdb::model::{AddressSet, Model, PortGroup, Qos, Uuid},
};
use std::{collections::BTreeMap, net::IpAddr};

/// The highest priority the database accepts for a QoS rule.
const MAX_QOS_PRIORITY: i64 = 32767;

/// A selected pod, resolved to its logical switch port.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedPod {
    pub pod: PodRecord,
    pub port: Uuid,
}

/// Everything a policy's rows are derived from.
#[derive(Clone, Debug)]
pub struct PolicyInput {
    pub owner: OwnerId,
    pub policy: PolicyRecord,
    pub pods: Vec<SelectedPod>,
}

/// The rows that should exist for one owner. Each row's external ids carry the owner tags and a
/// primary id that is stable across reconciliations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesiredState {
    pub port_groups: Vec<PortGroup>,
    pub address_sets: Vec<AddressSet>,
    pub qos: Vec<Qos>,
}

pub trait Synthesize: Send + Sync + 'static {
    fn synthesize(&self, controller: &str, input: &PolicyInput) -> DesiredState;
}

/// Marks egress traffic of selected pods with the rule's DSCP value, optionally rate limiting it.
#[derive(Clone, Debug, Default)]
pub struct QosSynthesizer(());

// === impl QosSynthesizer ===

impl Synthesize for QosSynthesizer {
    fn synthesize(&self, controller: &str, input: &PolicyInput) -> DesiredState {
        let owner = &input.owner;
        let tagged = |role: &str| {
            let mut ids = owner.external_ids(controller);
            ids.insert(
                PRIMARY_ID_KEY.to_string(),
                format!("{controller}:{}:{role}", owner.owner_name()),
            );
            ids
        };

        let port_group = PortGroup {
            name: hashed_name(&format!("{controller}:{}", owner.owner_name())),
            ports: input.pods.iter().map(|p| p.port.clone()).collect(),
            external_ids: tagged("pg"),
            ..Default::default()
        };

        let address_set = AddressSet {
            name: hashed_name(&format!("{controller}:{}:as", owner.owner_name())),
            addresses: input
                .pods
                .iter()
                .flat_map(|p| p.pod.ips.iter())
                .map(IpAddr::to_string)
                .collect(),
            external_ids: tagged("as"),
            ..Default::default()
        };

        let priority = i64::from(input.policy.spec.priority).min(MAX_QOS_PRIORITY);
        let qos = input
            .policy
            .spec
            .egress
            .iter()
            .enumerate()
            .map(|(i, rule)| Qos {
                direction: "from-lport".to_string(),
                priority,
                match_: rule_match(&port_group.name, rule),
                action: BTreeMap::from([("dscp".to_string(), i64::from(rule.dscp))]),
                bandwidth: bandwidth(rule),
                external_ids: tagged(&format!("qos:{i}")),
                ..Default::default()
            })
            .collect();

        DesiredState {
            port_groups: vec![port_group],
            address_sets: vec![address_set],
            qos,
        }
    }
}

fn rule_match(port_group: &str, rule: &Rule) -> String {
    let mut expr = format!("inport == @{port_group}");
    let cidrs = rule
        .classifier
        .iter()
        .flat_map(|c| c.to.iter())
        .map(String::as_str)
        .collect::<Vec<_>>();
    if cidrs.is_empty() {
        return expr;
    }

    let (v6, v4): (Vec<&str>, Vec<&str>) = cidrs.into_iter().partition(|c| c.contains(':'));
    let mut dsts = Vec::new();
    if !v4.is_empty() {
        dsts.push(format!("ip4.dst == {{{}}}", v4.join(", ")));
    }
    if !v6.is_empty() {
        dsts.push(format!("ip6.dst == {{{}}}", v6.join(", ")));
    }
    expr.push_str(" && (");
    expr.push_str(&dsts.join(" || "));
    expr.push(')');
    expr
}

fn bandwidth(rule: &Rule) -> BTreeMap<String, i64> {
    let mut bandwidth = BTreeMap::new();
    if let Some(bw) = &rule.bandwidth {
        if let Some(rate) = bw.rate {
            bandwidth.insert("rate".to_string(), i64::from(rate));
        }
        if let Some(burst) = bw.burst {
            bandwidth.insert("burst".to_string(), i64::from(burst));
        }
    }
    bandwidth
}

/// Database names must be identifiers, so owner-derived names are hashed (FNV-1a).
fn hashed_name(key: &str) -> String {
    let hash = key.bytes().fold(0xcbf29ce484222325_u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x100000001b3)
    });
    format!("a{hash}")
}

// === impl DesiredState ===

impl DesiredState {
    pub fn is_empty(&self) -> bool {
        self.port_groups.is_empty() && self.address_sets.is_empty() && self.qos.is_empty()
    }

    /// The number of rows across all tables.
    pub fn len(&self) -> usize {
        self.port_groups.len() + self.address_sets.len() + self.qos.len()
    }
}

/// The primary id of a row, if it carries one.
pub(crate) fn primary_id<M: Model>(row: &M) -> Option<&str> {
    row.external_ids().get(PRIMARY_ID_KEY).map(String::as_str)
}
