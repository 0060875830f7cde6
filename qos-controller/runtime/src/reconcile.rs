use crate::{
    core::{OwnerId, OwnerType, ReconciliationKey},
    index::{PodRecord, SharedIndex},
    k8s,
    metrics::{Outcome, ReconcileMetrics},
    nbdb::{
        self,
        model::{
            Atom, Column, LogicalSwitch, LogicalSwitchPort, Model, Uuid, OWNED_TABLES,
        },
        Client, Condition, Operation,
    },
    synthesize::{self, DesiredState, PolicyInput, SelectedPod, Synthesize},
};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Converges the database rows owned by a policy with the policy's cached state.
#[derive(Clone)]
pub struct Reconciler {
    index: SharedIndex,
    client: Arc<dyn Client>,
    controller: String,
    synthesizer: Arc<dyn Synthesize>,
    metrics: ReconcileMetrics,
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        index: SharedIndex,
        client: Arc<dyn Client>,
        controller: impl Into<String>,
        synthesizer: Arc<dyn Synthesize>,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self {
            index,
            client,
            controller: controller.into(),
            synthesizer,
            metrics,
        }
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn client(&self) -> &dyn Client {
        &*self.client
    }

    pub fn controller_name(&self) -> &str {
        &self.controller
    }

    pub(crate) fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// Reconciles one key. Errors are transient and the key should be retried.
    #[instrument(skip_all, fields(%key))]
    pub async fn reconcile(&self, key: &ReconciliationKey) -> Result<()> {
        let start = Instant::now();
        let res = self.converge(key).await;
        let outcome = match &res {
            Ok(()) => Outcome::Converged,
            Err(_) => Outcome::Failed,
        };
        self.metrics.observe(outcome, start.elapsed());
        res
    }

    async fn converge(&self, key: &ReconciliationKey) -> Result<()> {
        let Some(id) = key.resource_id() else {
            debug!("Ignoring singleton key");
            return Ok(());
        };
        let owner = OwnerId::namespaced(OwnerType::NetworkQos, id.clone())?;

        // The index lock is never held across an await.
        let (network, snapshot) = {
            let index = self.index.read();
            let network = index.cluster_info().network.clone();
            let snapshot = index
                .policy(id)
                .filter(|p| !p.deleting && p.spec.applies_to_network(&network))
                .map(|p| (p.clone(), index.selected_pods(p)));
            (network, snapshot)
        };

        let (desired, switches) = match snapshot {
            None => {
                debug!("Tearing down policy rows");
                (DesiredState::default(), Vec::new())
            }
            Some((policy, pods)) => {
                let pods = self.resolve_ports(pods).await?;
                let switches = self.resolve_switches(&network, &pods).await?;
                debug!(
                    pods = pods.len(),
                    switches = switches.len(),
                    "Synthesizing policy rows"
                );
                let input = PolicyInput {
                    owner: owner.clone(),
                    policy,
                    pods,
                };
                let mut desired = self.synthesizer.synthesize(&self.controller, &input);
                // QoS rows that no switch references would be collected on commit.
                if switches.is_empty() && !desired.qos.is_empty() {
                    debug!("No logical switch to attach QoS rows to");
                    desired.qos.clear();
                }
                (desired, switches)
            }
        };

        let owned = [Condition::ExternalIdsInclude(
            owner.external_ids(&self.controller),
        )];
        let mut ops = Vec::new();
        diff(self.client(), &owned, desired.port_groups, &mut ops).await?;
        diff(self.client(), &owned, desired.address_sets, &mut ops).await?;
        let qos = diff(self.client(), &owned, desired.qos, &mut ops).await?;
        attach(self.client(), &switches, &qos, &mut ops).await?;

        if ops.is_empty() {
            debug!("Policy rows are up to date");
            return Ok(());
        }

        let n = ops.len();
        self.client
            .transact(ops)
            .await
            .with_context(|| format!("failed to apply {n} operations"))?;
        self.metrics.committed();
        info!(operations = n, "Applied policy rows");
        Ok(())
    }

    /// Looks up the logical switch port of each pod. Pods whose port has not been created yet
    /// are left out until a later event selects them again.
    async fn resolve_ports(&self, pods: Vec<PodRecord>) -> Result<Vec<SelectedPod>> {
        let mut selected = Vec::with_capacity(pods.len());
        for pod in pods {
            let name = pod.logical_port();
            let ports = nbdb::list::<LogicalSwitchPort>(
                self.client(),
                &[Condition::Equals("name", serde_json::json!(name))],
            )
            .await
            .with_context(|| format!("failed to look up logical switch port {name}"))?;
            match ports.into_iter().next() {
                Some(lsp) => selected.push(SelectedPod {
                    pod,
                    port: Uuid(lsp.uuid),
                }),
                None => debug!(pod = %pod.id, port = %name, "Logical switch port not found"),
            }
        }
        Ok(selected)
    }

    /// Looks up the logical switch of each node hosting a selected pod.
    async fn resolve_switches(
        &self,
        network: &str,
        pods: &[SelectedPod],
    ) -> Result<Vec<LogicalSwitch>> {
        let names = pods
            .iter()
            .filter_map(|p| p.pod.node_name.as_deref())
            .map(|node| switch_name(network, node))
            .collect::<BTreeSet<_>>();

        let mut switches = Vec::with_capacity(names.len());
        for name in names {
            let found = nbdb::list::<LogicalSwitch>(
                self.client(),
                &[Condition::Equals("name", json!(name))],
            )
            .await
            .with_context(|| format!("failed to look up logical switch {name}"))?;
            match found.into_iter().next() {
                Some(ls) => switches.push(ls),
                None => debug!(switch = %name, "Logical switch not found"),
            }
        }
        Ok(switches)
    }
}

/// The name of a node's logical switch on `network`.
fn switch_name(network: &str, node: &str) -> String {
    if network == k8s::DEFAULT_NETWORK {
        return node.to_string();
    }
    format!("{}_{node}", network.replace(['-', '/'], "."))
}

/// References to the rows of one table, before and after a diff.
#[derive(Debug, Default)]
struct Diffed {
    /// The rows that exist before the transaction.
    existing: Vec<Value>,
    /// The desired rows, by uuid or, when inserted by the transaction, by named uuid.
    desired: Vec<Value>,
}

/// Appends the operations that turn the owned rows of `M`'s table into `desired`.
///
/// Rows are matched by primary id. Owned rows without a primary id, or duplicating another row's
/// id, are deleted.
async fn diff<M: Model>(
    client: &dyn Client,
    owned: &[Condition],
    desired: Vec<M>,
    ops: &mut Vec<Operation>,
) -> Result<Diffed> {
    let rows = nbdb::list::<M>(client, owned)
        .await
        .with_context(|| format!("failed to list {} rows", M::TABLE))?;

    let mut refs = Diffed {
        existing: rows.iter().map(|r| uuid_ref(r.uuid())).collect(),
        desired: Vec::new(),
    };
    let mut existing = BTreeMap::new();
    for row in rows {
        match synthesize::primary_id(&row) {
            Some(id) if !existing.contains_key(id) => {
                existing.insert(id.to_string(), row);
            }
            _ => ops.push(Operation::delete(&row)),
        }
    }

    for mut want in desired {
        let Some(id) = synthesize::primary_id(&want).map(str::to_string) else {
            warn!(table = M::TABLE, "Skipping desired row without a primary id");
            continue;
        };
        match existing.remove(&id) {
            None => {
                let name = format!("{}{}", M::TABLE.to_ascii_lowercase(), refs.desired.len());
                refs.desired.push(json!(["named-uuid", name]));
                ops.push(Operation::insert_named(&want, name));
            }
            Some(have) => {
                want.set_uuid(have.uuid().to_string());
                refs.desired.push(uuid_ref(have.uuid()));
                if want != have {
                    ops.push(Operation::update(&want));
                }
            }
        }
    }

    ops.extend(existing.values().map(Operation::delete));
    Ok(refs)
}

/// Appends the mutations that make `switches`, and only them, reference the desired QoS rows.
/// The policy's other QoS rows are detached from every switch so that they can be deleted.
async fn attach(
    client: &dyn Client,
    switches: &[LogicalSwitch],
    qos: &Diffed,
    ops: &mut Vec<Operation>,
) -> Result<()> {
    let mut targets = switches
        .iter()
        .map(|ls| (ls.uuid.clone(), (ls, true)))
        .collect::<BTreeMap<_, _>>();
    let attached = attached_switches(client, &qos.existing).await?;
    for ls in &attached {
        targets.entry(ls.uuid.clone()).or_insert((ls, false));
    }

    for (uuid, (ls, wanted)) in targets {
        let have = ls.qos_rules.iter().map(Atom::to_atom).collect::<Vec<_>>();
        let want: &[Value] = if wanted { &qos.desired } else { &[] };
        let insert = want
            .iter()
            .filter(|r| !have.contains(r))
            .cloned()
            .collect();
        let delete = have
            .iter()
            .filter(|r| qos.existing.contains(r) && !want.contains(r))
            .cloned()
            .collect();
        ops.extend(Operation::mutate_set::<LogicalSwitch>(
            &uuid,
            "qos_rules",
            insert,
            delete,
        ));
    }
    Ok(())
}

/// Lists the switches whose `qos_rules` reference any of `qos`.
pub(crate) async fn attached_switches(
    client: &dyn Client,
    qos: &[Value],
) -> Result<Vec<LogicalSwitch>> {
    let mut switches = BTreeMap::new();
    for r in qos {
        let found = nbdb::list::<LogicalSwitch>(
            client,
            &[Condition::Includes("qos_rules", json!(["set", [r]]))],
        )
        .await
        .context("failed to list logical switches")?;
        for ls in found {
            switches.entry(ls.uuid.clone()).or_insert(ls);
        }
    }
    Ok(switches.into_values().collect())
}

pub(crate) fn uuid_ref(uuid: &str) -> Value {
    Uuid(uuid.to_string()).to_atom()
}

/// Lists the rows of every owned table that carry `filter`'s owner tags.
pub(crate) async fn list_owned(
    client: &dyn Client,
    filter: &[Condition],
) -> nbdb::Result<Vec<OwnedRow>> {
    let mut rows = Vec::new();
    for table in OWNED_TABLES {
        rows.extend(list_table(client, table, filter).await?);
    }
    Ok(rows)
}

/// A row of any owned table, reduced to what is needed to attribute and delete it.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OwnedRow {
    pub table: &'static str,
    pub uuid: String,
    pub external_ids: BTreeMap<String, String>,
}

/// Rows are read without decoding their other columns so that a row this controller cannot
/// decode can still be attributed and removed.
async fn list_table(
    client: &dyn Client,
    table: &'static str,
    filter: &[Condition],
) -> nbdb::Result<Vec<OwnedRow>> {
    let rows = client.select(table, filter).await?;
    Ok(rows
        .into_iter()
        .map(|(uuid, row)| OwnedRow {
            table,
            uuid,
            external_ids: row
                .get("external_ids")
                .and_then(BTreeMap::<String, String>::from_value)
                .unwrap_or_default(),
        })
        .collect())
}

// === impl OwnedRow ===

impl OwnedRow {
    pub(crate) fn delete(&self) -> Operation {
        Operation::Delete {
            table: self.table,
            uuid: self.uuid.clone(),
        }
    }
}
