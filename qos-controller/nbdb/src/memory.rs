//! An in-process database used by tests and by `--nbdb memory`.

//!
//! Like the real server, a commit fails when it deletes a row that is still referenced, and rows
//! of non-root tables that end up unreferenced are removed.

use crate::{
    client::{Condition, Error, Mutator, Operation, Result},
    model::{self, Model, Row, NON_ROOT_TABLES},
    Client,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc};

type Tables = HashMap<&'static str, BTreeMap<String, Row>>;

#[derive(Clone, Debug, Default)]
pub struct Database {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    next_uuid: u64,
    transactions: usize,
    failures: usize,
}

// === impl Database ===

impl Database {
    /// Inserts a row outside of any counted transaction, returning its uuid.
    pub fn seed<M: Model>(&self, model: &M) -> String {
        let mut state = self.state.lock();
        let uuid = state.mint_uuid();
        state
            .tables
            .entry(M::TABLE)
            .or_default()
            .insert(uuid.clone(), model.to_row());
        uuid
    }

    /// Every row of `M`'s table.
    pub fn rows<M: Model>(&self) -> Vec<M> {
        let state = self.state.lock();
        state
            .tables
            .get(M::TABLE)
            .into_iter()
            .flatten()
            .filter_map(|(uuid, row)| M::from_row(uuid.clone(), row).ok())
            .collect()
    }

    /// The number of transactions committed so far.
    pub fn transactions(&self) -> usize {
        self.state.lock().transactions
    }

    /// Makes the next `n` transactions fail without applying anything.
    pub fn fail_transactions(&self, n: usize) {
        self.state.lock().failures = n;
    }
}

#[async_trait::async_trait]
impl Client for Database {
    async fn select(
        &self,
        table: &'static str,
        conditions: &[Condition],
    ) -> Result<Vec<(String, Row)>> {
        let state = self.state.lock();
        let rows = state
            .tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|(_, row)| conditions.iter().all(|c| c.matches(row)))
            .map(|(uuid, row)| (uuid.clone(), row.clone()))
            .collect();
        Ok(rows)
    }

    async fn transact(&self, ops: Vec<Operation>) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(Error::Rpc(json!("injected transaction failure")));
        }

        // Operations are applied to a copy so that a failure leaves the database untouched.
        let mut tables = state.tables.clone();
        let mut next_uuid = state.next_uuid;
        let mut named = HashMap::<String, String>::default();
        let mut inserted = Vec::new();
        let mut deleted = Vec::new();
        for op in ops {
            match op {
                Operation::Insert {
                    table,
                    uuid_name,
                    mut row,
                } => {
                    resolve_row(&mut row, &named)?;
                    next_uuid += 1;
                    let uuid = format_uuid(next_uuid);
                    if let Some(name) = uuid_name {
                        named.insert(name, uuid.clone());
                    }
                    tables.entry(table).or_default().insert(uuid.clone(), row);
                    inserted.push(uuid);
                }
                Operation::Update {
                    table,
                    uuid,
                    mut row,
                } => {
                    resolve_row(&mut row, &named)?;
                    if let Some(existing) = tables.get_mut(table).and_then(|t| t.get_mut(&uuid)) {
                        existing.extend(row);
                    }
                }
                Operation::Delete { table, uuid } => {
                    if let Some(t) = tables.get_mut(table) {
                        if t.remove(&uuid).is_some() {
                            deleted.push(uuid);
                        }
                    }
                }
                Operation::Mutate {
                    table,
                    uuid,
                    mutations,
                } => {
                    let Some(existing) = tables.get_mut(table).and_then(|t| t.get_mut(&uuid)) else {
                        continue;
                    };
                    for mut mutation in mutations {
                        resolve(&mut mutation.value, &named)?;
                        let empty = json!(["set", []]);
                        let current = existing.get(mutation.column).unwrap_or(&empty);
                        let value = mutate_set(current, mutation.mutator, &mutation.value);
                        existing.insert(mutation.column.to_string(), value);
                    }
                }
            }
        }

        let referenced = references(&tables);
        if let Some(uuid) = deleted.iter().find(|uuid| referenced.contains(*uuid)) {
            return Err(Error::Transaction {
                error: "referential integrity violation".to_string(),
                details: format!("cannot delete row {uuid} because it is still referenced"),
            });
        }
        for table in NON_ROOT_TABLES {
            if let Some(rows) = tables.get_mut(table) {
                rows.retain(|uuid, _| referenced.contains(uuid));
            }
        }

        state.tables = tables;
        state.next_uuid = next_uuid;
        state.transactions += 1;
        Ok(inserted)
    }
}

/// Replaces `["named-uuid", name]` references with the uuids of rows inserted earlier in the
/// transaction.
fn resolve(value: &mut Value, named: &HashMap<String, String>) -> Result<()> {
    let name = match value.as_array().map(Vec::as_slice) {
        Some([kind, name]) if kind == "named-uuid" => name.as_str().map(str::to_string),
        _ => None,
    };
    if let Some(name) = name {
        let uuid = named.get(&name).ok_or_else(|| Error::Transaction {
            error: "referential integrity violation".to_string(),
            details: format!("unknown named-uuid {name}"),
        })?;
        *value = json!(["uuid", uuid]);
        return Ok(());
    }

    match value {
        Value::Array(values) => values.iter_mut().try_for_each(|v| resolve(v, named)),
        Value::Object(values) => values.values_mut().try_for_each(|v| resolve(v, named)),
        _ => Ok(()),
    }
}

fn resolve_row(row: &mut Row, named: &HashMap<String, String>) -> Result<()> {
    row.values_mut().try_for_each(|v| resolve(v, named))
}

fn mutate_set(current: &Value, mutator: Mutator, change: &Value) -> Value {
    let mut elements = model::set_elements(current)
        .unwrap_or_default()
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    let change = model::set_elements(change).unwrap_or_default();
    match mutator {
        Mutator::Insert => {
            for element in change {
                if !elements.contains(element) {
                    elements.push(element.clone());
                }
            }
        }
        Mutator::Delete => elements.retain(|e| !change.contains(&e)),
    }
    json!(["set", elements])
}

/// Every uuid referenced by a column of any row.
fn references(tables: &Tables) -> HashSet<String> {
    fn collect(value: &Value, uuids: &mut HashSet<String>) {
        if let Some(uuid) = model::decode_uuid(value) {
            uuids.insert(uuid);
            return;
        }
        if let Some(values) = value.as_array() {
            values.iter().for_each(|v| collect(v, uuids));
        }
    }

    let mut uuids = HashSet::default();
    for value in tables.values().flat_map(BTreeMap::values).flat_map(Row::values) {
        collect(value, &mut uuids);
    }
    uuids
}

// === impl State ===

impl State {
    fn mint_uuid(&mut self) -> String {
        self.next_uuid += 1;
        format_uuid(self.next_uuid)
    }
}

fn format_uuid(n: u64) -> String {
    format!("00000000-0000-0000-0000-{n:012x}")
}
