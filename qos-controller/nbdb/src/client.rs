use crate::model::{self, Column, Model, Row};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed")]
    Closed,

    #[error("invalid endpoint {0:?}: expected tcp:<host>:<port> or unix:<path>")]
    InvalidEndpoint(String),

    #[error("rpc error: {0}")]
    Rpc(Value),

    #[error("transaction failed: {error}: {details}")]
    Transaction { error: String, details: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(Value),

    #[error("cannot decode {table}.{column} from {value}")]
    Decode {
        table: &'static str,
        column: String,
        value: Value,
    },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Restricts the rows returned by a select. All conditions must hold.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// The row's `external_ids` contain every given key with the given value.
    ExternalIdsInclude(BTreeMap<String, String>),

    /// The given column equals a value.
    Equals(&'static str, Value),

    /// The given set column holds every element of a set value.
    Includes(&'static str, Value),
}

/// A single mutation within a transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Inserts a row. A `uuid_name` lets later operations in the same transaction refer to the
    /// new row as `["named-uuid", name]`.
    Insert {
        table: &'static str,
        uuid_name: Option<String>,
        row: Row,
    },
    Update {
        table: &'static str,
        uuid: String,
        row: Row,
    },
    Delete {
        table: &'static str,
        uuid: String,
    },
    Mutate {
        table: &'static str,
        uuid: String,
        mutations: Vec<Mutation>,
    },
}

/// Changes one column of an existing row relative to its current value.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub column: &'static str,
    pub mutator: Mutator,
    pub value: Value,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mutator {
    /// Adds the elements of a set to a set column.
    Insert,
    /// Removes the elements of a set from a set column.
    Delete,
}

/// A northbound database connection.
///
/// Implementations must support concurrent, independent transactions. Each `transact` call is
/// applied atomically: either every operation takes effect or none do.
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    /// Lists `(uuid, row)` pairs of `table` matching every condition.
    async fn select(
        &self,
        table: &'static str,
        conditions: &[Condition],
    ) -> Result<Vec<(String, Row)>>;

    /// Applies operations atomically, returning the uuids of inserted rows in order.
    async fn transact(&self, ops: Vec<Operation>) -> Result<Vec<String>>;
}

/// Lists every row of `M`'s table matching `conditions`.
pub async fn list<M: Model>(client: &dyn Client, conditions: &[Condition]) -> Result<Vec<M>> {
    client
        .select(M::TABLE, conditions)
        .await?
        .into_iter()
        .map(|(uuid, row)| M::from_row(uuid, &row))
        .collect()
}

// === impl Condition ===

impl Condition {
    pub fn to_json(&self) -> Value {
        match self {
            Self::ExternalIdsInclude(ids) => json!(["external_ids", "includes", ids.to_value()]),
            Self::Equals(column, value) => json!([column, "==", value]),
            Self::Includes(column, value) => json!([column, "includes", value]),
        }
    }

    /// Evaluates the condition against a row.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::ExternalIdsInclude(want) => {
                let have = row
                    .get("external_ids")
                    .and_then(BTreeMap::<String, String>::from_value)
                    .unwrap_or_default();
                want.iter().all(|(k, v)| have.get(k) == Some(v))
            }
            Self::Equals(column, value) => row.get(*column) == Some(value),
            Self::Includes(column, value) => {
                let want = model::set_elements(value).unwrap_or_default();
                let have = row
                    .get(*column)
                    .and_then(model::set_elements)
                    .unwrap_or_default();
                want.iter().all(|v| have.contains(v))
            }
        }
    }
}

// === impl Operation ===

impl Operation {
    pub fn insert<M: Model>(model: &M) -> Self {
        Self::Insert {
            table: M::TABLE,
            uuid_name: None,
            row: model.to_row(),
        }
    }

    /// Inserts a row that later operations reference as `["named-uuid", name]`.
    pub fn insert_named<M: Model>(model: &M, name: impl Into<String>) -> Self {
        Self::Insert {
            table: M::TABLE,
            uuid_name: Some(name.into()),
            row: model.to_row(),
        }
    }

    pub fn update<M: Model>(model: &M) -> Self {
        Self::Update {
            table: M::TABLE,
            uuid: model.uuid().to_string(),
            row: model.to_row(),
        }
    }

    pub fn delete<M: Model>(model: &M) -> Self {
        Self::Delete {
            table: M::TABLE,
            uuid: model.uuid().to_string(),
        }
    }

    /// Adds and removes references in a set column of the row `uuid`. Returns `None` when there
    /// is nothing to change.
    pub fn mutate_set<M: Model>(
        uuid: &str,
        column: &'static str,
        insert: Vec<Value>,
        delete: Vec<Value>,
    ) -> Option<Self> {
        let mutations = [(Mutator::Insert, insert), (Mutator::Delete, delete)]
            .into_iter()
            .filter(|(_, elements)| !elements.is_empty())
            .map(|(mutator, elements)| Mutation {
                column,
                mutator,
                value: json!(["set", elements]),
            })
            .collect::<Vec<_>>();
        if mutations.is_empty() {
            return None;
        }
        Some(Self::Mutate {
            table: M::TABLE,
            uuid: uuid.to_string(),
            mutations,
        })
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Mutate { table, .. } => *table,
        }
    }

    pub fn to_json(&self) -> Value {
        let by_uuid = |uuid: &str| json!([["_uuid", "==", ["uuid", uuid]]]);
        match self {
            Self::Insert {
                table,
                uuid_name: None,
                row,
            } => json!({ "op": "insert", "table": table, "row": row }),
            Self::Insert {
                table,
                uuid_name: Some(name),
                row,
            } => json!({ "op": "insert", "table": table, "uuid-name": name, "row": row }),
            Self::Update { table, uuid, row } => json!({
                "op": "update",
                "table": table,
                "where": by_uuid(uuid),
                "row": row,
            }),
            Self::Delete { table, uuid } => json!({
                "op": "delete",
                "table": table,
                "where": by_uuid(uuid),
            }),
            Self::Mutate {
                table,
                uuid,
                mutations,
            } => json!({
                "op": "mutate",
                "table": table,
                "where": by_uuid(uuid),
                "mutations": mutations.iter().map(Mutation::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

// === impl Mutation ===

impl Mutation {
    pub fn to_json(&self) -> Value {
        let mutator = match self.mutator {
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        };
        json!([self.column, mutator, self.value])
    }
}
