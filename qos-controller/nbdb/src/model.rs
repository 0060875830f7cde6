//! Typed rows of the northbound database tables this controller reads and writes.
//!
//! Every table is declared once with [`table!`], which derives value semantics (`Clone`,
//! `PartialEq`) and the conversion to and from the OVSDB wire representation.

use crate::Error;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A row's columns, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

pub trait Model: Clone + std::fmt::Debug + Default + PartialEq + Send + Sync + 'static {
    const TABLE: &'static str;

    fn uuid(&self) -> &str;

    fn set_uuid(&mut self, uuid: String);

    fn external_ids(&self) -> &BTreeMap<String, String>;

    /// Encodes every column but `_uuid`.
    fn to_row(&self) -> Row;

    fn from_row(uuid: String, row: &Row) -> Result<Self, Error>;
}

/// A reference to a row in another table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid(pub String);

/// Converts a column value to and from its OVSDB representation.
pub trait Column: Sized {
    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;
}

pub trait Atom: Sized {
    fn to_atom(&self) -> Value;

    fn from_atom(value: &Value) -> Option<Self>;
}

macro_rules! table {
    (
        $(#[$meta:meta])*
        $model:ident = $table:literal {
            $( $field:ident : $ty:ty => $column:literal ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq)]
        pub struct $model {
            pub uuid: String,
            $( pub $field: $ty, )*
            pub external_ids: BTreeMap<String, String>,
        }

        impl Model for $model {
            const TABLE: &'static str = $table;

            fn uuid(&self) -> &str {
                &self.uuid
            }

            fn set_uuid(&mut self, uuid: String) {
                self.uuid = uuid;
            }

            fn external_ids(&self) -> &BTreeMap<String, String> {
                &self.external_ids
            }

            fn to_row(&self) -> Row {
                let mut row = Row::new();
                $( row.insert($column.to_string(), self.$field.to_value()); )*
                row.insert("external_ids".to_string(), self.external_ids.to_value());
                row
            }

            fn from_row(uuid: String, row: &Row) -> Result<Self, Error> {
                Ok(Self {
                    uuid,
                    $( $field: column(Self::TABLE, row, $column)?, )*
                    external_ids: column(Self::TABLE, row, "external_ids")?,
                })
            }
        }
    };
}

table! {
    /// A named group of logical switch ports that rules can match on as a whole.
    PortGroup = "Port_Group" {
        name: String => "name",
        ports: BTreeSet<Uuid> => "ports",
        acls: BTreeSet<Uuid> => "acls",
    }
}

table! {
    AddressSet = "Address_Set" {
        name: String => "name",
        addresses: BTreeSet<String> => "addresses",
    }
}

table! {
    /// A traffic-shaping rule: marks and/or rate-limits matching packets.
    Qos = "QoS" {
        direction: String => "direction",
        priority: i64 => "priority",
        match_: String => "match",
        action: BTreeMap<String, i64> => "action",
        bandwidth: BTreeMap<String, i64> => "bandwidth",
    }
}

table! {
    Acl = "ACL" {
        action: String => "action",
        direction: String => "direction",
        priority: i64 => "priority",
        match_: String => "match",
        name: Option<String> => "name",
        log: bool => "log",
    }
}

table! {
    LogicalSwitchPort = "Logical_Switch_Port" {
        name: String => "name",
        addresses: BTreeSet<String> => "addresses",
    }
}

table! {
    /// QoS rows only take effect on the switches whose `qos_rules` reference them.
    LogicalSwitch = "Logical_Switch" {
        name: String => "name",
        qos_rules: BTreeSet<Uuid> => "qos_rules",
    }
}

/// The names of the tables whose rows carry owner tags written by this controller.
pub const OWNED_TABLES: [&str; 3] = [PortGroup::TABLE, AddressSet::TABLE, Qos::TABLE];

/// Rows of these tables only exist while another row references them. Unreferenced rows are
/// garbage collected when a transaction commits.
pub const NON_ROOT_TABLES: [&str; 2] = [Qos::TABLE, Acl::TABLE];

fn column<T: Column + Default>(table: &'static str, row: &Row, name: &str) -> Result<T, Error> {
    match row.get(name) {
        None => Ok(T::default()),
        Some(value) => T::from_value(value).ok_or_else(|| Error::Decode {
            table,
            column: name.to_string(),
            value: value.clone(),
        }),
    }
}

/// Decodes a `["uuid", "<id>"]` value.
pub(crate) fn decode_uuid(value: &Value) -> Option<String> {
    Uuid::from_atom(value).map(|Uuid(id)| id)
}

// === impl Atom ===

impl Atom for String {
    fn to_atom(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_atom(value: &Value) -> Option<Self> {
        value.as_str().map(Into::into)
    }
}

impl Atom for i64 {
    fn to_atom(&self) -> Value {
        json!(self)
    }

    fn from_atom(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl Atom for bool {
    fn to_atom(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_atom(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl Atom for Uuid {
    fn to_atom(&self) -> Value {
        json!(["uuid", self.0])
    }

    fn from_atom(value: &Value) -> Option<Self> {
        match value.as_array()?.as_slice() {
            [kind, id] if kind == "uuid" => id.as_str().map(|id| Self(id.to_string())),
            _ => None,
        }
    }
}

/// Set-typed columns may be written as a bare atom when they hold exactly one element.
pub(crate) fn set_elements(value: &Value) -> Option<Vec<&Value>> {
    match value.as_array().map(Vec::as_slice) {
        Some([kind, elements]) if kind == "set" => Some(elements.as_array()?.iter().collect()),
        _ => Some(vec![value]),
    }
}

// === impl Column ===

macro_rules! atom_column {
    ($($ty:ty),*) => {
        $(
            impl Column for $ty {
                fn to_value(&self) -> Value {
                    self.to_atom()
                }

                fn from_value(value: &Value) -> Option<Self> {
                    Self::from_atom(value)
                }
            }
        )*
    };
}

atom_column!(String, i64, bool);

impl<T: Atom> Column for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_atom(),
            None => json!(["set", []]),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match set_elements(value)?.as_slice() {
            [] => Some(None),
            [v] => T::from_atom(v).map(Some),
            _ => None,
        }
    }
}

impl<T: Atom + Ord> Column for BTreeSet<T> {
    fn to_value(&self) -> Value {
        json!(["set", self.iter().map(Atom::to_atom).collect::<Vec<_>>()])
    }

    fn from_value(value: &Value) -> Option<Self> {
        set_elements(value)?
            .into_iter()
            .map(T::from_atom)
            .collect()
    }
}

impl<V: Atom> Column for BTreeMap<String, V> {
    fn to_value(&self) -> Value {
        let pairs = self
            .iter()
            .map(|(k, v)| json!([k, v.to_atom()]))
            .collect::<Vec<_>>();
        json!(["map", pairs])
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value.as_array()?.as_slice() {
            [kind, pairs] if kind == "map" => pairs
                .as_array()?
                .iter()
                .map(|pair| match pair.as_array()?.as_slice() {
                    [k, v] => Some((k.as_str()?.to_string(), V::from_atom(v)?)),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}
