#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Access to the OVN northbound database.

mod client;
pub mod memory;
pub mod model;
pub mod observability;
pub mod ovsdb;

pub use self::client::{list, Client, Condition, Error, Mutation, Mutator, Operation, Result};
