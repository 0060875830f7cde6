#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use netqos_controller_core as core;
pub use netqos_controller_healthcheck as healthcheck;
pub use netqos_controller_k8s_api as k8s;
pub use netqos_controller_k8s_index as index;
pub use netqos_controller_nbdb as nbdb;

mod args;
pub mod controller;
pub mod health;
pub mod metrics;
pub mod reconcile;
pub mod repair;
pub mod synthesize;
pub mod workers;

#[cfg(test)]
mod tests;

pub use self::{
    args::Args,
    controller::Controller,
    reconcile::Reconciler,
    synthesize::{QosSynthesizer, Synthesize},
};
