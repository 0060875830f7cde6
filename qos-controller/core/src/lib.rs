#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod event;
pub mod guard;
mod key;
pub mod owner;
pub mod workqueue;

pub use self::{
    event::PendingEvent,
    guard::{KeyGuard, KeyedLock},
    key::{ReconciliationKey, ResourceId},
    owner::{DecodeError, Direction, OwnerId, OwnerName, OwnerType},
    workqueue::WorkQueue,
};

/// The default value of the `k8s.ovn.org/owner-controller` tag written on every row this
/// controller owns.
pub const DEFAULT_CONTROLLER_NAME: &str = "default-network-controller";
