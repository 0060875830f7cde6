//! Removes rows left behind by policies that were deleted while the controller was not running.

use crate::{
    core::{
        owner::{OWNER_CONTROLLER_KEY, OWNER_TYPE_KEY},
        OwnerId, OwnerType,
    },
    nbdb::{
        model::{LogicalSwitch, Model, Qos},
        Condition, Operation,
    },
    reconcile::{self, Reconciler},
};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Deletes every `NetworkQoS` row owned by this controller whose policy is no longer cached (or
/// is being deleted), returning the number of rows deleted.
///
/// Must run after the caches have synced and before workers start, so that every live policy is
/// known.
#[instrument(skip_all)]
pub async fn repair(reconciler: &Reconciler) -> Result<usize> {
    let filter = [Condition::ExternalIdsInclude(BTreeMap::from([
        (
            OWNER_CONTROLLER_KEY.to_string(),
            reconciler.controller_name().to_string(),
        ),
        (
            OWNER_TYPE_KEY.to_string(),
            OwnerType::NetworkQos.as_str().to_string(),
        ),
    ]))];
    let rows = reconcile::list_owned(reconciler.client(), &filter)
        .await
        .context("failed to list owned rows")?;

    let deletes = {
        let index = reconciler.index().read();
        rows.iter()
            .filter(|row| match OwnerId::from_external_ids(&row.external_ids) {
                Ok(owner) => match owner.key() {
                    Some(key) => !index.is_live_policy(&key),
                    None => false,
                },
                Err(error) => {
                    warn!(table = row.table, uuid = %row.uuid, %error, "Skipping malformed owner");
                    false
                }
            })
            .map(|row| {
                debug!(table = row.table, uuid = %row.uuid, "Deleting orphaned row");
                row.delete()
            })
            .collect::<Vec<_>>()
    };

    if deletes.is_empty() {
        debug!(rows = rows.len(), "No orphaned rows");
        return Ok(0);
    }

    // Orphaned QoS rows are detached from their switches, or the deletes would fail.
    let orphaned_qos = deletes
        .iter()
        .filter_map(|op| match op {
            Operation::Delete { table, uuid } if *table == Qos::TABLE => {
                Some(reconcile::uuid_ref(uuid))
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    let mut ops = Vec::new();
    for ls in reconcile::attached_switches(reconciler.client(), &orphaned_qos).await? {
        let detach = ls
            .qos_rules
            .iter()
            .map(|uuid| reconcile::uuid_ref(&uuid.0))
            .filter(|r| orphaned_qos.contains(r))
            .collect();
        ops.extend(Operation::mutate_set::<LogicalSwitch>(
            &ls.uuid,
            "qos_rules",
            Vec::new(),
            detach,
        ));
    }

    let n = deletes.len();
    ops.extend(deletes);
    reconciler
        .client()
        .transact(ops)
        .await
        .context("failed to delete orphaned rows")?;
    reconciler.metrics().committed();
    reconciler.metrics().repaired(n);
    info!(rows = n, "Deleted orphaned rows");
    Ok(n)
}
