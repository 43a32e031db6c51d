//! Bounded replay of the change log after a cursor.

use std::collections::HashMap;

use fleet_id::{DeploymentId, SentinelId, Version};
use fleet_proto::cluster::v1::{state, State};
use tracing::{debug, instrument};

use super::convert::{
    change_delete, deployment_state, envelope, recorded_delete, sentinel_state,
};
use super::{Outbound, SyncError};
use crate::model::{ChangeOp, DesiredDeployment, ResourceRef, Sentinel, StateChange};
use crate::store::ResourceStore;

/// Streams every change with `sequence > after` in ascending order.
///
/// Batches repeat until one comes back short. Returns the last sequence sent,
/// or `after` when nothing changed.
#[instrument(skip(store, out), fields(region = %region, after = %after))]
pub async fn stream_changes(
    store: &dyn ResourceStore,
    region: &str,
    after: Version,
    batch_size: usize,
    out: &Outbound<State>,
) -> Result<Version, SyncError> {
    let batch_size = batch_size.max(1);
    let mut cursor = after;

    loop {
        let changes = store
            .list_changes(region, cursor, batch_size)
            .await
            .map_err(SyncError::store("list state changes", region))?;
        let states = hydrate_batch(store, region, &changes).await?;

        for state in states {
            out.send(state).await?;
        }
        if let Some(last) = changes.last() {
            cursor = last.sequence;
        }

        debug!(changes = changes.len(), cursor = %cursor, "Catch-up batch sent");
        if changes.len() < batch_size {
            return Ok(cursor);
        }
    }
}

/// Converts one batch.
///
/// A non-delete entry whose row is gone replays as a delete when the log holds a
/// later delete for the same resource. Without one the whole batch fails.
pub(crate) async fn hydrate_batch(
    store: &dyn ResourceStore,
    region: &str,
    changes: &[StateChange],
) -> Result<Vec<State>, SyncError> {
    let mut deployment_ids: Vec<DeploymentId> = Vec::new();
    let mut sentinel_ids: Vec<SentinelId> = Vec::new();
    for change in changes.iter().filter(|c| c.op != ChangeOp::Delete) {
        match change.resource {
            ResourceRef::Deployment(id) => deployment_ids.push(id),
            ResourceRef::Sentinel(id) => sentinel_ids.push(id),
        }
    }
    deployment_ids.sort();
    deployment_ids.dedup();
    sentinel_ids.sort();
    sentinel_ids.dedup();

    let deployments: HashMap<DeploymentId, DesiredDeployment> = store
        .find_deployments(region, &deployment_ids)
        .await
        .map_err(SyncError::store("hydrate deployments", region))?
        .into_iter()
        .map(|d| (d.deployment.id, d))
        .collect();
    let sentinels: HashMap<SentinelId, Sentinel> = store
        .find_sentinels(&sentinel_ids)
        .await
        .map_err(SyncError::store("hydrate sentinels", region))?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut states = Vec::with_capacity(changes.len());
    for change in changes {
        if let Some(kind) = change_delete(change) {
            states.push(envelope(change.sequence, kind));
            continue;
        }

        let row = match change.resource {
            ResourceRef::Deployment(id) => deployments.get(&id).map(|desired| {
                state::Kind::Deployment(deployment_state(desired, change.sequence))
            }),
            ResourceRef::Sentinel(id) => sentinels.get(&id).map(|sentinel| {
                state::Kind::Sentinel(sentinel_state(sentinel, region, change.sequence))
            }),
        };
        let kind = match row {
            Some(kind) => kind,
            None => deleted_later(store, region, change).await?,
        };
        states.push(envelope(change.sequence, kind));
    }
    Ok(states)
}

async fn deleted_later(
    store: &dyn ResourceStore,
    region: &str,
    change: &StateChange,
) -> Result<state::Kind, SyncError> {
    let delete = store
        .find_later_delete(region, change.resource, change.sequence)
        .await
        .map_err(SyncError::store("find later delete", region))?;

    match delete {
        Some(delete) => {
            debug!(
                resource_id = %change.resource.id(),
                version = %change.sequence,
                deleted_at = %delete.sequence,
                "Row deleted later in the log, replaying as delete"
            );
            Ok(recorded_delete(&delete, change.sequence))
        }
        None => Err(SyncError::MissingHydration {
            region: region.to_string(),
            version: change.sequence,
            kind: change.resource.kind(),
            resource_id: change.resource.id(),
        }),
    }
}
