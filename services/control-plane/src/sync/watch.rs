//! Long-lived per-kind polling streams.
//!
//! One generic loop serves every kind. Each poll fetches rows with a version
//! above the cursor, sends them in ascending order and advances the cursor.
//! An empty poll sleeps for the configured interval. The loop ends when the
//! client drops the stream or the server shuts down.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_id::Version;
use fleet_proto::cluster::v1::{CiliumNetworkPolicyState, DeploymentState, SentinelState};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use super::convert::{deployment_delete, deployment_state, policy_state, sentinel_delete, sentinel_state};
use super::{Outbound, SyncError, SyncSettings};
use crate::model::{ResourceKind, StateChange};
use crate::store::{ResourceStore, StoreResult};

/// A resource kind that can be watched.
#[async_trait]
pub trait WatchKind: Send + Sync + 'static {
    type Message: Send + 'static;

    const KIND: ResourceKind;

    /// Messages with `version > after` in ascending version order, at most `limit`.
    async fn poll(
        &self,
        store: &dyn ResourceStore,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<(Version, Self::Message)>>;
}

pub struct Deployments;
pub struct Sentinels;
pub struct Policies;

/// Merges rows with change-log tombstones and keeps the first `limit` by version.
///
/// Both inputs are capped at `limit`, so anything not fetched is above every
/// version kept.
fn merge_tombstones<M>(
    mut rows: Vec<(Version, M)>,
    tombstones: Vec<StateChange>,
    limit: usize,
    delete: impl Fn(&StateChange) -> M,
) -> Vec<(Version, M)> {
    rows.extend(tombstones.iter().map(|t| (t.sequence, delete(t))));
    rows.sort_by_key(|(version, _)| *version);
    rows.truncate(limit);
    rows
}

#[async_trait]
impl WatchKind for Deployments {
    type Message = DeploymentState;

    const KIND: ResourceKind = ResourceKind::Deployment;

    async fn poll(
        &self,
        store: &dyn ResourceStore,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<(Version, DeploymentState)>> {
        let rows = store
            .deployments_after(region, after, limit)
            .await?
            .into_iter()
            .map(|d| {
                let version = d.version();
                (version, deployment_state(&d, version))
            })
            .collect();
        let tombstones = store
            .list_deletions(region, Self::KIND, after, limit)
            .await?;

        Ok(merge_tombstones(rows, tombstones, limit, |t| {
            deployment_delete(&t.k8s_namespace, &t.k8s_name, t.sequence)
        }))
    }
}

#[async_trait]
impl WatchKind for Sentinels {
    type Message = SentinelState;

    const KIND: ResourceKind = ResourceKind::Sentinel;

    async fn poll(
        &self,
        store: &dyn ResourceStore,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<(Version, SentinelState)>> {
        let rows = store
            .sentinels_after(region, after, limit)
            .await?
            .into_iter()
            .map(|s| (s.version, sentinel_state(&s, region, s.version)))
            .collect();
        let tombstones = store
            .list_deletions(region, Self::KIND, after, limit)
            .await?;

        Ok(merge_tombstones(rows, tombstones, limit, |t| {
            sentinel_delete(&t.k8s_namespace, &t.k8s_name, t.sequence)
        }))
    }
}

#[async_trait]
impl WatchKind for Policies {
    type Message = CiliumNetworkPolicyState;

    const KIND: ResourceKind = ResourceKind::CiliumNetworkPolicy;

    async fn poll(
        &self,
        store: &dyn ResourceStore,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<(Version, CiliumNetworkPolicyState)>> {
        Ok(store
            .policies_after(region, after, limit)
            .await?
            .iter()
            .map(|p| (p.version, policy_state(p)))
            .collect())
    }
}

/// Runs a watch until the client leaves or shutdown is signalled.
///
/// A departed client ends the loop with `Ok`. Store failures end it with the
/// error, which the caller forwards on the stream.
#[instrument(skip_all, fields(kind = %K::KIND, region = %region, cursor = %from))]
pub async fn run_watch<K: WatchKind>(
    kind: K,
    store: Arc<dyn ResourceStore>,
    region: String,
    from: Version,
    settings: SyncSettings,
    out: Outbound<K::Message>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SyncError> {
    let mut cursor = from;
    let limit = settings.batch_size.max(1);

    loop {
        if *shutdown.borrow() {
            info!("Watch stopped by shutdown");
            return Ok(());
        }

        let batch = tokio::select! {
            _ = out.closed() => {
                debug!("Watch client disconnected");
                return Ok(());
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                continue;
            }
            polled = kind.poll(store.as_ref(), &region, cursor, limit) => {
                polled.map_err(SyncError::store("watch poll", &region))?
            }
        };

        if batch.is_empty() {
            tokio::select! {
                _ = out.closed() => {
                    debug!("Watch client disconnected");
                    return Ok(());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(settings.poll_interval) => {}
            }
            continue;
        }

        let sent = batch.len();
        for (version, message) in batch {
            match out.send(message).await {
                Ok(()) => cursor = cursor.max(version),
                Err(SyncError::ClientGone) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        debug!(sent, cursor = %cursor, "Watch batch sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopologyStatus;
    use crate::store::memory::fixtures;
    use crate::store::MemoryStore;
    use fleet_proto::cluster::v1::{deployment_state as dep_msg, sentinel_state as snt_msg};
    use std::time::Duration;

    fn settings() -> SyncSettings {
        SyncSettings {
            poll_interval: Duration::from_millis(10),
            batch_size: 2,
            page_size: 2,
        }
    }

    #[tokio::test]
    async fn test_deployment_poll_includes_tombstones_in_order() {
        let store = MemoryStore::new();
        let api = fixtures::deployment("api");
        let web = fixtures::deployment("web");
        store.put_deployment(api.clone()).await;
        store.put_deployment(web.clone()).await;
        store
            .put_topology(api.id, "us-east", 1, TopologyStatus::Started)
            .await
            .unwrap();
        store
            .put_topology(web.id, "us-east", 1, TopologyStatus::Started)
            .await
            .unwrap();
        store.remove_topology(api.id, "us-east").await.unwrap();

        let polled = Deployments
            .poll(&store, "us-east", Version::ZERO, 10)
            .await
            .unwrap();
        let versions: Vec<u64> = polled.iter().map(|(v, _)| v.value()).collect();
        assert_eq!(versions, vec![2, 3]);
        assert!(matches!(polled[0].1.state, Some(dep_msg::State::Apply(_))));
        assert!(matches!(polled[1].1.state, Some(dep_msg::State::Delete(_))));
    }

    #[tokio::test]
    async fn test_sentinel_poll_limit_keeps_lowest_versions() {
        let store = MemoryStore::new();
        let first = fixtures::sentinel("a", "us-east", 1);
        let first_id = first.id;
        store.put_sentinel(first).await;
        store.remove_sentinel(first_id).await.unwrap();
        store.put_sentinel(fixtures::sentinel("b", "us-east", 1)).await;
        store.put_sentinel(fixtures::sentinel("c", "us-east", 1)).await;

        let polled = Sentinels
            .poll(&store, "us-east", Version::ZERO, 2)
            .await
            .unwrap();
        let versions: Vec<u64> = polled.iter().map(|(v, _)| v.value()).collect();
        assert_eq!(versions, vec![2, 3]);
        assert!(matches!(polled[0].1.state, Some(snt_msg::State::Delete(_))));
    }

    #[tokio::test]
    async fn test_watch_resumes_and_picks_up_new_rows() {
        let store = MemoryStore::new();
        store.put_policy(fixtures::policy("p1", "us-east")).await;
        store.put_policy(fixtures::policy("p2", "us-east")).await;
        store.put_policy(fixtures::policy("p3", "eu-west")).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (out, mut rx) = Outbound::channel(16);
        let handle = tokio::spawn(run_watch(
            Policies,
            Arc::new(store.clone()),
            "us-east".to_string(),
            Version::new(1),
            settings(),
            out,
            shutdown_rx,
        ));

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.version, 2);

        // Written after the watch went idle.
        store.put_policy(fixtures::policy("p4", "us-east")).await;
        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next.version, 3);

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_watch_ends_when_client_drops() {
        let store = MemoryStore::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (out, rx) = Outbound::<DeploymentState>::channel(4);
        let handle = tokio::spawn(run_watch(
            Deployments,
            Arc::new(store),
            "us-east".to_string(),
            Version::ZERO,
            settings(),
            out,
            shutdown_rx,
        ));

        drop(rx);
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
