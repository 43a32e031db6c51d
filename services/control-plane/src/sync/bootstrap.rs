//! Full snapshot of what should run in a region.
//!
//! The boundary is captured before the listing so that anything written while
//! paging is replayed by the catch-up that follows. A bootstrap is only
//! complete once the closing bookmark has been delivered.

use fleet_id::Version;
use fleet_proto::cluster::v1::{state, State};
use tracing::{debug, info, instrument};

use super::convert::{bookmark, deployment_state, envelope, sentinel_state};
use super::{Outbound, SyncError};
use crate::store::ResourceStore;

/// Streams every running deployment and sentinel of `region`, then a bookmark.
///
/// Returns the bookmark version.
#[instrument(skip(store, out), fields(region = %region))]
pub async fn stream_bootstrap(
    store: &dyn ResourceStore,
    region: &str,
    page_size: usize,
    out: &Outbound<State>,
) -> Result<Version, SyncError> {
    let page_size = page_size.max(1);
    let boundary = store
        .max_sequence(region)
        .await
        .map_err(SyncError::store("read bootstrap boundary", region))?;

    let mut sent = 0usize;

    let mut after = None;
    loop {
        let page = store
            .list_running_deployments(region, after, page_size)
            .await
            .map_err(SyncError::store("list running deployments", region))?;
        debug!(rows = page.len(), "Bootstrap deployment page");

        for desired in &page {
            let version = desired.version();
            out.send(envelope(
                version,
                state::Kind::Deployment(deployment_state(desired, version)),
            ))
            .await?;
            sent += 1;
        }

        after = page.last().map(|d| d.deployment.id);
        if page.len() < page_size {
            break;
        }
    }

    let mut after = None;
    loop {
        let page = store
            .list_running_sentinels(region, after, page_size)
            .await
            .map_err(SyncError::store("list running sentinels", region))?;
        debug!(rows = page.len(), "Bootstrap sentinel page");

        for sentinel in &page {
            out.send(envelope(
                sentinel.version,
                state::Kind::Sentinel(sentinel_state(sentinel, region, sentinel.version)),
            ))
            .await?;
            sent += 1;
        }

        after = page.last().map(|s| s.id);
        if page.len() < page_size {
            break;
        }
    }

    out.send(bookmark(boundary)).await?;
    info!(boundary = %boundary, resources = sent, "Bootstrap complete");
    Ok(boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopologyStatus;
    use crate::store::memory::fixtures;
    use crate::store::MemoryStore;
    use crate::sync::catchup::stream_changes;
    use fleet_proto::cluster::v1::{deployment_state, sentinel_state as sentinel_msg};

    async fn drain(
        mut rx: tokio::sync::mpsc::Receiver<Result<State, tonic::Status>>,
    ) -> Vec<State> {
        let mut states = Vec::new();
        while let Some(item) = rx.recv().await {
            states.push(item.unwrap());
        }
        states
    }

    /// `(kind, k8s_name, deleted)` for every resource instruction, in order.
    fn names(states: &[State]) -> Vec<(&'static str, String, bool)> {
        states
            .iter()
            .filter_map(|s| match s.kind.as_ref()? {
                state::Kind::Deployment(d) => Some(match d.state.as_ref()? {
                    deployment_state::State::Apply(a) => ("deployment", a.k8s_name.clone(), false),
                    deployment_state::State::Delete(d) => ("deployment", d.k8s_name.clone(), true),
                }),
                state::Kind::Sentinel(s) => Some(match s.state.as_ref()? {
                    sentinel_msg::State::Apply(a) => ("sentinel", a.k8s_name.clone(), false),
                    sentinel_msg::State::Delete(d) => ("sentinel", d.k8s_name.clone(), true),
                }),
                _ => None,
            })
            .collect()
    }

    async fn seed_fleet(store: &MemoryStore) {
        for i in 0..3 {
            let dep = fixtures::deployment(&format!("svc-{i}"));
            store.put_deployment(dep.clone()).await;
            store
                .put_topology(dep.id, "us-east", 1, TopologyStatus::Started)
                .await
                .unwrap();
        }
        for i in 0..2 {
            store
                .put_sentinel(fixtures::sentinel(&format!("edge-{i}"), "us-east", 1))
                .await;
        }
    }

    #[tokio::test]
    async fn test_bootstrap_single_deployment() {
        let store = MemoryStore::new();
        let dep = fixtures::deployment("api");
        store.put_deployment(dep.clone()).await;
        store.skip_versions("us-east", 4).await;
        let version = store
            .put_topology(dep.id, "us-east", 2, TopologyStatus::Started)
            .await
            .unwrap();
        assert_eq!(version, Version::new(5));

        let (out, rx) = Outbound::channel(16);
        let boundary = stream_bootstrap(&store, "us-east", 100, &out).await.unwrap();
        drop(out);
        let states = drain(rx).await;

        assert_eq!(boundary, Version::new(5));
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].version, 5);
        let Some(state::Kind::Deployment(deployment)) = &states[0].kind else {
            panic!("expected deployment");
        };
        assert!(matches!(
            deployment.state,
            Some(deployment_state::State::Apply(_))
        ));
        assert!(matches!(states[1].kind, Some(state::Kind::Bookmark(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_pages_past_page_size() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let dep = fixtures::deployment(&format!("svc-{i}"));
            store.put_deployment(dep.clone()).await;
            store
                .put_topology(dep.id, "us-east", 1, TopologyStatus::Started)
                .await
                .unwrap();
        }
        for i in 0..3 {
            store
                .put_sentinel(fixtures::sentinel(&format!("edge-{i}"), "us-east", 1))
                .await;
        }
        // Stopped and foreign rows stay out of the snapshot.
        let stopped = fixtures::deployment("stopped");
        store.put_deployment(stopped.clone()).await;
        store
            .put_topology(stopped.id, "us-east", 1, TopologyStatus::Stopped)
            .await
            .unwrap();
        store
            .put_sentinel(fixtures::sentinel("edge-eu", "eu-west", 1))
            .await;
        store
            .put_sentinel(fixtures::sentinel("edge-idle", "us-east", 0))
            .await;

        let (out, rx) = Outbound::channel(64);
        let boundary = stream_bootstrap(&store, "us-east", 2, &out).await.unwrap();
        drop(out);
        let states = drain(rx).await;

        let deployments = states
            .iter()
            .filter(|s| matches!(s.kind, Some(state::Kind::Deployment(_))))
            .count();
        let sentinels = states
            .iter()
            .filter(|s| matches!(s.kind, Some(state::Kind::Sentinel(_))))
            .count();
        assert_eq!(deployments, 5);
        assert_eq!(sentinels, 3);
        assert_eq!(boundary, store.max_sequence("us-east").await.unwrap());
        assert!(matches!(
            states.last().and_then(|s| s.kind.as_ref()),
            Some(state::Kind::Bookmark(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_aborts_when_client_leaves() {
        let store = MemoryStore::new();
        let dep = fixtures::deployment("api");
        store.put_deployment(dep.clone()).await;
        store
            .put_topology(dep.id, "us-east", 1, TopologyStatus::Started)
            .await
            .unwrap();

        let (out, rx) = Outbound::channel(1);
        drop(rx);
        let err = stream_bootstrap(&store, "us-east", 10, &out).await.unwrap_err();
        assert!(matches!(err, SyncError::ClientGone));
    }

    #[tokio::test]
    async fn test_mutation_during_paging_arrives_through_catch_up() {
        let store = MemoryStore::new();
        seed_fleet(&store).await;
        let first = fixtures::deployment("svc-first");
        store.put_deployment(first.clone()).await;
        store
            .put_topology(first.id, "us-east", 1, TopologyStatus::Started)
            .await
            .unwrap();

        // One-slot channel and one-row pages keep the bootstrap mid-stream.
        let (out, mut rx) = Outbound::channel(1);
        let task = {
            let store = store.clone();
            tokio::spawn(async move { stream_bootstrap(&store, "us-east", 1, &out).await })
        };
        let mut snapshot = vec![rx.recv().await.unwrap().unwrap()];

        let late = fixtures::deployment("svc-late");
        store.put_deployment(late.clone()).await;
        let added = store
            .put_topology(late.id, "us-east", 1, TopologyStatus::Started)
            .await
            .unwrap();
        let stopped = store
            .put_topology(first.id, "us-east", 1, TopologyStatus::Stopped)
            .await
            .unwrap();

        while let Some(item) = rx.recv().await {
            snapshot.push(item.unwrap());
        }
        let boundary = task.await.unwrap().unwrap();
        assert!(boundary < added);
        assert!(matches!(
            snapshot.last().and_then(|s| s.kind.as_ref()),
            Some(state::Kind::Bookmark(b)) if b.version == boundary.value()
        ));

        let (out, rx) = Outbound::channel(16);
        let cursor = stream_changes(&store, "us-east", boundary, 10, &out)
            .await
            .unwrap();
        drop(out);
        let catch_up = drain(rx).await;

        assert_eq!(cursor, stopped);
        assert_eq!(
            names(&catch_up),
            vec![
                ("deployment", "svc-late".to_string(), false),
                ("deployment", "svc-first".to_string(), true),
            ]
        );
        assert_eq!(catch_up[0].version, added.value());
        assert_eq!(catch_up[1].version, stopped.value());
    }

    #[tokio::test]
    async fn test_restart_after_interrupted_bootstrap_sees_everything() {
        let store = MemoryStore::new();
        seed_fleet(&store).await;

        let (out, mut rx) = Outbound::channel(1);
        let task = {
            let store = store.clone();
            tokio::spawn(async move { stream_bootstrap(&store, "us-east", 1, &out).await })
        };
        rx.recv().await.unwrap().unwrap();
        rx.recv().await.unwrap().unwrap();
        drop(rx);
        assert!(matches!(
            task.await.unwrap().unwrap_err(),
            SyncError::ClientGone
        ));

        store
            .put_sentinel(fixtures::sentinel("edge-new", "us-east", 1))
            .await;

        let (out, rx) = Outbound::channel(16);
        let boundary = stream_bootstrap(&store, "us-east", 1, &out).await.unwrap();
        drop(out);
        let states = drain(rx).await;

        let mut seen = names(&states);
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("deployment", "svc-0".to_string(), false),
                ("deployment", "svc-1".to_string(), false),
                ("deployment", "svc-2".to_string(), false),
                ("sentinel", "edge-0".to_string(), false),
                ("sentinel", "edge-1".to_string(), false),
                ("sentinel", "edge-new".to_string(), false),
            ]
        );
        assert_eq!(boundary, store.max_sequence("us-east").await.unwrap());
    }
}
