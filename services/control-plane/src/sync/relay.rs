//! Pushes change-log entries to live watchers.
//!
//! Each region with at least one live connection gets its own cursor, set to
//! the region's latest sequence when the relay first sees it. A watcher that
//! joins after a bookmark replays the log from that bookmark itself, so the
//! relay cursor never has to move back. Delivery is best-effort: agents that
//! miss a push recover through `Sync`.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_id::Version;
use fleet_proto::cluster::v1::State;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use super::catchup::{hydrate_batch, stream_changes};
use super::{LiveRegistry, Outbound, Registration, SyncError, SyncSettings};
use crate::store::ResourceStore;

/// Registers `out` for live pushes, then replays every change after `from`.
///
/// Entries the relay also pushes arrive twice. Applying one again is a no-op
/// for the agent.
#[instrument(skip(store, registry, out), fields(region = %region))]
pub async fn join_live(
    store: &dyn ResourceStore,
    registry: &LiveRegistry,
    cluster_id: &str,
    region: &str,
    from: Option<Version>,
    batch_size: usize,
    out: &Outbound<State>,
) -> Result<Registration, SyncError> {
    let registration = registry.register(cluster_id, region, out.clone());
    if let Some(from) = from {
        let cursor = stream_changes(store, region, from, batch_size, out).await?;
        debug!(from = %from, cursor = %cursor, "Live watch caught up from bookmark");
    }
    Ok(registration)
}

pub struct LiveRelay {
    store: Arc<dyn ResourceStore>,
    registry: LiveRegistry,
    settings: SyncSettings,
    cursors: HashMap<String, Version>,
}

impl LiveRelay {
    pub fn new(store: Arc<dyn ResourceStore>, registry: LiveRegistry, settings: SyncSettings) -> Self {
        Self {
            store,
            registry,
            settings,
            cursors: HashMap::new(),
        }
    }

    /// Runs until shutdown is signaled.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Starting live relay"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let pushed = self.relay_once().await;
                    if pushed > 0 {
                        debug!(pushed, "Live relay pass complete");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Live relay shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over every region with live connections. Returns the number
    /// of messages delivered.
    pub async fn relay_once(&mut self) -> usize {
        let regions = self.registry.regions();
        self.cursors.retain(|region, _| regions.contains(region));

        let mut pushed = 0;
        for region in regions {
            match self.relay_region(&region).await {
                Ok(n) => pushed += n,
                Err(e) => error!(region = %region, error = %e, "Live relay failed for region"),
            }
        }
        pushed
    }

    async fn relay_region(&mut self, region: &str) -> Result<usize, SyncError> {
        let Some(cursor) = self.cursors.get(region).copied() else {
            let start = self
                .store
                .max_sequence(region)
                .await
                .map_err(SyncError::store("read relay start", region))?;
            self.cursors.insert(region.to_string(), start);
            return Ok(0);
        };

        let changes = self
            .store
            .list_changes(region, cursor, self.settings.batch_size.max(1))
            .await
            .map_err(SyncError::store("list state changes", region))?;
        let Some(last) = changes.last().map(|c| c.sequence) else {
            return Ok(0);
        };
        let states = hydrate_batch(self.store.as_ref(), region, &changes).await?;

        let mut delivered = 0;
        for state in states {
            match self.registry.emit_state(region, state) {
                Ok(n) => delivered += n,
                // Every connection for the region left mid-pass.
                Err(SyncError::NoConnections { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        self.cursors.insert(region.to_string(), last);
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopologyStatus;
    use crate::store::memory::fixtures;
    use crate::store::MemoryStore;
    use crate::sync::Outbound;

    #[tokio::test]
    async fn test_relay_pushes_changes_after_first_sight() {
        let store = MemoryStore::new();
        let dep = fixtures::deployment("api");
        store.put_deployment(dep.clone()).await;
        store
            .put_topology(dep.id, "us-east", 1, TopologyStatus::Started)
            .await
            .unwrap();

        let registry = LiveRegistry::new();
        let (out, mut rx) = Outbound::channel(8);
        let _registration = registry.register("cluster-1", "us-east", out);

        let mut relay = LiveRelay::new(
            Arc::new(store.clone()),
            registry.clone(),
            SyncSettings::default(),
        );
        // First pass only records where the region stands.
        assert_eq!(relay.relay_once().await, 0);

        let version = store
            .put_topology(dep.id, "us-east", 4, TopologyStatus::Started)
            .await
            .unwrap();
        assert_eq!(relay.relay_once().await, 1);
        assert_eq!(rx.try_recv().unwrap().unwrap().version, version.value());

        // Nothing new, nothing pushed.
        assert_eq!(relay.relay_once().await, 0);
    }

    #[tokio::test]
    async fn test_relay_replays_sentinel_deleted_later() {
        let store = MemoryStore::new();
        let registry = LiveRegistry::new();
        let (out, mut rx) = Outbound::channel(8);
        let _registration = registry.register("cluster-1", "us-east", out);

        let mut relay = LiveRelay::new(
            Arc::new(store.clone()),
            registry.clone(),
            SyncSettings::default(),
        );
        relay.relay_once().await;

        let gone = fixtures::sentinel("gone", "us-east", 1);
        store.put_sentinel(gone.clone()).await;
        store.remove_sentinel(gone.id).await.unwrap();
        let kept = store
            .put_sentinel(fixtures::sentinel("kept", "us-east", 1))
            .await;

        assert_eq!(relay.relay_once().await, 3);
        let mut versions = Vec::new();
        while let Ok(item) = rx.try_recv() {
            versions.push(item.unwrap().version);
        }
        assert_eq!(versions, vec![1, 2, kept.value()]);
        assert_eq!(relay.cursors.get("us-east"), Some(&kept));
    }

    #[tokio::test]
    async fn test_join_after_bookmark_replays_gap() {
        let store = MemoryStore::new();
        let dep = fixtures::deployment("api");
        store.put_deployment(dep.clone()).await;
        store
            .put_topology(dep.id, "us-east", 1, TopologyStatus::Started)
            .await
            .unwrap();

        // Another watcher already has the relay tracking the region.
        let registry = LiveRegistry::new();
        let (other, _other_rx) = Outbound::channel(8);
        let _other = registry.register("cluster-2", "us-east", other);
        let mut relay = LiveRelay::new(
            Arc::new(store.clone()),
            registry.clone(),
            SyncSettings::default(),
        );
        relay.relay_once().await;

        let (out, mut rx) = Outbound::channel(16);
        let boundary = crate::sync::bootstrap::stream_bootstrap(&store, "us-east", 10, &out)
            .await
            .unwrap();
        let stopped = store
            .put_topology(dep.id, "us-east", 1, TopologyStatus::Stopped)
            .await
            .unwrap();
        // The relay moves past the stop before the new watcher registers.
        relay.relay_once().await;

        let _registration = join_live(
            &store,
            &registry,
            "cluster-1",
            "us-east",
            Some(boundary),
            10,
            &out,
        )
        .await
        .unwrap();
        for _ in 0..3 {
            relay.relay_once().await;
        }

        let mut versions = Vec::new();
        while let Ok(item) = rx.try_recv() {
            versions.push(item.unwrap().version);
        }
        assert_eq!(versions, vec![boundary.value(), boundary.value(), stopped.value()]);
    }

    #[tokio::test]
    async fn test_relay_forgets_regions_without_connections() {
        let store = MemoryStore::new();
        let registry = LiveRegistry::new();
        let (out, _rx) = Outbound::channel(8);
        let registration = registry.register("cluster-1", "us-east", out);

        let mut relay = LiveRelay::new(Arc::new(store), registry.clone(), SyncSettings::default());
        relay.relay_once().await;
        assert!(relay.cursors.contains_key("us-east"));

        drop(registration);
        relay.relay_once().await;
        assert!(relay.cursors.is_empty());
    }
}
