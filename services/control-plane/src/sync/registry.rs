//! Connected live watchers, for best-effort push.
//!
//! `cluster_id -> connection_id -> {region, outbound}` behind one lock. The
//! registry is a cheap handle injected into the service; nothing is global.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fleet_id::ConnectionId;
use fleet_proto::cluster::v1::State;
use tracing::{debug, warn};

use super::{Outbound, SyncError};

struct LiveClient {
    region: String,
    out: Outbound<State>,
}

type Clusters = HashMap<String, HashMap<ConnectionId, LiveClient>>;

#[derive(Clone, Default)]
pub struct LiveRegistry {
    clusters: Arc<RwLock<Clusters>>,
}

/// Keeps a connection registered until dropped.
pub struct Registration {
    registry: LiveRegistry,
    cluster_id: String,
    connection_id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .unregister(&self.cluster_id, self.connection_id);
    }
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the maps consistent, so poison is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Clusters> {
        self.clusters.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Clusters> {
        self.clusters.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, cluster_id: &str, region: &str, out: Outbound<State>) -> Registration {
        let connection_id = ConnectionId::new();
        self.write()
            .entry(cluster_id.to_string())
            .or_default()
            .insert(
                connection_id,
                LiveClient {
                    region: region.to_string(),
                    out,
                },
            );
        debug!(cluster_id, region, %connection_id, "Live client registered");

        Registration {
            registry: self.clone(),
            cluster_id: cluster_id.to_string(),
            connection_id,
        }
    }

    fn unregister(&self, cluster_id: &str, connection_id: ConnectionId) {
        let mut clusters = self.write();
        if let Some(connections) = clusters.get_mut(cluster_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                clusters.remove(cluster_id);
            }
        }
        debug!(cluster_id, %connection_id, "Live client unregistered");
    }

    /// Sends `state` to every connection in `region`.
    ///
    /// Per-connection failures are logged and skipped. Returns the number of
    /// connections that accepted the message, or an error if the region has
    /// no connection at all.
    pub fn emit_state(&self, region: &str, state: State) -> Result<usize, SyncError> {
        let targets: Vec<(String, ConnectionId, Outbound<State>)> = self
            .read()
            .iter()
            .flat_map(|(cluster_id, connections)| {
                connections
                    .iter()
                    .filter(move |(_, client)| client.region == region)
                    .map(move |(id, client)| (cluster_id.clone(), *id, client.out.clone()))
            })
            .collect();

        if targets.is_empty() {
            return Err(SyncError::NoConnections {
                region: region.to_string(),
            });
        }

        let mut delivered = 0;
        for (cluster_id, connection_id, out) in targets {
            match out.try_send(state.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(cluster_id = %cluster_id, %connection_id, region, error = %e, "Live push failed");
                }
            }
        }
        Ok(delivered)
    }

    /// Regions with at least one live connection.
    pub fn regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self
            .read()
            .values()
            .flat_map(|connections| connections.values().map(|c| c.region.clone()))
            .collect();
        regions.sort();
        regions.dedup();
        regions
    }

    pub fn connection_count(&self) -> usize {
        self.read().values().map(HashMap::len).sum()
    }

    pub fn cluster_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::convert::bookmark;
    use fleet_id::Version;

    #[test]
    fn test_guard_unregisters_and_drops_empty_cluster() {
        let registry = LiveRegistry::new();
        let (out_a, _rx_a) = Outbound::channel(4);
        let (out_b, _rx_b) = Outbound::channel(4);

        let first = registry.register("cluster-1", "us-east", out_a);
        let second = registry.register("cluster-1", "us-east", out_b);
        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.cluster_count(), 1);

        drop(first);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.cluster_count(), 1);

        drop(second);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.cluster_count(), 0);
    }

    #[test]
    fn test_emit_only_reaches_matching_region() {
        let registry = LiveRegistry::new();
        let (east, mut east_rx) = Outbound::channel(4);
        let (west, mut west_rx) = Outbound::channel(4);
        let _east = registry.register("cluster-1", "us-east", east);
        let _west = registry.register("cluster-2", "eu-west", west);

        let delivered = registry
            .emit_state("us-east", bookmark(Version::new(3)))
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(east_rx.try_recv().unwrap().unwrap().version, 3);
        assert!(west_rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_connections_errors() {
        let registry = LiveRegistry::new();
        let err = registry
            .emit_state("us-east", bookmark(Version::new(1)))
            .unwrap_err();
        assert!(matches!(err, SyncError::NoConnections { .. }));
    }

    #[test]
    fn test_emit_skips_failed_connection() {
        let registry = LiveRegistry::new();
        let (gone, gone_rx) = Outbound::channel(1);
        let (alive, mut alive_rx) = Outbound::channel(4);
        let _gone = registry.register("cluster-1", "us-east", gone);
        let _alive = registry.register("cluster-2", "us-east", alive);
        drop(gone_rx);

        let delivered = registry
            .emit_state("us-east", bookmark(Version::new(9)))
            .unwrap();
        assert_eq!(delivered, 1);
        assert!(alive_rx.try_recv().is_ok());
    }
}
