//! Point queries for a single resource.

use fleet_id::{CiliumNetworkPolicyId, DeploymentId, SentinelId};
use fleet_proto::cluster::v1::{CiliumNetworkPolicyState, DeploymentState, SentinelState};

use super::convert::{deployment_state, policy_state, sentinel_state};
use super::SyncError;
use crate::store::ResourceStore;

/// Desired state of one deployment in `region`. A deployment without a
/// topology row for the region converts to `Delete`.
pub async fn desired_deployment(
    store: &dyn ResourceStore,
    id: &DeploymentId,
    region: &str,
) -> Result<DeploymentState, SyncError> {
    let desired = store
        .get_deployment(id, region)
        .await
        .map_err(SyncError::store("get deployment", region))?;
    Ok(deployment_state(&desired, desired.version()))
}

pub async fn desired_sentinel(
    store: &dyn ResourceStore,
    id: &SentinelId,
    region: &str,
) -> Result<SentinelState, SyncError> {
    let sentinel = store
        .get_sentinel(id)
        .await
        .map_err(SyncError::store("get sentinel", region))?;
    Ok(sentinel_state(&sentinel, region, sentinel.version))
}

/// Policies have no delete instruction, so a policy homed elsewhere is
/// reported as not found rather than applied.
pub async fn desired_policy(
    store: &dyn ResourceStore,
    id: &CiliumNetworkPolicyId,
    region: &str,
) -> Result<CiliumNetworkPolicyState, SyncError> {
    let policy = store
        .get_policy(id)
        .await
        .map_err(SyncError::store("get cilium network policy", region))?;
    if policy.region != region {
        return Err(SyncError::NotFound(format!(
            "cilium_network_policy {id} in region {region}"
        )));
    }
    Ok(policy_state(&policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopologyStatus;
    use crate::store::memory::fixtures;
    use crate::store::MemoryStore;
    use fleet_proto::cluster::v1::{deployment_state as dep_msg, sentinel_state as snt_msg};

    #[tokio::test]
    async fn test_removed_topology_point_query_is_delete() {
        let store = MemoryStore::new();
        let dep = fixtures::deployment("api");
        store.put_deployment(dep.clone()).await;
        store
            .put_topology(dep.id, "us-east", 2, TopologyStatus::Started)
            .await
            .unwrap();
        store.remove_topology(dep.id, "us-east").await.unwrap();

        let state = desired_deployment(&store, &dep.id, "us-east").await.unwrap();
        let Some(dep_msg::State::Delete(delete)) = state.state else {
            panic!("expected delete");
        };
        assert_eq!(delete.k8s_namespace, "acme");
        assert_eq!(delete.k8s_name, "api");
    }

    #[tokio::test]
    async fn test_zero_replica_sentinel_is_delete() {
        let store = MemoryStore::new();
        let sentinel = fixtures::sentinel("edge", "us-east", 0);
        let id = sentinel.id;
        store.put_sentinel(sentinel).await;

        let state = desired_sentinel(&store, &id, "us-east").await.unwrap();
        assert!(matches!(state.state, Some(snt_msg::State::Delete(_))));
    }

    #[tokio::test]
    async fn test_unknown_deployment_is_not_found() {
        let store = MemoryStore::new();
        let err = desired_deployment(&store, &DeploymentId::new(), "us-east")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_policy_outside_region_is_not_found() {
        let store = MemoryStore::new();
        let policy = fixtures::policy("allow-dns", "eu-west");
        let id = policy.id;
        store.put_policy(policy).await;

        assert!(desired_policy(&store, &id, "eu-west").await.is_ok());
        let err = desired_policy(&store, &id, "us-east").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
