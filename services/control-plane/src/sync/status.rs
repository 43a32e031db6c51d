//! Observed-state ingestion.

use fleet_proto::cluster::v1::report_deployment_status_request::{Change, Delete, Update};
use fleet_proto::cluster::v1::{
    InstanceStatus as WireInstanceStatus, ObservedInstance as WireObservedInstance,
    SentinelHealth as WireSentinelHealth,
};
use tracing::{info, warn};

use super::SyncError;
use crate::model::{
    DeploymentRemoval, DeploymentReport, InstanceStatus, ObservedInstance, ReportOutcome,
    SentinelHealth, SentinelReport,
};
use crate::store::ResourceStore;

pub fn instance_status_from_wire(value: i32) -> InstanceStatus {
    match WireInstanceStatus::try_from(value) {
        Ok(WireInstanceStatus::Pending) => InstanceStatus::Pending,
        Ok(WireInstanceStatus::Running) => InstanceStatus::Running,
        Ok(WireInstanceStatus::Failed) => InstanceStatus::Failed,
        Ok(WireInstanceStatus::Unspecified) => InstanceStatus::Inactive,
        Err(_) => {
            warn!(value, "Unknown instance status from agent, storing inactive");
            InstanceStatus::Inactive
        }
    }
}

pub fn sentinel_health_from_wire(value: i32) -> SentinelHealth {
    match WireSentinelHealth::try_from(value) {
        Ok(WireSentinelHealth::Healthy) => SentinelHealth::Healthy,
        Ok(WireSentinelHealth::Unhealthy) => SentinelHealth::Unhealthy,
        Ok(WireSentinelHealth::Paused) => SentinelHealth::Paused,
        Ok(WireSentinelHealth::Unspecified) => SentinelHealth::Unknown,
        Err(_) => {
            warn!(value, "Unknown sentinel health from agent, storing unknown");
            SentinelHealth::Unknown
        }
    }
}

fn observed_from_wire(instance: WireObservedInstance) -> Result<ObservedInstance, SyncError> {
    if instance.k8s_name.is_empty() {
        return Err(SyncError::invalid_argument("instance k8s_name cannot be empty"));
    }
    Ok(ObservedInstance {
        status: instance_status_from_wire(instance.status),
        k8s_name: instance.k8s_name,
        address: instance.address,
        cpu_millicores: instance.cpu_millicores,
        memory_mib: instance.memory_mib,
    })
}

/// Applies one deployment status report.
///
/// `Update` replaces the stored instances of the scope with the reported set.
/// `Delete` removes them all; for an unknown deployment it does nothing.
pub async fn report_deployment_status(
    store: &dyn ResourceStore,
    region: &str,
    cluster_id: Option<String>,
    change: Change,
) -> Result<ReportOutcome, SyncError> {
    match change {
        Change::Update(Update {
            k8s_name,
            instances,
        }) => {
            if k8s_name.is_empty() {
                return Err(SyncError::invalid_argument("k8s_name cannot be empty"));
            }
            let instances = instances
                .into_iter()
                .map(observed_from_wire)
                .collect::<Result<Vec<_>, _>>()?;
            let report = DeploymentReport::new(region, cluster_id, k8s_name, instances);

            let outcome = store
                .apply_instance_report(&report)
                .await
                .map_err(SyncError::store("apply instance report", region))?;
            info!(
                region,
                k8s_name = %report.k8s_name,
                upserted = outcome.upserted,
                deleted = outcome.deleted,
                "Deployment status reconciled"
            );
            Ok(outcome)
        }
        Change::Delete(Delete { k8s_name }) => {
            if k8s_name.is_empty() {
                return Err(SyncError::invalid_argument("k8s_name cannot be empty"));
            }
            let removal = DeploymentRemoval {
                region: region.to_string(),
                cluster_id,
                k8s_name,
            };
            let outcome = store
                .remove_deployment_instances(&removal)
                .await
                .map_err(SyncError::store("remove deployment instances", region))?;
            info!(
                region,
                k8s_name = %removal.k8s_name,
                deleted = outcome.deleted,
                "Deployment instances removed"
            );
            Ok(outcome)
        }
    }
}

pub async fn report_sentinel_status(
    store: &dyn ResourceStore,
    report: SentinelReport,
) -> Result<(), SyncError> {
    if report.k8s_name.is_empty() {
        return Err(SyncError::invalid_argument("k8s_name cannot be empty"));
    }
    store
        .record_sentinel_status(&report)
        .await
        .map_err(SyncError::store("record sentinel status", &report.region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixtures;
    use crate::store::MemoryStore;

    fn wire_instance(name: &str, status: WireInstanceStatus) -> WireObservedInstance {
        WireObservedInstance {
            k8s_name: name.to_string(),
            address: format!("{name}:8080"),
            cpu_millicores: 250,
            memory_mib: 256,
            status: status as i32,
        }
    }

    fn update(name: &str, instances: Vec<WireObservedInstance>) -> Change {
        Change::Update(Update {
            k8s_name: name.to_string(),
            instances,
        })
    }

    #[test]
    fn test_unknown_wire_status_maps_to_inactive() {
        assert_eq!(instance_status_from_wire(99), InstanceStatus::Inactive);
        assert_eq!(instance_status_from_wire(0), InstanceStatus::Inactive);
        assert_eq!(
            instance_status_from_wire(WireInstanceStatus::Failed as i32),
            InstanceStatus::Failed
        );
        assert_eq!(sentinel_health_from_wire(42), SentinelHealth::Unknown);
    }

    #[tokio::test]
    async fn test_report_removes_unreported_instances() {
        let store = MemoryStore::new();
        store.put_deployment(fixtures::deployment("api")).await;

        let all = vec![
            wire_instance("api-a", WireInstanceStatus::Running),
            wire_instance("api-b", WireInstanceStatus::Running),
            wire_instance("api-c", WireInstanceStatus::Pending),
        ];
        report_deployment_status(&store, "us-east", None, update("api", all))
            .await
            .unwrap();

        let partial = vec![
            wire_instance("api-a", WireInstanceStatus::Running),
            wire_instance("api-c", WireInstanceStatus::Running),
        ];
        let outcome = report_deployment_status(&store, "us-east", None, update("api", partial))
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome { upserted: 2, deleted: 1 });

        let mut names: Vec<String> = store
            .instances()
            .await
            .into_iter()
            .map(|i| i.k8s_name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["api-a".to_string(), "api-c".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_report_is_idempotent() {
        let store = MemoryStore::new();
        store.put_deployment(fixtures::deployment("api")).await;
        let instances = vec![wire_instance("api-a", WireInstanceStatus::Running)];

        report_deployment_status(&store, "us-east", None, update("api", instances.clone()))
            .await
            .unwrap();
        let before = store.instances().await;
        let outcome =
            report_deployment_status(&store, "us-east", None, update("api", instances))
                .await
                .unwrap();
        let after = store.instances().await;

        assert_eq!(outcome.deleted, 0);
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].id, after[0].id);
    }

    #[tokio::test]
    async fn test_unknown_deployment_update_is_not_found() {
        let store = MemoryStore::new();
        let err = report_deployment_status(
            &store,
            "us-east",
            None,
            update("unknown", vec![wire_instance("unknown-1", WireInstanceStatus::Running)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
        assert!(store.instances().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_deployment_delete_is_noop() {
        let store = MemoryStore::new();
        let outcome = report_deployment_status(
            &store,
            "us-east",
            None,
            Change::Delete(Delete {
                k8s_name: "unknown".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ReportOutcome::default());
    }

    #[tokio::test]
    async fn test_delete_clears_scope() {
        let store = MemoryStore::new();
        store.put_deployment(fixtures::deployment("api")).await;
        report_deployment_status(
            &store,
            "us-east",
            None,
            update(
                "api",
                vec![
                    wire_instance("api-a", WireInstanceStatus::Running),
                    wire_instance("api-b", WireInstanceStatus::Running),
                ],
            ),
        )
        .await
        .unwrap();

        let outcome = report_deployment_status(
            &store,
            "us-east",
            None,
            Change::Delete(Delete {
                k8s_name: "api".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(outcome.deleted, 2);
        assert!(store.instances().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_sentinel_is_not_found() {
        let store = MemoryStore::new();
        let err = report_sentinel_status(
            &store,
            SentinelReport {
                region: "us-east".to_string(),
                k8s_name: "unknown".to_string(),
                available_replicas: 1,
                health: SentinelHealth::Healthy,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
