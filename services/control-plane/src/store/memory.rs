//! In-memory implementation of the resource store.
//!
//! All state lives in `BTreeMap`s behind one `tokio::sync::RwLock`. It is not
//! durable and exists for tests and local runs without Postgres.
//!
//! The seeding helpers (`put_*`, `remove_*`) stand in for the workflow engine:
//! each mutation draws the next version from a per-region generator and appends
//! to the change log under the same write lock, so row versions and change-log
//! sequences share one space exactly as in the database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fleet_id::{CiliumNetworkPolicyId, DeploymentId, InstanceId, SentinelId, Version};
use fleet_reconcile::diff_report;
use tokio::sync::RwLock;

use super::{ResourceStore, StoreError, StoreResult};
use crate::model::{
    ChangeOp, CiliumNetworkPolicy, Deployment, DeploymentDesiredState, DeploymentRemoval,
    DeploymentReport, DeploymentTopology, DesiredDeployment, Instance, ReportOutcome, ResourceKind,
    ResourceRef, Sentinel, SentinelDesiredState, SentinelReport, StateChange, TopologyStatus,
};

#[derive(Debug, Default)]
struct MemoryState {
    generators: HashMap<String, u64>,
    changes: Vec<StateChange>,
    deployments: BTreeMap<DeploymentId, Deployment>,
    topology: BTreeMap<(DeploymentId, String), DeploymentTopology>,
    sentinels: BTreeMap<SentinelId, Sentinel>,
    policies: BTreeMap<CiliumNetworkPolicyId, CiliumNetworkPolicy>,
    /// Keyed by (region, k8s_name).
    instances: BTreeMap<(String, String), Instance>,
}

impl MemoryState {
    fn next_version(&mut self, region: &str) -> Version {
        let counter = self.generators.entry(region.to_string()).or_insert(0);
        *counter += 1;
        Version::new(*counter)
    }

    fn record(
        &mut self,
        region: &str,
        resource: ResourceRef,
        op: ChangeOp,
        k8s_namespace: &str,
        k8s_name: &str,
    ) -> Version {
        let sequence = self.next_version(region);
        self.changes.push(StateChange {
            region: region.to_string(),
            sequence,
            resource,
            op,
            k8s_namespace: k8s_namespace.to_string(),
            k8s_name: k8s_name.to_string(),
        });
        sequence
    }

    fn desired(&self, deployment: &Deployment, region: &str) -> DesiredDeployment {
        DesiredDeployment {
            deployment: deployment.clone(),
            topology: self
                .topology
                .get(&(deployment.id, region.to_string()))
                .cloned(),
        }
    }

    fn deployment_by_k8s_name(&self, k8s_name: &str) -> Option<&Deployment> {
        self.deployments.values().find(|d| d.k8s_name == k8s_name)
    }

    fn scoped_instance_names(
        &self,
        deployment_id: DeploymentId,
        region: &str,
        cluster_id: Option<&str>,
    ) -> Vec<String> {
        self.instances
            .values()
            .filter(|i| i.deployment_id == deployment_id && i.region == region)
            .filter(|i| match cluster_id {
                Some(cluster) => i.cluster_id.as_deref() == Some(cluster),
                None => true,
            })
            .map(|i| i.k8s_name.clone())
            .collect()
    }
}

/// Non-durable [`ResourceStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a deployment row. Deployment rows carry no version;
    /// changes reach agents through topology rows.
    pub async fn put_deployment(&self, deployment: Deployment) {
        let mut state = self.state.write().await;
        state.deployments.insert(deployment.id, deployment);
    }

    /// Upserts the topology row of a deployment in a region and logs the change.
    pub async fn put_topology(
        &self,
        deployment_id: DeploymentId,
        region: &str,
        desired_replicas: i32,
        desired_status: TopologyStatus,
    ) -> StoreResult<Version> {
        let mut state = self.state.write().await;
        let deployment = state
            .deployments
            .get(&deployment_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("deployment", deployment_id.to_string()))?;

        let key = (deployment_id, region.to_string());
        let op = if state.topology.contains_key(&key) {
            ChangeOp::Update
        } else {
            ChangeOp::Create
        };
        let version = state.record(
            region,
            ResourceRef::Deployment(deployment_id),
            op,
            &deployment.k8s_namespace,
            &deployment.k8s_name,
        );
        state.topology.insert(
            key,
            DeploymentTopology {
                deployment_id,
                region: region.to_string(),
                desired_replicas,
                desired_status,
                version,
            },
        );
        Ok(version)
    }

    /// Removes the topology row of a deployment in a region and logs a delete.
    pub async fn remove_topology(
        &self,
        deployment_id: DeploymentId,
        region: &str,
    ) -> StoreResult<Version> {
        let mut state = self.state.write().await;
        let deployment = state
            .deployments
            .get(&deployment_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("deployment", deployment_id.to_string()))?;
        if state
            .topology
            .remove(&(deployment_id, region.to_string()))
            .is_none()
        {
            return Err(StoreError::not_found(
                "deployment_topology",
                format!("{deployment_id}/{region}"),
            ));
        }
        Ok(state.record(
            region,
            ResourceRef::Deployment(deployment_id),
            ChangeOp::Delete,
            &deployment.k8s_namespace,
            &deployment.k8s_name,
        ))
    }

    /// Changes the deployment-level desired state and logs an update in every
    /// region the deployment has topology in.
    pub async fn set_deployment_state(
        &self,
        deployment_id: DeploymentId,
        desired_state: DeploymentDesiredState,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let deployment = {
            let deployment = state
                .deployments
                .get_mut(&deployment_id)
                .ok_or_else(|| StoreError::not_found("deployment", deployment_id.to_string()))?;
            deployment.desired_state = desired_state;
            deployment.clone()
        };
        let regions: Vec<String> = state
            .topology
            .keys()
            .filter(|(id, _)| *id == deployment_id)
            .map(|(_, region)| region.clone())
            .collect();
        for region in regions {
            let version = state.record(
                &region,
                ResourceRef::Deployment(deployment_id),
                ChangeOp::Update,
                &deployment.k8s_namespace,
                &deployment.k8s_name,
            );
            if let Some(row) = state.topology.get_mut(&(deployment_id, region)) {
                row.version = version;
            }
        }
        Ok(())
    }

    /// Inserts or replaces a sentinel, assigning it the next version of its
    /// home region.
    pub async fn put_sentinel(&self, mut sentinel: Sentinel) -> Version {
        let mut state = self.state.write().await;
        let op = if state.sentinels.contains_key(&sentinel.id) {
            ChangeOp::Update
        } else {
            ChangeOp::Create
        };
        let version = state.record(
            &sentinel.region,
            ResourceRef::Sentinel(sentinel.id),
            op,
            &sentinel.k8s_namespace,
            &sentinel.k8s_name,
        );
        sentinel.version = version;
        state.sentinels.insert(sentinel.id, sentinel);
        version
    }

    pub async fn remove_sentinel(&self, id: SentinelId) -> StoreResult<Version> {
        let mut state = self.state.write().await;
        let sentinel = state
            .sentinels
            .remove(&id)
            .ok_or_else(|| StoreError::not_found("sentinel", id.to_string()))?;
        Ok(state.record(
            &sentinel.region,
            ResourceRef::Sentinel(id),
            ChangeOp::Delete,
            &sentinel.k8s_namespace,
            &sentinel.k8s_name,
        ))
    }

    /// Inserts or replaces a network policy. Policies are not in the change log.
    pub async fn put_policy(&self, mut policy: CiliumNetworkPolicy) -> Version {
        let mut state = self.state.write().await;
        policy.version = state.next_version(&policy.region);
        let version = policy.version;
        state.policies.insert(policy.id, policy);
        version
    }

    /// Advances a region's generator as if other writers had consumed versions.
    pub async fn skip_versions(&self, region: &str, count: u64) {
        let mut state = self.state.write().await;
        *state.generators.entry(region.to_string()).or_insert(0) += count;
    }

    /// Drops a deployment and its topology without logging, leaving any
    /// change-log entries that reference it dangling.
    pub async fn purge_deployment(&self, id: DeploymentId) {
        let mut state = self.state.write().await;
        state.deployments.remove(&id);
        state.topology.retain(|(deployment_id, _), _| *deployment_id != id);
    }

    pub async fn seed_instance(&self, instance: Instance) {
        let mut state = self.state.write().await;
        state
            .instances
            .insert((instance.region.clone(), instance.k8s_name.clone()), instance);
    }

    pub async fn instances(&self) -> Vec<Instance> {
        self.state.read().await.instances.values().cloned().collect()
    }

    pub async fn sentinel(&self, id: SentinelId) -> Option<Sentinel> {
        self.state.read().await.sentinels.get(&id).cloned()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn max_sequence(&self, region: &str) -> StoreResult<Version> {
        let state = self.state.read().await;
        Ok(state
            .changes
            .iter()
            .filter(|c| c.region == region)
            .map(|c| c.sequence)
            .max()
            .unwrap_or(Version::ZERO))
    }

    async fn list_changes(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<StateChange>> {
        let state = self.state.read().await;
        let mut changes: Vec<StateChange> = state
            .changes
            .iter()
            .filter(|c| c.region == region && c.sequence > after)
            .cloned()
            .collect();
        changes.sort_by_key(|c| c.sequence);
        changes.truncate(limit);
        Ok(changes)
    }

    async fn list_deletions(
        &self,
        region: &str,
        kind: ResourceKind,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<StateChange>> {
        let state = self.state.read().await;
        let mut changes: Vec<StateChange> = state
            .changes
            .iter()
            .filter(|c| c.region == region && c.sequence > after)
            .filter(|c| c.op == ChangeOp::Delete && c.resource.kind() == kind)
            .cloned()
            .collect();
        changes.sort_by_key(|c| c.sequence);
        changes.truncate(limit);
        Ok(changes)
    }

    async fn find_later_delete(
        &self,
        region: &str,
        resource: ResourceRef,
        after: Version,
    ) -> StoreResult<Option<StateChange>> {
        let state = self.state.read().await;
        Ok(state
            .changes
            .iter()
            .filter(|c| c.region == region && c.resource == resource && c.sequence > after)
            .filter(|c| c.op == ChangeOp::Delete)
            .min_by_key(|c| c.sequence)
            .cloned())
    }

    async fn find_deployments(
        &self,
        region: &str,
        ids: &[DeploymentId],
    ) -> StoreResult<Vec<DesiredDeployment>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.deployments.get(id))
            .map(|d| state.desired(d, region))
            .collect())
    }

    async fn find_sentinels(&self, ids: &[SentinelId]) -> StoreResult<Vec<Sentinel>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.sentinels.get(id))
            .cloned()
            .collect())
    }

    async fn list_running_deployments(
        &self,
        region: &str,
        after: Option<DeploymentId>,
        limit: usize,
    ) -> StoreResult<Vec<DesiredDeployment>> {
        let state = self.state.read().await;
        Ok(state
            .deployments
            .values()
            .filter(|d| after.is_none_or(|after| d.id > after))
            .filter(|d| d.desired_state == DeploymentDesiredState::Running)
            .map(|d| state.desired(d, region))
            .filter(|d| {
                d.topology
                    .as_ref()
                    .is_some_and(|t| t.desired_status.is_active())
            })
            .take(limit)
            .collect())
    }

    async fn list_running_sentinels(
        &self,
        region: &str,
        after: Option<SentinelId>,
        limit: usize,
    ) -> StoreResult<Vec<Sentinel>> {
        let state = self.state.read().await;
        Ok(state
            .sentinels
            .values()
            .filter(|s| after.is_none_or(|after| s.id > after))
            .filter(|s| s.region == region)
            .filter(|s| s.desired_state == SentinelDesiredState::Running && s.desired_replicas > 0)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn deployments_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<DesiredDeployment>> {
        let state = self.state.read().await;
        let mut rows: Vec<DesiredDeployment> = state
            .topology
            .values()
            .filter(|t| t.region == region && t.version > after)
            .filter_map(|t| {
                state.deployments.get(&t.deployment_id).map(|d| DesiredDeployment {
                    deployment: d.clone(),
                    topology: Some(t.clone()),
                })
            })
            .collect();
        rows.sort_by_key(DesiredDeployment::version);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn sentinels_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<Sentinel>> {
        let state = self.state.read().await;
        let mut rows: Vec<Sentinel> = state
            .sentinels
            .values()
            .filter(|s| s.region == region && s.version > after)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.version);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn policies_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<CiliumNetworkPolicy>> {
        let state = self.state.read().await;
        let mut rows: Vec<CiliumNetworkPolicy> = state
            .policies
            .values()
            .filter(|p| p.region == region && p.version > after)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.version);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_deployment(
        &self,
        id: &DeploymentId,
        region: &str,
    ) -> StoreResult<DesiredDeployment> {
        let state = self.state.read().await;
        state
            .deployments
            .get(id)
            .map(|d| state.desired(d, region))
            .ok_or_else(|| StoreError::not_found("deployment", id.to_string()))
    }

    async fn get_sentinel(&self, id: &SentinelId) -> StoreResult<Sentinel> {
        let state = self.state.read().await;
        state
            .sentinels
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("sentinel", id.to_string()))
    }

    async fn get_policy(&self, id: &CiliumNetworkPolicyId) -> StoreResult<CiliumNetworkPolicy> {
        let state = self.state.read().await;
        state
            .policies
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("cilium_network_policy", id.to_string()))
    }

    async fn apply_instance_report(
        &self,
        report: &DeploymentReport,
    ) -> StoreResult<ReportOutcome> {
        let mut state = self.state.write().await;
        let deployment_id = state
            .deployment_by_k8s_name(&report.k8s_name)
            .map(|d| d.id)
            .ok_or_else(|| StoreError::not_found("deployment", report.k8s_name.clone()))?;

        let stored =
            state.scoped_instance_names(deployment_id, &report.region, report.cluster_id.as_deref());
        let diff = diff_report(
            stored,
            report.instances.iter().map(|i| i.k8s_name.clone()),
        );

        for k8s_name in &diff.stale {
            state
                .instances
                .remove(&(report.region.clone(), k8s_name.clone()));
        }

        let now = Utc::now();
        for observed in &report.instances {
            let key = (report.region.clone(), observed.k8s_name.clone());
            let id = state
                .instances
                .get(&key)
                .map(|i| i.id)
                .unwrap_or_else(InstanceId::new);
            state.instances.insert(
                key,
                Instance {
                    id,
                    deployment_id,
                    region: report.region.clone(),
                    cluster_id: report.cluster_id.clone(),
                    k8s_name: observed.k8s_name.clone(),
                    address: observed.address.clone(),
                    cpu_millicores: observed.cpu_millicores,
                    memory_mib: observed.memory_mib,
                    status: observed.status,
                    updated_at: now,
                },
            );
        }

        Ok(ReportOutcome {
            upserted: diff.upserts(),
            deleted: diff.stale.len(),
        })
    }

    async fn remove_deployment_instances(
        &self,
        removal: &DeploymentRemoval,
    ) -> StoreResult<ReportOutcome> {
        let mut state = self.state.write().await;
        let Some(deployment_id) = state
            .deployment_by_k8s_name(&removal.k8s_name)
            .map(|d| d.id)
        else {
            return Ok(ReportOutcome::default());
        };

        let stale = state.scoped_instance_names(
            deployment_id,
            &removal.region,
            removal.cluster_id.as_deref(),
        );
        for k8s_name in &stale {
            state
                .instances
                .remove(&(removal.region.clone(), k8s_name.clone()));
        }

        Ok(ReportOutcome {
            upserted: 0,
            deleted: stale.len(),
        })
    }

    async fn record_sentinel_status(&self, report: &SentinelReport) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let sentinel = state
            .sentinels
            .values_mut()
            .find(|s| s.region == report.region && s.k8s_name == report.k8s_name)
            .ok_or_else(|| StoreError::not_found("sentinel", report.k8s_name.clone()))?;
        sentinel.available_replicas = report.available_replicas;
        sentinel.health = report.health;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
