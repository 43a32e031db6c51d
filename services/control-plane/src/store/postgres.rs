//! Postgres implementation of the resource store.
//!
//! Desired-state tables are read with plain queries. Observed-state writes run
//! in one transaction per report and are retried on lock conflicts.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use fleet_id::{CiliumNetworkPolicyId, DeploymentId, IdError, InstanceId, SentinelId, Version};
use fleet_reconcile::diff_report;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{ResourceStore, StoreError, StoreResult};
use crate::db::{Database, RetryPolicy, Retryable};
use crate::model::{
    ChangeOp, CiliumNetworkPolicy, Deployment, DeploymentDesiredState, DeploymentRemoval,
    DeploymentReport, DeploymentTopology, DesiredDeployment, ReportOutcome, ResourceKind,
    ResourceRef, Sentinel, SentinelDesiredState, SentinelHealth, SentinelReport, StateChange,
    TopologyStatus,
};

const DEPLOYMENT_COLUMNS: &str = "d.id, d.workspace_id, d.project_id, d.environment_id, \
     d.k8s_namespace, d.k8s_name, d.image, d.cpu_millicores, d.memory_mib, \
     d.encrypted_environment_variables, d.build_id, d.desired_state, \
     t.region AS topology_region, t.desired_replicas, t.desired_status, t.version";

const SENTINEL_COLUMNS: &str = "id, workspace_id, environment_id, k8s_namespace, k8s_name, \
     region, image, desired_state, desired_replicas, available_replicas, health, \
     cpu_millicores, memory_mib, version";

const POLICY_COLUMNS: &str =
    "id, workspace_id, region, k8s_namespace, k8s_name, policy, version";

const CHANGE_COLUMNS: &str =
    "region, sequence, resource_type, resource_id, op, k8s_namespace, k8s_name";

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database { source, .. } => crate::db::is_retryable(source),
            _ => false,
        }
    }
}

/// Durable [`ResourceStore`] backed by Postgres.
#[derive(Clone)]
pub struct PostgresStore {
    db: Database,
    retry: RetryPolicy,
}

impl PostgresStore {
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    async fn apply_instance_report_once(
        &self,
        report: &DeploymentReport,
    ) -> StoreResult<ReportOutcome> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(StoreError::database("begin instance report"))?;

        let deployment_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM deployments WHERE k8s_name = $1")
                .bind(&report.k8s_name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::database("lookup deployment by k8s_name"))?;
        let Some(deployment_id) = deployment_id else {
            return Err(StoreError::not_found("deployment", report.k8s_name.clone()));
        };

        let stored: Vec<String> = sqlx::query_scalar(
            "SELECT k8s_name FROM instances \
             WHERE deployment_id = $1 AND region = $2 AND ($3::text IS NULL OR cluster_id = $3) \
             FOR UPDATE",
        )
        .bind(&deployment_id)
        .bind(&report.region)
        .bind(&report.cluster_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(StoreError::database("select scoped instances"))?;

        let diff = diff_report(
            stored,
            report.instances.iter().map(|i| i.k8s_name.clone()),
        );

        if !diff.stale.is_empty() {
            sqlx::query("DELETE FROM instances WHERE region = $1 AND k8s_name = ANY($2)")
                .bind(&report.region)
                .bind(&diff.stale)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::database("delete stale instances"))?;
        }

        if !report.instances.is_empty() {
            let now = Utc::now();
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO instances (id, deployment_id, region, cluster_id, k8s_name, \
                 address, cpu_millicores, memory_mib, status, updated_at) ",
            );
            builder.push_values(&report.instances, |mut row, instance| {
                row.push_bind(InstanceId::new().to_string())
                    .push_bind(deployment_id.clone())
                    .push_bind(report.region.clone())
                    .push_bind(report.cluster_id.clone())
                    .push_bind(instance.k8s_name.clone())
                    .push_bind(instance.address.clone())
                    .push_bind(instance.cpu_millicores)
                    .push_bind(instance.memory_mib)
                    .push_bind(instance.status.as_str())
                    .push_bind(now);
            });
            builder.push(
                " ON CONFLICT (region, k8s_name) DO UPDATE SET \
                 deployment_id = EXCLUDED.deployment_id, \
                 cluster_id = EXCLUDED.cluster_id, \
                 address = EXCLUDED.address, \
                 cpu_millicores = EXCLUDED.cpu_millicores, \
                 memory_mib = EXCLUDED.memory_mib, \
                 status = EXCLUDED.status, \
                 updated_at = EXCLUDED.updated_at",
            );
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(StoreError::database("upsert reported instances"))?;
        }

        tx.commit()
            .await
            .map_err(StoreError::database("commit instance report"))?;

        debug!(
            region = %report.region,
            k8s_name = %report.k8s_name,
            stale = diff.stale.len(),
            added = diff.added.len(),
            "Instance report applied"
        );

        Ok(ReportOutcome {
            upserted: diff.upserts(),
            deleted: diff.stale.len(),
        })
    }

    async fn remove_deployment_instances_once(
        &self,
        removal: &DeploymentRemoval,
    ) -> StoreResult<ReportOutcome> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(StoreError::database("begin instance removal"))?;

        let deployment_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM deployments WHERE k8s_name = $1")
                .bind(&removal.k8s_name)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::database("lookup deployment by k8s_name"))?;
        let Some(deployment_id) = deployment_id else {
            return Ok(ReportOutcome::default());
        };

        let result = sqlx::query(
            "DELETE FROM instances \
             WHERE deployment_id = $1 AND region = $2 AND ($3::text IS NULL OR cluster_id = $3)",
        )
        .bind(&deployment_id)
        .bind(&removal.region)
        .bind(&removal.cluster_id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::database("delete deployment instances"))?;

        tx.commit()
            .await
            .map_err(StoreError::database("commit instance removal"))?;

        Ok(ReportOutcome {
            upserted: 0,
            deleted: result.rows_affected() as usize,
        })
    }

    async fn record_sentinel_status_once(&self, report: &SentinelReport) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE sentinels SET available_replicas = $3, health = $4, updated_at = now() \
             WHERE region = $1 AND k8s_name = $2",
        )
        .bind(&report.region)
        .bind(&report.k8s_name)
        .bind(report.available_replicas)
        .bind(report.health.as_str())
        .execute(self.pool())
        .await
        .map_err(StoreError::database("update sentinel status"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("sentinel", report.k8s_name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for PostgresStore {
    async fn max_sequence(&self, region: &str) -> StoreResult<Version> {
        let max: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) FROM state_changes WHERE region = $1",
        )
        .bind(region)
        .fetch_one(self.pool())
        .await
        .map_err(StoreError::database("select max change sequence"))?;
        Ok(Version::from_db(max))
    }

    async fn list_changes(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<StateChange>> {
        let rows: Vec<ChangeRow> = sqlx::query_as(&format!(
            "SELECT {CHANGE_COLUMNS} FROM state_changes \
             WHERE region = $1 AND sequence > $2 ORDER BY sequence LIMIT $3"
        ))
        .bind(region)
        .bind(after.to_db())
        .bind(db_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("list state changes"))?;

        rows.into_iter().map(ChangeRow::into_model).collect()
    }

    async fn list_deletions(
        &self,
        region: &str,
        kind: ResourceKind,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<StateChange>> {
        if kind == ResourceKind::CiliumNetworkPolicy {
            return Ok(Vec::new());
        }

        let rows: Vec<ChangeRow> = sqlx::query_as(&format!(
            "SELECT {CHANGE_COLUMNS} FROM state_changes \
             WHERE region = $1 AND sequence > $2 AND op = 'delete' AND resource_type = $3 \
             ORDER BY sequence LIMIT $4"
        ))
        .bind(region)
        .bind(after.to_db())
        .bind(kind.as_str())
        .bind(db_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("list deletions"))?;

        rows.into_iter().map(ChangeRow::into_model).collect()
    }

    async fn find_later_delete(
        &self,
        region: &str,
        resource: ResourceRef,
        after: Version,
    ) -> StoreResult<Option<StateChange>> {
        let row: Option<ChangeRow> = sqlx::query_as(&format!(
            "SELECT {CHANGE_COLUMNS} FROM state_changes \
             WHERE region = $1 AND resource_type = $2 AND resource_id = $3 \
               AND op = 'delete' AND sequence > $4 \
             ORDER BY sequence LIMIT 1"
        ))
        .bind(region)
        .bind(resource.kind().as_str())
        .bind(resource.id())
        .bind(after.to_db())
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::database("find later delete"))?;

        row.map(ChangeRow::into_model).transpose()
    }

    async fn find_deployments(
        &self,
        region: &str,
        ids: &[DeploymentId],
    ) -> StoreResult<Vec<DesiredDeployment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();

        let rows: Vec<DesiredDeploymentRow> = sqlx::query_as(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments d \
             LEFT JOIN deployment_topology t ON t.deployment_id = d.id AND t.region = $1 \
             WHERE d.id = ANY($2)"
        ))
        .bind(region)
        .bind(&ids)
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("hydrate deployments"))?;

        rows.into_iter()
            .map(DesiredDeploymentRow::into_model)
            .collect()
    }

    async fn find_sentinels(&self, ids: &[SentinelId]) -> StoreResult<Vec<Sentinel>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();

        let rows: Vec<SentinelRow> = sqlx::query_as(&format!(
            "SELECT {SENTINEL_COLUMNS} FROM sentinels WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("hydrate sentinels"))?;

        rows.into_iter().map(SentinelRow::into_model).collect()
    }

    async fn list_running_deployments(
        &self,
        region: &str,
        after: Option<DeploymentId>,
        limit: usize,
    ) -> StoreResult<Vec<DesiredDeployment>> {
        let rows: Vec<DesiredDeploymentRow> = sqlx::query_as(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments d \
             JOIN deployment_topology t ON t.deployment_id = d.id AND t.region = $1 \
             WHERE d.desired_state = 'running' \
               AND t.desired_status IN ('starting', 'started') \
               AND ($2::text IS NULL OR d.id > $2) \
             ORDER BY d.id LIMIT $3"
        ))
        .bind(region)
        .bind(after.map(|id| id.to_string()))
        .bind(db_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("list running deployments"))?;

        rows.into_iter()
            .map(DesiredDeploymentRow::into_model)
            .collect()
    }

    async fn list_running_sentinels(
        &self,
        region: &str,
        after: Option<SentinelId>,
        limit: usize,
    ) -> StoreResult<Vec<Sentinel>> {
        let rows: Vec<SentinelRow> = sqlx::query_as(&format!(
            "SELECT {SENTINEL_COLUMNS} FROM sentinels \
             WHERE region = $1 AND desired_state = 'running' AND desired_replicas > 0 \
               AND ($2::text IS NULL OR id > $2) \
             ORDER BY id LIMIT $3"
        ))
        .bind(region)
        .bind(after.map(|id| id.to_string()))
        .bind(db_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("list running sentinels"))?;

        rows.into_iter().map(SentinelRow::into_model).collect()
    }

    async fn deployments_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<DesiredDeployment>> {
        let rows: Vec<DesiredDeploymentRow> = sqlx::query_as(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments d \
             JOIN deployment_topology t ON t.deployment_id = d.id \
             WHERE t.region = $1 AND t.version > $2 \
             ORDER BY t.version LIMIT $3"
        ))
        .bind(region)
        .bind(after.to_db())
        .bind(db_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("list deployments after version"))?;

        rows.into_iter()
            .map(DesiredDeploymentRow::into_model)
            .collect()
    }

    async fn sentinels_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<Sentinel>> {
        let rows: Vec<SentinelRow> = sqlx::query_as(&format!(
            "SELECT {SENTINEL_COLUMNS} FROM sentinels \
             WHERE region = $1 AND version > $2 ORDER BY version LIMIT $3"
        ))
        .bind(region)
        .bind(after.to_db())
        .bind(db_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("list sentinels after version"))?;

        rows.into_iter().map(SentinelRow::into_model).collect()
    }

    async fn policies_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<CiliumNetworkPolicy>> {
        let rows: Vec<PolicyRow> = sqlx::query_as(&format!(
            "SELECT {POLICY_COLUMNS} FROM cilium_network_policies \
             WHERE region = $1 AND version > $2 ORDER BY version LIMIT $3"
        ))
        .bind(region)
        .bind(after.to_db())
        .bind(db_limit(limit))
        .fetch_all(self.pool())
        .await
        .map_err(StoreError::database("list policies after version"))?;

        rows.into_iter().map(PolicyRow::into_model).collect()
    }

    async fn get_deployment(
        &self,
        id: &DeploymentId,
        region: &str,
    ) -> StoreResult<DesiredDeployment> {
        let row: Option<DesiredDeploymentRow> = sqlx::query_as(&format!(
            "SELECT {DEPLOYMENT_COLUMNS} FROM deployments d \
             LEFT JOIN deployment_topology t ON t.deployment_id = d.id AND t.region = $1 \
             WHERE d.id = $2"
        ))
        .bind(region)
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::database("get deployment"))?;

        row.ok_or_else(|| StoreError::not_found("deployment", id.to_string()))?
            .into_model()
    }

    async fn get_sentinel(&self, id: &SentinelId) -> StoreResult<Sentinel> {
        let row: Option<SentinelRow> = sqlx::query_as(&format!(
            "SELECT {SENTINEL_COLUMNS} FROM sentinels WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::database("get sentinel"))?;

        row.ok_or_else(|| StoreError::not_found("sentinel", id.to_string()))?
            .into_model()
    }

    async fn get_policy(&self, id: &CiliumNetworkPolicyId) -> StoreResult<CiliumNetworkPolicy> {
        let row: Option<PolicyRow> = sqlx::query_as(&format!(
            "SELECT {POLICY_COLUMNS} FROM cilium_network_policies WHERE id = $1"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(StoreError::database("get cilium network policy"))?;

        row.ok_or_else(|| StoreError::not_found("cilium_network_policy", id.to_string()))?
            .into_model()
    }

    async fn apply_instance_report(
        &self,
        report: &DeploymentReport,
    ) -> StoreResult<ReportOutcome> {
        self.retry
            .run("apply_instance_report", || {
                self.apply_instance_report_once(report)
            })
            .await
    }

    async fn remove_deployment_instances(
        &self,
        removal: &DeploymentRemoval,
    ) -> StoreResult<ReportOutcome> {
        self.retry
            .run("remove_deployment_instances", || {
                self.remove_deployment_instances_once(removal)
            })
            .await
    }

    async fn record_sentinel_status(&self, report: &SentinelReport) -> StoreResult<()> {
        self.retry
            .run("record_sentinel_status", || {
                self.record_sentinel_status_once(report)
            })
            .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map_err(StoreError::database("health check"))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn db_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_id<T>(table: &'static str, value: &str) -> StoreResult<T>
where
    T: FromStr<Err = IdError>,
{
    value.parse().map_err(|e: IdError| StoreError::Corrupt {
        table,
        message: format!("invalid id {value:?}: {e}"),
    })
}

// =============================================================================
// Row types
// =============================================================================

struct ChangeRow {
    region: String,
    sequence: i64,
    resource_type: String,
    resource_id: String,
    op: String,
    k8s_namespace: String,
    k8s_name: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ChangeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            region: row.try_get("region")?,
            sequence: row.try_get("sequence")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            op: row.try_get("op")?,
            k8s_namespace: row.try_get("k8s_namespace")?,
            k8s_name: row.try_get("k8s_name")?,
        })
    }
}

impl ChangeRow {
    fn into_model(self) -> StoreResult<StateChange> {
        let resource = match self.resource_type.as_str() {
            "deployment" => ResourceRef::Deployment(parse_id("state_changes", &self.resource_id)?),
            "sentinel" => ResourceRef::Sentinel(parse_id("state_changes", &self.resource_id)?),
            other => {
                return Err(StoreError::Corrupt {
                    table: "state_changes",
                    message: format!("unknown resource_type {other:?}"),
                })
            }
        };
        let op = ChangeOp::parse(&self.op).ok_or_else(|| StoreError::Corrupt {
            table: "state_changes",
            message: format!("unknown op {:?}", self.op),
        })?;

        Ok(StateChange {
            region: self.region,
            sequence: Version::from_db(self.sequence),
            resource,
            op,
            k8s_namespace: self.k8s_namespace,
            k8s_name: self.k8s_name,
        })
    }
}

struct DesiredDeploymentRow {
    id: String,
    workspace_id: String,
    project_id: String,
    environment_id: String,
    k8s_namespace: String,
    k8s_name: String,
    image: String,
    cpu_millicores: i64,
    memory_mib: i64,
    encrypted_environment_variables: Vec<u8>,
    build_id: Option<String>,
    desired_state: String,
    topology_region: Option<String>,
    desired_replicas: Option<i32>,
    desired_status: Option<String>,
    version: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for DesiredDeploymentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            project_id: row.try_get("project_id")?,
            environment_id: row.try_get("environment_id")?,
            k8s_namespace: row.try_get("k8s_namespace")?,
            k8s_name: row.try_get("k8s_name")?,
            image: row.try_get("image")?,
            cpu_millicores: row.try_get("cpu_millicores")?,
            memory_mib: row.try_get("memory_mib")?,
            encrypted_environment_variables: row.try_get("encrypted_environment_variables")?,
            build_id: row.try_get("build_id")?,
            desired_state: row.try_get("desired_state")?,
            topology_region: row.try_get("topology_region")?,
            desired_replicas: row.try_get("desired_replicas")?,
            desired_status: row.try_get("desired_status")?,
            version: row.try_get("version")?,
        })
    }
}

impl DesiredDeploymentRow {
    fn into_model(self) -> StoreResult<DesiredDeployment> {
        let id: DeploymentId = parse_id("deployments", &self.id)?;

        let topology = match (
            self.topology_region,
            self.desired_replicas,
            self.desired_status,
            self.version,
        ) {
            (Some(region), Some(desired_replicas), Some(status), Some(version)) => {
                Some(DeploymentTopology {
                    deployment_id: id,
                    region,
                    desired_replicas,
                    desired_status: TopologyStatus::from_db(&status),
                    version: Version::from_db(version),
                })
            }
            _ => None,
        };

        Ok(DesiredDeployment {
            deployment: Deployment {
                id,
                workspace_id: self.workspace_id,
                project_id: self.project_id,
                environment_id: self.environment_id,
                k8s_namespace: self.k8s_namespace,
                k8s_name: self.k8s_name,
                image: self.image,
                cpu_millicores: self.cpu_millicores,
                memory_mib: self.memory_mib,
                encrypted_environment_variables: self.encrypted_environment_variables,
                build_id: self.build_id,
                desired_state: DeploymentDesiredState::from_db(&self.desired_state),
            },
            topology,
        })
    }
}

struct SentinelRow {
    id: String,
    workspace_id: String,
    environment_id: String,
    k8s_namespace: String,
    k8s_name: String,
    region: String,
    image: String,
    desired_state: String,
    desired_replicas: i32,
    available_replicas: i32,
    health: String,
    cpu_millicores: i64,
    memory_mib: i64,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SentinelRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            environment_id: row.try_get("environment_id")?,
            k8s_namespace: row.try_get("k8s_namespace")?,
            k8s_name: row.try_get("k8s_name")?,
            region: row.try_get("region")?,
            image: row.try_get("image")?,
            desired_state: row.try_get("desired_state")?,
            desired_replicas: row.try_get("desired_replicas")?,
            available_replicas: row.try_get("available_replicas")?,
            health: row.try_get("health")?,
            cpu_millicores: row.try_get("cpu_millicores")?,
            memory_mib: row.try_get("memory_mib")?,
            version: row.try_get("version")?,
        })
    }
}

impl SentinelRow {
    fn into_model(self) -> StoreResult<Sentinel> {
        Ok(Sentinel {
            id: parse_id("sentinels", &self.id)?,
            workspace_id: self.workspace_id,
            environment_id: self.environment_id,
            k8s_namespace: self.k8s_namespace,
            k8s_name: self.k8s_name,
            region: self.region,
            image: self.image,
            desired_state: SentinelDesiredState::from_db(&self.desired_state),
            desired_replicas: self.desired_replicas,
            available_replicas: self.available_replicas,
            health: SentinelHealth::from_db(&self.health),
            cpu_millicores: self.cpu_millicores,
            memory_mib: self.memory_mib,
            version: Version::from_db(self.version),
        })
    }
}

struct PolicyRow {
    id: String,
    workspace_id: String,
    region: String,
    k8s_namespace: String,
    k8s_name: String,
    policy: serde_json::Value,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for PolicyRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            region: row.try_get("region")?,
            k8s_namespace: row.try_get("k8s_namespace")?,
            k8s_name: row.try_get("k8s_name")?,
            policy: row.try_get("policy")?,
            version: row.try_get("version")?,
        })
    }
}

impl PolicyRow {
    fn into_model(self) -> StoreResult<CiliumNetworkPolicy> {
        Ok(CiliumNetworkPolicy {
            id: parse_id("cilium_network_policies", &self.id)?,
            workspace_id: self.workspace_id,
            region: self.region,
            k8s_namespace: self.k8s_namespace,
            k8s_name: self.k8s_name,
            policy: self.policy,
            version: Version::from_db(self.version),
        })
    }
}
