//! Resource store.
//!
//! The sync core reads desired state and writes observed state through the
//! [`ResourceStore`] trait. Two backends exist: Postgres for production and an
//! in-memory store for tests and local runs.

use async_trait::async_trait;
use fleet_id::{CiliumNetworkPolicyId, DeploymentId, SentinelId, Version};
use thiserror::Error;

use crate::model::{
    CiliumNetworkPolicy, DeploymentRemoval, DeploymentReport, DesiredDeployment, ReportOutcome,
    ResourceKind, ResourceRef, Sentinel, SentinelReport, StateChange,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{operation} failed: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("corrupt row in {table}: {message}")]
    Corrupt {
        table: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn database(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Database { operation, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Highest change-log sequence recorded for the region, zero when empty.
    async fn max_sequence(&self, region: &str) -> StoreResult<Version>;

    /// Change-log entries with `sequence > after`, ascending, at most `limit`.
    async fn list_changes(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<StateChange>>;

    /// Delete entries of one kind with `sequence > after`, ascending.
    async fn list_deletions(
        &self,
        region: &str,
        kind: ResourceKind,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<StateChange>>;

    /// First delete entry for `resource` with `sequence > after`, if any.
    ///
    /// Lets replay tell a deleted row apart from one that has not landed yet.
    async fn find_later_delete(
        &self,
        region: &str,
        resource: ResourceRef,
        after: Version,
    ) -> StoreResult<Option<StateChange>>;

    /// Deployments joined with their topology row for `region`. Deployments
    /// that do not exist are omitted.
    async fn find_deployments(
        &self,
        region: &str,
        ids: &[DeploymentId],
    ) -> StoreResult<Vec<DesiredDeployment>>;

    async fn find_sentinels(&self, ids: &[SentinelId]) -> StoreResult<Vec<Sentinel>>;

    /// Deployments that should run in `region`, ordered by ID, after the given ID.
    async fn list_running_deployments(
        &self,
        region: &str,
        after: Option<DeploymentId>,
        limit: usize,
    ) -> StoreResult<Vec<DesiredDeployment>>;

    /// Sentinels homed in `region` that should run, ordered by ID.
    async fn list_running_sentinels(
        &self,
        region: &str,
        after: Option<SentinelId>,
        limit: usize,
    ) -> StoreResult<Vec<Sentinel>>;

    /// Topology rows of `region` with `version > after`, ascending by version.
    async fn deployments_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<DesiredDeployment>>;

    async fn sentinels_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<Sentinel>>;

    async fn policies_after(
        &self,
        region: &str,
        after: Version,
        limit: usize,
    ) -> StoreResult<Vec<CiliumNetworkPolicy>>;

    async fn get_deployment(
        &self,
        id: &DeploymentId,
        region: &str,
    ) -> StoreResult<DesiredDeployment>;

    async fn get_sentinel(&self, id: &SentinelId) -> StoreResult<Sentinel>;

    async fn get_policy(&self, id: &CiliumNetworkPolicyId) -> StoreResult<CiliumNetworkPolicy>;

    /// Makes the stored instances of the report's scope equal to the report.
    ///
    /// Unknown deployment returns `NotFound` without writing anything.
    async fn apply_instance_report(&self, report: &DeploymentReport)
        -> StoreResult<ReportOutcome>;

    /// Removes every instance of the deployment in the scope.
    async fn remove_deployment_instances(
        &self,
        removal: &DeploymentRemoval,
    ) -> StoreResult<ReportOutcome>;

    /// Updates the observed sentinel fields. Never bumps `version`.
    async fn record_sentinel_status(&self, report: &SentinelReport) -> StoreResult<()>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
