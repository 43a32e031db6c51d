//! Desired-state and observed-state records.
//!
//! Desired-state rows (deployments, topology, sentinels, network policies and
//! the change log) are written by the workflow engine and only read here.
//! Instances and the observed sentinel fields are written by the status
//! reporter.
//!
//! Stored enums are kept as text columns. Unrecognised values are logged and
//! resolved toward removal so that a corrupt row can never keep a workload
//! running.

use chrono::{DateTime, Utc};
use fleet_id::{CiliumNetworkPolicyId, DeploymentId, InstanceId, SentinelId, Version};

/// Closed set of resource kinds carried by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Deployment,
    Sentinel,
    CiliumNetworkPolicy,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Sentinel => "sentinel",
            Self::CiliumNetworkPolicy => "cilium_network_policy",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Resource referenced by a change-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Deployment(DeploymentId),
    Sentinel(SentinelId),
}

impl ResourceRef {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Sentinel(_) => ResourceKind::Sentinel,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Self::Deployment(id) => id.to_string(),
            Self::Sentinel(id) => id.to_string(),
        }
    }
}

/// One entry of the per-region change log.
///
/// `sequence` comes from the same generator as row versions. The k8s identity is
/// captured when the change is recorded so a delete converts without the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub region: String,
    pub sequence: Version,
    pub resource: ResourceRef,
    pub op: ChangeOp,
    pub k8s_namespace: String,
    pub k8s_name: String,
}

/// Deployment-level desired state, independent of region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentDesiredState {
    Running,
    Standby,
    Archived,
}

impl DeploymentDesiredState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Standby => "standby",
            Self::Archived => "archived",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "standby" => Self::Standby,
            "archived" => Self::Archived,
            other => {
                tracing::error!(value = %other, "Unhandled deployment desired_state, treating as archived");
                Self::Archived
            }
        }
    }
}

/// Per-region desired status of a deployment's topology row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl TopologyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "starting" => Self::Starting,
            "started" => Self::Started,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            other => {
                tracing::error!(value = %other, "Unhandled topology desired_status, treating as stopped");
                Self::Stopped
            }
        }
    }

    /// Whether the topology asks for the workload to be running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Started)
    }
}

/// Region-independent identity and workload settings of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub workspace_id: String,
    pub project_id: String,
    pub environment_id: String,
    pub k8s_namespace: String,
    pub k8s_name: String,
    pub image: String,
    pub cpu_millicores: i64,
    pub memory_mib: i64,
    pub encrypted_environment_variables: Vec<u8>,
    pub build_id: Option<String>,
    pub desired_state: DeploymentDesiredState,
}

/// One row per (deployment, region).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTopology {
    pub deployment_id: DeploymentId,
    pub region: String,
    pub desired_replicas: i32,
    pub desired_status: TopologyStatus,
    pub version: Version,
}

/// A deployment joined with its topology row for one region, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredDeployment {
    pub deployment: Deployment,
    pub topology: Option<DeploymentTopology>,
}

impl DesiredDeployment {
    /// Version of the topology row, or zero when the region has none.
    pub fn version(&self) -> Version {
        self.topology
            .as_ref()
            .map(|t| t.version)
            .unwrap_or(Version::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelDesiredState {
    Running,
    Standby,
    Archived,
}

impl SentinelDesiredState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Standby => "standby",
            Self::Archived => "archived",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "standby" => Self::Standby,
            "archived" => Self::Archived,
            other => {
                tracing::error!(value = %other, "Unhandled sentinel desired_state, treating as archived");
                Self::Archived
            }
        }
    }
}

/// Health last reported by the agent running the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelHealth {
    Unknown,
    Healthy,
    Unhealthy,
    Paused,
}

impl SentinelHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Paused => "paused",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            "paused" => Self::Paused,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentinel {
    pub id: SentinelId,
    pub workspace_id: String,
    pub environment_id: String,
    pub k8s_namespace: String,
    pub k8s_name: String,
    /// Home region. The sentinel only runs there.
    pub region: String,
    pub image: String,
    pub desired_state: SentinelDesiredState,
    pub desired_replicas: i32,
    pub available_replicas: i32,
    pub health: SentinelHealth,
    pub cpu_millicores: i64,
    pub memory_mib: i64,
    pub version: Version,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CiliumNetworkPolicy {
    pub id: CiliumNetworkPolicyId,
    pub workspace_id: String,
    pub region: String,
    pub k8s_namespace: String,
    pub k8s_name: String,
    pub policy: serde_json::Value,
    pub version: Version,
}

/// Stored status of an observed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Inactive,
    Pending,
    Running,
    Failed,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "failed" => Self::Failed,
            _ => Self::Inactive,
        }
    }
}

/// Observed instance row, owned by the latest report for its scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub deployment_id: DeploymentId,
    pub region: String,
    pub cluster_id: Option<String>,
    pub k8s_name: String,
    pub address: String,
    pub cpu_millicores: i64,
    pub memory_mib: i64,
    pub status: InstanceStatus,
    pub updated_at: DateTime<Utc>,
}

/// Instance as reported by an agent, before it has an ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedInstance {
    pub k8s_name: String,
    pub address: String,
    pub cpu_millicores: i64,
    pub memory_mib: i64,
    pub status: InstanceStatus,
}

/// Full set of instances an agent observes for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReport {
    pub region: String,
    pub cluster_id: Option<String>,
    /// Cluster-local name of the deployment.
    pub k8s_name: String,
    pub instances: Vec<ObservedInstance>,
}

impl DeploymentReport {
    /// Builds a report, collapsing duplicate instance names. The last entry wins.
    pub fn new(
        region: impl Into<String>,
        cluster_id: Option<String>,
        k8s_name: impl Into<String>,
        instances: Vec<ObservedInstance>,
    ) -> Self {
        let mut unique: Vec<ObservedInstance> = Vec::with_capacity(instances.len());
        for instance in instances {
            match unique.iter_mut().find(|i| i.k8s_name == instance.k8s_name) {
                Some(existing) => *existing = instance,
                None => unique.push(instance),
            }
        }
        Self {
            region: region.into(),
            cluster_id,
            k8s_name: k8s_name.into(),
            instances: unique,
        }
    }
}

/// Removal of every instance of a deployment in a region (optionally one cluster).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRemoval {
    pub region: String,
    pub cluster_id: Option<String>,
    pub k8s_name: String,
}

/// Observed sentinel fields reported by an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelReport {
    pub region: String,
    pub k8s_name: String,
    pub available_replicas: i32,
    pub health: SentinelHealth,
}

/// Result of reconciling one report into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    pub upserted: usize,
    pub deleted: usize,
}
