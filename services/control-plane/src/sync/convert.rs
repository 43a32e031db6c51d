//! Desired-state rows to wire instructions.
//!
//! Every function here is pure. Anything that cannot be shown to be wanted in
//! the requesting region converts to `Delete`: a missing row, a stopped
//! topology, an archived resource, a foreign home region.

use fleet_id::Version;
use fleet_proto::cluster::v1::{
    cilium_network_policy_state, deployment_state, sentinel_state, state, ApplyCiliumNetworkPolicy,
    ApplyDeployment, ApplySentinel, Bookmark, CiliumNetworkPolicyState, DeleteDeployment,
    DeleteSentinel, DeploymentState, SentinelState, State,
};

use crate::model::{
    ChangeOp, CiliumNetworkPolicy, DeploymentDesiredState, DesiredDeployment, ResourceRef,
    Sentinel, SentinelDesiredState, StateChange,
};

/// Returns true if the deployment must not run in the topology's region.
pub fn deployment_should_be_removed(desired: &DesiredDeployment) -> bool {
    let Some(topology) = &desired.topology else {
        return true;
    };
    !topology.desired_status.is_active()
        || desired.deployment.desired_state != DeploymentDesiredState::Running
}

pub fn deployment_state(desired: &DesiredDeployment, version: Version) -> DeploymentState {
    let deployment = &desired.deployment;
    let state = match &desired.topology {
        Some(topology) if !deployment_should_be_removed(desired) => {
            deployment_state::State::Apply(ApplyDeployment {
                k8s_namespace: deployment.k8s_namespace.clone(),
                k8s_name: deployment.k8s_name.clone(),
                workspace_id: deployment.workspace_id.clone(),
                project_id: deployment.project_id.clone(),
                environment_id: deployment.environment_id.clone(),
                deployment_id: deployment.id.to_string(),
                image: deployment.image.clone(),
                replicas: topology.desired_replicas,
                cpu_millicores: deployment.cpu_millicores,
                memory_mib: deployment.memory_mib,
                encrypted_environment_variables: deployment.encrypted_environment_variables.clone(),
                build_id: deployment.build_id.clone(),
            })
        }
        _ => deployment_state::State::Delete(DeleteDeployment {
            k8s_namespace: deployment.k8s_namespace.clone(),
            k8s_name: deployment.k8s_name.clone(),
        }),
    };

    DeploymentState {
        version: version.value(),
        state: Some(state),
    }
}

pub fn deployment_delete(k8s_namespace: &str, k8s_name: &str, version: Version) -> DeploymentState {
    DeploymentState {
        version: version.value(),
        state: Some(deployment_state::State::Delete(DeleteDeployment {
            k8s_namespace: k8s_namespace.to_string(),
            k8s_name: k8s_name.to_string(),
        })),
    }
}

/// Returns true if the sentinel must not run in `region`.
pub fn sentinel_should_be_removed(sentinel: &Sentinel, region: &str) -> bool {
    sentinel.desired_replicas == 0
        || sentinel.desired_state != SentinelDesiredState::Running
        || sentinel.region != region
}

pub fn sentinel_state(sentinel: &Sentinel, region: &str, version: Version) -> SentinelState {
    if sentinel_should_be_removed(sentinel, region) {
        return sentinel_delete(&sentinel.k8s_namespace, &sentinel.k8s_name, version);
    }

    SentinelState {
        version: version.value(),
        state: Some(sentinel_state::State::Apply(ApplySentinel {
            k8s_namespace: sentinel.k8s_namespace.clone(),
            k8s_name: sentinel.k8s_name.clone(),
            workspace_id: sentinel.workspace_id.clone(),
            environment_id: sentinel.environment_id.clone(),
            sentinel_id: sentinel.id.to_string(),
            image: sentinel.image.clone(),
            replicas: sentinel.desired_replicas,
            cpu_millicores: sentinel.cpu_millicores,
            memory_mib: sentinel.memory_mib,
        })),
    }
}

pub fn sentinel_delete(k8s_namespace: &str, k8s_name: &str, version: Version) -> SentinelState {
    SentinelState {
        version: version.value(),
        state: Some(sentinel_state::State::Delete(DeleteSentinel {
            k8s_namespace: k8s_namespace.to_string(),
            k8s_name: k8s_name.to_string(),
        })),
    }
}

/// Policies are apply-only.
pub fn policy_state(policy: &CiliumNetworkPolicy) -> CiliumNetworkPolicyState {
    CiliumNetworkPolicyState {
        version: policy.version.value(),
        state: Some(cilium_network_policy_state::State::Apply(
            ApplyCiliumNetworkPolicy {
                k8s_namespace: policy.k8s_namespace.clone(),
                k8s_name: policy.k8s_name.clone(),
                workspace_id: policy.workspace_id.clone(),
                cilium_network_policy_id: policy.id.to_string(),
                policy: policy.policy.to_string().into_bytes(),
            },
        )),
    }
}

/// Converts a delete entry of the change log from its recorded identity.
///
/// Returns `None` for entries that are not deletes.
pub fn change_delete(change: &StateChange) -> Option<state::Kind> {
    (change.op == ChangeOp::Delete).then(|| recorded_delete(change, change.sequence))
}

/// Delete for the resource of `change`, stamped with `version`. Uses the k8s
/// identity captured in the log, whatever the entry's op.
pub fn recorded_delete(change: &StateChange, version: Version) -> state::Kind {
    match change.resource {
        ResourceRef::Deployment(_) => state::Kind::Deployment(deployment_delete(
            &change.k8s_namespace,
            &change.k8s_name,
            version,
        )),
        ResourceRef::Sentinel(_) => state::Kind::Sentinel(sentinel_delete(
            &change.k8s_namespace,
            &change.k8s_name,
            version,
        )),
    }
}

pub fn envelope(version: Version, kind: state::Kind) -> State {
    State {
        version: version.value(),
        kind: Some(kind),
    }
}

pub fn bookmark(version: Version) -> State {
    envelope(
        version,
        state::Kind::Bookmark(Bookmark {
            version: version.value(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeploymentTopology, TopologyStatus};
    use crate::store::memory::fixtures;
    use fleet_id::SentinelId;
    use rstest::rstest;

    fn desired(
        status: Option<TopologyStatus>,
        desired_state: DeploymentDesiredState,
    ) -> DesiredDeployment {
        let mut deployment = fixtures::deployment("api");
        deployment.desired_state = desired_state;
        let topology = status.map(|desired_status| DeploymentTopology {
            deployment_id: deployment.id,
            region: "us-east".to_string(),
            desired_replicas: 3,
            desired_status,
            version: Version::new(5),
        });
        DesiredDeployment {
            deployment,
            topology,
        }
    }

    fn is_apply(state: &DeploymentState) -> bool {
        matches!(state.state, Some(deployment_state::State::Apply(_)))
    }

    #[rstest]
    #[case::starting(Some(TopologyStatus::Starting), DeploymentDesiredState::Running, true)]
    #[case::started(Some(TopologyStatus::Started), DeploymentDesiredState::Running, true)]
    #[case::stopping(Some(TopologyStatus::Stopping), DeploymentDesiredState::Running, false)]
    #[case::stopped(Some(TopologyStatus::Stopped), DeploymentDesiredState::Running, false)]
    #[case::no_topology(None, DeploymentDesiredState::Running, false)]
    #[case::archived(Some(TopologyStatus::Started), DeploymentDesiredState::Archived, false)]
    #[case::standby(Some(TopologyStatus::Started), DeploymentDesiredState::Standby, false)]
    fn test_deployment_conversion(
        #[case] status: Option<TopologyStatus>,
        #[case] desired_state: DeploymentDesiredState,
        #[case] apply: bool,
    ) {
        let row = desired(status, desired_state);
        let state = deployment_state(&row, row.version());
        assert_eq!(is_apply(&state), apply);
    }

    #[test]
    fn test_deployment_apply_carries_fields() {
        let row = desired(Some(TopologyStatus::Started), DeploymentDesiredState::Running);
        let state = deployment_state(&row, Version::new(5));
        assert_eq!(state.version, 5);
        let Some(deployment_state::State::Apply(apply)) = state.state else {
            panic!("expected apply");
        };
        assert_eq!(apply.replicas, 3);
        assert_eq!(apply.image, "registry.local/api:1");
        assert_eq!(apply.build_id.as_deref(), Some("build_1"));
        assert_eq!(apply.encrypted_environment_variables, b"sealed".to_vec());
        assert_eq!(apply.deployment_id, row.deployment.id.to_string());
    }

    #[test]
    fn test_delete_uses_k8s_identity() {
        let row = desired(None, DeploymentDesiredState::Running);
        let state = deployment_state(&row, Version::new(9));
        let Some(deployment_state::State::Delete(delete)) = state.state else {
            panic!("expected delete");
        };
        assert_eq!(delete.k8s_namespace, "acme");
        assert_eq!(delete.k8s_name, "api");
    }

    #[rstest]
    #[case::running(2, SentinelDesiredState::Running, "us-east", true)]
    #[case::zero_replicas(0, SentinelDesiredState::Running, "us-east", false)]
    #[case::standby(2, SentinelDesiredState::Standby, "us-east", false)]
    #[case::archived(2, SentinelDesiredState::Archived, "us-east", false)]
    #[case::foreign_region(2, SentinelDesiredState::Running, "eu-west", false)]
    fn test_sentinel_conversion(
        #[case] replicas: i32,
        #[case] desired_state: SentinelDesiredState,
        #[case] requesting_region: &str,
        #[case] apply: bool,
    ) {
        let mut sentinel = fixtures::sentinel("edge", "us-east", replicas);
        sentinel.desired_state = desired_state;
        let state = sentinel_state(&sentinel, requesting_region, Version::new(3));
        assert_eq!(
            matches!(state.state, Some(sentinel_state::State::Apply(_))),
            apply
        );
    }

    #[test]
    fn test_policy_always_applies() {
        let mut policy = fixtures::policy("allow-dns", "us-east");
        policy.version = Version::new(11);
        let state = policy_state(&policy);
        assert_eq!(state.version, 11);
        let Some(cilium_network_policy_state::State::Apply(apply)) = state.state else {
            panic!("expected apply");
        };
        let decoded: serde_json::Value = serde_json::from_slice(&apply.policy).unwrap();
        assert_eq!(decoded, policy.policy);
    }

    #[test]
    fn test_change_delete_only_for_delete_entries() {
        let mut change = StateChange {
            region: "us-east".to_string(),
            sequence: Version::new(8),
            resource: ResourceRef::Sentinel(SentinelId::new()),
            op: ChangeOp::Update,
            k8s_namespace: "acme".to_string(),
            k8s_name: "edge".to_string(),
        };
        assert!(change_delete(&change).is_none());

        change.op = ChangeOp::Delete;
        let Some(state::Kind::Sentinel(sentinel)) = change_delete(&change) else {
            panic!("expected sentinel delete");
        };
        assert_eq!(sentinel.version, 8);
        assert!(matches!(
            sentinel.state,
            Some(sentinel_state::State::Delete(_))
        ));
    }

    #[test]
    fn test_bookmark_version() {
        let state = bookmark(Version::new(42));
        assert_eq!(state.version, 42);
        assert!(matches!(
            state.kind,
            Some(state::Kind::Bookmark(Bookmark { version: 42 }))
        ));
    }
}
