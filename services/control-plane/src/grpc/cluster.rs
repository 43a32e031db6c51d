//! `fleet.cluster.v1.ClusterService` handlers.
//!
//! Streaming calls hand tonic a `ReceiverStream` and run the work in a spawned
//! task that owns the sending half. Errors raised after the stream opened are
//! delivered as the final item.

use fleet_id::{CiliumNetworkPolicyId, DeploymentId, SentinelId, Version};
use fleet_proto::cluster::v1::{
    ClusterService, CiliumNetworkPolicyState, DeploymentState,
    GetDesiredCiliumNetworkPolicyStateRequest, GetDesiredDeploymentStateRequest,
    GetDesiredSentinelStateRequest, ReportDeploymentStatusRequest,
    ReportDeploymentStatusResponse, ReportSentinelStatusRequest, ReportSentinelStatusResponse,
    SentinelState, State, SyncRequest, WatchCiliumNetworkPoliciesRequest,
    WatchDeploymentsRequest, WatchRequest, WatchSentinelsRequest,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

use super::request;
use crate::model::SentinelReport;
use crate::state::AppState;
use crate::sync::relay::join_live;
use crate::sync::watch::{run_watch, Deployments, Policies, Sentinels, WatchKind};
use crate::sync::{
    bootstrap, catchup, query, shutdown_signalled, status, Outbound, SyncError,
};

const STREAM_BUFFER: usize = 128;

type StateStream<T> = ReceiverStream<Result<T, Status>>;

pub struct ClusterSyncService {
    state: AppState,
}

impl ClusterSyncService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    fn spawn_watch<K: WatchKind>(
        &self,
        kind: K,
        region: String,
        from: Version,
    ) -> StateStream<K::Message> {
        let (out, rx) = Outbound::channel(STREAM_BUFFER);
        let store = self.state.store();
        let settings = self.state.settings();
        let shutdown = self.state.shutdown();

        tokio::spawn(async move {
            let result = run_watch(kind, store, region, from, settings, out.clone(), shutdown).await;
            finish_stream(&out, result).await;
        });

        ReceiverStream::new(rx)
    }

    async fn report_deployment(
        &self,
        request: Request<ReportDeploymentStatusRequest>,
    ) -> Result<Response<ReportDeploymentStatusResponse>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let cluster_id = request::cluster_id(request.metadata(), &request.get_ref().cluster_id);
        let change = request
            .into_inner()
            .change
            .ok_or_else(|| Status::invalid_argument("change is required"))?;

        let outcome =
            status::report_deployment_status(self.state.store().as_ref(), &region, cluster_id, change)
                .await?;

        Ok(Response::new(ReportDeploymentStatusResponse {
            instances_upserted: u32::try_from(outcome.upserted).unwrap_or(u32::MAX),
            instances_deleted: u32::try_from(outcome.deleted).unwrap_or(u32::MAX),
        }))
    }

    async fn report_sentinel(
        &self,
        request: Request<ReportSentinelStatusRequest>,
    ) -> Result<Response<ReportSentinelStatusResponse>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let req = request.into_inner();
        if req.available_replicas < 0 {
            return Err(Status::invalid_argument(
                "available_replicas cannot be negative",
            ));
        }

        let report = SentinelReport {
            region,
            k8s_name: req.k8s_name,
            available_replicas: req.available_replicas,
            health: status::sentinel_health_from_wire(req.health),
        };
        status::report_sentinel_status(self.state.store().as_ref(), report).await?;

        Ok(Response::new(ReportSentinelStatusResponse {}))
    }
}

/// Reports how a stream task ended. A departed client needs no reply.
async fn finish_stream<T>(out: &Outbound<T>, result: Result<(), SyncError>) {
    match result {
        Ok(()) => {}
        Err(SyncError::ClientGone) => debug!("Stream client disconnected"),
        Err(e) => out.fail(e.into()).await,
    }
}

#[tonic::async_trait]
impl ClusterService for ClusterSyncService {
    type SyncStream = StateStream<State>;

    async fn sync(
        &self,
        request: Request<SyncRequest>,
    ) -> Result<Response<Self::SyncStream>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let from = Version::new(request.get_ref().version_last_seen);
        info!(region = %region, version_last_seen = %from, "Sync requested");

        let (out, rx) = Outbound::channel(STREAM_BUFFER);
        let store = self.state.store();
        let settings = self.state.settings();

        tokio::spawn(async move {
            let result = if from.is_zero() {
                bootstrap::stream_bootstrap(store.as_ref(), &region, settings.page_size, &out).await
            } else {
                catchup::stream_changes(store.as_ref(), &region, from, settings.batch_size, &out)
                    .await
            };
            finish_stream(&out, result.map(|_| ())).await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type WatchStream = StateStream<State>;

    async fn watch(
        &self,
        request: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let cluster_id = request::cluster_id(request.metadata(), &request.get_ref().cluster_id);
        let WatchRequest {
            synthetic, live, ..
        } = request.into_inner();

        if !synthetic && !live {
            return Err(Status::invalid_argument(
                "at least one of synthetic or live must be set",
            ));
        }
        let cluster_id = match (live, cluster_id) {
            (true, None) => {
                return Err(Status::invalid_argument(
                    "cluster_id is required for a live watch",
                ))
            }
            (_, cluster_id) => cluster_id,
        };
        info!(region = %region, synthetic, live, "Watch opened");

        let (out, rx) = Outbound::channel(STREAM_BUFFER);
        let store = self.state.store();
        let registry = self.state.registry().clone();
        let settings = self.state.settings();
        let mut shutdown = self.state.shutdown();

        tokio::spawn(async move {
            let mut boundary = None;
            if synthetic {
                let result =
                    bootstrap::stream_bootstrap(store.as_ref(), &region, settings.page_size, &out)
                        .await;
                match result {
                    Ok(version) => boundary = Some(version),
                    Err(e) => {
                        finish_stream(&out, Err(e)).await;
                        return;
                    }
                }
            }

            if let (true, Some(cluster_id)) = (live, cluster_id) {
                let joined = join_live(
                    store.as_ref(),
                    &registry,
                    &cluster_id,
                    &region,
                    boundary,
                    settings.batch_size,
                    &out,
                )
                .await;
                let registration = match joined {
                    Ok(registration) => registration,
                    Err(e) => {
                        finish_stream(&out, Err(e)).await;
                        return;
                    }
                };
                tokio::select! {
                    _ = out.closed() => debug!("Live watch client disconnected"),
                    _ = shutdown_signalled(&mut shutdown) => debug!("Live watch closed by shutdown"),
                }
                drop(registration);
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type WatchDeploymentsStream = StateStream<DeploymentState>;

    async fn watch_deployments(
        &self,
        request: Request<WatchDeploymentsRequest>,
    ) -> Result<Response<Self::WatchDeploymentsStream>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let from = Version::new(request.get_ref().version_last_seen);
        Ok(Response::new(self.spawn_watch(Deployments, region, from)))
    }

    type WatchSentinelsStream = StateStream<SentinelState>;

    async fn watch_sentinels(
        &self,
        request: Request<WatchSentinelsRequest>,
    ) -> Result<Response<Self::WatchSentinelsStream>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let from = Version::new(request.get_ref().version_last_seen);
        Ok(Response::new(self.spawn_watch(Sentinels, region, from)))
    }

    type WatchCiliumNetworkPoliciesStream = StateStream<CiliumNetworkPolicyState>;

    async fn watch_cilium_network_policies(
        &self,
        request: Request<WatchCiliumNetworkPoliciesRequest>,
    ) -> Result<Response<Self::WatchCiliumNetworkPoliciesStream>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let from = Version::new(request.get_ref().version_last_seen);
        Ok(Response::new(self.spawn_watch(Policies, region, from)))
    }

    async fn get_desired_deployment_state(
        &self,
        request: Request<GetDesiredDeploymentStateRequest>,
    ) -> Result<Response<DeploymentState>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let id: DeploymentId =
            request::parse_id("deployment_id", &request.get_ref().deployment_id)?;

        let state = query::desired_deployment(self.state.store().as_ref(), &id, &region).await?;
        Ok(Response::new(state))
    }

    async fn get_desired_sentinel_state(
        &self,
        request: Request<GetDesiredSentinelStateRequest>,
    ) -> Result<Response<SentinelState>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let id: SentinelId = request::parse_id("sentinel_id", &request.get_ref().sentinel_id)?;

        let state = query::desired_sentinel(self.state.store().as_ref(), &id, &region).await?;
        Ok(Response::new(state))
    }

    async fn get_desired_cilium_network_policy_state(
        &self,
        request: Request<GetDesiredCiliumNetworkPolicyStateRequest>,
    ) -> Result<Response<CiliumNetworkPolicyState>, Status> {
        let region = request::region(request.metadata(), &request.get_ref().region)?;
        let id: CiliumNetworkPolicyId = request::parse_id(
            "cilium_network_policy_id",
            &request.get_ref().cilium_network_policy_id,
        )?;

        let state = query::desired_policy(self.state.store().as_ref(), &id, &region).await?;
        Ok(Response::new(state))
    }

    async fn report_deployment_status(
        &self,
        request: Request<ReportDeploymentStatusRequest>,
    ) -> Result<Response<ReportDeploymentStatusResponse>, Status> {
        self.report_deployment(request).await
    }

    async fn report_sentinel_status(
        &self,
        request: Request<ReportSentinelStatusRequest>,
    ) -> Result<Response<ReportSentinelStatusResponse>, Status> {
        self.report_sentinel(request).await
    }

    async fn update_deployment_state(
        &self,
        request: Request<ReportDeploymentStatusRequest>,
    ) -> Result<Response<ReportDeploymentStatusResponse>, Status> {
        self.report_deployment(request).await
    }

    async fn update_sentinel_state(
        &self,
        request: Request<ReportSentinelStatusRequest>,
    ) -> Result<Response<ReportSentinelStatusResponse>, Status> {
        self.report_sentinel(request).await
    }
}
