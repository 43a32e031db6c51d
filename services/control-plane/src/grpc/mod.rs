//! gRPC surface for regional agents.

pub mod auth;
mod cluster;
pub mod request;

use fleet_proto::cluster::v1::ClusterServiceServer;
use tonic::service::interceptor::InterceptedService;

pub use auth::Authenticator;
pub use cluster::ClusterSyncService;

use crate::state::AppState;

/// Builds the cluster service with authentication in front of every call.
pub fn cluster_service(
    state: AppState,
    authenticator: Authenticator,
) -> InterceptedService<ClusterServiceServer<ClusterSyncService>, Authenticator> {
    ClusterServiceServer::with_interceptor(ClusterSyncService::new(state), authenticator)
}
