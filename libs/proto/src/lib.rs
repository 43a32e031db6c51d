//! Generated protobuf and gRPC types for the cluster synchronization protocol.

pub mod cluster {
    pub mod v1 {
        tonic::include_proto!("fleet.cluster.v1");

        pub use cluster_service_client::ClusterServiceClient;
        pub use cluster_service_server::{ClusterService, ClusterServiceServer};
    }
}
