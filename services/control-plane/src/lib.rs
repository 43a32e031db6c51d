//! Fleet control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose the
//! store, sync core and gRPC service to enable integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod grpc;
pub mod model;
pub mod state;
pub mod store;
pub mod sync;
