//! The coordinator: namespace, placement, membership, map/reduce dispatch

pub mod cluster;
pub mod grpc;
pub mod mapreduce;
pub mod namespace;
pub mod server;

pub use cluster::{ClusterState, ServerState};
pub use namespace::Namespace;
pub use server::{Coordinator, CoordinatorHandle};
