//! The data server: block storage, block transfer, map subtasks

pub mod grpc;
pub mod meanvar;
pub mod server;
pub mod store;

pub use server::{DataServer, DataServerHandle};
pub use store::{BlockMeta, BlockStore};
