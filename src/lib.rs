//! # minidfs
//!
//! A small distributed file system in the HDFS mold, with a minimal
//! map/reduce operator on top:
//! - files are split into fixed-size blocks, each replicated to several
//!   data servers
//! - a single coordinator owns the namespace tree and the volatile
//!   block-placement index
//! - a stateless client library splits and reassembles files, speaking to
//!   both sides
//! - per-block mean/variance map subtasks run on the servers holding the
//!   replicas
//!
//! ## Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!                  │         Coordinator          │
//!                  │  namespace tree + epoch on   │
//!                  │  disk, block index volatile  │
//!                  └──────┬───────────────┬───────┘
//!        plan / resolve   │               │ handshake, register,
//!                         │               │ heartbeat, block report
//!                  ┌──────▼──────┐   ┌────▼─────────────────────┐
//!                  │   Client    │   │ Data servers (many)      │
//!                  │  split +    ├──▶│  id2meta/ + actdata/     │
//!                  │  reassemble │   │  block RPC + map subtask │
//!                  └─────────────┘   └──────────────────────────┘
//! ```
//!
//! The coordinator never learns placement during a write: the client fans
//! blocks out to the planned replicas, and the index converges from the
//! next block reports.
//!
//! ## Usage
//!
//! ```bash
//! # Start the coordinator
//! minidfs-coord --bind 0.0.0.0:21170 --meta-root ./meta
//!
//! # Start a data server
//! minidfs-data --data-root ./data --coordinator http://coord:21170
//!
//! # Use the CLI
//! minidfs mkdir -p /datasets
//! minidfs copy-from-local numbers.txt /datasets
//! minidfs cal-mean-var /datasets/numbers.txt
//! ```

pub mod client;
pub mod common;
pub mod coordinator;
pub mod dataserver;
pub mod rpc;

pub use client::DfsClient;
pub use common::{ClientConfig, CoordinatorConfig, DataServerConfig, Error, Result};
pub use coordinator::Coordinator;
pub use dataserver::DataServer;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("minidfs");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
