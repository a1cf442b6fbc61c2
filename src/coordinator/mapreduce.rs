//! Per-block mean/variance aggregation
//!
//! The coordinator dispatches one map subtask per block to a server holding
//! a replica, falling over to the next holder on failure, and reduces the
//! partial results once every block has an outcome. A block whose replicas
//! all fail is tallied as failed rather than hanging the barrier, so the
//! reduce step always runs and knows exactly which blocks are missing.

use crate::common::{Error, Result};
use crate::coordinator::cluster::ClusterState;
use crate::coordinator::namespace::Namespace;
use crate::rpc::dial_data_server;
use std::time::Duration;
use tokio::task::JoinSet;

/// Partial result of one map subtask.
#[derive(Debug, Clone, Copy)]
struct Partial {
    count: i64,
    mean: f64,
    mean_sq: f64,
}

async fn map_one_block(
    block_id: String,
    replicas: Vec<String>,
    dial_timeout: Duration,
) -> (String, Option<Partial>) {
    for addr in replicas.iter().filter(|a| !a.is_empty()) {
        let mut client = match dial_data_server(addr, dial_timeout).await {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("dialing {} for {} failed: {}", addr, block_id, e);
                continue;
            }
        };
        let request = crate::proto::MeanVarMapRequest {
            block_id: block_id.clone(),
        };
        match client.cal_mean_var_map(request).await {
            Ok(response) => {
                let r = response.into_inner();
                tracing::debug!(
                    "map result for {} from {}: count={} mean={} mean_sq={}",
                    block_id,
                    addr,
                    r.count,
                    r.mean,
                    r.mean_sq
                );
                return (
                    block_id,
                    Some(Partial {
                        count: r.count,
                        mean: r.mean,
                        mean_sq: r.mean_sq,
                    }),
                );
            }
            Err(status) => {
                tracing::warn!("map subtask for {} on {} failed: {}", block_id, addr, status);
            }
        }
    }
    (block_id, None)
}

/// Compute mean and variance of an integer-per-line file.
///
/// Combines per-block (count, mean, mean-of-squares) partials into
/// `mean = Σmᵢcᵢ / Σcᵢ` and `variance = Σsqᵢcᵢ / Σcᵢ − mean²`.
pub async fn cal_mean_var(
    namespace: &Namespace,
    cluster: &ClusterState,
    dpath: &str,
    dial_timeout: Duration,
) -> Result<String> {
    let blocks = namespace.read_block_list(dpath)?;
    if blocks.is_empty() {
        return Err(Error::EmptyBlock(dpath.to_string()));
    }

    let mut tasks = JoinSet::new();
    for block_id in &blocks {
        let replicas = cluster.replica_addrs(block_id);
        tasks.spawn(map_one_block(block_id.clone(), replicas, dial_timeout));
    }

    let total_blocks = blocks.len();
    let mut finished = 0usize;
    let mut failed = Vec::new();
    let mut total_count = 0i64;
    let mut weighted_mean = 0f64;
    let mut weighted_sq = 0f64;

    while let Some(joined) = tasks.join_next().await {
        let (block_id, partial) = joined.map_err(|e| Error::Other(e.to_string()))?;
        finished += 1;
        match partial {
            Some(p) => {
                total_count += p.count;
                weighted_mean += p.mean * p.count as f64;
                weighted_sq += p.mean_sq * p.count as f64;
            }
            None => failed.push(block_id),
        }
        tracing::debug!("map subtasks finished: {}/{}", finished, total_blocks);
    }

    if !failed.is_empty() {
        failed.sort();
        return Err(Error::Rpc(format!(
            "map subtasks failed for {} of {} blocks: {}",
            failed.len(),
            total_blocks,
            failed.join(", ")
        )));
    }
    if total_count == 0 {
        return Err(Error::EmptyBlock(dpath.to_string()));
    }

    let mean = weighted_mean / total_count as f64;
    let variance = weighted_sq / total_count as f64 - mean * mean;
    Ok(format!("mean: {}, variance: {}", mean, variance))
}
