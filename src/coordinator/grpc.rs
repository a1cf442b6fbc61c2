//! Coordinator RPC surface
//!
//! One service answers both sides of the control plane: membership calls
//! from data servers (handshake, register, heartbeat, block report) and
//! namespace/data-path commands from the client library.

use crate::common::{block_count, mint_block_id, CoordinatorConfig, Error, Result};
use crate::coordinator::cluster::ClusterState;
use crate::coordinator::mapreduce;
use crate::coordinator::namespace::Namespace;
use crate::proto::coordinator_server::{Coordinator as CoordinatorRpc, CoordinatorServer};
use crate::proto::*;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct CoordinatorService {
    config: CoordinatorConfig,
    namespace: Arc<Namespace>,
    cluster: Arc<ClusterState>,
}

impl CoordinatorService {
    pub fn new(
        config: CoordinatorConfig,
        namespace: Arc<Namespace>,
        cluster: Arc<ClusterState>,
    ) -> Self {
        Self {
            config,
            namespace,
            cluster,
        }
    }

    pub fn into_server(self) -> CoordinatorServer<Self> {
        CoordinatorServer::new(self)
    }

    /// Build the write plan: mint dense block ids and pick replica targets
    /// for each one. The block index is left untouched; placement is learned
    /// later from block reports.
    fn plan_write(&self, dpath: &str, file_name: &str, file_size: i64) -> Result<CommandResponse> {
        let live = self.cluster.live_addrs();
        if live.is_empty() {
            return Err(Error::Network("no live data servers".into()));
        }
        let replicas = self.config.replication.min(live.len());
        let num_blocks = block_count(file_size.max(0) as u64, self.config.block_size);
        tracing::info!(
            "planning {} blocks for {} ({} bytes), {} replicas across {} live servers",
            num_blocks,
            file_name,
            file_size,
            replicas,
            live.len()
        );

        let mut block_list = Vec::with_capacity(num_blocks);
        let mut block_to_addrs = HashMap::new();
        for index in 0..num_blocks {
            let block_id = mint_block_id(file_name, index);
            let addrs: Vec<String> = (0..replicas)
                .map(|k| live[(index + k) % live.len()].clone())
                .collect();
            block_to_addrs.insert(block_id.clone(), ReplicaSet { addrs });
            block_list.push(block_id);
        }

        self.namespace.create_file(dpath, file_name, &block_list)?;
        Ok(CommandResponse {
            block_list,
            block_to_addrs,
            ..Default::default()
        })
    }

    /// Resolve a file into its block list and the current replica addresses
    /// of every block, for the read path.
    fn resolve_read(&self, dpath: &str) -> Result<CommandResponse> {
        let block_list = self.namespace.read_block_list(dpath)?;
        let block_to_addrs = block_list
            .iter()
            .map(|block_id| {
                (
                    block_id.clone(),
                    ReplicaSet {
                        addrs: self.cluster.replica_addrs(block_id),
                    },
                )
            })
            .collect();
        Ok(CommandResponse {
            block_list,
            block_to_addrs,
            ..Default::default()
        })
    }

    /// Wipe the namespace, clear volatile state, and bump the epoch. Old
    /// data servers notice through heartbeat replies during the reformat
    /// window and get fenced on their next handshake.
    fn format(&self) -> Result<CommandResponse> {
        self.namespace.format()?;
        let epoch = self.cluster.begin_format();
        self.namespace.store_epoch(epoch)?;
        tracing::info!("cluster formatted, namespace epoch is now {}", epoch);
        Ok(CommandResponse {
            result: "formatted".into(),
            ..Default::default()
        })
    }

    async fn dispatch(&self, req: CommandRequest) -> Result<CommandResponse> {
        let kind = CommandKind::try_from(req.kind)
            .map_err(|_| Error::UnsupportedCommand(format!("kind {}", req.kind)))?;
        match kind {
            CommandKind::Ls => Ok(CommandResponse {
                entries: self.namespace.ls(&req.path)?,
                ..Default::default()
            }),
            CommandKind::Mkdir => {
                self.namespace.mkdir(&req.path)?;
                Ok(CommandResponse::default())
            }
            CommandKind::MkdirP => {
                self.namespace.mkdir_p(&req.path)?;
                Ok(CommandResponse::default())
            }
            CommandKind::Rm => {
                self.namespace.rm(&req.paths)?;
                Ok(CommandResponse::default())
            }
            CommandKind::Rmdir => {
                self.namespace.rmdir(&req.paths)?;
                Ok(CommandResponse::default())
            }
            CommandKind::Touch => {
                self.namespace.touch(&req.path)?;
                Ok(CommandResponse::default())
            }
            CommandKind::CopyFromLocal => {
                self.plan_write(&req.path, &req.file_name, req.file_size)
            }
            CommandKind::CopyToLocal | CommandKind::Cat => self.resolve_read(&req.path),
            CommandKind::CalMeanVar => {
                let result = mapreduce::cal_mean_var(
                    &self.namespace,
                    &self.cluster,
                    &req.path,
                    self.config.dial_timeout(),
                )
                .await?;
                Ok(CommandResponse {
                    result,
                    ..Default::default()
                })
            }
            CommandKind::Format => self.format(),
            CommandKind::Unspecified => {
                Err(Error::UnsupportedCommand("unspecified".into()))
            }
        }
    }
}

#[tonic::async_trait]
impl CoordinatorRpc for CoordinatorService {
    async fn handshake(
        &self,
        req: Request<HandshakeRequest>,
    ) -> std::result::Result<Response<HandshakeResponse>, Status> {
        let req = req.into_inner();
        tracing::debug!(
            "handshake from {} ({}) with epoch {}",
            req.addr,
            req.hostname,
            req.namespace_epoch
        );
        let epoch = self
            .cluster
            .handshake(req.namespace_epoch, &req.addr, &req.hostname)
            .map_err(Error::into_status)?;
        Ok(Response::new(HandshakeResponse {
            namespace_epoch: epoch,
        }))
    }

    async fn register(
        &self,
        req: Request<RegisterRequest>,
    ) -> std::result::Result<Response<RegisterResponse>, Status> {
        let req = req.into_inner();
        let storage_id = self
            .cluster
            .register(&req.storage_id, &req.addr, &req.hostname);
        tracing::info!("registered {} at {} as {}", req.hostname, req.addr, storage_id);
        Ok(Response::new(RegisterResponse { storage_id }))
    }

    async fn heartbeat(
        &self,
        req: Request<HeartbeatRequest>,
    ) -> std::result::Result<Response<HeartbeatResponse>, Status> {
        let req = req.into_inner();
        let decision = self.cluster.heartbeat(&req.addr);
        tracing::debug!(
            "heartbeat from {}: capacity={} in_use={:.3} transfers={}",
            req.addr,
            req.total_capacity,
            req.frac_in_use,
            req.transfers_in_flight
        );
        Ok(Response::new(HeartbeatResponse {
            replicate: vec![],
            remove_blocks: vec![],
            re_register: decision.re_register,
            shutdown: false,
            request_block_report: decision.request_block_report,
        }))
    }

    async fn report_blocks(
        &self,
        req: Request<BlockReportRequest>,
    ) -> std::result::Result<Response<BlockReportResponse>, Status> {
        let req = req.into_inner();
        tracing::debug!("block report from {}: {} blocks", req.addr, req.blocks.len());
        self.cluster
            .record_report(&req.addr, req.blocks.keys().map(String::as_str))
            .map_err(Error::into_status)?;
        Ok(Response::new(BlockReportResponse { ok: true }))
    }

    async fn run_command(
        &self,
        req: Request<CommandRequest>,
    ) -> std::result::Result<Response<CommandResponse>, Status> {
        let req = req.into_inner();
        self.dispatch(req)
            .await
            .map(Response::new)
            .map_err(Error::into_status)
    }

    async fn notify(
        &self,
        _req: Request<NotifyRequest>,
    ) -> std::result::Result<Response<NotifyResponse>, Status> {
        self.cluster.note_write_finished();
        Ok(Response::new(NotifyResponse { ok: true }))
    }
}
