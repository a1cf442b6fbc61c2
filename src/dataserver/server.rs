//! Data server lifecycle: startup, join, heartbeat and report loops

use crate::common::{
    retry_with_backoff, DataServerConfig, Error, Result, EPOCH_UNSET,
};
use crate::dataserver::grpc::DataService;
use crate::dataserver::store::BlockStore;
use crate::proto::coordinator_client::CoordinatorClient;
use crate::proto::*;
use crate::rpc::dial_coordinator;
use std::fs::File;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Channel;

pub struct DataServer {
    config: DataServerConfig,
}

enum HandshakeOutcome {
    Joined,
    Fenced,
}

/// Shared node state for the RPC service and the periodic loops.
struct Node {
    config: DataServerConfig,
    addr: String,
    hostname: String,
    store: Arc<Mutex<BlockStore>>,
    epoch: Mutex<i64>,
    storage_id: Mutex<String>,
    transfers_in_flight: Arc<AtomicU32>,
}

fn read_text_file(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn write_text_file(path: &Path, content: &str) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

impl Node {
    async fn dial(&self) -> Result<CoordinatorClient<Channel>> {
        dial_coordinator(&self.config.coordinator, self.config.dial_timeout()).await
    }

    fn persist_epoch(&self, epoch: i64) -> Result<()> {
        write_text_file(&self.config.epoch_path(), &epoch.to_string())
    }

    fn persist_storage_id(&self, sid: &str) -> Result<()> {
        write_text_file(&self.config.storage_id_path(), sid)
    }

    /// Verify our epoch against the coordinator's.
    async fn handshake(&self) -> Result<HandshakeOutcome> {
        let cached = *self.epoch.lock().unwrap();
        let mut client = self.dial().await?;
        let request = HandshakeRequest {
            namespace_epoch: cached,
            addr: self.addr.clone(),
            hostname: self.hostname.clone(),
        };
        match client.handshake(request).await {
            Ok(response) => {
                let epoch = response.into_inner().namespace_epoch;
                if epoch != cached {
                    tracing::info!("adopting namespace epoch {}", epoch);
                    *self.epoch.lock().unwrap() = epoch;
                    self.persist_epoch(epoch)?;
                }
                Ok(HandshakeOutcome::Joined)
            }
            Err(status) if crate::common::is_epoch_mismatch(&status) => {
                Ok(HandshakeOutcome::Fenced)
            }
            Err(status) => Err(status.into()),
        }
    }

    /// Register, persisting a freshly assigned storage id.
    async fn register(&self) -> Result<()> {
        let cached = self.storage_id.lock().unwrap().clone();
        let mut client = self.dial().await?;
        let request = RegisterRequest {
            storage_id: cached.clone(),
            addr: self.addr.clone(),
            hostname: self.hostname.clone(),
        };
        let assigned = client.register(request).await?.into_inner().storage_id;
        if assigned != cached {
            tracing::info!("assigned storage id {}", assigned);
            *self.storage_id.lock().unwrap() = assigned.clone();
            self.persist_storage_id(&assigned)?;
        }
        Ok(())
    }

    /// Send a full block report.
    async fn report(&self) -> Result<()> {
        let blocks: std::collections::HashMap<String, BlockMeta> = self
            .store
            .lock()
            .unwrap()
            .snapshot()
            .into_iter()
            .map(|(id, meta)| {
                (
                    id,
                    BlockMeta {
                        checksum: meta.checksum,
                        timestamp: meta.timestamp,
                        length: meta.length,
                    },
                )
            })
            .collect();
        tracing::debug!("reporting {} blocks", blocks.len());
        let mut client = self.dial().await?;
        client
            .report_blocks(BlockReportRequest {
                addr: self.addr.clone(),
                blocks,
            })
            .await?;
        Ok(())
    }

    /// One heartbeat round trip, carrying capacity figures for the
    /// filesystem holding the data root.
    async fn heartbeat_once(&self) -> Result<HeartbeatResponse> {
        let total_capacity = fs2::total_space(&self.config.data_root).unwrap_or(0);
        let available = fs2::available_space(&self.config.data_root).unwrap_or(0);
        let frac_in_use = if total_capacity > 0 {
            (total_capacity - available) as f64 / total_capacity as f64
        } else {
            0.0
        };
        let mut client = self.dial().await?;
        let response = client
            .heartbeat(HeartbeatRequest {
                addr: self.addr.clone(),
                total_capacity,
                frac_in_use,
                transfers_in_flight: self.transfers_in_flight.load(Ordering::Relaxed),
            })
            .await?;
        Ok(response.into_inner())
    }

    /// Handshake, register, first block report.
    ///
    /// A handshake fenced by an epoch change re-initializes the node:
    /// blocks only survive until the cluster is formatted.
    async fn join(&self) -> Result<()> {
        match self.handshake().await? {
            HandshakeOutcome::Joined => {}
            HandshakeOutcome::Fenced => {
                self.reinitialize()?;
                match self.handshake().await? {
                    HandshakeOutcome::Joined => {}
                    HandshakeOutcome::Fenced => {
                        return Err(Error::Other(
                            "fenced immediately after re-initialization".into(),
                        ))
                    }
                }
            }
        }
        self.register().await?;
        self.report().await?;
        tracing::info!(
            "{} joined the cluster at {} (epoch {})",
            self.hostname,
            self.addr,
            *self.epoch.lock().unwrap()
        );
        Ok(())
    }

    /// Wipe blocks and forget the epoch; the storage id is kept, it
    /// survives restarts and reformats by design of registration.
    fn reinitialize(&self) -> Result<()> {
        tracing::warn!("namespace epoch changed under us, wiping block store");
        self.store.lock().unwrap().wipe()?;
        *self.epoch.lock().unwrap() = EPOCH_UNSET;
        self.persist_epoch(EPOCH_UNSET)?;
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reply = retry_with_backoff(
                || self.heartbeat_once(),
                3,
                Duration::from_secs(1),
            )
            .await;
            match reply {
                Ok(reply) => {
                    if reply.shutdown {
                        tracing::info!("coordinator asked us to shut down");
                        break;
                    }
                    if reply.re_register {
                        tracing::info!("coordinator asked for a re-registration");
                        if let Err(e) = self.join().await {
                            tracing::error!("re-join failed: {}", e);
                        }
                    } else if reply.request_block_report {
                        if let Err(e) = self.report().await {
                            tracing::warn!("immediate block report failed: {}", e);
                        }
                    }
                }
                // Transient after a successful join: keep heartbeating.
                Err(e) => tracing::error!("heartbeat failed after retries: {}", e),
            }
        }
    }

    async fn report_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.block_report_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first report went out during join
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.report().await {
                tracing::warn!("block report failed: {}", e);
            }
        }
    }
}

impl DataServer {
    pub fn new(config: DataServerConfig) -> Self {
        Self { config }
    }

    /// Resolve the address to advertise: a configured bind IP wins,
    /// otherwise the hostname is resolved to its first IP.
    async fn resolve_bind_ip(config: &DataServerConfig, hostname: &str) -> IpAddr {
        if let Some(ip) = config.bind_ip {
            return ip;
        }
        match tokio::net::lookup_host((hostname, config.port)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr.ip(),
                None => IpAddr::V4(Ipv4Addr::LOCALHOST),
            },
            Err(e) => {
                tracing::warn!("resolving {} failed ({}), binding loopback", hostname, e);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }

    /// Full startup sequence: storage, identity, listener, join, loops.
    pub async fn spawn(self) -> Result<DataServerHandle> {
        let config = self.config;
        std::fs::create_dir_all(&config.data_root)?;
        let store = Arc::new(Mutex::new(BlockStore::open(&config)?));

        let epoch = read_text_file(&config.epoch_path())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(EPOCH_UNSET);
        let storage_id = read_text_file(&config.storage_id_path()).unwrap_or_default();

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let ip = Self::resolve_bind_ip(&config, &hostname).await;

        let listener = TcpListener::bind(SocketAddr::new(ip, config.port)).await?;
        let addr = listener.local_addr()?;
        tracing::info!(
            "data server {} listening on {} (epoch {}, sid {:?})",
            hostname,
            addr,
            epoch,
            storage_id
        );

        let transfers_in_flight = Arc::new(AtomicU32::new(0));
        let node = Arc::new(Node {
            config,
            addr: addr.to_string(),
            hostname,
            store: store.clone(),
            epoch: Mutex::new(epoch),
            storage_id: Mutex::new(storage_id),
            transfers_in_flight: transfers_in_flight.clone(),
        });

        let service = DataService::new(store, transfers_in_flight);
        let server_task = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service.into_server())
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .map_err(Error::from)
        });

        // Unreachable coordinator at startup is fatal.
        node.join().await?;

        let heartbeat_task = tokio::spawn(node.clone().heartbeat_loop());
        let report_task = tokio::spawn(node.clone().report_loop());

        Ok(DataServerHandle {
            addr,
            node,
            server_task,
            heartbeat_task,
            report_task,
        })
    }

    /// Run until the RPC server exits.
    pub async fn serve(self) -> Result<()> {
        self.spawn().await?.wait().await
    }
}

pub struct DataServerHandle {
    pub addr: SocketAddr,
    node: Arc<Node>,
    server_task: JoinHandle<Result<()>>,
    heartbeat_task: JoinHandle<()>,
    report_task: JoinHandle<()>,
}

impl DataServerHandle {
    /// Advertised `ip:port` address.
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn storage_id(&self) -> String {
        self.node.storage_id.lock().unwrap().clone()
    }

    pub fn namespace_epoch(&self) -> i64 {
        *self.node.epoch.lock().unwrap()
    }

    /// Number of blocks currently held.
    pub fn held_blocks(&self) -> usize {
        self.node.store.lock().unwrap().len()
    }

    pub async fn wait(self) -> Result<()> {
        match self.server_task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("data server task failed: {}", e))),
        }
    }

    /// Abort the server and its loops.
    pub fn stop(&self) {
        self.heartbeat_task.abort();
        self.report_task.abort();
        self.server_task.abort();
    }
}
