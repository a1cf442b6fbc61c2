//! Coordinator server

use crate::common::{CoordinatorConfig, Error, Result};
use crate::coordinator::cluster::ClusterState;
use crate::coordinator::grpc::CoordinatorService;
use crate::coordinator::namespace::Namespace;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Bind the listener and run the RPC server in a background task.
    ///
    /// The returned handle exposes the bound address (useful with port 0)
    /// and the cluster state for introspection.
    pub async fn spawn(self) -> Result<CoordinatorHandle> {
        let namespace = Arc::new(Namespace::open(&self.config)?);
        let epoch = namespace.load_epoch()?;
        let cluster = Arc::new(ClusterState::new(
            epoch,
            self.config.heartbeat_interval(),
            self.config.liveness_timeout(),
        ));

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let addr = listener.local_addr()?;
        tracing::info!("coordinator listening on {}, namespace epoch {}", addr, epoch);
        tracing::info!("  namespace root: {}", self.config.namespace_root().display());
        tracing::info!("  replication: {}", self.config.replication);
        tracing::info!("  block size: {} B", self.config.block_size);

        let service =
            CoordinatorService::new(self.config.clone(), namespace.clone(), cluster.clone());
        let task = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service.into_server())
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .map_err(Error::from)
        });

        Ok(CoordinatorHandle {
            addr,
            cluster,
            task,
        })
    }

    /// Run until the server exits.
    pub async fn serve(self) -> Result<()> {
        self.spawn().await?.wait().await
    }
}

pub struct CoordinatorHandle {
    pub addr: SocketAddr,
    cluster: Arc<ClusterState>,
    task: JoinHandle<Result<()>>,
}

impl CoordinatorHandle {
    /// Coordinator URL for clients and data servers.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Volatile cluster state, for inspection.
    pub fn cluster(&self) -> &Arc<ClusterState> {
        &self.cluster
    }

    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("coordinator task failed: {}", e))),
        }
    }

    /// Abort the server task.
    pub fn stop(&self) {
        self.task.abort();
    }
}
