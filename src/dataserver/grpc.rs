//! Data server RPC surface: block transfer and the map subtask

use crate::common::{block_timestamp, Error};
use crate::dataserver::meanvar::block_mean_var;
use crate::dataserver::store::{BlockMeta, BlockStore};
use crate::proto::data_server_server::{DataServer as DataServerRpc, DataServerServer};
use crate::proto::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tonic::{Request, Response, Status};

pub struct DataService {
    store: Arc<Mutex<BlockStore>>,
    transfers_in_flight: Arc<AtomicU32>,
}

impl DataService {
    pub fn new(store: Arc<Mutex<BlockStore>>, transfers_in_flight: Arc<AtomicU32>) -> Self {
        Self {
            store,
            transfers_in_flight,
        }
    }

    pub fn into_server(self) -> DataServerServer<Self> {
        DataServerServer::new(self)
    }
}

struct TransferGuard<'a>(&'a AtomicU32);

impl<'a> TransferGuard<'a> {
    fn new(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[tonic::async_trait]
impl DataServerRpc for DataService {
    async fn send_block(
        &self,
        req: Request<SendBlockRequest>,
    ) -> Result<Response<SendBlockResponse>, Status> {
        let _guard = TransferGuard::new(&self.transfers_in_flight);
        let req = req.into_inner();
        let timestamp = block_timestamp(&req.block_id).map_err(Error::into_status)?;
        tracing::debug!(
            "receiving block {}: {} bytes, length {}",
            req.block_id,
            req.data.len(),
            req.length
        );

        let meta = BlockMeta {
            checksum: req.checksum,
            timestamp,
            length: req.length,
        };
        // The checksum is not verified here; a corrupt block is the
        // reader's discovery.
        let saved = self
            .store
            .lock()
            .unwrap()
            .save(&req.block_id, meta, &req.data);
        match saved {
            Ok(()) => Ok(Response::new(SendBlockResponse { ok: true })),
            Err(e) => {
                tracing::error!("failed to save block {}: {}", req.block_id, e);
                Ok(Response::new(SendBlockResponse { ok: false }))
            }
        }
    }

    async fn request_block(
        &self,
        req: Request<RequestBlockRequest>,
    ) -> Result<Response<RequestBlockResponse>, Status> {
        let _guard = TransferGuard::new(&self.transfers_in_flight);
        let req = req.into_inner();
        let (meta, data) = self
            .store
            .lock()
            .unwrap()
            .load(&req.block_id)
            .map_err(Error::into_status)?;
        tracing::debug!("serving block {}: {} bytes", req.block_id, data.len());
        Ok(Response::new(RequestBlockResponse {
            block_id: req.block_id,
            data,
            checksum: meta.checksum,
            length: meta.length,
        }))
    }

    async fn cal_mean_var_map(
        &self,
        req: Request<MeanVarMapRequest>,
    ) -> Result<Response<MeanVarMapResponse>, Status> {
        let req = req.into_inner();
        let (meta, data) = self
            .store
            .lock()
            .unwrap()
            .load(&req.block_id)
            .map_err(Error::into_status)?;
        let partial =
            block_mean_var(&req.block_id, &data, meta.length).map_err(Error::into_status)?;
        tracing::debug!(
            "map subtask for {}: count={} mean={} mean_sq={}",
            req.block_id,
            partial.count,
            partial.mean,
            partial.mean_sq
        );
        Ok(Response::new(MeanVarMapResponse {
            count: partial.count,
            mean: partial.mean,
            mean_sq: partial.mean_sq,
        }))
    }
}
