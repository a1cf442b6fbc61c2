//! Channel helpers for dialing the two RPC surfaces

use crate::common::Result;
use crate::proto::coordinator_client::CoordinatorClient;
use crate::proto::data_server_client::DataServerClient;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

async fn dial(url: String, timeout: Duration) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(url)?
        .connect_timeout(timeout)
        .timeout(timeout);
    Ok(endpoint.connect().await?)
}

/// Dial the coordinator at a full URL such as `http://127.0.0.1:21170`.
pub async fn dial_coordinator(
    url: &str,
    timeout: Duration,
) -> Result<CoordinatorClient<Channel>> {
    Ok(CoordinatorClient::new(dial(url.to_string(), timeout).await?))
}

/// Dial a data server at a bare `ip:port` address.
pub async fn dial_data_server(
    addr: &str,
    timeout: Duration,
) -> Result<DataServerClient<Channel>> {
    Ok(DataServerClient::new(
        dial(format!("http://{}", addr), timeout).await?,
    ))
}
