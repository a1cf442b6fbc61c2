//! Configuration for minidfs components

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;
/// Default number of replicas per block.
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;
/// Default heartbeat period in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;
/// Default block report period in seconds.
pub const DEFAULT_BLOCK_REPORT_SECS: u64 = 60;
/// Default coordinator port.
pub const DEFAULT_COORD_PORT: u16 = 21170;
/// Default data server port.
pub const DEFAULT_DATA_PORT: u16 = 11170;

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}
fn default_replication() -> usize {
    DEFAULT_REPLICATION_FACTOR
}
fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT_SECS
}
fn default_block_report_secs() -> u64 {
    DEFAULT_BLOCK_REPORT_SECS
}
fn default_liveness_secs() -> u64 {
    // three missed heartbeats
    DEFAULT_HEARTBEAT_SECS * 3
}
fn default_dial_timeout_secs() -> u64 {
    30
}
fn default_coord_bind() -> SocketAddr {
    ([0, 0, 0, 0], DEFAULT_COORD_PORT).into()
}
fn default_meta_root() -> PathBuf {
    PathBuf::from("meta")
}
fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}
fn default_data_port() -> u16 {
    DEFAULT_DATA_PORT
}
fn default_coordinator_url() -> String {
    format!("http://127.0.0.1:{}", DEFAULT_COORD_PORT)
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the RPC listener
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// Root for the namespace mirror and the epoch file
    #[serde(default = "default_meta_root")]
    pub meta_root: PathBuf,

    /// Replicas per block
    #[serde(default = "default_replication")]
    pub replication: usize,

    /// Block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Heartbeat period expected from data servers
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// A member missing heartbeats for this long is dead
    #[serde(default = "default_liveness_secs")]
    pub liveness_timeout_secs: u64,

    /// Dial timeout for map subtask dispatch
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            meta_root: default_meta_root(),
            replication: default_replication(),
            block_size: default_block_size(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            liveness_timeout_secs: default_liveness_secs(),
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}

impl CoordinatorConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// Path of the namespace-epoch file.
    pub fn epoch_path(&self) -> PathBuf {
        self.meta_root.join("nid")
    }

    /// Root of the namespace mirror.
    pub fn namespace_root(&self) -> PathBuf {
        self.meta_root.join("gdfs")
    }
}

/// Data server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataServerConfig {
    /// Root for block payloads, metadata, and identity files
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Port for the RPC listener (0 picks an ephemeral port)
    #[serde(default = "default_data_port")]
    pub port: u16,

    /// Bind IP; when unset the hostname is resolved instead
    #[serde(default)]
    pub bind_ip: Option<IpAddr>,

    /// Coordinator endpoint
    #[serde(default = "default_coordinator_url")]
    pub coordinator: String,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_block_report_secs")]
    pub block_report_interval_secs: u64,

    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl Default for DataServerConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            port: default_data_port(),
            bind_ip: None,
            coordinator: default_coordinator_url(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            block_report_interval_secs: default_block_report_secs(),
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}

impl DataServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn block_report_interval(&self) -> Duration {
        Duration::from_secs(self.block_report_interval_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn epoch_path(&self) -> PathBuf {
        self.data_root.join("nid")
    }

    pub fn storage_id_path(&self) -> PathBuf {
        self.data_root.join("sid")
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.data_root.join("id2meta")
    }

    pub fn payload_dir(&self) -> PathBuf {
        self.data_root.join("actdata")
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_coordinator_url")]
    pub coordinator: String,

    #[serde(default = "default_block_size")]
    pub block_size: u64,

    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator: default_coordinator_url(),
            block_size: default_block_size(),
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}

impl ClientConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}

/// Load a JSON config file into any of the role configs.
pub fn load_config<T: serde::de::DeserializeOwned>(
    path: impl AsRef<std::path::Path>,
) -> crate::Result<T> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cluster_constants() {
        let c = CoordinatorConfig::default();
        assert_eq!(c.block_size, 4096);
        assert_eq!(c.replication, 3);
        assert_eq!(c.heartbeat_interval_secs, 60);
        assert_eq!(c.bind_addr.port(), 21170);

        let d = DataServerConfig::default();
        assert_eq!(d.port, 11170);
        assert_eq!(d.block_report_interval_secs, 60);
    }

    #[test]
    fn layout_paths() {
        let c = CoordinatorConfig::default();
        assert_eq!(c.epoch_path(), PathBuf::from("meta/nid"));
        assert_eq!(c.namespace_root(), PathBuf::from("meta/gdfs"));

        let d = DataServerConfig::default();
        assert_eq!(d.epoch_path(), PathBuf::from("data/nid"));
        assert_eq!(d.storage_id_path(), PathBuf::from("data/sid"));
        assert_eq!(d.meta_dir(), PathBuf::from("data/id2meta"));
        assert_eq!(d.payload_dir(), PathBuf::from("data/actdata"));
    }

    #[test]
    fn config_from_json_uses_defaults() {
        let parsed: DataServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.port, DEFAULT_DATA_PORT);
        assert!(parsed.bind_ip.is_none());
    }
}
