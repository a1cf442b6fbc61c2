//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod utils;

pub use config::{ClientConfig, CoordinatorConfig, DataServerConfig};
pub use error::{is_epoch_mismatch, Error, Result};
pub use utils::{
    block_count, block_timestamp, crc32, mint_block_id, mint_storage_id, retry_with_backoff,
    timestamp_now_millis,
};

/// Sentinel namespace epoch for a data server that has never joined.
pub const EPOCH_UNSET: i64 = -1;
