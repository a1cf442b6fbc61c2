//! Block storage: one metadata file and one payload file per block
//!
//! Layout under the data root: `id2meta/<block-id>` holds the JSON metadata,
//! `actdata/<block-id>` holds the raw payload. The in-memory map is rebuilt
//! from the metadata directory on startup, so a crash between the payload
//! and metadata writes leaves the block absent on the next scan.

use crate::common::{DataServerConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

/// Per-block metadata persisted next to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// CRC-IEEE over the full padded buffer as sent.
    pub checksum: u32,
    /// Milliseconds since the Unix epoch, from the block id.
    pub timestamp: i64,
    /// Meaningful prefix of the payload in bytes.
    pub length: i64,
}

pub struct BlockStore {
    meta_dir: PathBuf,
    payload_dir: PathBuf,
    blocks: HashMap<String, BlockMeta>,
}

impl BlockStore {
    /// Open the store, creating directories and rescanning the metadata dir.
    pub fn open(config: &DataServerConfig) -> Result<Self> {
        let meta_dir = config.meta_dir();
        let payload_dir = config.payload_dir();
        fs::create_dir_all(&meta_dir)?;
        fs::create_dir_all(&payload_dir)?;

        let mut blocks = HashMap::new();
        for entry in fs::read_dir(&meta_dir)? {
            let entry = entry?;
            let block_id = entry.file_name().to_string_lossy().into_owned();
            match fs::read(entry.path())
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice::<BlockMeta>(&bytes).map_err(Into::into))
            {
                Ok(meta) => {
                    blocks.insert(block_id, meta);
                }
                Err(e) => {
                    tracing::warn!("skipping unreadable metadata for {}: {}", block_id, e);
                }
            }
        }
        tracing::info!("block store opened with {} blocks", blocks.len());

        Ok(Self {
            meta_dir,
            payload_dir,
            blocks,
        })
    }

    fn meta_path(&self, block_id: &str) -> PathBuf {
        self.meta_dir.join(block_id)
    }

    fn payload_path(&self, block_id: &str) -> PathBuf {
        self.payload_dir.join(block_id)
    }

    /// Persist a block: payload first, metadata second, map last.
    pub fn save(&mut self, block_id: &str, meta: BlockMeta, data: &[u8]) -> Result<()> {
        let mut payload = File::create(self.payload_path(block_id))?;
        payload.write_all(data)?;
        payload.sync_all()?;

        let mut meta_file = File::create(self.meta_path(block_id))?;
        meta_file.write_all(&serde_json::to_vec(&meta)?)?;
        meta_file.sync_all()?;

        self.blocks.insert(block_id.to_string(), meta);
        Ok(())
    }

    pub fn get_meta(&self, block_id: &str) -> Option<BlockMeta> {
        self.blocks.get(block_id).copied()
    }

    /// Metadata plus payload, read back from disk.
    pub fn load(&self, block_id: &str) -> Result<(BlockMeta, Vec<u8>)> {
        let meta = self
            .blocks
            .get(block_id)
            .copied()
            .ok_or_else(|| Error::BlockNotFound(block_id.to_string()))?;
        let data = fs::read(self.payload_path(block_id)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::BlockNotFound(block_id.to_string()),
            _ => Error::from(e),
        })?;
        Ok((meta, data))
    }

    /// Snapshot of every held block, for the block report.
    pub fn snapshot(&self) -> HashMap<String, BlockMeta> {
        self.blocks.clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop every block, on disk and in memory. Used when the server is
    /// fenced out by a namespace epoch change.
    pub fn wipe(&mut self) -> Result<()> {
        fs::remove_dir_all(&self.meta_dir)?;
        fs::remove_dir_all(&self.payload_dir)?;
        fs::create_dir_all(&self.meta_dir)?;
        fs::create_dir_all(&self.payload_dir)?;
        self.blocks.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, BlockStore) {
        let dir = TempDir::new().unwrap();
        let config = DataServerConfig {
            data_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = BlockStore::open(&config).unwrap();
        (dir, store)
    }

    fn meta(len: i64) -> BlockMeta {
        BlockMeta {
            checksum: 0xdeadbeef,
            timestamp: 1_700_000_000_000,
            length: len,
        }
    }

    #[test]
    fn save_and_load() {
        let (_dir, mut store) = store();
        store.save("f-00000000-1-2", meta(5), b"hello").unwrap();
        let (m, data) = store.load("f-00000000-1-2").unwrap();
        assert_eq!(m, meta(5));
        assert_eq!(data, b"hello");
    }

    #[test]
    fn missing_block_fails() {
        let (_dir, store) = store();
        assert!(matches!(
            store.load("nope"),
            Err(Error::BlockNotFound(_))
        ));
    }

    #[test]
    fn rescan_after_reopen() {
        let dir = TempDir::new().unwrap();
        let config = DataServerConfig {
            data_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        {
            let mut store = BlockStore::open(&config).unwrap();
            store.save("blk-00000000-1-2", meta(3), b"abc").unwrap();
        }
        let store = BlockStore::open(&config).unwrap();
        assert_eq!(store.len(), 1);
        let (m, data) = store.load("blk-00000000-1-2").unwrap();
        assert_eq!(m.length, 3);
        assert_eq!(data, b"abc");
    }

    #[test]
    fn unreadable_metadata_is_skipped_on_scan() {
        let dir = TempDir::new().unwrap();
        let config = DataServerConfig {
            data_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        {
            let mut store = BlockStore::open(&config).unwrap();
            store.save("good-00000000-1-2", meta(1), b"x").unwrap();
        }
        fs::write(config.meta_dir().join("bad-00000000-3-4"), b"not json").unwrap();
        let store = BlockStore::open(&config).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get_meta("good-00000000-1-2").is_some());
    }

    #[test]
    fn wipe_clears_everything() {
        let (_dir, mut store) = store();
        store.save("blk-00000000-1-2", meta(1), b"x").unwrap();
        store.wipe().unwrap();
        assert!(store.is_empty());
        assert!(store.load("blk-00000000-1-2").is_err());
    }
}
