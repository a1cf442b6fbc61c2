//! Small shared helpers: clocks, checksums, identifier minting

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
pub fn timestamp_now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

/// CRC-IEEE over a byte buffer.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Mint a block id: `<filename>-<8-digit-index>-<millis>-<rand>`.
///
/// The timestamp and random suffix keep ids unique across re-creations of
/// the same file.
pub fn mint_block_id(file_name: &str, index: usize) -> String {
    format!(
        "{}-{:08}-{}-{}",
        file_name,
        index,
        timestamp_now_millis(),
        rand::random::<u32>()
    )
}

/// Recover the millisecond timestamp embedded in a block id.
///
/// Fields are taken from the end of the string, so file names that contain
/// hyphens do not shift the parse.
pub fn block_timestamp(block_id: &str) -> crate::Result<i64> {
    let mut fields = block_id.rsplitn(3, '-');
    let _rand = fields
        .next()
        .ok_or_else(|| crate::Error::InvalidPath(format!("malformed block id: {}", block_id)))?;
    let millis = fields
        .next()
        .ok_or_else(|| crate::Error::InvalidPath(format!("malformed block id: {}", block_id)))?;
    millis
        .parse::<i64>()
        .map_err(|_| crate::Error::InvalidPath(format!("malformed block id: {}", block_id)))
}

/// Mint a storage id: `<hostname>-<millis>-<rand>`.
pub fn mint_storage_id(hostname: &str) -> String {
    format!(
        "{}-{}-{}",
        hostname,
        timestamp_now_millis(),
        rand::random::<u32>()
    )
}

/// Number of blocks needed to hold `file_size` bytes.
pub fn block_count(file_size: u64, block_size: u64) -> usize {
    (file_size.div_ceil(block_size)) as usize
}

/// Retry an async operation with exponential backoff.
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_err = None;

    for attempt in 0..max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_retries => {
                tracing::warn!("attempt {} failed: {}, retrying in {:?}", attempt + 1, e, delay);
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| crate::Error::Other("max retries exceeded".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_shape() {
        let id = mint_block_id("numbers.txt", 7);
        assert!(id.starts_with("numbers.txt-00000007-"));
        let ts = block_timestamp(&id).unwrap();
        assert!(ts > 0);
    }

    #[test]
    fn block_ids_are_unique() {
        let a = mint_block_id("f", 0);
        let b = mint_block_id("f", 0);
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_survives_hyphenated_file_names() {
        let id = mint_block_id("my-data-set.txt", 3);
        let ts = block_timestamp(&id).unwrap();
        assert!(ts > 0);
    }

    #[test]
    fn malformed_block_id_rejected() {
        assert!(block_timestamp("nodashes").is_err());
        assert!(block_timestamp("a-b-notanumber").is_err());
    }

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(block_count(0, 4096), 0);
        assert_eq!(block_count(1, 4096), 1);
        assert_eq!(block_count(4096, 4096), 1);
        assert_eq!(block_count(4097, 4096), 2);
        assert_eq!(block_count(8192, 4096), 2);
    }

    #[test]
    fn crc_covers_padding() {
        let mut padded = vec![0u8; 4096];
        padded[..5].copy_from_slice(b"hello");
        let full = crc32(&padded);
        let prefix = crc32(&padded[..5]);
        assert_ne!(full, prefix);
        assert_eq!(full, crc32(&padded.clone()));
    }
}
