//! The per-block map subtask: count, mean, and mean of squares

use crate::common::{Error, Result};

/// Partial aggregate over one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partial {
    pub count: i64,
    pub mean: f64,
    pub mean_sq: f64,
}

/// Aggregate the meaningful prefix of a block payload, interpreted as UTF-8
/// text with one integer per line. The last line may be unterminated.
pub fn block_mean_var(block_id: &str, payload: &[u8], length: i64) -> Result<Partial> {
    let length = (length.max(0) as usize).min(payload.len());
    let text = std::str::from_utf8(&payload[..length])
        .map_err(|_| Error::Other(format!("block {} is not valid UTF-8", block_id)))?;

    let mut count = 0i64;
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: i64 = line.parse().map_err(|_| {
            Error::Other(format!("block {} has a non-integer line: {:?}", block_id, line))
        })?;
        let x = value as f64;
        count += 1;
        sum += x;
        sum_sq += x * x;
    }

    if count == 0 {
        return Err(Error::EmptyBlock(block_id.to_string()));
    }
    Ok(Partial {
        count,
        mean: sum / count as f64,
        mean_sq: sum_sq / count as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_to_five() {
        let p = block_mean_var("b", b"1\n2\n3\n4\n5\n", 10).unwrap();
        assert_eq!(p.count, 5);
        assert!((p.mean - 3.0).abs() < 1e-9);
        assert!((p.mean_sq - 11.0).abs() < 1e-9);
    }

    #[test]
    fn unterminated_last_line() {
        let p = block_mean_var("b", b"10\n20", 5).unwrap();
        assert_eq!(p.count, 2);
        assert!((p.mean - 15.0).abs() < 1e-9);
    }

    #[test]
    fn padding_beyond_length_is_ignored() {
        let mut payload = vec![0u8; 4096];
        payload[..4].copy_from_slice(b"7\n9\n");
        let p = block_mean_var("b", &payload, 4).unwrap();
        assert_eq!(p.count, 2);
        assert!((p.mean - 8.0).abs() < 1e-9);
    }

    #[test]
    fn negative_values() {
        let p = block_mean_var("b", b"-2\n2\n", 5).unwrap();
        assert_eq!(p.count, 2);
        assert!(p.mean.abs() < 1e-9);
        assert!((p.mean_sq - 4.0).abs() < 1e-9);
    }

    #[test]
    fn empty_block_fails() {
        assert!(matches!(
            block_mean_var("b", b"", 0),
            Err(Error::EmptyBlock(_))
        ));
        assert!(matches!(
            block_mean_var("b", b"\n\n", 2),
            Err(Error::EmptyBlock(_))
        ));
    }

    #[test]
    fn garbage_fails() {
        assert!(block_mean_var("b", b"1\nx\n", 4).is_err());
    }

    #[test]
    fn matches_local_mean_and_variance() {
        let values = [3i64, 1, 4, 1, 5, 9, 2, 6];
        let text = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let p = block_mean_var("b", text.as_bytes(), text.len() as i64).unwrap();

        let n = values.len() as f64;
        let mean = values.iter().sum::<i64>() as f64 / n;
        let var = values.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / n;
        let got_var = p.mean_sq - p.mean * p.mean;
        assert!((p.mean - mean).abs() < 1e-9);
        assert!((got_var - var).abs() < 1e-9);
    }
}
