//! Client library: split files into blocks on the way in, reassemble and
//! checksum-verify them on the way out
//!
//! The client is stateless. Every command asks the coordinator for a plan
//! and then speaks directly to data servers for the payload bytes.

use crate::common::{crc32, ClientConfig, Error, Result};
use crate::proto::coordinator_client::CoordinatorClient;
use crate::proto::*;
use crate::rpc::{dial_coordinator, dial_data_server};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tonic::transport::Channel;

pub struct DfsClient {
    coord: CoordinatorClient<Channel>,
    config: ClientConfig,
}

/// Fill the buffer from the reader, stopping only at EOF. A short return
/// happens on the last block of a file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl DfsClient {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let coord = dial_coordinator(&config.coordinator, config.dial_timeout()).await?;
        Ok(Self { coord, config })
    }

    async fn run(&mut self, request: CommandRequest) -> Result<CommandResponse> {
        Ok(self.coord.run_command(request).await?.into_inner())
    }

    fn command(kind: CommandKind) -> CommandRequest {
        CommandRequest {
            kind: kind as i32,
            ..Default::default()
        }
    }

    pub async fn ls(&mut self, path: &str) -> Result<Vec<String>> {
        let response = self
            .run(CommandRequest {
                path: path.to_string(),
                ..Self::command(CommandKind::Ls)
            })
            .await?;
        Ok(response.entries)
    }

    pub async fn mkdir(&mut self, path: &str, parents: bool) -> Result<()> {
        let kind = if parents {
            CommandKind::MkdirP
        } else {
            CommandKind::Mkdir
        };
        self.run(CommandRequest {
            path: path.to_string(),
            ..Self::command(kind)
        })
        .await?;
        Ok(())
    }

    pub async fn rm(&mut self, paths: &[String]) -> Result<()> {
        self.run(CommandRequest {
            paths: paths.to_vec(),
            ..Self::command(CommandKind::Rm)
        })
        .await?;
        Ok(())
    }

    pub async fn rmdir(&mut self, paths: &[String]) -> Result<()> {
        self.run(CommandRequest {
            paths: paths.to_vec(),
            ..Self::command(CommandKind::Rmdir)
        })
        .await?;
        Ok(())
    }

    pub async fn touch(&mut self, path: &str) -> Result<()> {
        self.run(CommandRequest {
            path: path.to_string(),
            ..Self::command(CommandKind::Touch)
        })
        .await?;
        Ok(())
    }

    pub async fn format(&mut self) -> Result<()> {
        self.run(Self::command(CommandKind::Format)).await?;
        Ok(())
    }

    pub async fn cal_mean_var(&mut self, path: &str) -> Result<String> {
        let response = self
            .run(CommandRequest {
                path: path.to_string(),
                ..Self::command(CommandKind::CalMeanVar)
            })
            .await?;
        Ok(response.result)
    }

    /// The write path: plan, fan out block payloads, notify.
    ///
    /// Each block buffer is padded to the full block size; the checksum
    /// covers the padded buffer and the recorded length marks the
    /// meaningful prefix. Any send failure aborts the command.
    pub async fn copy_from_local(&mut self, local: &Path, dst: &str) -> Result<()> {
        let meta = std::fs::metadata(local)?;
        if !meta.is_file() {
            return Err(Error::InvalidPath(format!(
                "{} is not a regular file",
                local.display()
            )));
        }
        let file_name = local
            .file_name()
            .ok_or_else(|| Error::InvalidPath(local.display().to_string()))?
            .to_string_lossy()
            .into_owned();

        let plan = self
            .run(CommandRequest {
                path: dst.to_string(),
                file_name: file_name.clone(),
                file_size: meta.len() as i64,
                ..Self::command(CommandKind::CopyFromLocal)
            })
            .await?;
        tracing::info!(
            "write plan for {}: {} blocks",
            file_name,
            plan.block_list.len()
        );

        let mut file = File::open(local)?;
        for block_id in &plan.block_list {
            let mut buf = vec![0u8; self.config.block_size as usize];
            let length = read_full(&mut file, &mut buf)?;
            let checksum = crc32(&buf);

            let replicas = plan
                .block_to_addrs
                .get(block_id)
                .map(|set| set.addrs.clone())
                .unwrap_or_default();
            for addr in replicas.iter().filter(|a| !a.is_empty()) {
                tracing::debug!("sending {} to {}", block_id, addr);
                let mut data_server =
                    dial_data_server(addr, self.config.dial_timeout()).await?;
                let reply = data_server
                    .send_block(SendBlockRequest {
                        block_id: block_id.clone(),
                        data: buf.clone(),
                        checksum,
                        length: length as i64,
                    })
                    .await?
                    .into_inner();
                if !reply.ok {
                    return Err(Error::Rpc(format!(
                        "data server {} failed to store {}",
                        addr, block_id
                    )));
                }
            }
        }

        self.coord.notify(NotifyRequest {}).await?;
        Ok(())
    }

    /// The read path: resolve, fetch each block from any intact replica,
    /// append the meaningful prefix.
    pub async fn copy_to_local(&mut self, src: &str, local: &Path) -> Result<()> {
        let plan = self
            .run(CommandRequest {
                path: src.to_string(),
                ..Self::command(CommandKind::CopyToLocal)
            })
            .await?;

        let mut out = File::create(local)?;
        let failed = self.fetch_blocks(&plan, &mut out).await?;
        out.sync_all()?;

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "no intact replica for {} of {} blocks: {}",
                failed.len(),
                plan.block_list.len(),
                failed.join(", ")
            )))
        }
    }

    /// Read a whole file into memory.
    pub async fn cat(&mut self, src: &str) -> Result<Vec<u8>> {
        let plan = self
            .run(CommandRequest {
                path: src.to_string(),
                ..Self::command(CommandKind::Cat)
            })
            .await?;
        let mut content = Vec::new();
        let failed = self.fetch_blocks(&plan, &mut content).await?;
        if failed.is_empty() {
            Ok(content)
        } else {
            Err(Error::Other(format!(
                "no intact replica for {} of {} blocks: {}",
                failed.len(),
                plan.block_list.len(),
                failed.join(", ")
            )))
        }
    }

    /// Fetch every block in order, writing intact payload prefixes to the
    /// sink. A corrupt or unreachable replica triggers failover to the next
    /// one; blocks with no intact replica are skipped and returned.
    async fn fetch_blocks(
        &mut self,
        plan: &CommandResponse,
        sink: &mut impl Write,
    ) -> Result<Vec<String>> {
        let mut failed = Vec::new();
        for block_id in &plan.block_list {
            let replicas = plan
                .block_to_addrs
                .get(block_id)
                .map(|set| set.addrs.clone())
                .unwrap_or_default();
            let mut intact = false;
            for addr in replicas.iter().filter(|a| !a.is_empty()) {
                match self.fetch_one(block_id, addr).await {
                    Ok(reply) => {
                        let length = (reply.length.max(0) as usize).min(reply.data.len());
                        sink.write_all(&reply.data[..length])?;
                        intact = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("replica {} failed for {}: {}", addr, block_id, e);
                    }
                }
            }
            if !intact {
                tracing::error!("no intact replica for {}", block_id);
                failed.push(block_id.clone());
            }
        }
        Ok(failed)
    }

    async fn fetch_one(&self, block_id: &str, addr: &str) -> Result<RequestBlockResponse> {
        let mut data_server = dial_data_server(addr, self.config.dial_timeout()).await?;
        let reply = data_server
            .request_block(RequestBlockRequest {
                block_id: block_id.to_string(),
            })
            .await?
            .into_inner();
        let computed = crc32(&reply.data);
        if computed != reply.checksum {
            return Err(Error::ChecksumMismatch {
                block_id: block_id.to_string(),
                stored: reply.checksum,
                computed,
            });
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_full_pads_short_tail() {
        let mut reader = &b"hello"[..];
        let mut buf = vec![0u8; 8];
        let n = read_full(&mut reader, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(&buf[5..], &[0, 0, 0]);
    }

    #[test]
    fn read_full_fills_exact_blocks() {
        let data = vec![7u8; 100];
        let mut reader = &data[..];
        let mut buf = vec![0u8; 40];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 40);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 40);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 20);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }
}
