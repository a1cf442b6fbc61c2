//! End-to-end cluster tests: coordinator, data servers, and the client
//! library wired together in-process on ephemeral ports.

use minidfs::coordinator::CoordinatorHandle;
use minidfs::dataserver::DataServerHandle;
use minidfs::proto::{CommandKind, CommandRequest, HandshakeRequest, RequestBlockRequest};
use minidfs::rpc::{dial_coordinator, dial_data_server};
use minidfs::{
    ClientConfig, Coordinator, CoordinatorConfig, DataServer, DataServerConfig, DfsClient,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

struct TestCluster {
    _meta_dir: TempDir,
    data_dirs: Vec<TempDir>,
    coordinator: CoordinatorHandle,
    data_servers: Vec<DataServerHandle>,
}

impl TestCluster {
    /// Start a coordinator and `n` data servers with one-second heartbeat
    /// and report intervals so placement converges quickly.
    async fn start(n: usize) -> Self {
        let meta_dir = TempDir::new().unwrap();
        let coord_config = CoordinatorConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            meta_root: meta_dir.path().to_path_buf(),
            heartbeat_interval_secs: 1,
            dial_timeout_secs: 5,
            ..Default::default()
        };
        let coordinator = Coordinator::new(coord_config).spawn().await.unwrap();

        let mut data_dirs = Vec::new();
        let mut data_servers = Vec::new();
        for _ in 0..n {
            let dir = TempDir::new().unwrap();
            let config = DataServerConfig {
                data_root: dir.path().to_path_buf(),
                port: 0,
                bind_ip: Some("127.0.0.1".parse().unwrap()),
                coordinator: coordinator.url(),
                heartbeat_interval_secs: 1,
                block_report_interval_secs: 1,
                dial_timeout_secs: 5,
            };
            data_servers.push(DataServer::new(config).spawn().await.unwrap());
            data_dirs.push(dir);
        }

        Self {
            _meta_dir: meta_dir,
            data_dirs,
            coordinator,
            data_servers,
        }
    }

    async fn client(&self) -> DfsClient {
        DfsClient::connect(ClientConfig {
            coordinator: self.coordinator.url(),
            dial_timeout_secs: 5,
            ..Default::default()
        })
        .await
        .unwrap()
    }

    /// Resolve a file the way the read path does, through the raw RPC.
    async fn resolve(&self, path: &str) -> minidfs::proto::CommandResponse {
        let mut coord = dial_coordinator(&self.coordinator.url(), DIAL_TIMEOUT)
            .await
            .unwrap();
        coord
            .run_command(CommandRequest {
                kind: CommandKind::CopyToLocal as i32,
                path: path.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_inner()
    }

    /// Data directory of the server advertising `addr`.
    fn data_dir_of(&self, addr: &str) -> PathBuf {
        let idx = self
            .data_servers
            .iter()
            .position(|ds| ds.address() == addr)
            .expect("unknown data server address");
        self.data_dirs[idx].path().to_path_buf()
    }

    /// Wait out at least one block-report interval.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(2500)).await;
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for ds in &self.data_servers {
            ds.stop();
        }
        self.coordinator.stop();
    }
}

fn write_local(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn namespace_commands() {
    let cluster = TestCluster::start(1).await;
    let mut client = cluster.client().await;

    client.mkdir("/a", false).await.unwrap();
    client.mkdir("/a/b/c", true).await.unwrap();
    assert!(client.mkdir("/a", false).await.is_err());
    client.touch("/a/f").await.unwrap();
    assert_eq!(client.ls("/a").await.unwrap(), vec!["b", "f"]);

    client.rm(&["/a/f".to_string()]).await.unwrap();
    assert!(client.rm(&["/a/f".to_string()]).await.is_err());
    client.rmdir(&["/a".to_string()]).await.unwrap();
    assert!(client.ls("/a").await.is_err());
    assert!(client.ls("/").await.unwrap().is_empty());
}

#[tokio::test]
async fn write_plan_counts_and_distinctness() {
    let cluster = TestCluster::start(4).await;
    let mut coord = dial_coordinator(&cluster.coordinator.url(), DIAL_TIMEOUT)
        .await
        .unwrap();

    // 8192 bytes at a 4096-byte block size: exactly two blocks
    let plan = coord
        .run_command(CommandRequest {
            kind: CommandKind::CopyFromLocal as i32,
            path: "/".to_string(),
            file_name: "two-blocks.bin".to_string(),
            file_size: 8192,
            ..Default::default()
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(plan.block_list.len(), 2);
    for block_id in &plan.block_list {
        let addrs = &plan.block_to_addrs[block_id].addrs;
        assert_eq!(addrs.len(), 3);
        let distinct: HashSet<_> = addrs.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    // planning never touches the block index
    assert_eq!(cluster.coordinator.cluster().indexed_blocks(), 0);

    // the file entry exists even though no payload moved yet
    let entries = {
        let mut client = cluster.client().await;
        client.ls("/").await.unwrap()
    };
    assert_eq!(entries, vec!["two-blocks.bin"]);
}

#[tokio::test]
async fn short_plan_with_fewer_live_servers_than_replicas() {
    let cluster = TestCluster::start(2).await;
    let mut coord = dial_coordinator(&cluster.coordinator.url(), DIAL_TIMEOUT)
        .await
        .unwrap();

    let plan = coord
        .run_command(CommandRequest {
            kind: CommandKind::CopyFromLocal as i32,
            path: "/".to_string(),
            file_name: "small.bin".to_string(),
            file_size: 10,
            ..Default::default()
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(plan.block_list.len(), 1);
    let addrs = &plan.block_to_addrs[&plan.block_list[0]].addrs;
    assert_eq!(addrs.len(), 2);
    assert_ne!(addrs[0], addrs[1]);
}

#[tokio::test]
async fn write_read_round_trip() {
    let cluster = TestCluster::start(3).await;
    let mut client = cluster.client().await;

    // three blocks, the last one short
    let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let local = TempDir::new().unwrap();
    let src = write_local(&local, "data.bin", &content);

    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;

    // placement learned from block reports: 3 blocks, 3 replicas each
    let resolved = cluster.resolve("/data.bin").await;
    assert_eq!(resolved.block_list.len(), 3);
    for block_id in &resolved.block_list {
        assert_eq!(resolved.block_to_addrs[block_id].addrs.len(), 3);
    }

    let dst = local.path().join("out.bin");
    client.copy_to_local("/data.bin", &dst).await.unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), content);
}

#[tokio::test]
async fn exact_multiple_payloads_are_full_blocks() {
    let cluster = TestCluster::start(3).await;
    let mut client = cluster.client().await;

    let content = vec![0xabu8; 8192];
    let local = TempDir::new().unwrap();
    let src = write_local(&local, "exact.bin", &content);
    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;

    let resolved = cluster.resolve("/exact.bin").await;
    assert_eq!(resolved.block_list.len(), 2);
    for block_id in &resolved.block_list {
        let addr = &resolved.block_to_addrs[block_id].addrs[0];
        let mut ds = dial_data_server(addr, DIAL_TIMEOUT).await.unwrap();
        let reply = ds
            .request_block(RequestBlockRequest {
                block_id: block_id.clone(),
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.data.len(), 4096);
        assert_eq!(reply.length, 4096);
    }

    let dst = local.path().join("exact-out.bin");
    client.copy_to_local("/exact.bin", &dst).await.unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), content);
}

#[tokio::test]
async fn mean_and_variance_of_one_to_five() {
    let cluster = TestCluster::start(3).await;
    let mut client = cluster.client().await;

    let local = TempDir::new().unwrap();
    let src = write_local(&local, "numbers.txt", b"1\n2\n3\n4\n5\n");
    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;

    let result = client.cal_mean_var("/numbers.txt").await.unwrap();
    assert_eq!(result, "mean: 3, variance: 2");
}

#[tokio::test]
async fn mean_and_variance_across_blocks() {
    let cluster = TestCluster::start(2).await;
    let mut client = cluster.client().await;

    // Four full blocks of numbers. Lines are padded to eight bytes so they
    // divide the block size evenly: map subtasks see whole lines only.
    let values: Vec<i64> = (1..=2048).collect();
    let text: String = values.iter().map(|v| format!("{:07}\n", v)).collect();
    assert_eq!(text.len(), 4 * 4096);

    let local = TempDir::new().unwrap();
    let src = write_local(&local, "many.txt", text.as_bytes());
    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;

    let result = client.cal_mean_var("/many.txt").await.unwrap();
    let n = values.len() as f64;
    let mean = values.iter().sum::<i64>() as f64 / n;
    let var = values
        .iter()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;

    let parsed: Vec<f64> = result
        .trim_start_matches("mean: ")
        .split(", variance: ")
        .map(|s| s.parse().unwrap())
        .collect();
    assert!((parsed[0] - mean).abs() / mean < 1e-9);
    assert!((parsed[1] - var).abs() / var < 1e-9);
}

#[tokio::test]
async fn read_fails_over_to_the_intact_replica() {
    let cluster = TestCluster::start(2).await;
    let mut client = cluster.client().await;

    let content = b"failover payload".to_vec();
    let local = TempDir::new().unwrap();
    let src = write_local(&local, "fail.bin", &content);
    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;

    // corrupt the replica the read path will try first
    let resolved = cluster.resolve("/fail.bin").await;
    let block_id = &resolved.block_list[0];
    let first_addr = &resolved.block_to_addrs[block_id].addrs[0];
    let payload = cluster.data_dir_of(first_addr).join("actdata").join(block_id);
    std::fs::write(&payload, vec![b'X'; 4096]).unwrap();

    let dst = local.path().join("fail-out.bin");
    client.copy_to_local("/fail.bin", &dst).await.unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), content);
}

#[tokio::test]
async fn read_surfaces_blocks_with_no_intact_replica() {
    let cluster = TestCluster::start(2).await;
    let mut client = cluster.client().await;

    let local = TempDir::new().unwrap();
    let src = write_local(&local, "doomed.bin", b"gone");
    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;

    let resolved = cluster.resolve("/doomed.bin").await;
    let block_id = &resolved.block_list[0];
    for addr in &resolved.block_to_addrs[block_id].addrs {
        let payload = cluster.data_dir_of(addr).join("actdata").join(block_id);
        std::fs::write(&payload, vec![b'X'; 4096]).unwrap();
    }

    let dst = local.path().join("doomed-out.bin");
    let err = client.copy_to_local("/doomed.bin", &dst).await.unwrap_err();
    assert!(err.to_string().contains(block_id.as_str()));
}

#[tokio::test]
async fn format_fences_and_reinitializes_data_servers() {
    let cluster = TestCluster::start(1).await;
    let mut client = cluster.client().await;

    let local = TempDir::new().unwrap();
    let src = write_local(&local, "pre.bin", b"pre-format data");
    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;

    let old_epoch = cluster.data_servers[0].namespace_epoch();
    assert!(cluster.data_servers[0].held_blocks() > 0);
    assert_eq!(cluster.coordinator.cluster().indexed_blocks(), 1);

    client.format().await.unwrap();

    // the namespace and the block index are empty
    assert!(client.ls("/").await.unwrap().is_empty());
    assert_eq!(cluster.coordinator.cluster().indexed_blocks(), 0);

    // a handshake carrying the old epoch is fenced
    let mut coord = dial_coordinator(&cluster.coordinator.url(), DIAL_TIMEOUT)
        .await
        .unwrap();
    let status = coord
        .handshake(HandshakeRequest {
            namespace_epoch: old_epoch,
            addr: "127.0.0.1:1".to_string(),
            hostname: "stale".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);

    // the live data server notices through its heartbeat, wipes its blocks,
    // and rejoins under the new epoch
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(cluster.data_servers[0].namespace_epoch(), old_epoch + 1);
    assert_eq!(cluster.data_servers[0].held_blocks(), 0);

    // and the cluster is usable again
    let src = write_local(&local, "post.bin", b"post-format data");
    client.copy_from_local(&src, "/").await.unwrap();
    cluster.settle().await;
    let dst = local.path().join("post-out.bin");
    client.copy_to_local("/post.bin", &dst).await.unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), b"post-format data");
}

#[tokio::test]
async fn data_server_identity_survives_restart() {
    let meta_dir = TempDir::new().unwrap();
    let coord_config = CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        meta_root: meta_dir.path().to_path_buf(),
        heartbeat_interval_secs: 1,
        ..Default::default()
    };
    let coordinator = Coordinator::new(coord_config).spawn().await.unwrap();

    let data_dir = TempDir::new().unwrap();
    let config = DataServerConfig {
        data_root: data_dir.path().to_path_buf(),
        port: 0,
        bind_ip: Some("127.0.0.1".parse().unwrap()),
        coordinator: coordinator.url(),
        heartbeat_interval_secs: 1,
        block_report_interval_secs: 1,
        ..Default::default()
    };

    let first = DataServer::new(config.clone()).spawn().await.unwrap();
    let sid = first.storage_id();
    let epoch = first.namespace_epoch();
    assert!(!sid.is_empty());
    first.stop();

    let second = DataServer::new(config).spawn().await.unwrap();
    assert_eq!(second.storage_id(), sid);
    assert_eq!(second.namespace_epoch(), epoch);
    second.stop();
    coordinator.stop();
}
