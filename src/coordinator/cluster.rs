//! Volatile coordinator state: membership and the block index
//!
//! Everything here is reconstructed after a restart from handshakes,
//! registrations, and block reports; only the namespace tree and the epoch
//! survive on disk. One mutex guards the whole of it, and no method blocks
//! while holding the lock.

use crate::common::{mint_storage_id, Error, Result, EPOCH_UNSET};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A data server as the coordinator sees it.
///
/// Unknown is absence from the table; Dead is a member whose last heartbeat
/// is older than the liveness timeout.
#[derive(Debug, Clone)]
pub enum ServerState {
    /// Handshake accepted, registration pending.
    Candidate { hostname: String },
    /// Registered and heartbeating.
    Member {
        storage_id: String,
        hostname: String,
        last_seen: Instant,
    },
}

/// What a heartbeat reply should instruct the caller to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeartbeatDecision {
    pub re_register: bool,
    pub request_block_report: bool,
}

struct ClusterInner {
    epoch: i64,
    /// Keyed by advertised address.
    servers: HashMap<String, ServerState>,
    sid_to_addr: HashMap<String, String>,
    addr_to_sid: HashMap<String, String>,
    /// Block id to the set of storage ids reporting it.
    block_index: HashMap<String, BTreeSet<String>>,
    /// While open, heartbeats ask stale members to re-handshake.
    reformat_until: Option<Instant>,
    /// While open, heartbeats ask members for an immediate block report.
    report_until: Option<Instant>,
}

pub struct ClusterState {
    inner: Mutex<ClusterInner>,
    heartbeat_interval: Duration,
    liveness_timeout: Duration,
}

impl ClusterState {
    pub fn new(epoch: i64, heartbeat_interval: Duration, liveness_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(ClusterInner {
                epoch,
                servers: HashMap::new(),
                sid_to_addr: HashMap::new(),
                addr_to_sid: HashMap::new(),
                block_index: HashMap::new(),
                reformat_until: None,
                report_until: None,
            }),
            heartbeat_interval,
            liveness_timeout,
        }
    }

    pub fn epoch(&self) -> i64 {
        self.inner.lock().unwrap().epoch
    }

    /// Verify the caller's epoch and admit it as a candidate.
    ///
    /// The unset sentinel always passes and learns the current epoch; a
    /// mismatching epoch fences the caller out.
    pub fn handshake(&self, caller_epoch: i64, addr: &str, hostname: &str) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        if caller_epoch != EPOCH_UNSET && caller_epoch != inner.epoch {
            return Err(Error::EpochMismatch {
                expected: inner.epoch,
                actual: caller_epoch,
            });
        }
        inner
            .servers
            .entry(addr.to_string())
            .or_insert_with(|| ServerState::Candidate {
                hostname: hostname.to_string(),
            });
        Ok(inner.epoch)
    }

    /// Promote a candidate to member, minting a storage id when the caller
    /// has none. The address maps always end up reflecting the caller's
    /// current address, dropping a stale reverse entry after an IP change.
    pub fn register(&self, storage_id: &str, addr: &str, hostname: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        let sid = if storage_id.is_empty() {
            mint_storage_id(hostname)
        } else {
            storage_id.to_string()
        };
        if let Some(old_addr) = inner.sid_to_addr.insert(sid.clone(), addr.to_string()) {
            if old_addr != addr {
                inner.addr_to_sid.remove(&old_addr);
                inner.servers.remove(&old_addr);
            }
        }
        inner.addr_to_sid.insert(addr.to_string(), sid.clone());
        inner.servers.insert(
            addr.to_string(),
            ServerState::Member {
                storage_id: sid.clone(),
                hostname: hostname.to_string(),
                last_seen: Instant::now(),
            },
        );
        sid
    }

    /// Record a heartbeat and decide what to ask of the caller.
    pub fn heartbeat(&self, addr: &str) -> HeartbeatDecision {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let known = match inner.servers.get_mut(addr) {
            Some(ServerState::Member { last_seen, .. }) => {
                *last_seen = now;
                true
            }
            _ => false,
        };
        let reformatting = inner.reformat_until.is_some_and(|t| now < t);
        let report_requested = inner.report_until.is_some_and(|t| now < t);
        HeartbeatDecision {
            re_register: reformatting || !known,
            request_block_report: report_requested,
        }
    }

    /// Fold a block report into the index.
    ///
    /// Replica sets are keyed by storage id, so repeated reports from the
    /// same server leave the set unchanged.
    pub fn record_report<'a>(
        &self,
        addr: &str,
        block_ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let sid = match inner.addr_to_sid.get(addr) {
            Some(sid) => sid.clone(),
            None => return Err(Error::Unregistered(addr.to_string())),
        };
        if let Some(ServerState::Member { last_seen, .. }) = inner.servers.get_mut(addr) {
            *last_seen = now;
        }
        for block_id in block_ids {
            inner
                .block_index
                .entry(block_id.to_string())
                .or_default()
                .insert(sid.clone());
        }
        Ok(())
    }

    /// Addresses of members heard from within the liveness timeout.
    ///
    /// Iteration order of the member table is unspecified; the write plan
    /// guarantees only count and distinctness.
    pub fn live_addrs(&self) -> Vec<String> {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap();
        inner
            .servers
            .iter()
            .filter_map(|(addr, state)| match state {
                ServerState::Member { last_seen, .. }
                    if now.duration_since(*last_seen) < self.liveness_timeout =>
                {
                    Some(addr.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Current replica addresses for one block, in storage-id order.
    pub fn replica_addrs(&self, block_id: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .block_index
            .get(block_id)
            .map(|sids| {
                sids.iter()
                    .filter_map(|sid| inner.sid_to_addr.get(sid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Storage ids reporting one block.
    pub fn replica_sids(&self, block_id: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .block_index
            .get(block_id)
            .map(|sids| sids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of blocks currently indexed.
    pub fn indexed_blocks(&self) -> usize {
        self.inner.lock().unwrap().block_index.len()
    }

    /// Wipe volatile state for a cluster format and open the reformat
    /// window. Returns the new epoch; the caller persists it.
    pub fn begin_format(&self) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.block_index.clear();
        inner.servers.clear();
        inner.sid_to_addr.clear();
        inner.addr_to_sid.clear();
        inner.epoch += 1;
        inner.reformat_until = Some(Instant::now() + self.heartbeat_interval);
        inner.epoch
    }

    /// Open the post-write window during which heartbeats ask for fresh
    /// block reports.
    pub fn note_write_finished(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.report_until = Some(Instant::now() + self.heartbeat_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterState {
        ClusterState::new(1, Duration::from_secs(60), Duration::from_secs(180))
    }

    fn join(cluster: &ClusterState, addr: &str) -> String {
        cluster.handshake(EPOCH_UNSET, addr, "host").unwrap();
        cluster.register("", addr, "host")
    }

    #[test]
    fn handshake_fences_stale_epoch() {
        let cluster = cluster();
        assert_eq!(cluster.handshake(EPOCH_UNSET, "a:1", "h").unwrap(), 1);
        assert_eq!(cluster.handshake(1, "a:1", "h").unwrap(), 1);
        assert!(matches!(
            cluster.handshake(7, "a:1", "h"),
            Err(Error::EpochMismatch { .. })
        ));
    }

    #[test]
    fn register_mints_and_reuses_storage_ids() {
        let cluster = cluster();
        let sid = join(&cluster, "a:1");
        assert!(sid.starts_with("host-"));
        let again = cluster.register(&sid, "a:1", "host");
        assert_eq!(again, sid);
    }

    #[test]
    fn register_follows_address_change() {
        let cluster = cluster();
        let sid = join(&cluster, "a:1");
        cluster.register(&sid, "b:2", "host");
        assert_eq!(cluster.live_addrs(), vec!["b:2".to_string()]);
        cluster.record_report("b:2", ["blk"]).unwrap();
        assert_eq!(cluster.replica_addrs("blk"), vec!["b:2".to_string()]);
        assert!(matches!(
            cluster.record_report("a:1", ["blk"]),
            Err(Error::Unregistered(_))
        ));
    }

    #[test]
    fn repeated_reports_do_not_inflate_replica_sets() {
        let cluster = cluster();
        join(&cluster, "a:1");
        cluster.record_report("a:1", ["blk"]).unwrap();
        cluster.record_report("a:1", ["blk"]).unwrap();
        assert_eq!(cluster.replica_sids("blk").len(), 1);
    }

    #[test]
    fn every_indexed_sid_resolves_to_an_address() {
        let cluster = cluster();
        join(&cluster, "a:1");
        join(&cluster, "b:2");
        cluster.record_report("a:1", ["blk"]).unwrap();
        cluster.record_report("b:2", ["blk"]).unwrap();
        let addrs = cluster.replica_addrs("blk");
        assert_eq!(addrs.len(), 2);
        assert!(addrs.iter().all(|a| !a.is_empty()));
    }

    #[test]
    fn candidates_are_not_live() {
        let cluster = cluster();
        cluster.handshake(EPOCH_UNSET, "a:1", "h").unwrap();
        assert!(cluster.live_addrs().is_empty());
        cluster.register("", "a:1", "h");
        assert_eq!(cluster.live_addrs().len(), 1);
    }

    #[test]
    fn stale_members_fall_out_of_the_live_set() {
        let cluster = ClusterState::new(1, Duration::from_secs(60), Duration::from_millis(10));
        join(&cluster, "a:1");
        std::thread::sleep(Duration::from_millis(20));
        assert!(cluster.live_addrs().is_empty());
        cluster.heartbeat("a:1");
        assert_eq!(cluster.live_addrs().len(), 1);
    }

    #[test]
    fn format_clears_membership_and_index_and_bumps_epoch() {
        let cluster = cluster();
        join(&cluster, "a:1");
        cluster.record_report("a:1", ["blk"]).unwrap();
        let epoch = cluster.begin_format();
        assert_eq!(epoch, 2);
        assert_eq!(cluster.indexed_blocks(), 0);
        assert!(cluster.live_addrs().is_empty());
        // the old epoch is now fenced
        assert!(cluster.handshake(1, "a:1", "h").is_err());
        // and heartbeats inside the window ask for a re-registration
        assert!(cluster.heartbeat("a:1").re_register);
    }

    #[test]
    fn notify_window_requests_reports() {
        let cluster = cluster();
        join(&cluster, "a:1");
        assert!(!cluster.heartbeat("a:1").request_block_report);
        cluster.note_write_finished();
        assert!(cluster.heartbeat("a:1").request_block_report);
    }

    #[test]
    fn unknown_heartbeat_asks_for_re_register() {
        let cluster = cluster();
        assert!(cluster.heartbeat("ghost:1").re_register);
    }
}
