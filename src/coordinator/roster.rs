//! Worker roster (spec §5 "Shared mutable roster"): a single lock around a
//! plain map. Discovery updates and scheduler snapshots both go through it;
//! snapshots are immutable clones, never shared references into the map.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::discovery::DiscoveryReply;
use crate::model::WorkerRecord;

#[derive(Default)]
pub struct Roster {
    inner: RwLock<HashMap<IpAddr, WorkerRecord>>,
}

impl Roster {
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }

    /// Applies a discovery reply: inserts a new record (unselected by
    /// default) or updates `last_seen`/`hostname`/`job_port` on an existing
    /// one. Last-write-wins per IP, per spec §4.5/§5.
    pub async fn observe(&self, reply: DiscoveryReply) {
        let mut guard = self.inner.write().await;
        guard
            .entry(reply.ip)
            .and_modify(|w| {
                w.hostname = reply.hostname.clone();
                w.job_port = reply.job_port;
                w.last_seen = Instant::now();
            })
            .or_insert_with(|| WorkerRecord {
                id: reply.ip.to_string(),
                hostname: reply.hostname,
                ip: reply.ip,
                job_port: reply.job_port,
                selected: false,
                last_seen: Instant::now(),
            });
    }

    pub async fn set_selected(&self, ip: IpAddr, selected: bool) {
        if let Some(worker) = self.inner.write().await.get_mut(&ip) {
            worker.selected = selected;
        }
    }

    /// Immutable snapshot of every worker currently marked `selected`, in a
    /// stable order (by IP) for deterministic round-robin assignment.
    pub async fn selected_snapshot(&self) -> Vec<WorkerRecord> {
        let guard = self.inner.read().await;
        let mut workers: Vec<WorkerRecord> = guard.values().filter(|w| w.selected).cloned().collect();
        workers.sort_by_key(|w| w.ip);
        workers
    }

    pub async fn all(&self) -> Vec<WorkerRecord> {
        let guard = self.inner.read().await;
        let mut workers: Vec<WorkerRecord> = guard.values().cloned().collect();
        workers.sort_by_key(|w| w.ip);
        workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn reply(ip: &str, host: &str, port: u16) -> DiscoveryReply {
        DiscoveryReply {
            hostname: host.to_string(),
            ip: ip.parse().unwrap(),
            job_port: port,
            source: format!("{ip}:1").parse::<SocketAddr>().unwrap(),
        }
    }

    #[tokio::test]
    async fn observe_inserts_unselected() {
        let roster = Roster::new();
        roster.observe(reply("10.0.0.1", "worker-a", 50010)).await;
        let all = roster.all().await;
        assert_eq!(all.len(), 1);
        assert!(!all[0].selected);
    }

    #[tokio::test]
    async fn observe_is_last_write_wins_per_ip() {
        let roster = Roster::new();
        roster.observe(reply("10.0.0.1", "worker-a", 50010)).await;
        roster.observe(reply("10.0.0.1", "worker-a-renamed", 50011)).await;
        let all = roster.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].hostname, "worker-a-renamed");
        assert_eq!(all[0].job_port, 50011);
    }

    #[tokio::test]
    async fn selected_snapshot_excludes_unselected() {
        let roster = Roster::new();
        roster.observe(reply("10.0.0.2", "b", 50010)).await;
        roster.observe(reply("10.0.0.1", "a", 50010)).await;
        roster.set_selected("10.0.0.1".parse().unwrap(), true).await;
        let selected = roster.selected_snapshot().await;
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].hostname, "a");
    }
}
