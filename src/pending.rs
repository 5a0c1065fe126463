use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// One client query awaiting its upstream answer.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    pub tx_id: u16,
    pub client: SocketAddr,
    enqueued_at: Instant,
}

/// 未决查询表：域名 -> 按到达顺序排列的等待客户端。
/// Buckets are append-ordered. The same transaction ID may appear more than
/// once for different clients; correlation is first-match-wins on exact ID.
pub struct PendingTable {
    map: DashMap<String, Vec<PendingQuery>, FxBuildHasher>,
    timeout: Duration,
}

impl PendingTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            map: DashMap::with_hasher(FxBuildHasher::default()),
            timeout,
        }
    }

    /// Append a pending query. No dedup: repeated identical queries are all
    /// tracked and each will receive its own response.
    pub fn enqueue(&self, qname: &str, tx_id: u16, client: SocketAddr) {
        self.map.entry(qname.to_string()).or_default().push(PendingQuery {
            tx_id,
            client,
            enqueued_at: Instant::now(),
        });
    }

    /// Remove and return the first pending query for `qname` carrying
    /// `tx_id`, leaving the relative order of the remainder untouched.
    pub fn take(&self, qname: &str, tx_id: u16) -> Option<SocketAddr> {
        let client = {
            let mut bucket = self.map.get_mut(qname)?;
            let pos = bucket.iter().position(|p| p.tx_id == tx_id)?;
            bucket.remove(pos).client
        };
        // The bucket guard must be dropped before touching the map again,
        // otherwise this deadlocks on the same shard.
        self.map.remove_if(qname, |_, bucket| bucket.is_empty());
        Some(client)
    }

    /// Drop entries older than the configured timeout, and the buckets this
    /// empties. Returns how many entries were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut dropped = 0;
        self.map.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|p| now.duration_since(p.enqueued_at) < self.timeout);
            dropped += before - bucket.len();
            !bucket.is_empty()
        });
        dropped
    }

    /// Total outstanding entries across all domains.
    pub fn pending_count(&self) -> usize {
        self.map.iter().map(|bucket| bucket.len()).sum()
    }
}

/// 周期清扫：上游永不应答的转发不能让表无限增长。
pub fn spawn_sweeper(pending: Arc<PendingTable>, every: Duration) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let dropped = pending.sweep();
            if dropped > 0 {
                debug!(
                    dropped,
                    outstanding = pending.pending_count(),
                    "swept stale pending queries"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().expect("addr")
    }

    #[test]
    fn answer_reaches_exactly_the_client_that_asked() {
        let table = PendingTable::new(Duration::from_secs(5));
        table.enqueue("example.com.", 1, addr(1001));
        table.enqueue("example.com.", 2, addr(1002));
        table.enqueue("example.com.", 3, addr(1003));

        assert_eq!(table.take("example.com.", 2), Some(addr(1002)));
        assert_eq!(table.pending_count(), 2);

        // the untouched entries are still correlated by their own IDs
        assert_eq!(table.take("example.com.", 1), Some(addr(1001)));
        assert_eq!(table.take("example.com.", 3), Some(addr(1003)));
    }

    #[test]
    fn second_answer_with_same_id_finds_no_match() {
        let table = PendingTable::new(Duration::from_secs(5));
        table.enqueue("example.com.", 42, addr(2001));

        assert_eq!(table.take("example.com.", 42), Some(addr(2001)));
        assert_eq!(table.take("example.com.", 42), None);
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn colliding_ids_across_clients_resolve_first_match_wins() {
        let table = PendingTable::new(Duration::from_secs(5));
        table.enqueue("example.com.", 7, addr(3001));
        table.enqueue("example.com.", 7, addr(3002));
        table.enqueue("example.com.", 7, addr(3003));

        assert_eq!(table.take("example.com.", 7), Some(addr(3001)));
        assert_eq!(table.take("example.com.", 7), Some(addr(3002)));
        assert_eq!(table.take("example.com.", 7), Some(addr(3003)));
    }

    #[test]
    fn unknown_domain_or_id_is_a_miss_not_an_error() {
        let table = PendingTable::new(Duration::from_secs(5));
        table.enqueue("a.com.", 1, addr(4001));

        assert_eq!(table.take("b.com.", 1), None);
        assert_eq!(table.take("a.com.", 2), None);
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn sweep_drops_stale_entries_and_keeps_fresh_ones() {
        let table = PendingTable::new(Duration::from_millis(10));
        table.enqueue("old-a.com.", 1, addr(5001));
        table.enqueue("old-b.com.", 2, addr(5002));

        std::thread::sleep(Duration::from_millis(30));
        table.enqueue("fresh.com.", 3, addr(5003));

        assert_eq!(table.sweep(), 2);
        assert_eq!(table.pending_count(), 1);
        assert_eq!(table.take("fresh.com.", 3), Some(addr(5003)));
        assert_eq!(table.take("old-a.com.", 1), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_correlation_delivers_each_id_once() {
        let table = Arc::new(PendingTable::new(Duration::from_secs(5)));

        let enqueues = (0u16..64).map(|id| {
            let table = table.clone();
            tokio::spawn(async move {
                table.enqueue("example.com.", id, addr(10_000 + id));
            })
        });
        join_all(enqueues).await;

        let takes = (0u16..64).map(|id| {
            let table = table.clone();
            tokio::spawn(async move { (id, table.take("example.com.", id)) })
        });
        for result in join_all(takes).await {
            let (id, client) = result.expect("task");
            assert_eq!(client, Some(addr(10_000 + id)));
        }
        assert_eq!(table.pending_count(), 0);
    }
}
