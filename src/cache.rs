use std::time::Duration;

use hickory_proto::op::Message;
use moka::sync::Cache;
use serde::Serialize;

/// 带统一 TTL 的应答缓存。Keyed by the first question's name exactly as the
/// codec renders it (FQDN, trailing dot, case preserved).
#[derive(Clone)]
pub struct AnswerCache {
    inner: Cache<String, Message>,
}

impl AnswerCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Live entry or nothing. Expired entries are never returned; the store
    /// discards them when the read detects expiry.
    pub fn get(&self, qname: &str) -> Option<Message> {
        self.inner.get(qname)
    }

    /// Insert or overwrite, stamped now with the process-wide TTL. The TTLs
    /// carried by the resource records themselves are ignored.
    pub fn insert(&self, qname: String, message: Message) {
        self.inner.insert(qname, message);
    }

    pub fn remove(&self, qname: &str) {
        self.inner.invalidate(qname);
    }

    pub fn flush(&self) {
        self.inner.invalidate_all();
    }

    /// Snapshot for the admin introspection endpoint.
    pub fn dump(&self) -> Vec<CacheView> {
        self.inner.run_pending_tasks();
        self.inner
            .iter()
            .map(|(qname, message)| CacheView {
                qname: qname.as_ref().clone(),
                rcode: format!("{:?}", message.response_code()),
                answers: message.answers().len(),
            })
            .collect()
    }
}

/// 管理接口 /cache 返回的单条视图。
#[derive(Debug, Clone, Serialize)]
pub struct CacheView {
    pub qname: String,
    pub rcode: String,
    pub answers: usize,
}
