use std::fs;
use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// UDP监听地址，缺省0.0.0.0:53（DNS 标准端口）。
    #[serde(default = "default_bind_udp")]
    pub bind_udp: String,
    /// 管理接口监听地址（flush/remove/cache）。
    #[serde(default = "default_bind_api")]
    pub bind_api: String,
    /// 上游DNS，所有缓存未命中的查询原样转发到这里。
    #[serde(default = "default_upstream")]
    pub upstream: String,
    /// 每条缓存应答的统一 TTL（秒）。不读取资源记录自身的 TTL。
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// 缓存最大条目数。
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// 未决查询超时（秒），超时条目由周期清扫移除。
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_udp: default_bind_udp(),
            bind_api: default_bind_api(),
            upstream: default_upstream(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            pending_timeout_secs: default_pending_timeout_secs(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read config file: {}", path.display()))?;
    let cfg: Config = serde_json::from_str(&raw)
        .with_context(|| format!("parse config file: {}", path.display()))?;

    info!(target = "config", path = %path.display(), upstream = %cfg.upstream, "config loaded");

    Ok(cfg)
}


fn default_bind_udp() -> String {
    "0.0.0.0:53".to_string()
}

fn default_bind_api() -> String {
    "0.0.0.0:8089".to_string()
}

fn default_upstream() -> String {
    "1.1.1.1:53".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_pending_timeout_secs() -> u64 {
    5
}
