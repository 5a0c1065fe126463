mod api;
mod cache;
mod config;
mod pending;
mod service;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ApiState;
use crate::cache::AnswerCache;
use crate::config::{Config, load_config};
use crate::pending::PendingTable;
use crate::service::DnsService;

#[derive(Parser, Debug)]
#[command(author, version, about = "Caching DNS forwarding proxy", long_about = None)]
struct Args {
    /// 配置文件路径（JSON），缺省使用内置默认值。
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// 覆盖监听端口（bind_udp 的端口部分）。
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// 覆盖上游DNS地址。
    #[arg(long = "upstream")]
    upstream: Option<String>,
    /// 启用调试日志
    #[arg(long = "debug", default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let mut cfg = match &args.config {
        Some(path) => load_config(path).context("load config")?,
        None => Config::default(),
    };
    if let Some(upstream) = args.upstream {
        cfg.upstream = upstream;
    }

    let mut bind_addr: SocketAddr = cfg.bind_udp.parse().context("parse bind addr")?;
    if let Some(port) = args.port {
        bind_addr.set_port(port);
    }
    let upstream: SocketAddr = cfg.upstream.parse().context("parse upstream addr")?;
    let api_addr: SocketAddr = cfg.bind_api.parse().context("parse api bind addr")?;

    // Bind failure here is unrecoverable and aborts startup.
    let socket = bind_udp_socket(bind_addr).context("bind dns socket")?;

    let cache = AnswerCache::new(cfg.cache_capacity, Duration::from_secs(cfg.cache_ttl_secs));
    let pending = Arc::new(PendingTable::new(Duration::from_secs(cfg.pending_timeout_secs)));
    let service = DnsService::new(Arc::new(socket), upstream, cache.clone(), pending.clone());

    pending::spawn_sweeper(pending.clone(), Duration::from_secs(1));

    // The admin surface lives on its own port; losing it never takes the
    // DNS path down.
    let api_state = ApiState { cache, pending };
    tokio::spawn(async move {
        if let Err(err) = api::serve(api_addr, api_state).await {
            error!(error = %err, "admin api exited");
        }
    });

    info!(
        bind_udp = %bind_addr,
        upstream = %upstream,
        ttl_secs = cfg.cache_ttl_secs,
        "dns proxy started"
    );

    tokio::select! {
        _ = service.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

fn init_tracing(debug: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_level(debug);

    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn bind_udp_socket(addr: SocketAddr) -> anyhow::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("create socket")?;
    let _ = socket.set_recv_buffer_size(4 * 1024 * 1024);
    let _ = socket.set_send_buffer_size(4 * 1024 * 1024);
    socket.set_nonblocking(true).context("set nonblocking")?;
    socket.bind(&addr.into()).context("bind socket")?;
    UdpSocket::from_std(socket.into()).context("register socket")
}
