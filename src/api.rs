use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::{AnswerCache, CacheView};
use crate::pending::PendingTable;

/// 管理接口状态：缓存与未决表的句柄。
#[derive(Clone)]
pub struct ApiState {
    pub cache: AnswerCache,
    pub pending: Arc<PendingTable>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/flush", get(flush).post(flush))
        .route("/remove", get(remove).post(remove))
        .route("/cache", get(dump))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind admin api on {addr}"))?;
    info!(bind_api = %addr, "admin api started");
    axum::serve(listener, router(state))
        .await
        .context("admin api server")?;
    Ok(())
}

async fn flush(State(state): State<ApiState>) -> &'static str {
    state.cache.flush();
    info!(target = "api", "cache flushed");
    "cache flushed!\n"
}

#[derive(Debug, Deserialize)]
struct RemoveParams {
    domain: Option<String>,
}

async fn remove(
    State(state): State<ApiState>,
    Query(params): Query<RemoveParams>,
) -> Result<String, (StatusCode, &'static str)> {
    let Some(domain) = params.domain else {
        return Err((StatusCode::BAD_REQUEST, "missing domain parameter\n"));
    };
    // Cache keys are FQDNs as the codec renders them, trailing dot included.
    let key = if domain.ends_with('.') {
        domain
    } else {
        format!("{domain}.")
    };
    state.cache.remove(&key);
    info!(target = "api", qname = %key, "cache entry removed");
    Ok(format!("removed {key}\n"))
}

#[derive(Debug, Serialize)]
struct CacheDump {
    entries: Vec<CacheView>,
    pending_queries: usize,
}

async fn dump(State(state): State<ApiState>) -> Json<CacheDump> {
    Json(CacheDump {
        entries: state.cache.dump(),
        pending_queries: state.pending.pending_count(),
    })
}
