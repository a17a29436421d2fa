//! RelayServer (spec §4.8): the single `/` endpoint that dispatches to
//! WebSocket upgrade or the NIP-11 info document, plus read-only auxiliary
//! endpoints.

mod nip11;

pub use nip11::RelayInfo;

use crate::session::{self, SharedState};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct ServerState {
    shared: SharedState,
    info: Arc<RelayInfo>,
}

pub fn build_router(shared: SharedState, info: RelayInfo) -> Router {
    let state = ServerState { shared, info: Arc::new(info) };
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/info", get(api_info))
        .route("/api/stats", get(api_stats))
        .route("/api/metrics", get(api_metrics))
        .route("/api/cluster", get(api_cluster))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn root(
    State(state): State<ServerState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let wants_upgrade = headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    if wants_upgrade {
        if state.shared.ratelimiter.is_banned(&addr.to_string()) {
            return (StatusCode::TOO_MANY_REQUESTS, "banned").into_response();
        }
        if let Some(ws) = ws {
            let shared = state.shared.clone();
            return ws.on_upgrade(move |socket| session::run(socket, addr.to_string(), shared));
        }
    }

    let wants_nip11 = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/nostr+json"));

    if wants_nip11 {
        return Json(state.info.as_ref().clone()).into_response();
    }

    (StatusCode::OK, "shugur-relay: connect with a Nostr client").into_response()
}

async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let cluster = state.shared.store.cluster_health().await;
    Json(json!({ "status": cluster.status, "nodes": cluster.nodes, "live": cluster.live }))
}

async fn api_info(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.info.as_ref().clone())
}

async fn api_stats(State(_state): State<ServerState>) -> impl IntoResponse {
    Json(json!({ "note": "stats are a stub; extend with counters as they're added" }))
}

async fn api_metrics(State(_state): State<ServerState>) -> impl IntoResponse {
    (StatusCode::OK, "# metrics stub\n")
}

async fn api_cluster(State(state): State<ServerState>) -> impl IntoResponse {
    let cluster = state.shared.store.cluster_health().await;
    Json(json!({ "nodes": cluster.nodes, "live": cluster.live, "status": cluster.status }))
}

/// Serves `router` until `shutdown` is cancelled, giving in-flight
/// connections a drain window (spec §5, §6.5).
pub async fn serve(router: Router, addr: SocketAddr, shutdown: CancellationToken) -> crate::common::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "relay listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tokio::time::sleep(std::time::Duration::from_secs(crate::common::consts::SHUTDOWN_DRAIN_SECS)).await;
        })
        .await?;
    Ok(())
}
