//! Gateway server: JSON-RPC over HTTP plus a health probe

use crate::rpc::{self, RpcContext};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use libro_agent::AgentRuntime;
use libro_core::{LibroConfig, RpcRequest, RpcResponse};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub type GatewayState = Arc<RpcContext>;

/// How often idle sessions are swept, capped by the TTL itself.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn start_gateway(config: LibroConfig) -> anyhow::Result<()> {
    let agent = Arc::new(crate::build_runtime(&config)?);
    serve(agent, &config).await
}

/// Serve an already-built runtime until ctrl-c.
pub async fn serve(agent: Arc<AgentRuntime>, config: &LibroConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let ttl = agent.config().session_idle_ttl;
    let sweeper = if ttl.is_zero() {
        None
    } else {
        Some(agent.sessions().spawn_idle_sweeper(
            ttl,
            SWEEP_INTERVAL.min(ttl),
            shutdown.child_token(),
        ))
    };

    let state = Arc::new(RpcContext::new(Arc::clone(&agent)));
    let app = build_router(state);

    let bind_addr: SocketAddr =
        format!("{}:{}", config.gateway.bind.to_addr(), config.gateway.port).parse()?;

    info!("LibroRecomienda Gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: {}", bind_addr);
    info!("  RPC:    http://{}/rpc", bind_addr);
    info!("  Model:  {} ({})", agent.client().model(), agent.client().provider_name());
    info!("  Busy policy: {:?}", agent.config().busy_policy);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            stop.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    Ok(())
}

async fn rpc_handler(
    State(state): State<GatewayState>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    let result = rpc::route_rpc(&request.method, request.params, &state).await;
    Json(rpc::to_response(&request.id, result))
}

async fn health_handler(State(state): State<GatewayState>) -> Json<Value> {
    Json(rpc::health(&state))
}
