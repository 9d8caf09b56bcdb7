//! RPC router - dispatches JSON-RPC method calls to handlers
//!
//! Each method (chat.send, chat.history, sessions.list, ...) is handled by a
//! dedicated async function. The router maps method names to handlers.

use libro_agent::{AgentEvent, AgentRuntime, SessionKey};
use libro_core::{RpcError, RpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state behind every RPC call.
pub struct RpcContext {
    pub agent: Arc<AgentRuntime>,
    pub started_at: Instant,
}

impl RpcContext {
    pub fn new(agent: Arc<AgentRuntime>) -> Self {
        Self {
            agent,
            started_at: Instant::now(),
        }
    }
}

/// Result type for RPC handlers.
pub type RpcResult = Result<Value, (i32, String)>;

/// Route an RPC method call to the appropriate handler.
pub async fn route_rpc(method: &str, params: Value, ctx: &RpcContext) -> RpcResult {
    match method {
        "chat.send" => handle_chat_send(params, ctx).await,
        "chat.history" => handle_chat_history(params, ctx).await,
        "chat.export" => handle_chat_export(params, ctx).await,
        "sessions.list" => handle_sessions_list(ctx).await,
        "sessions.clear" => handle_sessions_clear(params, ctx).await,
        "tools.list" => handle_tools_list(ctx),
        "health" => Ok(health(ctx)),
        "echo" => Ok(params),
        _ => Err((METHOD_NOT_FOUND, format!("Method not found: {}", method))),
    }
}

/// Convert an RPC result to an RpcResponse.
pub fn to_response(id: &str, result: RpcResult) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err((code, message)) => RpcResponse::err(id, code, message),
    }
}

fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, (i32, String)> {
    params[name]
        .as_str()
        .ok_or_else(|| (INVALID_PARAMS, format!("Missing required param: {}", name)))
}

// ---------------------------------------------------------------------------
// chat.send - run one user turn and wait for the answer
// ---------------------------------------------------------------------------

async fn handle_chat_send(params: Value, ctx: &RpcContext) -> RpcResult {
    let session_key = match params["session"].as_str() {
        Some(s) if !s.trim().is_empty() => SessionKey::new(s),
        _ => SessionKey::generate(),
    };
    let message = required_str(&params, "message")?;
    if message.trim().is_empty() {
        return Err((INVALID_PARAMS, "message must not be empty".to_string()));
    }

    info!(
        "chat.send: session={} message={}",
        session_key,
        message.chars().take(50).collect::<String>()
    );

    // Dropping this handler (client went away) cancels the turn.
    let cancel = CancellationToken::new();
    let _abandon = cancel.clone().drop_guard();

    let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(64);
    let collector = tokio::spawn(async move {
        let mut tools = Vec::new();
        while let Some(event) = event_rx.recv().await {
            if let AgentEvent::ToolResult {
                id, name, is_error, ..
            } = event
            {
                tools.push(json!({ "id": id, "name": name, "is_error": is_error }));
            }
        }
        tools
    });

    let result = ctx
        .agent
        .run_turn(&session_key, message, Some(event_tx), cancel)
        .await;
    let tools = collector.await.unwrap_or_default();

    match result {
        Ok(reply) => Ok(json!({
            "session": session_key,
            "reply": reply,
            "tools": tools,
        })),
        Err(e) => {
            let err = RpcError::from(&e);
            Err((err.code, err.message))
        }
    }
}

// ---------------------------------------------------------------------------
// chat.history - committed turns of a session
// ---------------------------------------------------------------------------

async fn handle_chat_history(params: Value, ctx: &RpcContext) -> RpcResult {
    let session_key = SessionKey::new(required_str(&params, "session")?);
    let turns = ctx.agent.sessions().get_history(&session_key).await;
    let preferences = ctx.agent.sessions().get_preferences(&session_key).await;
    Ok(json!({
        "session": session_key,
        "turns": turns,
        "preferences": preferences,
    }))
}

// ---------------------------------------------------------------------------
// chat.export - flat transcript records for replay
// ---------------------------------------------------------------------------

async fn handle_chat_export(params: Value, ctx: &RpcContext) -> RpcResult {
    let session_key = SessionKey::new(required_str(&params, "session")?);
    let records = ctx.agent.sessions().export(&session_key).await;
    Ok(json!({
        "session": session_key,
        "records": records,
    }))
}

// ---------------------------------------------------------------------------
// sessions.*
// ---------------------------------------------------------------------------

async fn handle_sessions_list(ctx: &RpcContext) -> RpcResult {
    let sessions = ctx.agent.sessions().list().await;
    Ok(json!({ "sessions": sessions }))
}

async fn handle_sessions_clear(params: Value, ctx: &RpcContext) -> RpcResult {
    let session_key = SessionKey::new(required_str(&params, "session")?);
    let sessions = ctx.agent.sessions();
    let known = sessions.get(&session_key).is_some();
    sessions.clear(&session_key).await;
    Ok(json!({ "session": session_key, "cleared": known }))
}

// ---------------------------------------------------------------------------
// tools.list / health
// ---------------------------------------------------------------------------

fn handle_tools_list(ctx: &RpcContext) -> RpcResult {
    let tools: Vec<Value> = ctx
        .agent
        .tool_definitions()
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect();
    Ok(json!({ "tools": tools }))
}

pub fn health(ctx: &RpcContext) -> Value {
    json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "model": ctx.agent.client().model(),
        "provider": ctx.agent.client().provider_name(),
        "sessions": ctx.agent.sessions().len(),
        "tools": ctx.agent.tools().len(),
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
    })
}
