use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{sse::Event, sse::KeepAlive, sse::Sse, Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures_util::stream::Stream;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::did::http::HttpDidResolver;
use crate::did::{DefaultDidResolver, DidResolver};
use crate::handlers::profile::profile_handler;
use crate::mcp::types::Request as McpRequest;
use crate::server::Server;
use crate::session::{run_session_reaper, InMemorySessionStore, SessionStore};

pub const MESSAGES_PATH: &str = "/messages/";
const SESSION_ID_PARAM: &str = "session_id";
const SSE_CHANNEL_CAPACITY: usize = 100;
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(30);

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Fondu Knowledge MCP</title></head>
<body>
<h1>Fondu Knowledge MCP server</h1>
<p>Tool: <code>gather_relevant_user_knowledge</code></p>
<ul>
<li><code>GET /sse</code> then <code>POST /messages/?session_id=...</code></li>
<li><code>POST /api/mcp</code></li>
<li><code>GET|POST /v1/profile</code></li>
<li><code>GET /health</code></li>
</ul>
</body>
</html>
"#;

pub type ConnectionRegistry = Arc<DashMap<Uuid, mpsc::Sender<String>>>;

// Shared state for the Axum application
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<Server>,
    pub sessions: Arc<dyn SessionStore>,
    pub did_resolver: Arc<dyn DidResolver>,
    pub active_connections: ConnectionRegistry,
}

impl AppState {
    pub fn new(server: Arc<Server>, sessions: Arc<dyn SessionStore>, did_resolver: Arc<dyn DidResolver>) -> Self {
        Self {
            server,
            sessions,
            did_resolver,
            active_connections: Arc::new(DashMap::new()),
        }
    }

    /// Builds the production state. Spawns a session reaper when a TTL is
    /// configured, so it must run inside a Tokio runtime.
    pub fn from_config(server: Arc<Server>, config: &ServerConfig) -> Self {
        let sessions = match config.session_ttl() {
            Some(ttl) => {
                let store = Arc::new(InMemorySessionStore::with_ttl(ttl));
                info!(ttl_secs = ttl.as_secs(), "DID challenges expire");
                tokio::spawn(run_session_reaper(Arc::clone(&store), ttl));
                store
            }
            None => Arc::new(InMemorySessionStore::new()),
        };

        let http_resolver = config.did_resolver_url.as_deref().map(|url| {
            info!(%url, "Using HTTP DID resolver");
            HttpDidResolver::new(url)
        });

        Self::new(server, sessions, Arc::new(DefaultDidResolver::new(http_resolver)))
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_check_handler))
        .route("/v1/profile", get(profile_handler).post(profile_handler))
        .route("/sse", get(sse_handler))
        .route(MESSAGES_PATH, post(message_handler))
        .route("/messages", post(message_handler))
        .route("/api/mcp", post(mcp_json_rpc_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state)
}

pub async fn run_http_server<A>(bind_addr: A, app_state: AppState) -> anyhow::Result<()>
where
    A: tokio::net::ToSocketAddrs + std::fmt::Debug,
{
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to address {bind_addr:?}"))?;
    let local_addr = listener.local_addr().context("Failed to read bound address")?;
    info!(address = %local_addr, "Starting HTTP server (SSE on /sse, JSON-RPC on /api/mcp)");
    axum::serve(listener, app).await.context("HTTP server error")?;

    Ok(())
}

// RAII guard to ensure connection cleanup from DashMap
struct ConnectionGuard {
    session_id: Uuid,
    active_connections: ConnectionRegistry,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        info!(session_id = %self.session_id, "Removing SSE session from active list");
        self.active_connections.remove(&self.session_id);
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[instrument(skip(app_state))]
async fn sse_handler(State(app_state): State<AppState>) -> Sse<EventStream> {
    let session_id = Uuid::new_v4();
    info!(%session_id, "New SSE connection");

    let (tx, mut rx) = mpsc::channel::<String>(SSE_CHANNEL_CAPACITY);
    app_state.active_connections.insert(session_id, tx);

    let guard = ConnectionGuard {
        session_id,
        active_connections: app_state.active_connections.clone(),
    };

    let endpoint = format!("{MESSAGES_PATH}?{SESSION_ID_PARAM}={session_id}");
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));

        while let Some(msg) = rx.recv().await {
            yield Ok(Event::default().event("message").data(msg));
        }
        info!(%session_id, "SSE stream ended");
    };

    Sse::new(Box::pin(stream) as EventStream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("ping"))
}

#[instrument(skip(app_state, params, body))]
async fn message_handler(
    State(app_state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    let Some(session_id) = params.get(SESSION_ID_PARAM).and_then(|s| Uuid::parse_str(s).ok()) else {
        warn!("Missing or invalid session_id");
        return (StatusCode::BAD_REQUEST, "Missing or invalid session_id").into_response();
    };

    let Some(tx) = app_state.active_connections.get(&session_id).map(|e| e.value().clone()) else {
        warn!(%session_id, "Session not found");
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    debug!(%session_id, body_len = body.len(), "Queued message for SSE session");
    let server = Arc::clone(&app_state.server);
    tokio::spawn(async move {
        if let Some(response) = server.process_json_rpc_request_str(&body).await {
            if tx.send(response).await.is_err() {
                warn!(%session_id, "SSE client went away before the response was sent");
            }
        }
    });

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

async fn mcp_json_rpc_handler(State(app_state): State<AppState>, body: String) -> Response {
    let request = match serde_json::from_str::<McpRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Error handling MCP request");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    info!(method = %request.method, "Handling MCP JSON-RPC request");
    match app_state.server.respond(request).await {
        Some(response) => Json(response).into_response(),
        // No response for notifications
        None => Json(Value::Null).into_response(),
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
