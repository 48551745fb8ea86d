//! Streamable HTTP transport for MCP
//!
//! Routes:
//! - `POST /` and `POST /mcp`: JSON-RPC messages
//! - `DELETE /mcp`: end a session
//! - `GET /.well-known/oauth-protected-resource`: metadata document (public)
//! - `GET /health`: liveness (public)
//!
//! Every other request passes through the [`IdentityLayer`] first: the caller
//! gets a 401 challenge before any body is parsed or session created. Sessions
//! are keyed by the `mcp-session-id` header and remember the tenant that
//! created them; presenting a session id as anyone else reads as "session not
//! found".
//!
//! # Example
//!
//! ```rust,no_run
//! use calendar_mcp::McpRouter;
//! use calendar_mcp::identity::IdentityResolver;
//! use calendar_mcp::oauth::ProtectedResourceMetadata;
//! use calendar_mcp::transport::HttpTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let metadata = ProtectedResourceMetadata::new("http://localhost:3000");
//!     let transport = HttpTransport::new(
//!         McpRouter::new(),
//!         IdentityResolver::header_chain(),
//!         metadata,
//!     );
//!     transport.serve("127.0.0.1:3000").await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    Extension, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::RwLock;

use crate::error::{Error, JsonRpcError, Result};
use crate::identity::{IdentityResolver, TenantScope};
use crate::oauth::metadata::WELL_KNOWN_PATH;
use crate::oauth::{ChallengeResponder, IdentityLayer, ProtectedResourceMetadata};
use crate::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcResponse, McpNotification, RequestId,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::router::McpRouter;
use crate::session::SessionOwner;

use super::scoped_service;

/// Header name for MCP session ID
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header name for MCP protocol version
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Unauthenticated liveness probe.
pub const HEALTH_PATH: &str = "/health";

/// Default session TTL: 30 minutes
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// Default maximum number of sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

#[derive(Debug)]
struct Session {
    id: String,
    /// Per-session router; tools are shared, lifecycle state is not
    router: McpRouter,
    owner: SessionOwner,
    /// Milliseconds since UNIX epoch
    last_accessed: AtomicU64,
}

impl Session {
    fn new(router: McpRouter, owner: SessionOwner) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            router,
            owner,
            last_accessed: AtomicU64::new(current_timestamp_ms()),
        }
    }

    fn touch(&self) {
        self.last_accessed
            .store(current_timestamp_ms(), Ordering::Relaxed);
    }

    fn is_expired(&self, ttl_ms: u64) -> bool {
        let last = self.last_accessed.load(Ordering::Relaxed);
        current_timestamp_ms().saturating_sub(last) > ttl_ms
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug)]
struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ttl_ms: u64,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl_ms: DEFAULT_SESSION_TTL_SECS * 1000,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl SessionStore {
    fn new() -> Self {
        Self::default()
    }

    fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    async fn create(&self, router: McpRouter, owner: SessionOwner) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_sessions {
            tracing::warn!(
                max = self.max_sessions,
                current = sessions.len(),
                "Session limit reached, rejecting new session"
            );
            return None;
        }

        let session = Arc::new(Session::new(router, owner));
        sessions.insert(session.id.clone(), session.clone());
        tracing::debug!(session_id = %session.id, total = sessions.len(), "Created new session");
        Some(session)
    }

    /// Look up a live session on behalf of `scope`.
    ///
    /// A session owned by someone else is indistinguishable from a missing one.
    async fn get(&self, id: &str, scope: &TenantScope) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id)?;
        if session.is_expired(self.ttl_ms) {
            tracing::debug!(session_id = %id, "Session expired on access");
            return None;
        }
        if !session.owner.admits(scope) {
            tracing::warn!(
                session_id = %id,
                tenant = ?scope.subject(),
                "Session presented by a tenant that did not create it"
            );
            return None;
        }
        session.touch();
        Some(session.clone())
    }

    async fn remove(&self, id: &str, scope: &TenantScope) -> bool {
        let mut sessions = self.sessions.write().await;
        let owned = sessions.get(id).is_some_and(|s| s.owner.admits(scope));
        if !owned {
            return false;
        }
        sessions.remove(id);
        tracing::debug!(session_id = %id, total = sessions.len(), "Removed session");
        true
    }

    async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(self.ttl_ms));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = sessions.len(),
                "Cleaned up expired sessions"
            );
        }
        removed
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

struct AppState {
    /// Template router; each session gets a fresh-session copy
    router_template: McpRouter,
    sessions: SessionStore,
    metadata: ProtectedResourceMetadata,
    validate_origin: bool,
    allowed_origins: Vec<String>,
}

/// HTTP transport for MCP servers
///
/// Sessions are cleaned up after the configured TTL (default 30 minutes).
///
/// ```rust,no_run
/// # use calendar_mcp::McpRouter;
/// # use calendar_mcp::identity::IdentityResolver;
/// # use calendar_mcp::oauth::ProtectedResourceMetadata;
/// # use calendar_mcp::transport::HttpTransport;
/// # use std::time::Duration;
/// let metadata = ProtectedResourceMetadata::new("http://localhost:3000");
/// let transport = HttpTransport::new(McpRouter::new(), IdentityResolver::header_chain(), metadata)
///     .session_ttl(Duration::from_secs(60 * 60))
///     .max_sessions(1000);
/// ```
pub struct HttpTransport {
    router: McpRouter,
    resolver: IdentityResolver,
    metadata: ProtectedResourceMetadata,
    validate_origin: bool,
    allowed_origins: Vec<String>,
    session_ttl: Duration,
    max_sessions: usize,
}

impl HttpTransport {
    pub fn new(
        router: McpRouter,
        resolver: IdentityResolver,
        metadata: ProtectedResourceMetadata,
    ) -> Self {
        Self {
            router,
            resolver,
            metadata,
            validate_origin: true,
            allowed_origins: vec![],
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    /// Inactive sessions are dropped after this long.
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// New sessions beyond this many get a 503.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Disable Origin header validation (not recommended for production)
    pub fn disable_origin_validation(mut self) -> Self {
        self.validate_origin = false;
        self
    }

    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Build the axum router for this transport.
    ///
    /// This also starts background tasks that periodically clean up expired
    /// sessions and, for bearer identity, stale introspection results.
    pub fn into_router(self) -> Router {
        if let Some(cache) = self.resolver.introspection_cache() {
            cache.spawn_purge_task(cache.ttl().max(Duration::from_secs(30)));
        }
        let identity =
            IdentityLayer::new(self.resolver.clone(), ChallengeResponder::new(&self.metadata))
                .public_path(HEALTH_PATH);
        let state = self.create_app_state();

        Router::new()
            .route("/", post(handle_post))
            .route("/mcp", post(handle_post).delete(handle_delete))
            .route(WELL_KNOWN_PATH, get(handle_metadata))
            .route(HEALTH_PATH, get(handle_health))
            .layer(identity)
            .with_state(state)
    }

    fn create_app_state(self) -> Arc<AppState> {
        let sessions = SessionStore::new()
            .with_ttl(self.session_ttl)
            .with_max_sessions(self.max_sessions);

        let state = Arc::new(AppState {
            router_template: self.router,
            sessions,
            metadata: self.metadata,
            validate_origin: self.validate_origin,
            allowed_origins: self.allowed_origins,
        });

        let cleanup_state = state.clone();
        let cleanup_interval = (self.session_ttl / 2).max(Duration::from_secs(60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                interval.tick().await;
                cleanup_state.sessions.cleanup_expired().await;
            }
        });

        state
    }

    /// Bind `addr` and serve until the listener fails.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!(
            addr = %addr,
            metadata = %self.metadata.metadata_url(),
            "MCP HTTP transport listening"
        );

        let router = self.into_router();
        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Transport(format!("Server error: {}", e)))?;

        Ok(())
    }
}

/// Returns Some(Response) if the Origin header is not acceptable.
fn validate_origin(headers: &HeaderMap, state: &AppState) -> Option<Response> {
    if !state.validate_origin {
        return None;
    }

    let origin = headers.get(header::ORIGIN)?;
    let origin = origin.to_str().unwrap_or("");

    // No allow-list: only same-origin requests, which carry no Origin header
    if state.allowed_origins.is_empty() {
        return Some((StatusCode::FORBIDDEN, "Cross-origin requests not allowed").into_response());
    }

    if !state
        .allowed_origins
        .iter()
        .any(|o| o == origin || o == "*")
    {
        return Some((StatusCode::FORBIDDEN, "Origin not allowed").into_response());
    }

    None
}

fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn get_protocol_version(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_PROTOCOL_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// A single `initialize` request, or a batch containing one.
fn is_initialize_request(body: &serde_json::Value) -> bool {
    let is_init = |v: &serde_json::Value| v.get("method").and_then(|m| m.as_str()) == Some("initialize");
    match body {
        serde_json::Value::Array(items) => items.iter().any(is_init),
        other => is_init(other),
    }
}

async fn handle_post(
    State(state): State<Arc<AppState>>,
    Extension(scope): Extension<TenantScope>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Some(resp) = validate_origin(&headers, &state) {
        return resp;
    }

    let parsed: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            return json_rpc_error_response(
                None,
                JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
            );
        }
    };

    let is_init = is_initialize_request(&parsed);

    let session = if is_init {
        let router = state.router_template.with_fresh_session();
        match state.sessions.create(router, SessionOwner::of(&scope)).await {
            Some(s) => s,
            None => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Server at capacity, try again later",
                )
                    .into_response();
            }
        }
    } else {
        let Some(session_id) = get_session_id(&headers) else {
            return (StatusCode::BAD_REQUEST, "Missing MCP-Session-Id header").into_response();
        };

        match state.sessions.get(&session_id, &scope).await {
            Some(s) => s,
            None => {
                return (StatusCode::NOT_FOUND, "Session not found or expired").into_response();
            }
        }
    };

    if !is_init
        && let Some(version) = get_protocol_version(&headers)
        && !SUPPORTED_PROTOCOL_VERSIONS.contains(&version.as_str())
    {
        return (
            StatusCode::BAD_REQUEST,
            format!("Unsupported protocol version: {}", version),
        )
            .into_response();
    }

    // Notifications carry no id and get no body back
    if parsed.get("id").is_none()
        && let Ok(notification) = serde_json::from_value::<JsonRpcNotification>(parsed.clone())
    {
        if let Ok(mcp_notification) = McpNotification::from_jsonrpc(&notification) {
            session.router.handle_notification(mcp_notification);
        }
        return StatusCode::ACCEPTED.into_response();
    }

    let message: JsonRpcMessage = match serde_json::from_value(parsed) {
        Ok(m) => m,
        Err(e) => {
            return json_rpc_error_response(
                None,
                JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
            );
        }
    };

    let mut service = scoped_service(session.router.clone(), scope);
    let response = service.call_message(message).await;

    let mut resp = axum::Json(response).into_response();
    if is_init && let Ok(value) = HeaderValue::from_str(&session.id) {
        resp.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    resp
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Extension(scope): Extension<TenantScope>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = validate_origin(&headers, &state) {
        return resp;
    }

    let Some(session_id) = get_session_id(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing MCP-Session-Id header").into_response();
    };

    if state.sessions.remove(&session_id, &scope).await {
        tracing::info!(session_id = %session_id, "Session terminated");
        StatusCode::OK.into_response()
    } else {
        (StatusCode::NOT_FOUND, "Session not found").into_response()
    }
}

async fn handle_metadata(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(state.metadata.clone()).into_response()
}

async fn handle_health() -> Response {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

fn json_rpc_error_response(id: Option<RequestId>, error: JsonRpcError) -> Response {
    axum::Json(JsonRpcResponse::error(id, error)).into_response()
}
