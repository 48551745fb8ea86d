//! MCP Router - routes requests to tools and resources
//!
//! The router implements Tower's `Service` trait, making it composable with
//! standard tower middleware. Whatever the transport put into a
//! [`RouterRequest`]'s extensions is handed to tool handlers through their
//! [`RequestContext`]; `tools/call` is refused outright when no
//! [`TenantScope`] was established.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use tower_service::Service;

use crate::context::{CancellationToken, Extensions, RequestContext};
use crate::error::{Error, ErrorCode, JsonRpcError, Result};
use crate::identity::TenantScope;
use crate::protocol::*;
use crate::resource::Resource;
use crate::session::SessionState;
use crate::tool::Tool;

/// MCP Router that dispatches requests to registered handlers
///
/// # Example
///
/// ```rust
/// use calendar_mcp::{CallToolResult, McpRouter, RequestContext, ToolBuilder};
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize, JsonSchema)]
/// struct Input { value: String }
///
/// let tool = ToolBuilder::new("echo")
///     .description("Echo input")
///     .handler_with_context(|_ctx: RequestContext, i: Input| async move {
///         Ok(CallToolResult::text(i.value))
///     })
///     .build()
///     .unwrap();
///
/// let router = McpRouter::new()
///     .server_info("my-server", "1.0.0")
///     .tool(tool);
/// ```
#[derive(Clone)]
pub struct McpRouter {
    inner: Arc<McpRouterInner>,
    session: SessionState,
    /// In-flight requests of this session, for `notifications/cancelled`
    in_flight: Arc<RwLock<HashMap<RequestId, CancellationToken>>>,
}

impl std::fmt::Debug for McpRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpRouter")
            .field("server_name", &self.inner.server_name)
            .field("server_version", &self.inner.server_version)
            .field("tools_count", &self.inner.tools.len())
            .field("resources_count", &self.inner.resources.len())
            .field("session_phase", &self.session.phase())
            .finish()
    }
}

/// Configuration shared across clones
#[derive(Clone)]
struct McpRouterInner {
    server_name: String,
    server_version: String,
    instructions: Option<String>,
    tools: HashMap<String, Arc<Tool>>,
    resources: HashMap<String, Arc<Resource>>,
}

impl McpRouter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(McpRouterInner {
                server_name: env!("CARGO_PKG_NAME").to_string(),
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                instructions: None,
                tools: HashMap::new(),
                resources: HashMap::new(),
            }),
            session: SessionState::new(),
            in_flight: Arc::default(),
        }
    }

    /// A router with the same tools and resources but a fresh session.
    ///
    /// Network transports call this once per client session.
    pub fn with_fresh_session(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            session: SessionState::new(),
            in_flight: Arc::default(),
        }
    }

    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        let inner = Arc::make_mut(&mut self.inner);
        inner.server_name = name.into();
        inner.server_version = version.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).instructions = Some(instructions.into());
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        Arc::make_mut(&mut self.inner)
            .tools
            .insert(tool.name.clone(), Arc::new(tool));
        self
    }

    pub fn tools(self, tools: impl IntoIterator<Item = Tool>) -> Self {
        tools.into_iter().fold(self, |router, tool| router.tool(tool))
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        Arc::make_mut(&mut self.inner)
            .resources
            .insert(resource.uri.clone(), Arc::new(resource));
        self
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    fn create_context(&self, request_id: RequestId, extensions: Extensions) -> RequestContext {
        let ctx = RequestContext::new(request_id.clone()).with_extensions(Arc::new(extensions));
        if let Ok(mut in_flight) = self.in_flight.write() {
            in_flight.insert(request_id, ctx.cancellation_token());
        }
        ctx
    }

    fn complete_request(&self, request_id: &RequestId) {
        if let Ok(mut in_flight) = self.in_flight.write() {
            in_flight.remove(request_id);
        }
    }

    fn cancel_request(&self, request_id: &RequestId) -> bool {
        let Ok(in_flight) = self.in_flight.read() else {
            return false;
        };
        let Some(token) = in_flight.get(request_id) else {
            return false;
        };
        token.cancel();
        true
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            tools: (!self.inner.tools.is_empty()).then(ToolsCapability::default),
            resources: (!self.inner.resources.is_empty()).then(ResourcesCapability::default),
        }
    }

    async fn handle(
        &self,
        request_id: RequestId,
        request: McpRequest,
        extensions: Extensions,
    ) -> Result<McpResponse> {
        let method = request.method_name();
        if !self.session.is_request_allowed(method) {
            tracing::warn!(
                method = %method,
                phase = ?self.session.phase(),
                "Request rejected: session not initialized"
            );
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(format!(
                "Session not initialized. Only 'initialize' and 'ping' are allowed before initialization. Got: {}",
                method
            ))));
        }

        match request {
            McpRequest::Initialize(params) => {
                tracing::info!(
                    client = %params.client_info.name,
                    version = %params.client_info.version,
                    "Client initializing"
                );

                let protocol_version =
                    if SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
                        params.protocol_version
                    } else {
                        LATEST_PROTOCOL_VERSION.to_string()
                    };

                self.session.mark_initializing();

                Ok(McpResponse::Initialize(InitializeResult {
                    protocol_version,
                    capabilities: self.capabilities(),
                    server_info: Implementation {
                        name: self.inner.server_name.clone(),
                        version: self.inner.server_version.clone(),
                    },
                    instructions: self.inner.instructions.clone(),
                }))
            }

            McpRequest::ListTools(_params) => {
                let mut tools: Vec<ToolDefinition> =
                    self.inner.tools.values().map(|t| t.definition()).collect();
                tools.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(McpResponse::ListTools(ListToolsResult {
                    tools,
                    next_cursor: None,
                }))
            }

            McpRequest::CallTool(params) => {
                let tool =
                    self.inner.tools.get(&params.name).ok_or_else(|| {
                        Error::JsonRpc(JsonRpcError::method_not_found(&params.name))
                    })?;

                if !extensions.contains::<TenantScope>() {
                    tracing::warn!(tool = %params.name, "Tool call without tenant identity");
                    return Err(Error::JsonRpc(JsonRpcError::new(
                        ErrorCode::Unauthorized,
                        "No tenant identity established",
                    )));
                }

                let ctx = self.create_context(request_id, extensions);
                let cancellation = ctx.cancellation_token();
                tracing::debug!(tool = %params.name, "Calling tool");
                tokio::select! {
                    result = tool.call_with_context(ctx, params.arguments) => {
                        Ok(McpResponse::CallTool(result))
                    }
                    _ = cancellation.cancelled() => {
                        tracing::info!(tool = %params.name, "Tool call abandoned after cancellation");
                        Err(Error::JsonRpc(JsonRpcError::new(
                            ErrorCode::RequestCancelled,
                            "Request cancelled",
                        )))
                    }
                }
            }

            McpRequest::ListResources(_params) => {
                let resources: Vec<ResourceDefinition> = self
                    .inner
                    .resources
                    .values()
                    .map(|r| r.definition())
                    .collect();
                Ok(McpResponse::ListResources(ListResourcesResult {
                    resources,
                    next_cursor: None,
                }))
            }

            McpRequest::ReadResource(params) => {
                let resource = self.inner.resources.get(&params.uri).ok_or_else(|| {
                    Error::JsonRpc(JsonRpcError::invalid_params(format!(
                        "Resource not found: {}",
                        params.uri
                    )))
                })?;
                tracing::debug!(uri = %params.uri, "Reading resource");
                Ok(McpResponse::ReadResource(resource.read().await?))
            }

            McpRequest::Ping => Ok(McpResponse::Pong(EmptyResult {})),

            McpRequest::Unknown { method, .. } => {
                Err(Error::JsonRpc(JsonRpcError::method_not_found(&method)))
            }
        }
    }

    /// Handle an MCP notification (no response expected)
    pub fn handle_notification(&self, notification: McpNotification) {
        match notification {
            McpNotification::Initialized => {
                if self.session.mark_initialized() {
                    tracing::info!("Session initialized, entering operation phase");
                } else {
                    tracing::warn!(
                        "Received initialized notification in unexpected state: {:?}",
                        self.session.phase()
                    );
                }
            }
            McpNotification::Cancelled(params) => {
                if self.cancel_request(&params.request_id) {
                    tracing::info!(
                        request_id = ?params.request_id,
                        reason = ?params.reason,
                        "Request cancelled"
                    );
                } else {
                    tracing::debug!(
                        request_id = ?params.request_id,
                        "Cancellation requested for unknown request"
                    );
                }
            }
            McpNotification::Unknown { method, .. } => {
                tracing::debug!(method = %method, "Unknown notification received");
            }
        }
    }
}

impl Default for McpRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Request type for the tower Service implementation
#[derive(Debug)]
pub struct RouterRequest {
    pub id: RequestId,
    pub inner: McpRequest,
    /// Values established by the transport, such as the caller's `TenantScope`.
    pub extensions: Extensions,
}

/// Response type for the tower Service implementation
#[derive(Debug)]
pub struct RouterResponse {
    pub id: RequestId,
    pub inner: std::result::Result<McpResponse, JsonRpcError>,
}

impl RouterResponse {
    pub fn into_jsonrpc(self) -> JsonRpcResponse {
        match self.inner {
            Ok(response) => match serde_json::to_value(response) {
                Ok(result) => JsonRpcResponse::result(self.id, result),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                    JsonRpcResponse::error(
                        Some(self.id),
                        JsonRpcError::internal_error(format!("Serialization error: {}", e)),
                    )
                }
            },
            Err(error) => JsonRpcResponse::error(Some(self.id), error),
        }
    }
}

impl Service<RouterRequest> for McpRouter {
    type Response = RouterResponse;
    type Error = std::convert::Infallible; // Errors are in the response
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RouterRequest) -> Self::Future {
        let router = self.clone();
        let request_id = req.id.clone();
        Box::pin(async move {
            let result = router.handle(req.id, req.inner, req.extensions).await;
            router.complete_request(&request_id);
            Ok(RouterResponse {
                id: request_id,
                inner: result.map_err(|e| match e {
                    Error::JsonRpc(err) => err,
                    e => JsonRpcError::internal_error(e.to_string()),
                }),
            })
        })
    }
}
