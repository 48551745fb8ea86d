//! MCP request tracing middleware.
//!
//! [`McpTracingLayer`] wraps the router and opens one `mcp_request` span per
//! request with the method, request id, operation target and the calling
//! tenant. Completion is logged with the duration; JSON-RPC errors are logged
//! at `WARN` with their code.
//!
//! ```rust
//! use tower::ServiceBuilder;
//! use calendar_mcp::{McpRouter, McpTracingLayer};
//!
//! let service = ServiceBuilder::new()
//!     .layer(McpTracingLayer::new())
//!     .service(McpRouter::new());
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::Layer;
use tower_service::Service;
use tracing::{Instrument, Level, Span};

use crate::identity::TenantScope;
use crate::protocol::McpRequest;
use crate::router::{RouterRequest, RouterResponse};

/// Tower layer that adds structured tracing to MCP requests.
#[derive(Debug, Clone, Copy)]
pub struct McpTracingLayer {
    level: Level,
}

impl Default for McpTracingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl McpTracingLayer {
    /// Log at `INFO`.
    pub fn new() -> Self {
        Self { level: Level::INFO }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl<S> Layer<S> for McpTracingLayer {
    type Service = McpTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        McpTracingService {
            inner,
            level: self.level,
        }
    }
}

/// Service created by [`McpTracingLayer`].
#[derive(Debug, Clone)]
pub struct McpTracingService<S> {
    inner: S,
    level: Level,
}

impl<S> Service<RouterRequest> for McpTracingService<S>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = RouterResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<RouterResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RouterRequest) -> Self::Future {
        let method = req.inner.method_name().to_string();
        let request_id = req.id.to_string();
        let target = operation_target(&req.inner);
        let tenant = tenant_label(req.extensions.get::<TenantScope>());

        let span = create_span(self.level, &method, &request_id, target.as_deref(), &tenant);

        let start = Instant::now();
        let fut = self.inner.call(req);
        let level = self.level;

        Box::pin(
            async move {
                let result = fut.await;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

                if let Ok(response) = &result {
                    match &response.inner {
                        Ok(_) => log_success(level, &method, duration_ms),
                        Err(err) => tracing::warn!(
                            method = %method,
                            error_code = err.code,
                            error_message = %err.message,
                            duration_ms,
                            "MCP request failed"
                        ),
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

/// The tool name or resource URI a request addresses.
fn operation_target(req: &McpRequest) -> Option<String> {
    match req {
        McpRequest::CallTool(params) => Some(params.name.clone()),
        McpRequest::ReadResource(params) => Some(params.uri.clone()),
        McpRequest::Unknown { method, .. } => Some(method.clone()),
        _ => None,
    }
}

fn tenant_label(scope: Option<&TenantScope>) -> String {
    match scope {
        Some(TenantScope::Tenant(identity)) => identity.subject().to_string(),
        Some(TenantScope::Unscoped) => "<unscoped>".to_string(),
        None => "<none>".to_string(),
    }
}

fn create_span(
    level: Level,
    method: &str,
    request_id: &str,
    target: Option<&str>,
    tenant: &str,
) -> Span {
    match level {
        Level::TRACE => tracing::trace_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            target,
            tenant = %tenant,
        ),
        Level::DEBUG => tracing::debug_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            target,
            tenant = %tenant,
        ),
        Level::INFO => tracing::info_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            target,
            tenant = %tenant,
        ),
        Level::WARN => tracing::warn_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            target,
            tenant = %tenant,
        ),
        Level::ERROR => tracing::error_span!(
            "mcp_request",
            method = %method,
            request_id = %request_id,
            target,
            tenant = %tenant,
        ),
    }
}

fn log_success(level: Level, method: &str, duration_ms: f64) {
    match level {
        Level::TRACE => tracing::trace!(method = %method, duration_ms, "MCP request completed"),
        Level::DEBUG => tracing::debug!(method = %method, duration_ms, "MCP request completed"),
        Level::INFO => tracing::info!(method = %method, duration_ms, "MCP request completed"),
        Level::WARN => tracing::warn!(method = %method, duration_ms, "MCP request completed"),
        Level::ERROR => tracing::error!(method = %method, duration_ms, "MCP request completed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Extensions;
    use crate::identity::TenantIdentity;
    use crate::protocol::{CallToolParams, ReadResourceParams, RequestId};
    use crate::router::McpRouter;
    use tower::ServiceExt;

    #[test]
    fn test_layer_level() {
        assert_eq!(McpTracingLayer::new().level, Level::INFO);
        assert_eq!(McpTracingLayer::new().level(Level::DEBUG).level, Level::DEBUG);
    }

    #[test]
    fn test_operation_target() {
        let req = McpRequest::CallTool(CallToolParams {
            name: "get_event".to_string(),
            arguments: serde_json::Value::Null,
        });
        assert_eq!(operation_target(&req).as_deref(), Some("get_event"));

        let req = McpRequest::ReadResource(ReadResourceParams {
            uri: "oauth-protected-resource://metadata".to_string(),
        });
        assert_eq!(
            operation_target(&req).as_deref(),
            Some("oauth-protected-resource://metadata")
        );

        assert_eq!(operation_target(&McpRequest::Ping), None);
    }

    #[test]
    fn test_tenant_label() {
        let identity = TenantIdentity::from_header("user0").unwrap();
        assert_eq!(tenant_label(Some(&TenantScope::Tenant(identity))), "user0");
        assert_eq!(tenant_label(Some(&TenantScope::Unscoped)), "<unscoped>");
        assert_eq!(tenant_label(None), "<none>");
    }

    #[tokio::test]
    async fn test_traced_router_passes_responses_through() {
        let service = McpTracingLayer::new().layer(McpRouter::new());
        let resp = service
            .oneshot(RouterRequest {
                id: RequestId::Number(7),
                inner: McpRequest::Ping,
                extensions: Extensions::new(),
            })
            .await
            .unwrap();
        assert_eq!(resp.id, RequestId::Number(7));
        assert!(resp.inner.is_ok());
    }
}
