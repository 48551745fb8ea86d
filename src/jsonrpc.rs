//! JSON-RPC 2.0 service layer
//!
//! [`JsonRpcService`] turns JSON-RPC messages into [`RouterRequest`]s and back.
//! It handles:
//! - Single and batch requests (batches run concurrently)
//! - JSON-RPC version validation
//! - Error conversion to JSON-RPC error responses
//!
//! Extensions attached with [`JsonRpcService::with_extensions`] are copied into
//! every router request, which is how a transport hands the caller's
//! `TenantScope` to the tools.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Layer;
use tower_service::Service;

use crate::context::Extensions;
use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseMessage, McpRequest,
};
use crate::router::{RouterRequest, RouterResponse};

/// Tower layer that adds JSON-RPC 2.0 framing to an MCP service.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcLayer {
    _priv: (),
}

impl JsonRpcLayer {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl<S> Layer<S> for JsonRpcLayer {
    type Service = JsonRpcService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JsonRpcService::new(inner)
    }
}

/// Service that handles JSON-RPC framing.
///
/// ```rust
/// use calendar_mcp::{JsonRpcService, McpRouter};
///
/// let router = McpRouter::new().server_info("my-server", "1.0.0");
/// let service = JsonRpcService::new(router);
/// ```
#[derive(Clone)]
pub struct JsonRpcService<S> {
    inner: S,
    extensions: Extensions,
}

impl<S> JsonRpcService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            extensions: Extensions::new(),
        }
    }

    /// Attach values every request routed through this service carries.
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }
}

impl<S> JsonRpcService<S>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    /// Process a single JSON-RPC request
    pub async fn call_single(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        process_single_request(self.inner.clone(), req, self.extensions.clone()).await
    }

    /// Process a batch of JSON-RPC requests concurrently
    pub async fn call_batch(
        &mut self,
        requests: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>> {
        if requests.is_empty() {
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                "Empty batch request",
            )));
        }

        let futures: Vec<_> = requests
            .into_iter()
            .map(|req| process_single_request(self.inner.clone(), req, self.extensions.clone()))
            .collect();

        Ok(futures::future::join_all(futures).await)
    }

    /// Process a JSON-RPC message (single or batch)
    pub async fn call_message(&mut self, msg: JsonRpcMessage) -> JsonRpcResponseMessage {
        match msg {
            JsonRpcMessage::Single(req) => {
                JsonRpcResponseMessage::Single(self.call_single(req).await)
            }
            JsonRpcMessage::Batch(requests) => match self.call_batch(requests).await {
                Ok(responses) => JsonRpcResponseMessage::Batch(responses),
                Err(Error::JsonRpc(err)) => {
                    JsonRpcResponseMessage::Single(JsonRpcResponse::error(None, err))
                }
                Err(e) => JsonRpcResponseMessage::Single(JsonRpcResponse::error(
                    None,
                    JsonRpcError::internal_error(e.to_string()),
                )),
            },
        }
    }
}

impl<S> Service<JsonRpcMessage> for JsonRpcService<S>
where
    S: Service<RouterRequest, Response = RouterResponse, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = JsonRpcResponseMessage;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, msg: JsonRpcMessage) -> Self::Future {
        let mut this = self.clone();
        Box::pin(async move { Ok(this.call_message(msg).await) })
    }
}

async fn process_single_request<S>(
    mut inner: S,
    req: JsonRpcRequest,
    extensions: Extensions,
) -> JsonRpcResponse
where
    S: Service<RouterRequest, Response = RouterResponse, Error = Infallible> + Send + 'static,
    S::Future: Send,
{
    if let Err(e) = req.validate() {
        return JsonRpcResponse::error(Some(req.id), e);
    }

    let mcp_request = match McpRequest::from_jsonrpc(&req) {
        Ok(r) => r,
        Err(e) => {
            return JsonRpcResponse::error(
                Some(req.id),
                JsonRpcError::invalid_params(e.to_string()),
            );
        }
    };

    let router_req = RouterRequest {
        id: req.id,
        inner: mcp_request,
        extensions,
    };

    match inner.call(router_req).await {
        Ok(response) => response.into_jsonrpc(),
        Err(never) => match never {},
    }
}
