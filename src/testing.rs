//! Test utilities for MCP servers.
//!
//! [`TestClient`] drives an [`McpRouter`] the way a transport would, under a
//! fixed [`TenantScope`], without hand-building JSON-RPC envelopes.
//!
//! ```rust
//! use std::sync::Arc;
//! use calendar_mcp::TestClient;
//! use calendar_mcp::identity::{TenantIdentity, TenantScope};
//! use calendar_mcp::oauth::ProtectedResourceMetadata;
//! use calendar_mcp::store::MemoryStore;
//! use calendar_mcp::tenancy::TenancyEnforcer;
//! use calendar_mcp::tools::calendar_router;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let enforcer = TenancyEnforcer::new(Arc::new(MemoryStore::new()));
//! let metadata = ProtectedResourceMetadata::new("http://localhost:3000");
//! let router = calendar_router(enforcer, &metadata).unwrap();
//!
//! let scope = TenantScope::from(TenantIdentity::from_header("user0").unwrap());
//! let mut client = TestClient::new(router, scope);
//! client.initialize().await;
//!
//! let listed = client.call_tool_json("get_all_events", json!({})).await;
//! assert_eq!(listed["count"], 0);
//! # }
//! ```

use serde_json::Value;
use tower::Layer;

use crate::identity::TenantScope;
use crate::jsonrpc::JsonRpcService;
use crate::protocol::{
    CallToolResult, JsonRpcRequest, JsonRpcResponse, McpNotification, ReadResourceResult,
};
use crate::router::McpRouter;
use crate::tracing_layer::McpTracingLayer;
use crate::transport::{McpService, scoped_service};

/// An ergonomic test client for MCP servers.
///
/// Methods that expect success panic on JSON-RPC errors, which is what test
/// code wants.
pub struct TestClient {
    service: JsonRpcService<McpService>,
    router: McpRouter,
    next_id: i64,
}

impl TestClient {
    /// A client whose every request is made under `scope`.
    pub fn new(router: McpRouter, scope: TenantScope) -> Self {
        let router = router.with_fresh_session();
        let service = scoped_service(router.clone(), scope);
        Self {
            service,
            router,
            next_id: 1,
        }
    }

    /// A client with no tenant scope at all, as a transport that skipped
    /// identity resolution would produce.
    pub fn without_scope(router: McpRouter) -> Self {
        let router = router.with_fresh_session();
        let service = JsonRpcService::new(McpTracingLayer::new().layer(router.clone()));
        Self {
            service,
            router,
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send `initialize` followed by the initialized notification.
    ///
    /// Returns the raw initialize result. Panics if initialization fails.
    pub async fn initialize(&mut self) -> Value {
        let id = self.next_id();
        let req = JsonRpcRequest::new(id, "initialize").with_params(serde_json::json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {
                "name": "test-client",
                "version": "1.0.0"
            }
        }));

        let result = self.send_request_inner(req).await;
        self.router.handle_notification(McpNotification::Initialized);
        result
    }

    /// Tool definitions as raw JSON.
    pub async fn list_tools(&mut self) -> Vec<Value> {
        let result = self.send_request("tools/list", None).await;
        result
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }

    /// Call a tool by name. Panics on JSON-RPC errors; tool errors come back
    /// with `is_error` set.
    pub async fn call_tool(&mut self, name: &str, args: Value) -> CallToolResult {
        let raw = self
            .send_request(
                "tools/call",
                Some(serde_json::json!({
                    "name": name,
                    "arguments": args,
                })),
            )
            .await;
        serde_json::from_value(raw).expect("failed to deserialize CallToolResult")
    }

    /// Call a tool and return its structured content.
    ///
    /// Panics if the tool reports an error.
    pub async fn call_tool_json(&mut self, name: &str, args: Value) -> Value {
        let result = self.call_tool(name, args).await;
        assert!(
            !result.is_error,
            "tool '{}' returned an error: {}",
            name,
            result.first_text().unwrap_or_default()
        );
        result
            .structured_content
            .expect("tool result has no structured content")
    }

    /// Call a tool and expect a JSON-RPC error; returns the error object.
    pub async fn call_tool_expect_rpc_error(&mut self, name: &str, args: Value) -> Value {
        self.send_request_expect_error(
            "tools/call",
            Some(serde_json::json!({
                "name": name,
                "arguments": args,
            })),
        )
        .await
    }

    pub async fn list_resources(&mut self) -> Vec<Value> {
        let result = self.send_request("resources/list", None).await;
        result
            .get("resources")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    }

    pub async fn read_resource(&mut self, uri: &str) -> ReadResourceResult {
        let raw = self
            .send_request("resources/read", Some(serde_json::json!({ "uri": uri })))
            .await;
        serde_json::from_value(raw).expect("failed to deserialize ReadResourceResult")
    }

    /// Send an arbitrary request and expect success.
    pub async fn send_request(&mut self, method: &str, params: Option<Value>) -> Value {
        let id = self.next_id();
        let mut req = JsonRpcRequest::new(id, method);
        if let Some(p) = params {
            req = req.with_params(p);
        }
        self.send_request_inner(req).await
    }

    /// Send an arbitrary request and expect a JSON-RPC error object back.
    pub async fn send_request_expect_error(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Value {
        let id = self.next_id();
        let mut req = JsonRpcRequest::new(id, method);
        if let Some(p) = params {
            req = req.with_params(p);
        }

        match self.service.call_single(req).await {
            JsonRpcResponse::Error(e) => {
                serde_json::to_value(&e.error).expect("failed to serialize error")
            }
            JsonRpcResponse::Result(r) => {
                panic!(
                    "expected request '{}' to fail, but it succeeded: {:?}",
                    method, r.result
                );
            }
        }
    }

    async fn send_request_inner(&mut self, req: JsonRpcRequest) -> Value {
        let method = req.method.clone();
        match self.service.call_single(req).await {
            JsonRpcResponse::Result(r) => r.result,
            JsonRpcResponse::Error(e) => panic!(
                "request '{}' failed with JSON-RPC error {}: {}",
                method, e.error.code, e.error.message
            ),
        }
    }
}
