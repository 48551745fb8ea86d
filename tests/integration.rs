//! Integration tests for calendar-mcp
//!
//! Tests the full protocol flow including session lifecycle, tool execution
//! under a tenant scope, and error handling.

mod common;

use std::sync::Arc;

use calendar_mcp::identity::{TenantIdentity, TenantScope};
use calendar_mcp::oauth::ProtectedResourceMetadata;
use calendar_mcp::protocol::{McpNotification, RequestId};
use calendar_mcp::store::MemoryStore;
use calendar_mcp::tenancy::TenancyEnforcer;
use calendar_mcp::tools::calendar_router;
use calendar_mcp::{Extensions, JsonRpcRequest, JsonRpcResponse, JsonRpcService, McpRouter};

use common::{RESOURCE, event};

// =============================================================================
// Test fixtures
// =============================================================================

fn create_test_router() -> McpRouter {
    let store = MemoryStore::with_events([
        event("evt-1", Some("user0")),
        event("evt-2", Some("user0")),
        event("evt-3", Some("user1")),
    ]);
    let metadata = ProtectedResourceMetadata::new(RESOURCE).scope("mcp:tools");
    calendar_router(TenancyEnforcer::new(Arc::new(store)), &metadata).expect("valid router")
}

fn scoped(router: &McpRouter, subject: &str) -> JsonRpcService<McpRouter> {
    let mut extensions = Extensions::new();
    extensions.insert(TenantScope::from(
        TenantIdentity::from_header(subject).expect("non-empty subject"),
    ));
    JsonRpcService::new(router.clone()).with_extensions(extensions)
}

async fn initialize(router: &McpRouter, service: &mut JsonRpcService<McpRouter>) {
    let init_req = JsonRpcRequest::new(1, "initialize").with_params(serde_json::json!({
        "protocolVersion": "2025-03-26",
        "capabilities": {},
        "clientInfo": { "name": "test", "version": "1.0" }
    }));
    service.call_single(init_req).await;
    router.handle_notification(McpNotification::Initialized);
}

fn expect_result(resp: JsonRpcResponse) -> serde_json::Value {
    match resp {
        JsonRpcResponse::Result(r) => r.result,
        JsonRpcResponse::Error(e) => panic!("Expected success, got error: {:?}", e),
    }
}

// =============================================================================
// Session lifecycle tests
// =============================================================================

#[tokio::test]
async fn test_session_lifecycle_happy_path() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");

    // 1. Initialize
    let init_req = JsonRpcRequest::new(1, "initialize").with_params(serde_json::json!({
        "protocolVersion": "2025-03-26",
        "capabilities": {},
        "clientInfo": {
            "name": "test-client",
            "version": "1.0.0"
        }
    }));

    match service.call_single(init_req).await {
        JsonRpcResponse::Result(r) => {
            assert_eq!(r.id, RequestId::Number(1));
            assert!(r.result.get("protocolVersion").is_some());
            assert_eq!(r.result["serverInfo"]["name"], "calendar-mcp");
            assert!(r.result["capabilities"].get("tools").is_some());
            assert!(r.result.get("instructions").is_some());
        }
        JsonRpcResponse::Error(e) => panic!("Expected success, got error: {:?}", e),
    }

    // 2. Initialized notification goes straight to the router
    router.handle_notification(McpNotification::Initialized);

    // 3. List tools
    let result = expect_result(service.call_single(JsonRpcRequest::new(2, "tools/list")).await);
    let tools = result["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 10);

    // 4. Call a tool
    let call_req = JsonRpcRequest::new(3, "tools/call").with_params(serde_json::json!({
        "name": "get_all_events",
        "arguments": {}
    }));
    let result = expect_result(service.call_single(call_req).await);
    assert_eq!(result["structuredContent"]["count"], 2);
}

#[tokio::test]
async fn test_session_rejects_requests_before_init() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");

    match service.call_single(JsonRpcRequest::new(1, "tools/list")).await {
        JsonRpcResponse::Error(e) => {
            assert!(e.error.message.contains("not initialized"));
        }
        JsonRpcResponse::Result(_) => panic!("Expected error for pre-init request"),
    }
}

#[tokio::test]
async fn test_ping_always_allowed() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");

    match service.call_single(JsonRpcRequest::new(1, "ping")).await {
        JsonRpcResponse::Result(_) => {}
        JsonRpcResponse::Error(e) => panic!("Ping should always work: {:?}", e),
    }
}

// =============================================================================
// Tool execution tests
// =============================================================================

#[tokio::test]
async fn test_tool_call_without_scope_is_unauthorized() {
    let router = create_test_router();
    let mut service = JsonRpcService::new(router.clone());
    initialize(&router, &mut service).await;

    let call_req = JsonRpcRequest::new(2, "tools/call").with_params(serde_json::json!({
        "name": "get_all_events",
        "arguments": {}
    }));
    match service.call_single(call_req).await {
        JsonRpcResponse::Error(e) => assert_eq!(e.error.code, -32001),
        JsonRpcResponse::Result(r) => panic!("Expected unauthorized, got {:?}", r.result),
    }
}

#[tokio::test]
async fn test_tool_not_found() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");
    initialize(&router, &mut service).await;

    let call_req = JsonRpcRequest::new(2, "tools/call").with_params(serde_json::json!({
        "name": "nonexistent",
        "arguments": {}
    }));
    match service.call_single(call_req).await {
        JsonRpcResponse::Error(e) => assert_eq!(e.error.code, -32601),
        JsonRpcResponse::Result(_) => panic!("Expected error for nonexistent tool"),
    }
}

#[tokio::test]
async fn test_tool_invalid_arguments() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");
    initialize(&router, &mut service).await;

    // Missing the required "sid"
    let call_req = JsonRpcRequest::new(2, "tools/call").with_params(serde_json::json!({
        "name": "get_event",
        "arguments": {}
    }));
    let result = expect_result(service.call_single(call_req).await);
    assert_eq!(result["isError"], true);
}

#[tokio::test]
async fn test_tool_execution_error() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");
    initialize(&router, &mut service).await;

    let call_req = JsonRpcRequest::new(2, "tools/call").with_params(serde_json::json!({
        "name": "create_event",
        "arguments": {
            "name": "Backwards",
            "content": "Ends before it starts",
            "category": "Meeting",
            "start_time": "2025-01-06 11:00:00",
            "end_time": "2025-01-06 10:00:00"
        }
    }));
    let result = expect_result(service.call_single(call_req).await);
    assert_eq!(result["isError"], true);
}

// =============================================================================
// Batch request tests
// =============================================================================

#[tokio::test]
async fn test_batch_requests_share_the_scope() {
    let router = create_test_router();
    let mut service = scoped(&router, "user1");
    initialize(&router, &mut service).await;

    let requests = vec![
        JsonRpcRequest::new(2, "tools/list"),
        JsonRpcRequest::new(3, "tools/call").with_params(serde_json::json!({
            "name": "get_all_events",
            "arguments": {}
        })),
        JsonRpcRequest::new(4, "ping"),
    ];

    let responses = service.call_batch(requests).await.unwrap();
    assert_eq!(responses.len(), 3);

    let listed = match &responses[1] {
        JsonRpcResponse::Result(r) => r.result["structuredContent"].clone(),
        JsonRpcResponse::Error(e) => panic!("Unexpected error in batch: {:?}", e),
    };
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["events"][0]["sid"], "evt-3");
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");
    assert!(service.call_batch(vec![]).await.is_err());
}

// =============================================================================
// Protocol version negotiation tests
// =============================================================================

#[tokio::test]
async fn test_protocol_version_negotiation_supported() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");

    let init_req = JsonRpcRequest::new(1, "initialize").with_params(serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {},
        "clientInfo": { "name": "test", "version": "1.0" }
    }));
    let result = expect_result(service.call_single(init_req).await);
    assert_eq!(result["protocolVersion"], "2024-11-05");
}

#[tokio::test]
async fn test_protocol_version_negotiation_unsupported_falls_back() {
    let router = create_test_router();
    let mut service = scoped(&router, "user0");

    let init_req = JsonRpcRequest::new(1, "initialize").with_params(serde_json::json!({
        "protocolVersion": "1999-01-01",
        "capabilities": {},
        "clientInfo": { "name": "test", "version": "1.0" }
    }));
    let result = expect_result(service.call_single(init_req).await);
    assert_eq!(result["protocolVersion"], "2025-03-26");
}
