//! # calendar-mcp
//!
//! A multi-tenant calendar server speaking the Model Context Protocol (MCP),
//! built on the [Tower](https://docs.rs/tower) service abstraction.
//!
//! Every tool call runs under a [`TenantScope`](identity::TenantScope): the
//! subject a request was authorized as. The scope decides which calendar
//! records the call can see or change; records of other tenants are simply
//! not there as far as the caller can tell.
//!
//! ## Layers
//!
//! - [`transport`]: stdio for a local host that already knows its user, or
//!   HTTP where every request proves its identity.
//! - [`identity`] and [`oauth`]: bearer-token introspection (RFC 7662) with a
//!   TTL cache, trusted identity headers, `401` challenges and the protected
//!   resource metadata document (RFC 9728).
//! - [`tenancy`]: the [`TenancyEnforcer`](tenancy::TenancyEnforcer) every
//!   tool goes through to reach the [`store`].
//! - [`tools`]: the calendar tools themselves.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use calendar_mcp::StdioTransport;
//! use calendar_mcp::identity::{TenantIdentity, TenantScope};
//! use calendar_mcp::oauth::ProtectedResourceMetadata;
//! use calendar_mcp::store::MemoryStore;
//! use calendar_mcp::tenancy::TenancyEnforcer;
//! use calendar_mcp::tools::calendar_router;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let enforcer = TenancyEnforcer::new(Arc::new(MemoryStore::new()));
//!     let metadata = ProtectedResourceMetadata::new("http://localhost:3000");
//!     let router = calendar_router(enforcer, &metadata)?;
//!
//!     let scope = TenantScope::from(TenantIdentity::from_header("user0").unwrap());
//!     StdioTransport::new(router, scope).run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod jsonrpc;
pub mod oauth;
pub mod protocol;
pub mod resource;
pub mod router;
pub mod secret;
pub mod session;
pub mod store;
pub mod tenancy;
pub mod testing;
pub mod tool;
pub mod tools;
pub mod tracing_layer;
pub mod transport;

// Re-exports
pub use config::{ConfigError, ServerConfig};
pub use context::{CancellationToken, Extensions, RequestContext};
pub use error::{Error, ErrorCode, JsonRpcError, Result};
pub use identity::{IdentityResolver, TenantIdentity, TenantScope};
pub use jsonrpc::{JsonRpcLayer, JsonRpcService};
pub use protocol::{
    CallToolResult, Content, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponseMessage, McpNotification, McpRequest, McpResponse, ReadResourceResult,
    ResourceContent,
};
pub use resource::{Resource, ResourceBuilder, ResourceHandler};
pub use router::{McpRouter, RouterRequest, RouterResponse};
pub use secret::SecretString;
pub use session::{SessionOwner, SessionPhase, SessionState};
pub use tenancy::TenancyEnforcer;
pub use testing::TestClient;
pub use tool::{BoxToolService, Tool, ToolBuilder, ToolHandler, ToolRequest};
pub use tracing_layer::{McpTracingLayer, McpTracingService};
pub use transport::{HttpTransport, McpService, StdioTransport, TransportAdapter};
