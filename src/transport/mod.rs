//! MCP transports.
//!
//! Both transports serve the same [`McpRouter`]; they differ only in how a
//! request's [`TenantScope`] is established:
//!
//! - [`stdio`]: a local subprocess. The launching host already authenticated
//!   the user, so every request carries one fixed scope from configuration.
//! - [`http`]: a network listener. Every request goes through the
//!   [`IdentityResolver`] (bearer introspection or trusted headers) before a
//!   session is created or a message is parsed.
//!
//! [`TransportAdapter`] picks one of them from a [`ServerConfig`].

use tower::Layer;

use crate::config::{ConfigError, ServerConfig, TransportMode};
use crate::context::Extensions;
use crate::error::Result;
use crate::identity::{IdentityResolver, TenantScope};
use crate::jsonrpc::JsonRpcService;
use crate::oauth::ProtectedResourceMetadata;
use crate::router::McpRouter;
use crate::tracing_layer::{McpTracingLayer, McpTracingService};

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// The router with request tracing, as every transport runs it.
pub type McpService = McpTracingService<McpRouter>;

/// JSON-RPC dispatch over `router` for requests made under `scope`.
pub(crate) fn scoped_service(
    router: McpRouter,
    scope: TenantScope,
) -> JsonRpcService<McpService> {
    let mut extensions = Extensions::new();
    extensions.insert(scope);
    JsonRpcService::new(McpTracingLayer::new().layer(router)).with_extensions(extensions)
}

/// Where identity comes from, decided once at startup.
#[derive(Debug, Clone)]
pub enum TransportAdapter {
    /// stdio; the host process vouches for a single scope
    Local { scope: TenantScope },
    /// HTTP; identity is resolved per request
    Network {
        addr: String,
        resolver: IdentityResolver,
        metadata: ProtectedResourceMetadata,
        allowed_origins: Vec<String>,
    },
}

impl TransportAdapter {
    /// Build the adapter for a validated configuration.
    pub fn from_config(config: &ServerConfig) -> std::result::Result<Self, ConfigError> {
        match config.transport {
            TransportMode::Stdio => Ok(TransportAdapter::Local {
                scope: config.local_scope()?,
            }),
            TransportMode::Http => Ok(TransportAdapter::Network {
                addr: config.listen_addr(),
                resolver: config.identity_resolver()?,
                metadata: config.metadata(),
                allowed_origins: config.allowed_origins.clone(),
            }),
        }
    }

    /// Whether bearer tokens are introspected on this transport.
    pub fn uses_introspection(&self) -> bool {
        match self {
            TransportAdapter::Local { .. } => false,
            TransportAdapter::Network { resolver, .. } => resolver.is_bearer(),
        }
    }

    /// Serve `router` until the client goes away or the listener fails.
    pub async fn serve(self, router: McpRouter) -> Result<()> {
        match self {
            TransportAdapter::Local { scope } => {
                tracing::info!(tenant = ?scope.subject(), "Serving MCP over stdio");
                StdioTransport::new(router, scope).run().await
            }
            TransportAdapter::Network {
                addr,
                resolver,
                metadata,
                allowed_origins,
            } => {
                tracing::info!(
                    bearer = resolver.is_bearer(),
                    resource = %metadata.resource,
                    "Serving MCP over HTTP"
                );
                let mut transport = HttpTransport::new(router, resolver, metadata);
                if !allowed_origins.is_empty() {
                    transport = transport.allowed_origins(allowed_origins);
                }
                transport.serve(&addr).await
            }
        }
    }
}
