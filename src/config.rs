//! Server configuration.
//!
//! [`ServerConfig`] is parsed once at startup from flags and environment
//! variables, checked with [`ServerConfig::validate`], and then used to build
//! every long-lived component. Configuration errors are fatal; nothing here
//! is consulted per request.
//!
//! ```rust
//! use clap::Parser;
//! use calendar_mcp::config::{ServerConfig, TransportMode};
//!
//! let config = ServerConfig::try_parse_from([
//!     "calendar-mcp",
//!     "--transport", "http",
//!     "--server-url", "https://calendar.example.com/",
//!     "--client-secret", "s3cret",
//! ])
//! .unwrap();
//!
//! assert_eq!(config.transport, TransportMode::Http);
//! assert_eq!(config.resource_url(), "https://calendar.example.com");
//! config.validate().unwrap();
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;

use crate::identity::{IdentityResolver, TenantIdentity, TenantScope};
use crate::oauth::metadata::canonical_url;
use crate::oauth::{
    IntrospectionCache, IntrospectionClient, IntrospectionSettings, MAX_CACHE_TTL,
    ProtectedResourceMetadata,
};
use crate::secret::SecretString;
use crate::store::{CalendarStore, HttpCalendarStore, MemoryStore};

/// How the server talks to its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    /// Line-delimited JSON-RPC over stdin/stdout, launched by a host process
    Stdio,
    /// Streamable HTTP listener
    Http,
}

/// How the HTTP transport establishes identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IdentityMode {
    /// `Authorization: Bearer` tokens checked by introspection
    Bearer,
    /// Trusted headers set by an authenticating proxy
    Header,
}

/// Fatal startup configuration problems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("OAUTH_CLIENT_SECRET is required for bearer authentication")]
    MissingSecret,

    #[error("invalid {name} '{value}': {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("introspection endpoint '{0}' must use https unless it is on localhost")]
    InsecureEndpoint(String),

    #[error("unscoped access cannot be combined with bearer authentication")]
    UnscopedNotAllowed,

    #[error("introspection cache TTL {0}s is out of range (0..={max}s)", max = MAX_CACHE_TTL.as_secs())]
    CacheTtlOutOfRange(u64),

    #[error("stdio transport needs --local-tenant or --allow-unscoped")]
    NoLocalIdentity,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

fn parse_secret(value: &str) -> Result<SecretString, Infallible> {
    Ok(SecretString::with_label(value, "CLIENT_SECRET"))
}

/// Calendar MCP server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "calendar-mcp")]
#[command(about = "Tenant-isolated calendar MCP server", long_about = None)]
pub struct ServerConfig {
    /// Transport to serve
    #[arg(long, env = "MCP_TRANSPORT", value_enum, default_value = "stdio")]
    pub transport: TransportMode,

    /// Listen host for the HTTP transport
    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,

    /// Listen port for the HTTP transport
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Public URL of this server; defaults to http://{host}:{port}
    #[arg(long, env = "MCP_SERVER_URL")]
    pub server_url: Option<String>,

    /// Issuer URL of the authorization server
    #[arg(
        long,
        env = "AUTH_BASE_URL",
        default_value = "http://localhost:8080/realms/master"
    )]
    pub auth_base_url: String,

    /// Token introspection endpoint; derived from the auth base URL if unset
    #[arg(long, env = "INTROSPECTION_ENDPOINT")]
    pub introspection_endpoint: Option<String>,

    #[arg(long, env = "OAUTH_CLIENT_ID", default_value = "mcp-server")]
    pub client_id: String,

    #[arg(long, env = "OAUTH_CLIENT_SECRET", hide_env_values = true, value_parser = parse_secret)]
    pub client_secret: Option<SecretString>,

    /// Scope every token must carry
    #[arg(long, env = "MCP_SCOPE", default_value = "mcp:tools")]
    pub required_scope: String,

    /// Upper bound on how long an introspection result is reused
    #[arg(long, env = "INTROSPECTION_CACHE_TTL", default_value_t = 60)]
    pub cache_ttl_secs: u64,

    /// Identity strategy for the HTTP transport (default: bearer)
    #[arg(long, env = "MCP_IDENTITY", value_enum)]
    pub identity: Option<IdentityMode>,

    /// Serve requests without tenant filtering when no identity is present.
    /// Development only.
    #[arg(long, env = "MCP_ALLOW_UNSCOPED")]
    pub allow_unscoped: bool,

    /// Tenant the stdio transport acts as
    #[arg(long, env = "MCP_LOCAL_TENANT")]
    pub local_tenant: Option<String>,

    /// Calendar REST API; an in-memory store is used if unset
    #[arg(long, env = "CALENDAR_API_BASE_URL")]
    pub calendar_api_url: Option<String>,

    /// Origins allowed to call the HTTP transport (comma separated)
    #[arg(long, env = "MCP_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn identity_mode(&self) -> IdentityMode {
        self.identity.unwrap_or(IdentityMode::Bearer)
    }

    /// Filter directives for the log subscriber. A non-empty `RUST_LOG`
    /// wins over `--log-level`.
    pub fn log_directives(&self, rust_log: Option<String>) -> String {
        rust_log
            .filter(|directives| !directives.trim().is_empty())
            .unwrap_or_else(|| format!("calendar_mcp={}", self.log_level))
    }

    /// `host:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Canonical URL of this resource server, without a trailing slash.
    pub fn resource_url(&self) -> String {
        match &self.server_url {
            Some(url) => canonical_url(url),
            None => format!("http://{}:{}", self.host, self.port),
        }
    }

    pub fn introspection_endpoint(&self) -> String {
        match &self.introspection_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "{}/protocol/openid-connect/token/introspect",
                canonical_url(&self.auth_base_url)
            ),
        }
    }

    /// Check everything that can be checked before serving.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url("server URL", &self.resource_url())?;
        parse_url("auth base URL", &self.auth_base_url)?;
        let endpoint = parse_url("introspection endpoint", &self.introspection_endpoint())?;
        if let Some(api) = &self.calendar_api_url {
            parse_url("calendar API URL", api)?;
        }
        if self.cache_ttl_secs > MAX_CACHE_TTL.as_secs() {
            return Err(ConfigError::CacheTtlOutOfRange(self.cache_ttl_secs));
        }

        match self.transport {
            TransportMode::Http => {
                if self.identity_mode() == IdentityMode::Bearer {
                    if self.allow_unscoped {
                        return Err(ConfigError::UnscopedNotAllowed);
                    }
                    if self.client_secret.as_ref().is_none_or(|s| s.is_empty()) {
                        return Err(ConfigError::MissingSecret);
                    }
                    if !is_secure_endpoint(&endpoint) {
                        return Err(ConfigError::InsecureEndpoint(endpoint.to_string()));
                    }
                }
            }
            TransportMode::Stdio => {
                let has_tenant = self
                    .local_tenant
                    .as_deref()
                    .is_some_and(|t| !t.trim().is_empty());
                if !has_tenant && !self.allow_unscoped {
                    return Err(ConfigError::NoLocalIdentity);
                }
            }
        }
        Ok(())
    }

    /// The RFC 9728 document this server publishes.
    pub fn metadata(&self) -> ProtectedResourceMetadata {
        ProtectedResourceMetadata::new(self.resource_url())
            .authorization_server(self.auth_base_url.clone())
            .scope(self.required_scope.clone())
    }

    pub fn introspection_settings(&self) -> IntrospectionSettings {
        let secret = self
            .client_secret
            .as_ref()
            .map(|s| s.expose().to_string())
            .unwrap_or_default();
        IntrospectionSettings::new(self.introspection_endpoint(), self.resource_url())
            .client_credentials(self.client_id.clone(), secret)
            .required_scope(self.required_scope.clone())
    }

    pub fn introspection_client(&self) -> Result<IntrospectionClient, ConfigError> {
        let cache = IntrospectionCache::new(Duration::from_secs(self.cache_ttl_secs));
        IntrospectionClient::new(self.introspection_settings(), cache)
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }

    /// The resolver for the HTTP transport.
    pub fn identity_resolver(&self) -> Result<IdentityResolver, ConfigError> {
        match self.identity_mode() {
            IdentityMode::Bearer => Ok(IdentityResolver::bearer(self.introspection_client()?)),
            IdentityMode::Header if self.allow_unscoped => {
                tracing::warn!(
                    "Unscoped access enabled: requests without identity headers see all events"
                );
                Ok(IdentityResolver::header_chain_with_unscoped_fallback())
            }
            IdentityMode::Header => Ok(IdentityResolver::header_chain()),
        }
    }

    /// The fixed scope of the stdio transport.
    pub fn local_scope(&self) -> Result<TenantScope, ConfigError> {
        if let Some(identity) = self
            .local_tenant
            .as_deref()
            .and_then(TenantIdentity::from_header)
        {
            return Ok(TenantScope::Tenant(identity));
        }
        if self.allow_unscoped {
            tracing::warn!("No local tenant configured, stdio session runs unscoped");
            return Ok(TenantScope::Unscoped);
        }
        Err(ConfigError::NoLocalIdentity)
    }

    pub fn calendar_store(&self) -> Result<Arc<dyn CalendarStore>, ConfigError> {
        match &self.calendar_api_url {
            Some(url) => {
                let store = HttpCalendarStore::new(url.clone())
                    .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
                tracing::info!(base_url = %store.base_url(), "Using calendar API store");
                Ok(Arc::new(store))
            }
            None => {
                tracing::info!("No calendar API configured, using in-memory store");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        name,
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

fn is_secure_endpoint(url: &Url) -> bool {
    if url.scheme() == "https" {
        return true;
    }
    matches!(
        url.host_str(),
        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
    )
}
