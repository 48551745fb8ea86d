//! Protected Resource Metadata (RFC 9728 Section 3).
//!
//! Defines the metadata document served at `/.well-known/oauth-protected-resource`
//! so OAuth clients can discover which authorization server issues tokens for
//! this calendar server.

use serde::{Deserialize, Serialize};

/// Well-known path of the metadata document.
pub const WELL_KNOWN_PATH: &str = "/.well-known/oauth-protected-resource";

/// Protected Resource Metadata per RFC 9728 Section 3.
///
/// Built once at startup and never changed afterwards.
///
/// # Example
///
/// ```rust
/// use calendar_mcp::oauth::ProtectedResourceMetadata;
///
/// let metadata = ProtectedResourceMetadata::new("http://localhost:3000/")
///     .authorization_server("http://localhost:8080/realms/master/")
///     .scope("mcp:tools");
///
/// assert_eq!(metadata.resource, "http://localhost:3000");
/// assert_eq!(
///     metadata.metadata_url(),
///     "http://localhost:3000/.well-known/oauth-protected-resource"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Canonical URL of this resource server, without a trailing slash.
    pub resource: String,

    /// Authorization server issuer URLs that can issue tokens for this resource.
    #[serde(default)]
    pub authorization_servers: Vec<String>,

    /// OAuth scopes supported by this resource server.
    #[serde(default)]
    pub scopes_supported: Vec<String>,

    /// Methods supported for sending bearer tokens. Defaults to `["header"]`.
    #[serde(default = "default_bearer_methods")]
    pub bearer_methods_supported: Vec<String>,
}

fn default_bearer_methods() -> Vec<String> {
    vec!["header".to_string()]
}

impl ProtectedResourceMetadata {
    /// Create new metadata with the resource server's canonical URL.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: canonical_url(&resource.into()),
            authorization_servers: Vec::new(),
            scopes_supported: Vec::new(),
            bearer_methods_supported: default_bearer_methods(),
        }
    }

    /// Add an authorization server issuer URL.
    pub fn authorization_server(mut self, issuer_url: impl Into<String>) -> Self {
        self.authorization_servers
            .push(canonical_url(&issuer_url.into()));
        self
    }

    /// Add a supported OAuth scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes_supported.push(scope.into());
        self
    }

    /// Replace the supported bearer methods.
    pub fn bearer_methods(mut self, methods: Vec<String>) -> Self {
        self.bearer_methods_supported = methods;
        self
    }

    /// Absolute URL the metadata document is served at.
    pub fn metadata_url(&self) -> String {
        format!("{}{}", self.resource, WELL_KNOWN_PATH)
    }
}

/// Trailing slashes are not significant when comparing resource URLs.
pub fn canonical_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
