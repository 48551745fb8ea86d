//! Tenant identity resolution.
//!
//! Every inbound request is resolved to exactly one [`TenantScope`] before any
//! calendar data is touched. Two strategies exist and a process runs exactly
//! one of them:
//!
//! - **Header chain**: an upstream proxy or OAuth sidecar has already
//!   authenticated the user and injected trusted headers. The headers in
//!   [`HEADER_CHAIN`] are checked in order and the first non-empty value wins.
//! - **Bearer**: the `Authorization: Bearer <token>` credential is checked
//!   with the authorization server through an [`IntrospectionClient`].
//!
//! # Example
//!
//! ```rust
//! use axum::http::HeaderMap;
//! use calendar_mcp::identity::{IdentityResolver, TenantScope};
//!
//! # tokio_test_block_on(async {
//! let resolver = IdentityResolver::header_chain();
//!
//! let mut headers = HeaderMap::new();
//! headers.insert("x-forwarded-user", "alice".parse().unwrap());
//! headers.insert("x-remote-user", "bob".parse().unwrap());
//!
//! let scope = resolver.resolve(&headers).await.unwrap();
//! assert_eq!(scope.subject(), Some("alice"));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use axum::http::{HeaderMap, header};

use crate::oauth::{AuthError, IntrospectionCache, IntrospectionClient};

/// Header set by the OAuth sidecar once it has authenticated the user.
pub const FORWARDED_USER_HEADER: &str = "x-forwarded-user";

/// Header carrying an explicit tenant id. Also the normalized header the
/// calendar store receives.
pub const TENANT_ID_HEADER: &str = "x-user-id";

/// Header set by reverse proxies doing their own authentication.
pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Pulls a candidate subject out of the request headers.
pub type HeaderExtractor = fn(&HeaderMap) -> Option<String>;

/// Trusted headers in priority order. The first extractor that yields a value
/// decides the subject; later entries are more easily spoofed.
pub const HEADER_CHAIN: &[(&str, HeaderExtractor)] = &[
    (FORWARDED_USER_HEADER, forwarded_user),
    (TENANT_ID_HEADER, explicit_tenant_id),
    (REMOTE_USER_HEADER, remote_user),
];

fn forwarded_user(headers: &HeaderMap) -> Option<String> {
    non_empty_header(headers, FORWARDED_USER_HEADER)
}

fn explicit_tenant_id(headers: &HeaderMap) -> Option<String> {
    non_empty_header(headers, TENANT_ID_HEADER)
}

fn remote_user(headers: &HeaderMap) -> Option<String> {
    non_empty_header(headers, REMOTE_USER_HEADER)
}

fn non_empty_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Where a [`TenantIdentity`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// Asserted by a trusted upstream header
    Header,
    /// Asserted by an introspected bearer token
    Token,
}

/// An authenticated tenant.
///
/// Equality and hashing consider only the subject: two identities for the same
/// subject are the same tenant regardless of how they were established.
#[derive(Debug, Clone)]
pub struct TenantIdentity {
    subject: String,
    source: IdentitySource,
    scopes: BTreeSet<String>,
    expires_at: Option<SystemTime>,
}

impl TenantIdentity {
    /// Identity asserted by a trusted header. Returns `None` for an empty or
    /// whitespace-only subject.
    pub fn from_header(subject: impl Into<String>) -> Option<Self> {
        Self::build(subject.into(), IdentitySource::Header, BTreeSet::new(), None)
    }

    /// Identity asserted by a verified token. Returns `None` for an empty or
    /// whitespace-only subject.
    pub fn from_token(
        subject: impl Into<String>,
        scopes: BTreeSet<String>,
        expires_at: Option<SystemTime>,
    ) -> Option<Self> {
        Self::build(subject.into(), IdentitySource::Token, scopes, expires_at)
    }

    fn build(
        subject: String,
        source: IdentitySource,
        scopes: BTreeSet<String>,
        expires_at: Option<SystemTime>,
    ) -> Option<Self> {
        let subject = subject.trim();
        if subject.is_empty() {
            return None;
        }
        Some(Self {
            subject: subject.to_string(),
            source,
            scopes,
            expires_at,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

impl PartialEq for TenantIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.subject == other.subject
    }
}

impl Eq for TenantIdentity {}

impl Hash for TenantIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.subject.hash(state);
    }
}

/// The outcome of identity resolution.
///
/// `Unscoped` disables tenant filtering entirely. It is only ever produced
/// when unscoped access has been switched on in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    Tenant(TenantIdentity),
    Unscoped,
}

impl TenantScope {
    /// The tenant subject, or `None` for unscoped access.
    pub fn subject(&self) -> Option<&str> {
        match self {
            TenantScope::Tenant(identity) => Some(identity.subject()),
            TenantScope::Unscoped => None,
        }
    }

    pub fn identity(&self) -> Option<&TenantIdentity> {
        match self {
            TenantScope::Tenant(identity) => Some(identity),
            TenantScope::Unscoped => None,
        }
    }

    pub fn is_unscoped(&self) -> bool {
        matches!(self, TenantScope::Unscoped)
    }
}

impl From<TenantIdentity> for TenantScope {
    fn from(identity: TenantIdentity) -> Self {
        TenantScope::Tenant(identity)
    }
}

#[derive(Debug, Clone)]
enum Strategy {
    HeaderChain { allow_unscoped: bool },
    Bearer(IntrospectionClient),
}

/// Resolves an inbound request to a [`TenantScope`].
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    strategy: Strategy,
}

impl IdentityResolver {
    /// Trusted-proxy mode. Requests without any trusted header fail with
    /// [`AuthError::NoIdentity`].
    pub fn header_chain() -> Self {
        Self {
            strategy: Strategy::HeaderChain {
                allow_unscoped: false,
            },
        }
    }

    /// Trusted-proxy mode where requests without any trusted header run
    /// unscoped instead of failing. Development fallback only.
    pub fn header_chain_with_unscoped_fallback() -> Self {
        Self {
            strategy: Strategy::HeaderChain {
                allow_unscoped: true,
            },
        }
    }

    /// Protected-resource mode backed by token introspection.
    pub fn bearer(client: IntrospectionClient) -> Self {
        Self {
            strategy: Strategy::Bearer(client),
        }
    }

    /// Whether this resolver checks bearer tokens.
    pub fn is_bearer(&self) -> bool {
        matches!(self.strategy, Strategy::Bearer(_))
    }

    /// The introspection cache behind a bearer resolver.
    pub fn introspection_cache(&self) -> Option<&IntrospectionCache> {
        match &self.strategy {
            Strategy::Bearer(client) => Some(client.cache()),
            Strategy::HeaderChain { .. } => None,
        }
    }

    /// Resolve the request headers to a tenant scope.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<TenantScope, AuthError> {
        match &self.strategy {
            Strategy::HeaderChain { allow_unscoped } => {
                resolve_header_chain(headers, *allow_unscoped)
            }
            Strategy::Bearer(client) => {
                let token = bearer_token(headers).ok_or(AuthError::MissingCredential)?;
                let result = client.verify(token).await?;
                let subject = result.subject.clone().unwrap_or_default();
                TenantIdentity::from_token(subject, result.scopes.clone(), result.expires_at)
                    .map(TenantScope::Tenant)
                    .ok_or(AuthError::NoIdentity)
            }
        }
    }
}

fn resolve_header_chain(headers: &HeaderMap, allow_unscoped: bool) -> Result<TenantScope, AuthError> {
    for (name, extract) in HEADER_CHAIN {
        if let Some(identity) = extract(headers).and_then(TenantIdentity::from_header) {
            tracing::debug!(header = %name, subject = %identity.subject(), "Identity from trusted header");
            return Ok(TenantScope::Tenant(identity));
        }
    }

    if allow_unscoped {
        tracing::warn!("No trusted identity header present, serving request unscoped");
        Ok(TenantScope::Unscoped)
    } else {
        Err(AuthError::NoIdentity)
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively. An empty token counts as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_empty_subject_is_rejected() {
        assert!(TenantIdentity::from_header("").is_none());
        assert!(TenantIdentity::from_header("   ").is_none());
        assert!(TenantIdentity::from_token("", BTreeSet::new(), None).is_none());
    }

    #[test]
    fn test_equality_is_by_subject() {
        let a = TenantIdentity::from_header("alice").unwrap();
        let scopes = BTreeSet::from(["mcp:tools".to_string()]);
        let b = TenantIdentity::from_token("alice", scopes, None).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.source(), b.source());
    }

    #[tokio::test]
    async fn test_forwarded_user_wins_over_remote_user() {
        let resolver = IdentityResolver::header_chain();
        let scope = resolver
            .resolve(&headers(&[
                (REMOTE_USER_HEADER, "bob"),
                (FORWARDED_USER_HEADER, "alice"),
            ]))
            .await
            .unwrap();
        assert_eq!(scope.subject(), Some("alice"));
    }

    #[tokio::test]
    async fn test_explicit_tenant_wins_over_remote_user() {
        let resolver = IdentityResolver::header_chain();
        let scope = resolver
            .resolve(&headers(&[
                (REMOTE_USER_HEADER, "bob"),
                (TENANT_ID_HEADER, "carol"),
            ]))
            .await
            .unwrap();
        assert_eq!(scope.subject(), Some("carol"));
    }

    #[tokio::test]
    async fn test_blank_header_falls_through() {
        let resolver = IdentityResolver::header_chain();
        let scope = resolver
            .resolve(&headers(&[
                (FORWARDED_USER_HEADER, "  "),
                (REMOTE_USER_HEADER, "bob"),
            ]))
            .await
            .unwrap();
        assert_eq!(scope.subject(), Some("bob"));
        assert_eq!(scope.identity().unwrap().source(), IdentitySource::Header);
        assert!(scope.identity().unwrap().scopes().is_empty());
    }

    #[tokio::test]
    async fn test_no_header_without_fallback_is_no_identity() {
        let resolver = IdentityResolver::header_chain();
        let err = resolver.resolve(&HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::NoIdentity));
    }

    #[tokio::test]
    async fn test_no_header_with_fallback_is_unscoped() {
        let resolver = IdentityResolver::header_chain_with_unscoped_fallback();
        let scope = resolver.resolve(&HeaderMap::new()).await.unwrap();
        assert!(scope.is_unscoped());
        assert_eq!(scope.subject(), None);
    }

    #[test]
    fn test_chain_order_is_fixed() {
        let names: Vec<&str> = HEADER_CHAIN.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![FORWARDED_USER_HEADER, TENANT_ID_HEADER, REMOTE_USER_HEADER]
        );
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Bearer abc")])),
            Some("abc")
        );
        assert_eq!(
            bearer_token(&headers(&[("authorization", "bearer abc")])),
            Some("abc")
        );
        assert_eq!(bearer_token(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(
            bearer_token(&headers(&[("authorization", "Basic dXNlcg==")])),
            None
        );
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
