//! OAuth 2.0 Token Introspection client (RFC 7662).
//!
//! Opaque bearer tokens are checked by POSTing them to the authorization
//! server's introspection endpoint with this server's client credentials.
//! Results are cached per token in an [`IntrospectionCache`] so a busy client
//! costs one round trip per TTL window, not one per request.
//!
//! A verified result must pass four checks, in this order:
//!
//! 1. `active` is true
//! 2. `aud` contains this resource's canonical URL
//! 3. `scope` contains the required scope
//! 4. `exp` is absent or in the future

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::cache::IntrospectionCache;
use super::error::AuthError;
use super::metadata::canonical_url;
use crate::secret::SecretString;

/// Default scope a token must carry to use the calendar tools.
pub const DEFAULT_REQUIRED_SCOPE: &str = "mcp:tools";

/// Default timeout for a single introspection call.
pub const DEFAULT_INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed introspection response.
///
/// When `active` is false every other field is empty: an inactive response
/// carries nothing worth trusting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntrospectionResult {
    pub active: bool,
    pub subject: Option<String>,
    pub client_id: Option<String>,
    pub scopes: BTreeSet<String>,
    pub audience: BTreeSet<String>,
    pub expires_at: Option<SystemTime>,
}

impl IntrospectionResult {
    pub fn inactive() -> Self {
        Self {
            active: false,
            subject: None,
            client_id: None,
            scopes: BTreeSet::new(),
            audience: BTreeSet::new(),
            expires_at: None,
        }
    }

    /// Run the four acceptance checks, failing on the first one that does
    /// not hold.
    pub fn validate(
        &self,
        resource: &str,
        required_scope: &str,
        now: SystemTime,
    ) -> Result<(), AuthError> {
        if !self.active {
            return Err(AuthError::InactiveToken);
        }
        if !self.audience.contains(&canonical_url(resource)) {
            return Err(AuthError::AudienceMismatch);
        }
        if !self.scopes.contains(required_scope) {
            return Err(AuthError::InsufficientScope {
                required: required_scope.to_string(),
            });
        }
        if self.expires_at.is_some_and(|exp| exp <= now) {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }
}

/// Wire format of an RFC 7662 response. Only the consumed fields are listed.
#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    #[serde(default)]
    active: bool,
    sub: Option<String>,
    client_id: Option<String>,
    scope: Option<String>,
    aud: Option<Audience>,
    exp: Option<u64>,
}

/// `aud` may be a single string or an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

impl From<IntrospectionResponse> for IntrospectionResult {
    fn from(raw: IntrospectionResponse) -> Self {
        if !raw.active {
            return IntrospectionResult::inactive();
        }

        let audience = match raw.aud {
            Some(Audience::Single(aud)) => vec![aud],
            Some(Audience::Multiple(auds)) => auds,
            None => Vec::new(),
        };

        IntrospectionResult {
            active: true,
            subject: raw.sub.filter(|s| !s.trim().is_empty()),
            client_id: raw.client_id,
            scopes: raw
                .scope
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            audience: audience.iter().map(|a| canonical_url(a)).collect(),
            // An `exp` past the platform's time range never expires in practice
            expires_at: raw
                .exp
                .and_then(|secs| UNIX_EPOCH.checked_add(Duration::from_secs(secs))),
        }
    }
}

/// Connection settings for the introspection endpoint.
#[derive(Debug, Clone)]
pub struct IntrospectionSettings {
    /// Full URL of the introspection endpoint.
    pub endpoint: String,
    pub client_id: String,
    pub client_secret: SecretString,
    /// Canonical URL of this resource; tokens must name it in `aud`.
    pub resource: String,
    pub required_scope: String,
    pub timeout: Duration,
}

impl IntrospectionSettings {
    pub fn new(endpoint: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_id: String::new(),
            client_secret: SecretString::with_label("", "CLIENT_SECRET"),
            resource: canonical_url(&resource.into()),
            required_scope: DEFAULT_REQUIRED_SCOPE.to_string(),
            timeout: DEFAULT_INTROSPECTION_TIMEOUT,
        }
    }

    pub fn client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_id = client_id.into();
        self.client_secret = SecretString::with_label(client_secret, "CLIENT_SECRET");
        self
    }

    pub fn required_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = scope.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Verifies bearer tokens against the authorization server.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use calendar_mcp::oauth::{IntrospectionCache, IntrospectionClient, IntrospectionSettings};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = IntrospectionSettings::new(
///     "https://auth.example.com/realms/master/protocol/openid-connect/token/introspect",
///     "https://calendar.example.com",
/// )
/// .client_credentials("mcp-server", "s3cret");
///
/// let client = IntrospectionClient::new(settings, IntrospectionCache::new(Duration::from_secs(60)))?;
/// let result = client.verify("opaque-token").await?;
/// println!("subject: {:?}", result.subject);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct IntrospectionClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    settings: IntrospectionSettings,
    cache: IntrospectionCache,
    /// One lock per token with a lookup in progress.
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl IntrospectionClient {
    pub fn new(
        settings: IntrospectionSettings,
        cache: IntrospectionCache,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(5)
            .build()?;
        Ok(Self::with_http_client(settings, cache, http))
    }

    /// Use an existing `reqwest` client, e.g. to share a connection pool.
    pub fn with_http_client(
        settings: IntrospectionSettings,
        cache: IntrospectionCache,
        http: reqwest::Client,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                settings,
                cache,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn settings(&self) -> &IntrospectionSettings {
        &self.inner.settings
    }

    pub fn cache(&self) -> &IntrospectionCache {
        &self.inner.cache
    }

    /// Verify a bearer token.
    ///
    /// Serves from cache when possible. Concurrent misses for the same token
    /// share one introspection call; failures to reach the authorization
    /// server come back as [`AuthError::IntrospectionUnavailable`] and are
    /// not retried.
    pub async fn verify(&self, token: &str) -> Result<IntrospectionResult, AuthError> {
        let cache = &self.inner.cache;
        let result = match cache.get(token) {
            Some(hit) => {
                tracing::debug!("Introspection cache hit");
                hit
            }
            None => self.lookup(token).await?,
        };

        let settings = &self.inner.settings;
        result.validate(&settings.resource, &settings.required_scope, cache.now())?;
        Ok(result)
    }

    async fn lookup(&self, token: &str) -> Result<IntrospectionResult, AuthError> {
        let lock = self
            .inner
            .in_flight
            .entry(token.to_string())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock().await;
            match self.inner.cache.get(token) {
                Some(hit) => Ok(hit),
                None => {
                    tracing::debug!("Introspection cache miss");
                    self.introspect(token).await.inspect(|fresh| {
                        self.inner.cache.insert(token, fresh.clone());
                    })
                }
            }
        };
        self.inner
            .in_flight
            .remove_if(token, |_, current| Arc::ptr_eq(current, &lock));
        result
    }

    async fn introspect(&self, token: &str) -> Result<IntrospectionResult, AuthError> {
        let settings = &self.inner.settings;
        let response = self
            .inner
            .http
            .post(&settings.endpoint)
            .form(&[
                ("token", token),
                ("client_id", settings.client_id.as_str()),
                ("client_secret", settings.client_secret.expose()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::IntrospectionUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::IntrospectionUnavailable(format!(
                "introspection endpoint returned {}",
                status
            )));
        }

        let raw: IntrospectionResponse = response
            .json()
            .await
            .map_err(|e| AuthError::IntrospectionUnavailable(format!("invalid response: {}", e)))?;

        tracing::debug!(
            active = raw.active,
            client_id = ?raw.client_id,
            "Token introspected"
        );
        Ok(raw.into())
    }
}
