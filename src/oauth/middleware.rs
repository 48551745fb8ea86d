//! Tower middleware that establishes the tenant identity of HTTP requests.
//!
//! [`IdentityLayer`] runs the [`IdentityResolver`] before the wrapped service
//! sees the request. On success the resolved [`TenantScope`] is inserted into
//! the request extensions; on failure the [`ChallengeResponder`] answers and
//! the inner service is never called.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tower::Layer;

use super::challenge::ChallengeResponder;
use super::metadata::WELL_KNOWN_PATH;
use crate::identity::{IdentityResolver, TenantScope};

/// Tower layer that resolves a [`TenantScope`] for every non-public request.
///
/// # Example
///
/// ```rust
/// use calendar_mcp::identity::IdentityResolver;
/// use calendar_mcp::oauth::{ChallengeResponder, IdentityLayer, ProtectedResourceMetadata};
///
/// let metadata = ProtectedResourceMetadata::new("http://localhost:3000");
/// let layer = IdentityLayer::new(
///     IdentityResolver::header_chain(),
///     ChallengeResponder::new(&metadata),
/// )
/// .public_path("/health");
/// ```
#[derive(Debug, Clone)]
pub struct IdentityLayer {
    resolver: IdentityResolver,
    responder: ChallengeResponder,
    public_paths: Vec<String>,
}

impl IdentityLayer {
    pub fn new(resolver: IdentityResolver, responder: ChallengeResponder) -> Self {
        Self {
            resolver,
            responder,
            public_paths: vec![WELL_KNOWN_PATH.to_string()],
        }
    }

    /// Add a path that skips identity resolution.
    ///
    /// The metadata document path is always public.
    pub fn public_path(mut self, path: impl Into<String>) -> Self {
        self.public_paths.push(path.into());
        self
    }
}

impl<S> Layer<S> for IdentityLayer {
    type Service = IdentityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdentityService {
            inner,
            resolver: self.resolver.clone(),
            responder: self.responder.clone(),
            public_paths: self.public_paths.clone(),
        }
    }
}

/// Service created by [`IdentityLayer`].
#[derive(Debug, Clone)]
pub struct IdentityService<S> {
    inner: S,
    resolver: IdentityResolver,
    responder: ChallengeResponder,
    public_paths: Vec<String>,
}

impl<S> tower_service::Service<Request<Body>> for IdentityService<S>
where
    S: tower_service::Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        // Swap in the clone so the instance that was driven to readiness is
        // the one that handles this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let resolver = self.resolver.clone();
        let responder = self.responder.clone();
        let is_public = self
            .public_paths
            .iter()
            .any(|p| req.uri().path() == p.as_str());

        Box::pin(async move {
            if is_public {
                return inner.call(req).await;
            }

            let scope: TenantScope = match resolver.resolve(req.headers()).await {
                Ok(scope) => scope,
                Err(error) => return Ok(responder.respond(&error)),
            };

            tracing::debug!(tenant = ?scope.subject(), "Identity established");
            req.extensions_mut().insert(scope);
            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{StatusCode, header};
    use std::convert::Infallible;
    use tower::ServiceExt;

    use crate::oauth::ProtectedResourceMetadata;

    /// Echoes the resolved tenant in an `x-tenant` response header.
    #[derive(Clone)]
    struct EchoTenant;

    impl tower_service::Service<Request<Body>> for EchoTenant {
        type Response = Response;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Body>) -> Self::Future {
            let tenant = req
                .extensions()
                .get::<TenantScope>()
                .map(|s| s.subject().unwrap_or("<unscoped>").to_string())
                .unwrap_or_else(|| "<none>".to_string());
            Box::pin(async move {
                Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header("x-tenant", tenant)
                    .body(Body::empty())
                    .unwrap())
            })
        }
    }

    fn layer(resolver: IdentityResolver) -> IdentityLayer {
        let metadata = ProtectedResourceMetadata::new("http://localhost:3000");
        IdentityLayer::new(resolver, ChallengeResponder::new(&metadata))
    }

    #[tokio::test]
    async fn test_header_identity_reaches_inner_service() {
        let service = layer(IdentityResolver::header_chain()).layer(EchoTenant);
        let req = Request::builder()
            .uri("/mcp")
            .header("x-forwarded-user", "alice")
            .body(Body::empty())
            .unwrap();

        let resp = service.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-tenant"], "alice");
    }

    #[tokio::test]
    async fn test_missing_identity_is_challenged() {
        let service = layer(IdentityResolver::header_chain()).layer(EchoTenant);
        let req = Request::builder().uri("/mcp").body(Body::empty()).unwrap();

        let resp = service.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let challenge = resp.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
        assert!(challenge.contains("realm=\"mcp\""));
        assert!(challenge.contains("resource_metadata="));
    }

    #[tokio::test]
    async fn test_well_known_is_public() {
        let service = layer(IdentityResolver::header_chain()).layer(EchoTenant);
        let req = Request::builder()
            .uri(WELL_KNOWN_PATH)
            .body(Body::empty())
            .unwrap();

        let resp = service.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-tenant"], "<none>");
    }

    #[tokio::test]
    async fn test_unscoped_fallback_is_forwarded() {
        let service =
            layer(IdentityResolver::header_chain_with_unscoped_fallback()).layer(EchoTenant);
        let req = Request::builder().uri("/mcp").body(Body::empty()).unwrap();

        let resp = service.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-tenant"], "<unscoped>");
    }
}
