//! 401 challenges for requests without a valid identity.
//!
//! Builds the `WWW-Authenticate` header per RFC 6750 Section 3 with the
//! `resource_metadata` parameter from RFC 9728, and the JSON-RPC error body
//! that goes with it.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::error::AuthError;
use super::metadata::ProtectedResourceMetadata;
use crate::error::ErrorCode;

/// Realm advertised in every challenge.
pub const REALM: &str = "mcp";

/// Answers failed identity resolution on the network transport.
///
/// All challengeable [`AuthError`] variants produce byte-identical responses;
/// the variant only shows up in logs.
#[derive(Debug, Clone)]
pub struct ChallengeResponder {
    www_authenticate: String,
}

impl ChallengeResponder {
    pub fn new(metadata: &ProtectedResourceMetadata) -> Self {
        Self {
            www_authenticate: format!(
                "Bearer realm=\"{}\", resource_metadata=\"{}\"",
                REALM,
                metadata.metadata_url()
            ),
        }
    }

    /// The `WWW-Authenticate` header value.
    pub fn www_authenticate(&self) -> &str {
        &self.www_authenticate
    }

    /// The bare 401 challenge.
    pub fn challenge(&self) -> Response {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "error": {
                "code": ErrorCode::Unauthorized.code(),
                "message": "Authentication required"
            },
            "id": null
        });

        let mut response = (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
        let value = HeaderValue::from_str(&self.www_authenticate)
            .unwrap_or_else(|_| HeaderValue::from_static("Bearer realm=\"mcp\""));
        response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        response
    }

    /// Log the failure with its reason code and build the HTTP response.
    pub fn respond(&self, error: &AuthError) -> Response {
        if error.is_challenge() {
            tracing::warn!(reason = error.reason(), "Rejected request: {}", error);
            return self.challenge();
        }

        tracing::error!(reason = error.reason(), error = %error, "Authorization server unavailable");
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "error": {
                "code": ErrorCode::AuthorizationUnavailable.code(),
                "message": "Authorization server unavailable"
            },
            "id": null
        });
        (StatusCode::SERVICE_UNAVAILABLE, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> ChallengeResponder {
        ChallengeResponder::new(&ProtectedResourceMetadata::new("http://localhost:3000"))
    }

    #[test]
    fn test_header_value() {
        assert_eq!(
            responder().www_authenticate(),
            "Bearer realm=\"mcp\", resource_metadata=\"http://localhost:3000/.well-known/oauth-protected-resource\""
        );
    }

    #[test]
    fn test_challenge_kinds_share_one_response() {
        let responder = responder();
        for error in [
            AuthError::MissingCredential,
            AuthError::InactiveToken,
            AuthError::AudienceMismatch,
            AuthError::InsufficientScope {
                required: "mcp:tools".to_string(),
            },
            AuthError::TokenExpired,
            AuthError::NoIdentity,
        ] {
            let response = responder.respond(&error);
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let header = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .unwrap()
                .to_str()
                .unwrap();
            assert!(header.contains("resource_metadata="));
        }
    }

    #[test]
    fn test_unavailable_is_503_without_challenge() {
        let response =
            responder().respond(&AuthError::IntrospectionUnavailable("refused".to_string()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
