//! Identity establishment failures.
//!
//! Every failure except [`AuthError::IntrospectionUnavailable`] is terminal
//! for the request and is answered with the same 401 challenge. The variants
//! stay distinct internally so logs can tell them apart via
//! [`AuthError::reason`].

/// Why no tenant identity could be established for a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No usable `Authorization: Bearer` credential was presented.
    #[error("missing bearer credential")]
    MissingCredential,

    /// The authorization server reports the token as not active.
    #[error("token is not active")]
    InactiveToken,

    /// The token was not issued for this resource.
    #[error("token audience does not include this resource")]
    AudienceMismatch,

    /// The token does not carry the scope this resource requires.
    #[error("token is missing required scope '{required}'")]
    InsufficientScope {
        /// The configured required scope.
        required: String,
    },

    /// The token's `exp` is in the past.
    #[error("token has expired")]
    TokenExpired,

    /// The authorization server could not be reached or answered garbage.
    #[error("authorization server unavailable: {0}")]
    IntrospectionUnavailable(String),

    /// No trusted identity was present and unscoped access is disabled.
    #[error("no identity could be established")]
    NoIdentity,
}

impl AuthError {
    /// Stable reason code for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing_credential",
            AuthError::InactiveToken => "inactive_token",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::InsufficientScope { .. } => "insufficient_scope",
            AuthError::TokenExpired => "token_expired",
            AuthError::IntrospectionUnavailable(_) => "introspection_unavailable",
            AuthError::NoIdentity => "no_identity",
        }
    }

    /// HTTP status for this failure.
    ///
    /// - 401 for anything that is the caller's fault
    /// - 503 when the authorization server is down
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::IntrospectionUnavailable(_) => 503,
            _ => 401,
        }
    }

    /// Whether this failure is answered with a `WWW-Authenticate` challenge.
    pub fn is_challenge(&self) -> bool {
        self.status_code() == 401
    }
}
