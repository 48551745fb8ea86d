//! OAuth 2.1 resource server support.
//!
//! The calendar server is a **resource server**: it never issues tokens, it
//! only checks tokens issued by an external authorization server and tells
//! clients where to get one.
//!
//! # Architecture
//!
//! - **Protected Resource Metadata** ([`ProtectedResourceMetadata`]): served at
//!   `/.well-known/oauth-protected-resource` so OAuth clients can discover the
//!   authorization server (RFC 9728).
//!
//! - **Token Introspection** ([`IntrospectionClient`]): checks opaque bearer
//!   tokens with the authorization server (RFC 7662), backed by an
//!   [`IntrospectionCache`].
//!
//! - **Challenges** ([`ChallengeResponder`]): the `401` plus
//!   `WWW-Authenticate` answer for requests without a valid identity.
//!
//! - **HTTP Middleware** ([`IdentityLayer`]): resolves the
//!   [`TenantScope`](crate::identity::TenantScope) of each request and puts it
//!   into the request extensions.
//!
//! # Discovery Flow
//!
//! 1. Client calls the MCP endpoint without a token
//! 2. Server returns `401` with `WWW-Authenticate: Bearer realm="mcp", resource_metadata="..."`
//! 3. Client fetches `/.well-known/oauth-protected-resource` to find the authorization server
//! 4. Client obtains a token carrying the `mcp:tools` scope
//! 5. Client retries with `Authorization: Bearer <token>`

pub mod cache;
pub mod challenge;
pub mod error;
pub mod introspection;
pub mod metadata;
pub mod middleware;

// Re-exports
pub use cache::{
    CacheEntry, Clock, DEFAULT_MAX_CACHE_ENTRIES, IntrospectionCache, MAX_CACHE_TTL, ManualClock,
    SystemClock,
};
pub use challenge::ChallengeResponder;
pub use error::AuthError;
pub use introspection::{IntrospectionClient, IntrospectionResult, IntrospectionSettings};
pub use metadata::ProtectedResourceMetadata;
pub use middleware::{IdentityLayer, IdentityService};
