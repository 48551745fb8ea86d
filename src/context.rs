//! Request context for MCP handlers
//!
//! Every tool and resource handler receives a [`RequestContext`]. Its
//! [`Extensions`] carry whatever the transport established before the request
//! reached the router; most importantly the caller's [`TenantScope`].
//!
//! # Example
//!
//! ```rust,ignore
//! async fn my_tool(ctx: RequestContext, input: MyInput) -> Result<CallToolResult> {
//!     let scope = ctx.tenant_scope()?;
//!     if ctx.is_cancelled() {
//!         return Err(Error::tool("Operation cancelled"));
//!     }
//!     Ok(CallToolResult::text(format!("hello {:?}", scope.subject())))
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::identity::TenantScope;
use crate::protocol::RequestId;

/// Type-erased extensions map for passing data to handlers.
///
/// Transports and middleware insert values; handlers read them back by type.
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any existing value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, val: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(val));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|val| val.downcast_ref::<T>())
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    /// Merge another extensions map into this one.
    ///
    /// Values from `other` overwrite existing values of the same type.
    pub fn merge(&mut self, other: &Extensions) {
        for (k, v) in &other.map {
            self.map.insert(*k, v.clone());
        }
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Context for a single request.
#[derive(Clone)]
pub struct RequestContext {
    request_id: RequestId,
    cancellation: CancellationToken,
    extensions: Arc<Extensions>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("cancelled", &self.is_cancelled())
            .field("tenant", &self.extension::<TenantScope>())
            .finish()
    }
}

impl RequestContext {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            cancellation: CancellationToken::new(),
            extensions: Arc::new(Extensions::new()),
        }
    }

    pub fn with_extensions(mut self, extensions: Arc<Extensions>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions.get::<T>()
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        Arc::make_mut(&mut self.extensions)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The tenant scope established for this request.
    ///
    /// Fails if the transport did not resolve one. Handlers that touch
    /// calendar data must go through this rather than assume a default.
    pub fn tenant_scope(&self) -> Result<&TenantScope> {
        self.extension::<TenantScope>()
            .ok_or_else(|| Error::Internal("no tenant scope established for request".to_string()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }
}

/// Shareable handle for observing or requesting cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TenantIdentity;

    #[test]
    fn test_cancellation() {
        let ctx = RequestContext::new(RequestId::Number(1));
        assert!(!ctx.is_cancelled());

        let token = ctx.cancellation_token();
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.cancelled().await }
        });
        tokio::task::yield_now().await;
        token.cancel();
        waiter.await.unwrap();

        // Already cancelled resolves immediately
        token.cancelled().await;
    }

    #[test]
    fn test_tenant_scope_from_extensions() {
        let mut extensions = Extensions::new();
        extensions.insert(TenantScope::from(
            TenantIdentity::from_header("user0").unwrap(),
        ));
        let ctx = RequestContext::new(RequestId::Number(1)).with_extensions(Arc::new(extensions));

        assert_eq!(ctx.tenant_scope().unwrap().subject(), Some("user0"));
    }

    #[test]
    fn test_missing_tenant_scope_is_an_error() {
        let ctx = RequestContext::new(RequestId::Number(1));
        assert!(ctx.tenant_scope().is_err());
    }

    #[test]
    fn test_extensions_merge_overwrites() {
        let mut a = Extensions::new();
        a.insert(1u32);
        let mut b = Extensions::new();
        b.insert(2u32);
        b.insert("x");

        a.merge(&b);
        assert_eq!(a.get::<u32>(), Some(&2));
        assert!(a.contains::<&str>());
    }
}
