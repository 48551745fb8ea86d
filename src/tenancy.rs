//! Tenant isolation for calendar data.
//!
//! [`TenancyEnforcer`] is the only way tool code reaches a [`CalendarStore`].
//! Every operation is bound to a [`TenantScope`] first:
//!
//! - `list` and `get` are filtered to `tenant_id = subject`
//! - `create` overwrites whatever `tenant_id` the caller supplied
//! - `update` and `delete` confirm ownership with a scoped read before writing
//!
//! A record owned by another tenant is reported as not found, never as
//! forbidden. Records with no owner are only reachable from an unscoped scope.
//!
//! ```rust
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! use std::sync::Arc;
//! use calendar_mcp::identity::{TenantIdentity, TenantScope};
//! use calendar_mcp::store::MemoryStore;
//! use calendar_mcp::tenancy::TenancyEnforcer;
//!
//! let enforcer = TenancyEnforcer::new(Arc::new(MemoryStore::new()));
//! let alice = TenantScope::from(TenantIdentity::from_header("alice").unwrap());
//!
//! let events = enforcer.with_scope(&alice).list().await.unwrap();
//! assert!(events.is_empty());
//! # });
//! ```

use std::sync::Arc;

use crate::identity::TenantScope;
use crate::store::{CalendarStore, Event, RecordFilter, StoreError};

/// Binds calendar operations to a tenant scope.
#[derive(Clone)]
pub struct TenancyEnforcer {
    store: Arc<dyn CalendarStore>,
}

impl std::fmt::Debug for TenancyEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenancyEnforcer").finish_non_exhaustive()
    }
}

impl TenancyEnforcer {
    pub fn new(store: Arc<dyn CalendarStore>) -> Self {
        Self { store }
    }

    /// The filter every read under `scope` carries.
    pub fn filter_for(scope: &TenantScope) -> RecordFilter {
        match scope.subject() {
            Some(subject) => RecordFilter::owned_by(subject),
            None => RecordFilter::unscoped(),
        }
    }

    /// Operations restricted to `scope`.
    pub fn with_scope<'a>(&'a self, scope: &'a TenantScope) -> ScopedCalendar<'a> {
        ScopedCalendar {
            store: self.store.as_ref(),
            scope,
            filter: Self::filter_for(scope),
        }
    }
}

/// Calendar operations bound to one [`TenantScope`].
pub struct ScopedCalendar<'a> {
    store: &'a dyn CalendarStore,
    scope: &'a TenantScope,
    filter: RecordFilter,
}

impl ScopedCalendar<'_> {
    pub fn scope(&self) -> &TenantScope {
        self.scope
    }

    pub fn filter(&self) -> &RecordFilter {
        &self.filter
    }

    pub async fn list(&self) -> Result<Vec<Event>, StoreError> {
        let events = self.store.list(&self.filter).await?;
        tracing::debug!(
            tenant = ?self.scope.subject(),
            count = events.len(),
            "Listed events"
        );
        Ok(events)
    }

    pub async fn get(&self, sid: &str) -> Result<Event, StoreError> {
        self.store.get(sid, &self.filter).await
    }

    /// Insert `event` as owned by this scope's tenant.
    ///
    /// In unscoped mode the supplied owner is kept as is.
    pub async fn create(&self, mut event: Event) -> Result<Event, StoreError> {
        if let Some(subject) = self.scope.subject() {
            if event.tenant_id.as_deref().is_some_and(|t| t != subject) {
                tracing::debug!(tenant = subject, "Overriding client-supplied owner");
            }
            event.tenant_id = Some(subject.to_string());
        }
        event.validate()?;
        let created = self.store.insert(event).await?;
        tracing::info!(tenant = ?self.scope.subject(), sid = %created.sid, "Event created");
        Ok(created)
    }

    /// Replace an event this scope can see. Ownership never changes.
    pub async fn update(&self, mut event: Event) -> Result<Event, StoreError> {
        let existing = self.store.get(&event.sid, &self.filter).await?;
        event.tenant_id = existing.tenant_id;
        event.validate()?;
        let updated = self.store.replace(event, &self.filter).await?;
        tracing::info!(tenant = ?self.scope.subject(), sid = %updated.sid, "Event updated");
        Ok(updated)
    }

    pub async fn delete(&self, sid: &str) -> Result<Event, StoreError> {
        self.store.get(sid, &self.filter).await?;
        let removed = self.store.remove(sid, &self.filter).await?;
        tracing::info!(tenant = ?self.scope.subject(), sid = %removed.sid, "Event deleted");
        Ok(removed)
    }

    /// Assign every unowned event to `owner`, returning how many moved.
    ///
    /// Only allowed from an unscoped scope: a tenant must not be able to
    /// adopt records it cannot see.
    pub async fn claim_unowned(&self, owner: &str) -> Result<usize, StoreError> {
        if !self.scope.is_unscoped() {
            return Err(StoreError::Invalid(
                "claiming unowned events requires unscoped access".to_string(),
            ));
        }
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(StoreError::Invalid("owner must not be empty".to_string()));
        }

        let unowned = RecordFilter::unowned();
        let orphans = self.store.list(&unowned).await?;
        let mut claimed = 0;
        for mut event in orphans {
            event.tenant_id = Some(owner.to_string());
            self.store.replace(event, &unowned).await?;
            claimed += 1;
        }
        tracing::info!(owner, claimed, "Claimed unowned events");
        Ok(claimed)
    }
}
