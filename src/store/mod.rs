//! Calendar record storage.
//!
//! [`CalendarStore`] is the seam to whatever actually persists events. The
//! store evaluates the [`RecordFilter`] it is handed but never decides on one:
//! filters are produced by the [`TenancyEnforcer`](crate::tenancy::TenancyEnforcer)
//! only.
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryStore`]: in-process map, used for local runs and tests
//! - [`HttpCalendarStore`]: the calendar REST API, addressed with a normalized
//!   tenant header

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;

pub use http::HttpCalendarStore;
pub use memory::MemoryStore;

/// Format of every timestamp the calendar exchanges.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Event categories the calendar UI knows about.
pub const CATEGORIES: &[&str] = &[
    "Lecture",
    "Lab",
    "Meeting",
    "Office Hours",
    "Assignment",
    "Defense",
    "Workshop",
    "Study Group",
    "Seminar",
    "Grading",
    "Advising",
];

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sid: String,
    /// Owning tenant. `None` only for records created before tenancy existed.
    #[serde(rename = "user_id", default)]
    pub tenant_id: Option<String>,
    pub name: String,
    pub content: String,
    pub category: String,
    /// Priority, 1 (low) to 3 (high).
    pub level: u8,
    /// Completion, 0.0 (not started) to 1.0 (done).
    pub status: f64,
    #[serde(with = "datetime")]
    pub creation_time: NaiveDateTime,
    #[serde(with = "datetime")]
    pub start_time: NaiveDateTime,
    #[serde(with = "datetime")]
    pub end_time: NaiveDateTime,
}

impl Event {
    /// Field-level checks applied before any write.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.sid.trim().is_empty() {
            return Err(StoreError::Invalid("sid must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(StoreError::Invalid("name must not be empty".to_string()));
        }
        if !(1..=3).contains(&self.level) {
            return Err(StoreError::Invalid(format!(
                "level must be 1, 2 or 3 (got {})",
                self.level
            )));
        }
        if !(0.0..=1.0).contains(&self.status) {
            return Err(StoreError::Invalid(format!(
                "status must be between 0.0 and 1.0 (got {})",
                self.status
            )));
        }
        if self.end_time < self.start_time {
            return Err(StoreError::Invalid(
                "end_time must not be before start_time".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a `YYYY-MM-DD HH:MM:SS` timestamp.
pub fn parse_datetime(value: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(value.trim(), DATETIME_FORMAT).map_err(|_| {
        StoreError::Invalid(format!(
            "invalid datetime '{}', expected YYYY-MM-DD HH:MM:SS",
            value
        ))
    })
}

/// Serde adapter for [`DATETIME_FORMAT`] timestamps.
pub mod datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::DATETIME_FORMAT;

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(DATETIME_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, DATETIME_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Predicate on an event's owning tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantPredicate {
    /// `tenant_id = subject`
    Eq(String),
    /// `tenant_id IS NULL`
    IsNull,
}

/// Row filter for store operations. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    tenant: Option<TenantPredicate>,
}

impl RecordFilter {
    /// Matches every record.
    pub fn unscoped() -> Self {
        Self { tenant: None }
    }

    /// Matches records owned by `subject`.
    pub fn owned_by(subject: impl Into<String>) -> Self {
        Self {
            tenant: Some(TenantPredicate::Eq(subject.into())),
        }
    }

    /// Matches records with no owner.
    pub fn unowned() -> Self {
        Self {
            tenant: Some(TenantPredicate::IsNull),
        }
    }

    pub fn tenant_predicate(&self) -> Option<&TenantPredicate> {
        self.tenant.as_ref()
    }

    /// The tenant named by an `Eq` predicate.
    pub fn tenant_id(&self) -> Option<&str> {
        match &self.tenant {
            Some(TenantPredicate::Eq(subject)) => Some(subject),
            _ => None,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        match &self.tenant {
            None => true,
            Some(TenantPredicate::Eq(subject)) => event.tenant_id.as_deref() == Some(subject),
            Some(TenantPredicate::IsNull) => event.tenant_id.is_none(),
        }
    }
}

/// Store failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// No record with this id is visible under the filter. Also returned for
    /// records that exist but belong to another tenant.
    #[error("event '{0}' not found")]
    NotFound(String),

    #[error("event '{0}' already exists")]
    Conflict(String),

    #[error("invalid event: {0}")]
    Invalid(String),

    #[error("calendar backend error: {0}")]
    Backend(String),
}

/// Persistence seam for calendar events.
///
/// Every method takes the filter it must honor; a record outside the filter
/// behaves exactly like a missing one.
#[async_trait]
pub trait CalendarStore: Send + Sync + 'static {
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<Event>, StoreError>;

    async fn get(&self, sid: &str, filter: &RecordFilter) -> Result<Event, StoreError>;

    /// Insert a new record. Fails with [`StoreError::Conflict`] if the sid is taken.
    async fn insert(&self, event: Event) -> Result<Event, StoreError>;

    /// Replace an existing record matched by `sid` and `filter`.
    async fn replace(&self, event: Event, filter: &RecordFilter) -> Result<Event, StoreError>;

    async fn remove(&self, sid: &str, filter: &RecordFilter) -> Result<Event, StoreError>;
}
