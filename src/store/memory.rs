//! In-process event store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CalendarStore, Event, RecordFilter, StoreError};

/// Event store backed by an ordered map keyed by sid.
///
/// Cloning is cheap and clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    events: Arc<RwLock<BTreeMap<String, Event>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `events`. Later duplicates win.
    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let map = events.into_iter().map(|e| (e.sid.clone(), e)).collect();
        Self {
            events: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl CalendarStore for MemoryStore {
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<Event>, StoreError> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn get(&self, sid: &str, filter: &RecordFilter) -> Result<Event, StoreError> {
        let events = self.events.read().await;
        events
            .get(sid)
            .filter(|e| filter.matches(e))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(sid.to_string()))
    }

    async fn insert(&self, event: Event) -> Result<Event, StoreError> {
        let mut events = self.events.write().await;
        if events.contains_key(&event.sid) {
            return Err(StoreError::Conflict(event.sid));
        }
        events.insert(event.sid.clone(), event.clone());
        Ok(event)
    }

    async fn replace(&self, event: Event, filter: &RecordFilter) -> Result<Event, StoreError> {
        let mut events = self.events.write().await;
        match events.get_mut(&event.sid) {
            Some(existing) if filter.matches(existing) => {
                *existing = event.clone();
                Ok(event)
            }
            _ => Err(StoreError::NotFound(event.sid)),
        }
    }

    async fn remove(&self, sid: &str, filter: &RecordFilter) -> Result<Event, StoreError> {
        let mut events = self.events.write().await;
        let visible = events.get(sid).is_some_and(|e| filter.matches(e));
        if !visible {
            return Err(StoreError::NotFound(sid.to_string()));
        }
        events
            .remove(sid)
            .ok_or_else(|| StoreError::NotFound(sid.to_string()))
    }
}
