//! Event store backed by the calendar REST API.
//!
//! The API scopes every request by the `X-User-ID` header. Only the
//! normalized tenant id from the [`RecordFilter`] is ever sent; client headers
//! are never forwarded. Returned rows are re-checked against the filter before
//! they leave this module.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};

use super::{CalendarStore, Event, RecordFilter, StoreError, TenantPredicate};
use crate::identity::TENANT_ID_HEADER;

/// Default timeout for calendar API calls.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// [`CalendarStore`] that talks to the calendar REST API.
#[derive(Debug, Clone)]
pub struct HttpCalendarStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCalendarStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_STORE_TIMEOUT)
            .build()?;
        Ok(Self::with_http_client(base_url, http))
    }

    pub fn with_http_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, filter: &RecordFilter) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match filter.tenant_id() {
            Some(tenant) => builder.header(TENANT_ID_HEADER, tenant),
            None => builder,
        }
    }

    fn schedule_path(sid: &str) -> String {
        format!("/schedules/{}", urlencode(sid))
    }
}

/// Percent-encode a path segment.
fn urlencode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn backend(e: reqwest::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Map a non-success status to a store error.
async fn status_error(response: Response, sid: &str) -> StoreError {
    let status = response.status();
    let detail = response.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(sid.to_string()),
        StatusCode::CONFLICT => StoreError::Conflict(sid.to_string()),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            // The API reports a taken sid on POST as a plain 400.
            StoreError::Invalid(if detail.is_empty() {
                status.to_string()
            } else {
                detail
            })
        }
        _ => StoreError::Backend(format!("calendar API returned {}", status)),
    }
}

#[async_trait]
impl CalendarStore for HttpCalendarStore {
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<Event>, StoreError> {
        // The API has no way to express `IS NULL`, so fetch unscoped and
        // narrow locally.
        let response = self
            .request(Method::GET, "/schedules", filter)
            .send()
            .await
            .map_err(backend)?;
        if !response.status().is_success() {
            return Err(status_error(response, "").await);
        }
        let events: Vec<Event> = response.json().await.map_err(backend)?;
        let total = events.len();
        let visible: Vec<Event> = events.into_iter().filter(|e| filter.matches(e)).collect();
        let scoped = matches!(filter.tenant_predicate(), Some(TenantPredicate::Eq(_)));
        if scoped && visible.len() != total {
            tracing::warn!(
                dropped = total - visible.len(),
                "Calendar API returned rows outside the tenant filter"
            );
        }
        Ok(visible)
    }

    async fn get(&self, sid: &str, filter: &RecordFilter) -> Result<Event, StoreError> {
        let response = self
            .request(Method::GET, &Self::schedule_path(sid), filter)
            .send()
            .await
            .map_err(backend)?;
        if !response.status().is_success() {
            return Err(status_error(response, sid).await);
        }
        let event: Event = response.json().await.map_err(backend)?;
        if !filter.matches(&event) {
            return Err(StoreError::NotFound(sid.to_string()));
        }
        Ok(event)
    }

    async fn insert(&self, event: Event) -> Result<Event, StoreError> {
        let filter = match &event.tenant_id {
            Some(tenant) => RecordFilter::owned_by(tenant.clone()),
            None => RecordFilter::unscoped(),
        };
        let response = self
            .request(Method::POST, "/schedules", &filter)
            .json(&event)
            .send()
            .await
            .map_err(backend)?;
        if !response.status().is_success() {
            return Err(status_error(response, &event.sid).await);
        }
        response.json().await.map_err(backend)
    }

    async fn replace(&self, event: Event, filter: &RecordFilter) -> Result<Event, StoreError> {
        let response = self
            .request(Method::PUT, &Self::schedule_path(&event.sid), filter)
            .json(&event)
            .send()
            .await
            .map_err(backend)?;
        if !response.status().is_success() {
            return Err(status_error(response, &event.sid).await);
        }
        response.json().await.map_err(backend)
    }

    async fn remove(&self, sid: &str, filter: &RecordFilter) -> Result<Event, StoreError> {
        // DELETE only answers with a message, so read the record first.
        let existing = self.get(sid, filter).await?;
        let response = self
            .request(Method::DELETE, &Self::schedule_path(sid), filter)
            .send()
            .await
            .map_err(backend)?;
        if !response.status().is_success() {
            return Err(status_error(response, sid).await);
        }
        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::event;
    use axum::Json;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::routing::get;

    fn tenant(headers: &HeaderMap) -> Option<String> {
        headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Mock calendar API holding one event for `user0` and one legacy event.
    /// Like the real API it filters by `X-User-ID` when present.
    async fn spawn_api() -> String {
        let app = Router::new()
            .route(
                "/schedules",
                get(|headers: HeaderMap| async move {
                    let rows = vec![event("e1", Some("user0")), event("legacy", None)];
                    let rows: Vec<Event> = match tenant(&headers) {
                        Some(t) => rows
                            .into_iter()
                            .filter(|e| e.tenant_id.as_deref() == Some(t.as_str()))
                            .collect(),
                        None => rows,
                    };
                    Json(rows)
                }),
            )
            .route(
                "/schedules/{sid}",
                get(|Path(sid): Path<String>, headers: HeaderMap| async move {
                    let owner = tenant(&headers);
                    if sid == "e1" && owner.as_deref().is_none_or(|t| t == "user0") {
                        Ok(Json(event("e1", Some("user0"))))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_list_sends_tenant_header() {
        let store = HttpCalendarStore::new(spawn_api().await).unwrap();

        let mine = store.list(&RecordFilter::owned_by("user0")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].sid, "e1");

        let theirs = store.list(&RecordFilter::owned_by("user1")).await.unwrap();
        assert!(theirs.is_empty());
    }

    #[tokio::test]
    async fn test_unowned_filter_is_applied_locally() {
        let store = HttpCalendarStore::new(spawn_api().await).unwrap();
        let rows = store.list(&RecordFilter::unowned()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sid, "legacy");
    }

    #[tokio::test]
    async fn test_get_maps_404_to_not_found() {
        let store = HttpCalendarStore::new(spawn_api().await).unwrap();
        let err = store
            .get("e1", &RecordFilter::owned_by("user1"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("e1".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_backend_error() {
        let store = HttpCalendarStore::new("http://127.0.0.1:9").unwrap();
        let err = store.list(&RecordFilter::unscoped()).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn test_path_segment_encoding() {
        assert_eq!(
            HttpCalendarStore::schedule_path("a b/c"),
            "/schedules/a%20b%2Fc"
        );
    }
}
