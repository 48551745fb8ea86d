//! Shared fixtures: a mock authorization server and calendar events.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use calendar_mcp::oauth::{IntrospectionCache, IntrospectionClient, IntrospectionSettings};
use calendar_mcp::store::Event;

/// Canonical URL the test resource server claims to be.
pub const RESOURCE: &str = "http://localhost:3000";

pub const CLIENT_ID: &str = "calendar-mcp";
pub const CLIENT_SECRET: &str = "test-secret";

#[derive(Default)]
struct AuthorityState {
    tokens: HashMap<String, Value>,
    hits: AtomicUsize,
    failing: AtomicBool,
    last_form: Mutex<Option<HashMap<String, String>>>,
}

/// A mock RFC 7662 endpoint on an ephemeral port.
///
/// Unknown tokens introspect as inactive. Every call is counted.
pub struct MockAuthority {
    pub base_url: String,
    state: Arc<AuthorityState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockAuthority {
    pub async fn start(tokens: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        let state = Arc::new(AuthorityState {
            tokens: tokens
                .into_iter()
                .map(|(token, body)| (token.to_string(), body))
                .collect(),
            ..Default::default()
        });

        let app = Router::new()
            .route("/introspect", post(introspect))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", addr.port()),
            state,
            _handle: handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/introspect", self.base_url)
    }

    /// Introspection calls received so far.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Answer every following call with a 500.
    pub fn fail(&self) {
        self.state.failing.store(true, Ordering::SeqCst);
    }

    pub fn last_form(&self) -> Option<HashMap<String, String>> {
        self.state.last_form.lock().unwrap().clone()
    }

    pub fn settings(&self) -> IntrospectionSettings {
        IntrospectionSettings::new(self.endpoint(), RESOURCE)
            .client_credentials(CLIENT_ID, CLIENT_SECRET)
            .timeout(Duration::from_secs(2))
    }

    pub fn client(&self, cache: IntrospectionCache) -> IntrospectionClient {
        IntrospectionClient::new(self.settings(), cache).unwrap()
    }
}

async fn introspect(
    State(state): State<Arc<AuthorityState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let token = form.get("token").cloned().unwrap_or_default();
    *state.last_form.lock().unwrap() = Some(form);

    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    let body = state
        .tokens
        .get(&token)
        .cloned()
        .unwrap_or_else(|| json!({ "active": false }));
    Json(body).into_response()
}

/// Seconds since the epoch, `offset` from `now`.
pub fn epoch_secs(now: SystemTime, offset: Duration) -> u64 {
    (now + offset).duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// An active introspection response for `sub` with `scope`, valid for an hour.
pub fn active_token(sub: &str, scope: &str) -> Value {
    json!({
        "active": true,
        "sub": sub,
        "client_id": "calendar-client",
        "scope": scope,
        "aud": RESOURCE,
        "exp": epoch_secs(SystemTime::now(), Duration::from_secs(3600)),
    })
}

/// An event in wire form; `user_id` is omitted when `tenant` is `None`.
pub fn event(sid: &str, tenant: Option<&str>) -> Event {
    let mut wire = json!({
        "sid": sid,
        "name": format!("Event {}", sid),
        "content": "Weekly sync",
        "category": "Meeting",
        "level": 2,
        "status": 0.0,
        "creation_time": "2025-01-01 09:00:00",
        "start_time": "2025-01-06 10:00:00",
        "end_time": "2025-01-06 11:00:00",
    });
    if let Some(tenant) = tenant {
        wire["user_id"] = json!(tenant);
    }
    serde_json::from_value(wire).unwrap()
}
