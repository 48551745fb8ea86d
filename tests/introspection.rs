//! Token introspection against a live mock authorization server.

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use calendar_mcp::oauth::{
    AuthError, IntrospectionCache, IntrospectionClient, IntrospectionSettings, ManualClock,
};
use serde_json::json;

use common::{CLIENT_ID, CLIENT_SECRET, MockAuthority, RESOURCE, active_token, epoch_secs};

#[tokio::test]
async fn test_valid_token_yields_subject_and_scopes() {
    let authority = MockAuthority::start([("good", active_token("user0", "openid mcp:tools"))]).await;
    let client = authority.client(IntrospectionCache::default());

    let result = client.verify("good").await.unwrap();
    assert!(result.active);
    assert_eq!(result.subject.as_deref(), Some("user0"));
    assert!(result.scopes.contains("mcp:tools"));
    assert!(result.scopes.contains("openid"));
}

#[tokio::test]
async fn test_client_credentials_are_sent() {
    let authority = MockAuthority::start([("good", active_token("user0", "mcp:tools"))]).await;
    let client = authority.client(IntrospectionCache::default());

    client.verify("good").await.unwrap();
    let form = authority.last_form().unwrap();
    assert_eq!(form["token"], "good");
    assert_eq!(form["client_id"], CLIENT_ID);
    assert_eq!(form["client_secret"], CLIENT_SECRET);
}

#[tokio::test]
async fn test_repeated_verification_introspects_once() {
    let authority = MockAuthority::start([("good", active_token("user0", "mcp:tools"))]).await;
    let client = authority.client(IntrospectionCache::new(Duration::from_secs(60)));

    let first = client.verify("good").await.unwrap();
    let second = client.verify("good").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(authority.hits(), 1);
}

#[tokio::test]
async fn test_concurrent_clones_share_the_cache() {
    let authority = MockAuthority::start([("good", active_token("user0", "mcp:tools"))]).await;
    let client = authority.client(IntrospectionCache::default());

    client.verify("good").await.unwrap();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.verify("good").await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(authority.hits(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_lookups_introspect_once() {
    let authority = MockAuthority::start([("good", active_token("user0", "mcp:tools"))]).await;
    let client = authority.client(IntrospectionCache::default());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.verify("good").await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().subject.as_deref(), Some("user0"));
    }
    assert_eq!(authority.hits(), 1);
}

#[tokio::test]
async fn test_far_future_exp_does_not_crash() {
    let mut body = active_token("user0", "mcp:tools");
    body["exp"] = json!(u64::MAX);
    let authority = MockAuthority::start([("forever", body)]).await;
    let client = authority.client(IntrospectionCache::default());

    let result = client.verify("forever").await.unwrap();
    assert_eq!(result.expires_at, None);
    client.verify("forever").await.unwrap();
    assert_eq!(authority.hits(), 1);
}

#[tokio::test]
async fn test_unknown_tokens_do_not_grow_cache_past_cap() {
    let authority = MockAuthority::start([("good", active_token("user0", "mcp:tools"))]).await;
    let client = authority.client(IntrospectionCache::default().with_max_entries(100));

    for i in 0..500 {
        let token = format!("bogus-{}", i);
        assert_eq!(client.verify(&token).await.unwrap_err(), AuthError::InactiveToken);
    }
    assert_eq!(client.cache().len(), 100);

    client.verify("good").await.unwrap();
    client.verify("good").await.unwrap();
    assert_eq!(authority.hits(), 501);
}

#[tokio::test]
async fn test_cache_expiry_triggers_fresh_introspection() {
    let authority = MockAuthority::start([("good", active_token("user0", "mcp:tools"))]).await;
    let clock = Arc::new(ManualClock::new());
    let cache = IntrospectionCache::with_clock(Duration::from_secs(60), clock.clone());
    let client = authority.client(cache);

    client.verify("good").await.unwrap();
    clock.advance(Duration::from_secs(30));
    client.verify("good").await.unwrap();
    assert_eq!(authority.hits(), 1);

    clock.advance(Duration::from_secs(31));
    client.verify("good").await.unwrap();
    assert_eq!(authority.hits(), 2);
}

#[tokio::test]
async fn test_cache_never_outlives_token_expiry() {
    let start = SystemTime::now();
    let clock = Arc::new(ManualClock::starting_at(start));
    let expires = epoch_secs(start, Duration::from_secs(10));
    let authority = MockAuthority::start([(
        "short",
        json!({
            "active": true,
            "sub": "user0",
            "scope": "mcp:tools",
            "aud": RESOURCE,
            "exp": expires,
        }),
    )])
    .await;
    let cache = IntrospectionCache::with_clock(Duration::from_secs(300), clock.clone());
    let client = authority.client(cache);

    client.verify("short").await.unwrap();
    clock.advance(Duration::from_secs(11));

    let err = client.verify("short").await.unwrap_err();
    assert_eq!(err, AuthError::TokenExpired);
    assert_eq!(authority.hits(), 2);
}

#[tokio::test]
async fn test_inactive_token_is_rejected_and_cached() {
    let authority = MockAuthority::start([]).await;
    let client = authority.client(IntrospectionCache::default());

    assert_eq!(client.verify("revoked").await.unwrap_err(), AuthError::InactiveToken);
    assert_eq!(client.verify("revoked").await.unwrap_err(), AuthError::InactiveToken);
    assert_eq!(authority.hits(), 1);
}

#[tokio::test]
async fn test_audience_mismatch() {
    let mut body = active_token("user0", "mcp:tools");
    body["aud"] = json!(["https://other.example.com"]);
    let authority = MockAuthority::start([("elsewhere", body)]).await;
    let client = authority.client(IntrospectionCache::default());

    assert_eq!(
        client.verify("elsewhere").await.unwrap_err(),
        AuthError::AudienceMismatch
    );
}

#[tokio::test]
async fn test_audience_array_with_trailing_slash_matches() {
    let mut body = active_token("user0", "mcp:tools");
    body["aud"] = json!(["https://other.example.com", format!("{}/", RESOURCE)]);
    let authority = MockAuthority::start([("multi", body)]).await;
    let client = authority.client(IntrospectionCache::default());

    assert!(client.verify("multi").await.is_ok());
}

#[tokio::test]
async fn test_missing_scope_is_rejected() {
    let authority = MockAuthority::start([("narrow", active_token("user0", "openid profile"))]).await;
    let client = authority.client(IntrospectionCache::default());

    assert_eq!(
        client.verify("narrow").await.unwrap_err(),
        AuthError::InsufficientScope {
            required: "mcp:tools".to_string()
        }
    );
}

#[tokio::test]
async fn test_custom_required_scope() {
    let authority = MockAuthority::start([("cal", active_token("user0", "calendar:rw"))]).await;
    let settings = authority.settings().required_scope("calendar:rw");
    let client = IntrospectionClient::new(settings, IntrospectionCache::default()).unwrap();

    assert!(client.verify("cal").await.is_ok());
}

#[tokio::test]
async fn test_authority_error_is_unavailable_and_not_cached() {
    let authority = MockAuthority::start([("good", active_token("user0", "mcp:tools"))]).await;
    let client = authority.client(IntrospectionCache::default());
    authority.fail();

    let err = client.verify("good").await.unwrap_err();
    assert!(matches!(err, AuthError::IntrospectionUnavailable(_)));
    assert!(!err.is_challenge());

    let _ = client.verify("good").await;
    assert_eq!(authority.hits(), 2);
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_unreachable_authority_is_unavailable() {
    // Bind and drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let settings = IntrospectionSettings::new(
        format!("http://127.0.0.1:{}/introspect", port),
        RESOURCE,
    )
    .client_credentials(CLIENT_ID, CLIENT_SECRET)
    .timeout(Duration::from_secs(2));
    let client = IntrospectionClient::new(settings, IntrospectionCache::default()).unwrap();

    let err = client.verify("anything").await.unwrap_err();
    assert!(matches!(err, AuthError::IntrospectionUnavailable(_)));
}
