use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use veriscan_client::api_client::{ApiClient, ClientOptions};
use veriscan_client::auth::AuthGuard;
use veriscan_client::cache::MemoryRequestCache;
use veriscan_client::events::AuthEvent;
use veriscan_client::persistence::{CredentialStore, MemoryCredentialStore};
use veriscan_core::{Method, AUTHORIZATION_HEADER};
use veriscan_test_utils::ScriptedTransport;

struct Harness {
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryCredentialStore>,
    client: ApiClient<Arc<ScriptedTransport>>,
}

fn harness(store: MemoryCredentialStore) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(store);
    let auth = Arc::new(AuthGuard::new(store.clone(), "/signin"));
    let client = ApiClient::new(
        Arc::clone(&transport),
        Arc::new(MemoryRequestCache::new()),
        auth,
        ClientOptions::default(),
    );
    Harness {
        transport,
        store,
        client,
    }
}

#[tokio::test]
async fn test_bearer_header_attached_when_signed_in() {
    let h = harness(MemoryCredentialStore::with_token("abc123"));
    h.transport.push_json(serde_json::json!({}));

    h.client.stats(true, &CancellationToken::new()).await.unwrap();

    let sent = h.transport.requests();
    assert_eq!(sent[0].header(AUTHORIZATION_HEADER), Some("Bearer abc123"));
}

#[tokio::test]
async fn test_header_omitted_when_signed_out() {
    let h = harness(MemoryCredentialStore::new());
    h.transport.push_json(serde_json::json!({}));

    h.client.stats(true, &CancellationToken::new()).await.unwrap();

    assert_eq!(h.transport.requests()[0].header(AUTHORIZATION_HEADER), None);
}

#[tokio::test]
async fn test_token_is_read_at_send_time() {
    let h = harness(MemoryCredentialStore::new());
    h.transport
        .push_json(serde_json::json!({}))
        .push_json(serde_json::json!({}));

    h.client.stats(true, &CancellationToken::new()).await.unwrap();
    h.client.auth().sign_in("fresh", None).unwrap();
    h.client.stats(true, &CancellationToken::new()).await.unwrap();

    let sent = h.transport.requests();
    assert_eq!(sent[0].header(AUTHORIZATION_HEADER), None);
    assert_eq!(sent[1].header(AUTHORIZATION_HEADER), Some("Bearer fresh"));
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_tears_down_once_without_retry() {
    let h = harness(MemoryCredentialStore::with_token("stale"));
    let mut events = h.client.auth().subscribe();
    h.transport
        .push_status(401, r#"{"error":"Token expired"}"#)
        .push_json(serde_json::json!({"unused": true}));

    let err = h
        .client
        .stats(true, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(h.transport.attempts(), 1);
    assert_eq!(h.store.token().unwrap(), None);
    assert_eq!(
        events.try_recv().unwrap(),
        AuthEvent::SignInRequired {
            redirect_to: "/signin".to_string(),
            request_url: "/api/stats".to_string(),
        }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_exempt_request_ignores_unauthorized() {
    let h = harness(MemoryCredentialStore::with_token("keep-me"));
    let mut events = h.client.auth().subscribe();
    h.transport.push_status(401, "");

    let request = h
        .client
        .request(Method::Post, "/api/auth/login")
        .with_skip_auth(true);
    let err = h
        .client
        .execute(request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(h.transport.requests()[0].header(AUTHORIZATION_HEADER), None);
    assert_eq!(h.store.token().unwrap().as_deref(), Some("keep-me"));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_forbidden_keeps_credentials() {
    let h = harness(MemoryCredentialStore::with_token("abc"));
    h.transport.push_status(403, "");

    h.client
        .stats(true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(h.store.token().unwrap().as_deref(), Some("abc"));
}

#[test]
fn test_sign_in_and_out_publish_events() {
    let h = harness(MemoryCredentialStore::new());
    let mut events = h.client.auth().subscribe();
    let user = serde_json::json!({"id": 7, "email": "a@example.com"});

    h.client.auth().sign_in("tok", Some(&user)).unwrap();
    assert_eq!(h.client.auth().user(), Some(user));
    h.client.auth().sign_out().unwrap();

    assert_eq!(events.try_recv().unwrap(), AuthEvent::SignedIn);
    assert_eq!(events.try_recv().unwrap(), AuthEvent::SignedOut);
    assert!(!h.client.auth().context().is_authenticated());
}
