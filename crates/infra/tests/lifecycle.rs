//! End-to-end lifecycle scenarios against a mock OAuth provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tallyport_common::vault::{CredentialVault, MIN_KDF_ITERATIONS};
use tallyport_core::credentials::manager::CredentialManager;
use tallyport_core::credentials::ports::{CredentialStore, OAuthProvider};
use tallyport_core::credentials::types::{
    CredentialMetadata, CredentialRecord, TokenGrant, TokenKind,
};
use tallyport_infra::provider::HttpOAuthProvider;
use tallyport_infra::store::{InMemoryActivityLog, InMemoryCredentialStore};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER: &str = "user-1";
const TENANT: Option<&str> = Some("acme.example");

struct Harness {
    manager: CredentialManager<InMemoryCredentialStore, HttpOAuthProvider, InMemoryActivityLog>,
    provider: Arc<HttpOAuthProvider>,
    store: Arc<InMemoryCredentialStore>,
    activity: Arc<InMemoryActivityLog>,
    vault: Arc<CredentialVault>,
    server: MockServer,
}

async fn harness() -> Harness {
    tracing_subscriber::fmt().with_env_filter("tallyport=debug").try_init().ok();

    let server = MockServer::start().await;
    let provider = Arc::new(
        HttpOAuthProvider::builder(
            format!("{}/token", server.uri()),
            format!("{}/revoke", server.uri()),
            "client-id",
            "client-secret",
        )
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap(),
    );

    let store = Arc::new(InMemoryCredentialStore::new());
    let activity = Arc::new(InMemoryActivityLog::new());
    let vault =
        Arc::new(CredentialVault::new(b"integration-secret".to_vec(), MIN_KDF_ITERATIONS).unwrap());
    let manager = CredentialManager::new(
        Arc::clone(&store),
        Arc::clone(&provider),
        Arc::clone(&activity),
        Arc::clone(&vault),
    );
    Harness { manager, provider, store, activity, vault, server }
}

/// Store a record whose access token expired an hour ago but which holds a
/// usable refresh token.
async fn seed_expired(h: &Harness) {
    let now = Utc::now();
    let record = CredentialRecord {
        owner_id: OWNER.to_string(),
        tenant_id: TENANT.map(str::to_string),
        access_token_ciphertext: h.vault.seal("expired-access").unwrap(),
        refresh_token_ciphertext: Some(h.vault.seal("valid-refresh").unwrap()),
        expires_at: now - ChronoDuration::hours(1),
        scopes: ["drive.file"].iter().map(|s| s.to_string()).collect(),
        domain: "acme.example".to_string(),
        token_kind: TokenKind::User,
        metadata: CredentialMetadata::new(now - ChronoDuration::days(1)),
    };
    h.store.upsert(record).await.unwrap();
}

#[tokio::test]
async fn expired_credential_triggers_exactly_one_refresh() {
    let h = harness().await;
    seed_expired(&h).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=valid-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "renewed-access",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let token = h.manager.get_valid_access_token(OWNER, TENANT).await.unwrap();
    assert_eq!(token, "renewed-access");

    // Persisted before the call returned
    let stored = h.store.get(OWNER, TENANT).await.unwrap().unwrap();
    assert!(stored.expires_at > Utc::now());
    assert_eq!(
        h.vault.open(&stored.access_token_ciphertext).unwrap().into_inner(),
        "renewed-access"
    );
    // Rotation omitted: the prior refresh token survives
    assert_eq!(
        h.vault
            .open(stored.refresh_token_ciphertext.as_deref().unwrap())
            .unwrap()
            .into_inner(),
        "valid-refresh"
    );
    assert_eq!(stored.metadata.refresh_count, 1);

    // Activity logging is fire-and-forget; give the spawned task a moment
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.activity.actions().contains(&"credential_refreshed".to_string()));
}

#[tokio::test]
async fn authorization_flow_installs_a_working_credential() {
    let h = harness().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "first-access",
            "refresh_token": "first-refresh",
            "expires_in": 3600,
            "scope": "drive.file spreadsheets"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let grant: TokenGrant =
        h.provider.exchange_code("auth-code", "http://localhost/cb").await.unwrap();
    let record = h
        .manager
        .store_authorization(OWNER, TENANT, &grant, "acme.example", TokenKind::User)
        .await
        .unwrap();
    assert_eq!(
        h.vault.open(&record.access_token_ciphertext).unwrap().into_inner(),
        "first-access"
    );
    assert!(record.covers_scopes(["drive.file", "spreadsheets"]));

    // Fresh token: no further provider traffic
    let token = h.manager.get_valid_access_token(OWNER, TENANT).await.unwrap();
    assert_eq!(token, "first-access");
}

#[tokio::test]
async fn revoke_twice_is_idempotent_and_leaves_no_record() {
    let h = harness().await;
    seed_expired(&h).await;

    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&h.server)
        .await;

    h.manager.revoke(OWNER, TENANT).await.unwrap();
    assert!(h.store.get(OWNER, TENANT).await.unwrap().is_none());

    h.manager.revoke(OWNER, TENANT).await.unwrap();
    assert!(h.store.get(OWNER, TENANT).await.unwrap().is_none());
}

#[tokio::test]
async fn revoked_refresh_surfaces_reauth_flag() {
    let h = harness().await;
    seed_expired(&h).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&h.server)
        .await;

    let err = h.manager.get_valid_access_token(OWNER, TENANT).await.unwrap_err();
    assert!(err.to_string().contains("revoked") || err.to_string().contains("Revoked"));

    let stored = h.store.get(OWNER, TENANT).await.unwrap().expect("record kept for reauth");
    assert!(stored.metadata.needs_reauth);
}
