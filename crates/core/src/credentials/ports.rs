//! Ports the lifecycle manager depends on.
//!
//! Adapters live in `tallyport-infra`; tests supply in-process fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tallyport_common::error::ClassifiedError;
use thiserror::Error;

use super::types::{CredentialRecord, TokenGrant};

/// Failure talking to the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refusing work
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    /// Record could not be encoded/decoded
    #[error("credential serialization failed: {0}")]
    Serialization(String),
}

/// Persistent credential storage, keyed by `(owner_id, tenant_id)`.
///
/// `upsert` and `delete` are idempotent; the storage layer guarantees the
/// upsert is atomic per key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the record for a key, if one exists.
    async fn get(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert or replace the record for its key.
    async fn upsert(&self, record: CredentialRecord) -> Result<(), StoreError>;

    /// Remove the record for a key. Removing an absent record is not an
    /// error.
    async fn delete(&self, owner_id: &str, tenant_id: Option<&str>) -> Result<(), StoreError>;

    /// Remove records that expired before `cutoff` and were never
    /// successfully refreshed since. Returns how many were removed.
    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Append-only activity trail.
///
/// Strictly best-effort: the manager records entries fire-and-forget and a
/// failing log must never affect the primary operation.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    /// Append one entry.
    async fn record(
        &self,
        owner_id: &str,
        action: &str,
        metadata: serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// The OAuth provider's token and revocation endpoints.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Exchange an authorization code for an initial grant.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ClassifiedError>;

    /// Trade a refresh token for a fresh grant. The returned grant may omit
    /// the refresh token, meaning "unchanged".
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClassifiedError>;

    /// Revoke a token server-side.
    async fn revoke(&self, token: &str) -> Result<(), ClassifiedError>;
}
