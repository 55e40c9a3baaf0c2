//! Token lifecycle manager.
//!
//! Top-level orchestrator over the vault, the store, the provider, and the
//! retry orchestrator. Per credential record the state machine is:
//!
//! ```text
//! absent → healthy → expiring-soon → expired → (refreshed → healthy)
//!                                            | (revoked → absent)
//! ```
//!
//! Refreshes for the same `(owner, tenant)` key are single-flight: a per-key
//! async mutex serializes them, and a caller that acquires the lock after a
//! peer finished re-reads the record and returns the already-fresh token
//! instead of calling the provider again.

use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use tallyport_common::error::{ApiErrorKind, ClassifiedError};
use tallyport_common::resilience::retry::RetryOrchestrator;
use tallyport_common::vault::{CredentialVault, VaultError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ports::{ActivityLog, CredentialStore, OAuthProvider, StoreError};
use super::types::{
    CredentialHealth, CredentialKey, CredentialMetadata, CredentialRecord, TokenGrant, TokenKind,
};

/// Lead time before expiry at which a token is proactively renewed.
const REFRESH_BUFFER_MINUTES: i64 = 5;

/// Below this remaining validity a credential reports `ExpiringSoon`.
const EXPIRING_SOON_MINUTES: i64 = 10;

/// Failures surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No record stored; the user must (re)authorize. Not transient.
    #[error("no credential stored for this owner")]
    MissingCredential,

    /// The record holds no refresh token, so it cannot be renewed
    #[error("credential has no refresh token and cannot be renewed")]
    NoRefreshToken,

    /// The stored grant lacks scopes the operation requires
    #[error("stored grant is missing required scopes: {missing:?}")]
    InsufficientScopes {
        /// The scopes the grant lacks
        missing: Vec<String>,
    },

    /// Vault seal/open failure
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Persistent store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Classified provider failure
    #[error(transparent)]
    Provider(#[from] ClassifiedError),
}

/// Orchestrates credential storage, refresh, health, and revocation.
pub struct CredentialManager<S, P, A> {
    store: Arc<S>,
    provider: Arc<P>,
    activity: Arc<A>,
    vault: Arc<CredentialVault>,
    retry: RetryOrchestrator,
    refresh_buffer: Duration,
    refresh_locks: DashMap<CredentialKey, Arc<Mutex<()>>>,
}

impl<S, P, A> CredentialManager<S, P, A>
where
    S: CredentialStore + 'static,
    P: OAuthProvider + 'static,
    A: ActivityLog + 'static,
{
    /// Manager with the default refresh buffer and retry policy table.
    pub fn new(store: Arc<S>, provider: Arc<P>, activity: Arc<A>, vault: Arc<CredentialVault>) -> Self {
        Self {
            store,
            provider,
            activity,
            vault,
            retry: RetryOrchestrator::default(),
            refresh_buffer: Duration::minutes(REFRESH_BUFFER_MINUTES),
            refresh_locks: DashMap::new(),
        }
    }

    /// Override the retry orchestrator.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryOrchestrator) -> Self {
        self.retry = retry;
        self
    }

    /// Override the refresh buffer.
    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Store a credential after a successful authorization-code exchange.
    ///
    /// Replaces any prior record for the same `(owner, tenant)` key.
    pub async fn store_authorization(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
        grant: &TokenGrant,
        domain: &str,
        token_kind: TokenKind,
    ) -> Result<CredentialRecord, LifecycleError> {
        let now = Utc::now();
        let refresh_token_ciphertext = match grant.refresh_token.as_deref() {
            Some(rt) => Some(self.vault.seal(rt)?),
            None => None,
        };
        let record = CredentialRecord {
            owner_id: owner_id.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            access_token_ciphertext: self.vault.seal(&grant.access_token)?,
            refresh_token_ciphertext,
            expires_at: grant.expires_at(now),
            scopes: grant.scope_set(),
            domain: domain.to_string(),
            token_kind,
            metadata: CredentialMetadata::new(now),
        };
        self.store.upsert(record.clone()).await?;
        info!(owner_id, ?tenant_id, "credential installed");
        self.log_activity(
            owner_id,
            "credential_installed",
            serde_json::json!({ "tokenKind": token_kind, "domain": domain }),
        );
        Ok(record)
    }

    /// A usable bearer token for the key, refreshing first when the stored
    /// token is within the refresh buffer of expiry and a refresh token
    /// exists.
    pub async fn get_valid_access_token(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<String, LifecycleError> {
        let record = self
            .store
            .get(owner_id, tenant_id)
            .await?
            .ok_or(LifecycleError::MissingCredential)?;

        if record.expires_within(self.refresh_buffer, Utc::now())
            && record.refresh_token_ciphertext.is_some()
        {
            return self.refresh_inner(owner_id, tenant_id, false).await;
        }

        Ok(self.vault.open(&record.access_token_ciphertext)?.into_inner())
    }

    /// Refresh the credential through the provider, serialized per key.
    ///
    /// Persists the renewed record before returning; preserves the prior
    /// refresh token when the provider omits a rotated one.
    pub async fn refresh_access_token(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<String, LifecycleError> {
        self.refresh_inner(owner_id, tenant_id, false).await
    }

    async fn refresh_inner(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
        force: bool,
    ) -> Result<String, LifecycleError> {
        let key: CredentialKey = (owner_id.to_string(), tenant_id.map(str::to_string));
        let lock = Arc::clone(
            self.refresh_locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).value(),
        );
        let _guard = lock.lock().await;

        // Re-read under the lock: a peer may have refreshed while we waited
        let mut record = self
            .store
            .get(owner_id, tenant_id)
            .await?
            .ok_or(LifecycleError::MissingCredential)?;
        if !force && !record.expires_within(self.refresh_buffer, Utc::now()) {
            debug!(owner_id, ?tenant_id, "credential already fresh, sharing peer refresh");
            return Ok(self.vault.open(&record.access_token_ciphertext)?.into_inner());
        }

        let refresh_ciphertext = record
            .refresh_token_ciphertext
            .as_deref()
            .ok_or(LifecycleError::NoRefreshToken)?;
        let refresh_token = self.vault.open(refresh_ciphertext)?.into_inner();

        let provider = Arc::clone(&self.provider);
        let outcome = self
            .retry
            .execute(move || {
                let provider = Arc::clone(&provider);
                let refresh_token = refresh_token.clone();
                async move { provider.refresh(&refresh_token).await }
            })
            .await;

        let grant = match outcome {
            Ok(grant) => grant,
            Err(err) => {
                if err.kind() == ApiErrorKind::CredentialRevoked {
                    // Keep the record so the caller can prompt for reauth,
                    // but flag it as unusable
                    record.metadata.needs_reauth = true;
                    if let Err(store_err) = self.store.upsert(record).await {
                        warn!(owner_id, %store_err, "failed to flag revoked credential");
                    }
                    warn!(owner_id, ?tenant_id, "refresh rejected: grant revoked");
                    self.log_activity(
                        owner_id,
                        "credential_refresh_revoked",
                        serde_json::json!({ "kind": err.kind() }),
                    );
                }
                return Err(err.into());
            }
        };

        let now = Utc::now();
        record.access_token_ciphertext = self.vault.seal(&grant.access_token)?;
        if let Some(rotated) = grant.refresh_token.as_deref() {
            record.refresh_token_ciphertext = Some(self.vault.seal(rotated)?);
        }
        record.expires_at = grant.expires_at(now);
        if grant.scope.is_some() {
            record.scopes = grant.scope_set();
        }
        record.metadata.last_refreshed_at = Some(now);
        record.metadata.refresh_count += 1;
        record.metadata.needs_reauth = false;
        let refresh_count = record.metadata.refresh_count;

        // Persist before returning: a caller must never hold a token that
        // was not durably stored
        self.store.upsert(record).await?;
        info!(owner_id, ?tenant_id, refresh_count, "credential refreshed");
        self.log_activity(
            owner_id,
            "credential_refreshed",
            serde_json::json!({ "refreshCount": refresh_count }),
        );
        Ok(grant.access_token)
    }

    /// Read-only health report derived from the stored `expires_at`.
    /// Never makes a network call.
    pub async fn check_health(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<CredentialHealth, LifecycleError> {
        let record = self.store.get(owner_id, tenant_id).await?;
        Ok(Self::health_of(record.as_ref()))
    }

    fn health_of(record: Option<&CredentialRecord>) -> CredentialHealth {
        let Some(record) = record else {
            return CredentialHealth::Missing;
        };
        let remaining = record.expires_at - Utc::now();
        if remaining <= Duration::zero() && record.refresh_token_ciphertext.is_none() {
            return CredentialHealth::ExpiredNoRefreshToken;
        }
        let minutes_until_expiry = remaining.num_minutes().max(0);
        if remaining < Duration::minutes(EXPIRING_SOON_MINUTES) {
            CredentialHealth::ExpiringSoon { minutes_until_expiry }
        } else {
            CredentialHealth::Healthy { minutes_until_expiry }
        }
    }

    /// Revoke the credential: best-effort provider revocation, then hard
    /// local deletion. Idempotent — revoking an absent record succeeds.
    pub async fn revoke(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<(), LifecycleError> {
        let Some(record) = self.store.get(owner_id, tenant_id).await? else {
            debug!(owner_id, ?tenant_id, "revoke of absent credential is a no-op");
            return Ok(());
        };

        // Provider-side revocation is best-effort: failures are logged,
        // never propagated, and never block local deletion
        match self.vault.open(&record.access_token_ciphertext) {
            Ok(opened) => {
                if let Err(err) = self.provider.revoke(&opened.into_inner()).await {
                    warn!(owner_id, %err, "provider-side revoke failed, deleting locally");
                }
            }
            Err(err) => {
                warn!(owner_id, %err, "could not open token for provider revoke");
            }
        }

        self.store.delete(owner_id, tenant_id).await?;
        info!(owner_id, ?tenant_id, "credential revoked");
        self.log_activity(owner_id, "credential_revoked", serde_json::json!({}));
        Ok(())
    }

    /// Reject before any network call when the stored grant does not cover
    /// the operation's required scopes.
    pub async fn ensure_scopes(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
        required: &[&str],
    ) -> Result<(), LifecycleError> {
        let record = self
            .store
            .get(owner_id, tenant_id)
            .await?
            .ok_or(LifecycleError::MissingCredential)?;
        let missing = record.missing_scopes(required.iter().copied());
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::InsufficientScopes { missing })
        }
    }

    /// Run a resource operation with a valid token, retrying exactly once
    /// after a forced refresh if the provider reports the token expired.
    pub async fn run_with_token<T, F, Fut>(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
        operation: F,
    ) -> Result<T, LifecycleError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let token = self.get_valid_access_token(owner_id, tenant_id).await?;
        match operation(token).await {
            Ok(value) => Ok(value),
            Err(err) if err.kind() == ApiErrorKind::TokenExpired => {
                debug!(owner_id, "provider reported expired token, forcing one refresh");
                let token = self.refresh_inner(owner_id, tenant_id, true).await?;
                operation(token).await.map_err(Into::into)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Record an activity entry without blocking or failing the caller.
    fn log_activity(&self, owner_id: &str, action: &'static str, metadata: serde_json::Value) {
        let activity = Arc::clone(&self.activity);
        let owner_id = owner_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = activity.record(&owner_id, action, metadata).await {
                debug!(owner_id, action, %err, "activity log write failed");
            }
        });
    }
}

impl<S, P, A> std::fmt::Debug for CredentialManager<S, P, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("refresh_buffer", &self.refresh_buffer)
            .finish_non_exhaustive()
    }
}
