//! Credential domain types.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a credential record: owner plus optional tenant.
///
/// `None` tenant means a personal, non-organizational installation.
pub type CredentialKey = (String, Option<String>);

/// Who the grant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    /// An individual user's grant
    User,
    /// A machine identity installed tenant-wide
    ServiceAccount,
}

/// Mutable bookkeeping carried alongside a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialMetadata {
    /// When the credential was first stored
    pub installed_at: DateTime<Utc>,
    /// Last successful refresh, if any
    pub last_refreshed_at: Option<DateTime<Utc>>,
    /// How many times the credential has been refreshed
    pub refresh_count: u64,
    /// Set when a refresh failed with a revoked grant; the user must
    /// re-authorize before the credential is usable again
    pub needs_reauth: bool,
}

impl CredentialMetadata {
    /// Fresh metadata for a newly installed credential.
    pub fn new(installed_at: DateTime<Utc>) -> Self {
        Self { installed_at, last_refreshed_at: None, refresh_count: 0, needs_reauth: false }
    }
}

/// One stored credential per `(owner, tenant)` pair.
///
/// Token fields hold vault ciphertext, never plaintext; the manager seals
/// and opens them at the persistence boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Owning identity
    pub owner_id: String,
    /// Organizational tenant, absent for personal installations
    pub tenant_id: Option<String>,
    /// Sealed access token
    pub access_token_ciphertext: String,
    /// Sealed refresh token; absence means a non-renewable grant
    pub refresh_token_ciphertext: Option<String>,
    /// Absolute expiry of the access token. Always set.
    pub expires_at: DateTime<Utc>,
    /// Scopes the grant covers
    pub scopes: BTreeSet<String>,
    /// Domain of the owning identity, for tenant-wide policy lookups
    pub domain: String,
    /// User or service-account grant
    pub token_kind: TokenKind,
    /// Bookkeeping
    pub metadata: CredentialMetadata,
}

impl CredentialRecord {
    /// The record's identity key.
    pub fn key(&self) -> CredentialKey {
        (self.owner_id.clone(), self.tenant_id.clone())
    }

    /// Whether the token is within `buffer` of its expiry (or past it).
    pub fn expires_within(&self, buffer: Duration, now: DateTime<Utc>) -> bool {
        now + buffer >= self.expires_at
    }

    /// Whether every required scope is covered by the stored grant.
    pub fn covers_scopes<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> bool {
        required.into_iter().all(|scope| self.scopes.contains(scope))
    }

    /// Scopes in `required` that the stored grant lacks.
    pub fn missing_scopes<'a>(
        &self,
        required: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        required
            .into_iter()
            .filter(|scope| !self.scopes.contains(*scope))
            .map(str::to_string)
            .collect()
    }
}

/// Read-only health of a credential, derived purely from `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum CredentialHealth {
    /// No record stored; the user must (re)authorize
    Missing,
    /// Past expiry with no refresh token; unrecoverable without reauth
    ExpiredNoRefreshToken,
    /// Less than ten minutes of validity left
    ExpiringSoon {
        /// Whole minutes until expiry (zero when already past)
        minutes_until_expiry: i64,
    },
    /// Comfortably valid
    Healthy {
        /// Whole minutes until expiry
        minutes_until_expiry: i64,
    },
}

/// What the provider returns from a token-endpoint call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// Bearer token for resource calls
    pub access_token: String,
    /// Rotated refresh token; omitted means "unchanged"
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Validity in seconds from now
    pub expires_in: u64,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Granted scopes as a set.
    pub fn scope_set(&self) -> BTreeSet<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Absolute expiry computed from `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in as i64)
    }
}
