//! Provider-error taxonomy shared by every Tallyport layer.
//!
//! All failures that cross a component boundary are expressed as a
//! [`ClassifiedError`]: a stable [`ApiErrorKind`] plus transport metadata
//! (HTTP status, provider retry hint) and the raw payload kept for
//! diagnostics. Upstream error shapes never leak past the classifier.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod classify;

pub use classify::{classify, RawProviderError, StructuredReason};

/// Closed set of error kinds surfaced to callers.
///
/// The set is intentionally closed: callers match on it exhaustively, and
/// anything a provider invents lands in `Unknown` rather than growing the
/// enum ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiErrorKind {
    /// Credentials are malformed or rejected outright
    InvalidCredentials,
    /// Access token expired; a refresh may recover
    TokenExpired,
    /// Grant revoked server-side; re-authorization is required
    CredentialRevoked,
    /// Stored grant lacks a scope the operation needs
    InsufficientScopes,
    /// Provider-side storage quota exhausted
    QuotaExceeded,
    /// Request rejected by provider rate limiting
    RateLimited,
    /// Target storage is full
    StorageFull,
    /// Connection-level failure before a response arrived
    NetworkError,
    /// Request exceeded its deadline
    Timeout,
    /// Provider reported a transient outage (5xx)
    ServiceUnavailable,
    /// Referenced resource does not exist
    ResourceNotFound,
    /// Authenticated but not permitted
    AccessDenied,
    /// A resource with the same identity already exists
    DuplicateResource,
    /// Operation does not apply to this resource type
    InvalidResourceType,
    /// Payload exceeds the provider's size limit
    ResourceTooLarge,
    /// Request was malformed
    InvalidRequest,
    /// Unclassifiable failure
    Unknown,
}

impl ApiErrorKind {
    /// Whether the retry orchestrator may re-attempt this kind at all.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::NetworkError | Self::ServiceUnavailable
        )
    }

    /// Short human-readable title for user-facing surfaces.
    pub fn title(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid Credentials",
            Self::TokenExpired => "Session Expired",
            Self::CredentialRevoked => "Access Revoked",
            Self::InsufficientScopes => "Missing Permissions",
            Self::QuotaExceeded => "Quota Exceeded",
            Self::RateLimited => "Too Many Requests",
            Self::StorageFull => "Storage Full",
            Self::NetworkError => "Network Error",
            Self::Timeout => "Request Timed Out",
            Self::ServiceUnavailable => "Service Unavailable",
            Self::ResourceNotFound => "Not Found",
            Self::AccessDenied => "Access Denied",
            Self::DuplicateResource => "Already Exists",
            Self::InvalidResourceType => "Unsupported Resource",
            Self::ResourceTooLarge => "Too Large",
            Self::InvalidRequest => "Invalid Request",
            Self::Unknown => "Unexpected Error",
        }
    }

    /// Stable user-facing message for this kind.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => {
                "The stored credentials were rejected. Please reconnect the account."
            }
            Self::TokenExpired => "The session expired. It will be refreshed automatically.",
            Self::CredentialRevoked => {
                "Access to this account was revoked. Please reconnect the account."
            }
            Self::InsufficientScopes => {
                "The connected account does not grant the permissions this operation needs. \
                 Please reconnect and approve the requested access."
            }
            Self::QuotaExceeded => {
                "The provider quota for this account is exhausted. Please try again later."
            }
            Self::RateLimited => "Too many requests. Please wait before trying again.",
            Self::StorageFull => {
                "The destination storage is full. Free up space and try again."
            }
            Self::NetworkError => {
                "Could not reach the provider. Please check your connection and try again."
            }
            Self::Timeout => "The provider took too long to respond. Please try again.",
            Self::ServiceUnavailable => {
                "The provider is temporarily unavailable. This usually resolves within a \
                 minute."
            }
            Self::ResourceNotFound => "The requested item could not be found.",
            Self::AccessDenied => "You do not have permission to access this item.",
            Self::DuplicateResource => "An item with this name already exists.",
            Self::InvalidResourceType => "This operation does not support that kind of item.",
            Self::ResourceTooLarge => "The item is too large for the provider to accept.",
            Self::InvalidRequest => "The request was invalid. Please check the input.",
            Self::Unknown => {
                "An unexpected error occurred. Please try again or contact support if it \
                 persists."
            }
        }
    }

    /// Recommended caller recovery for this kind.
    pub fn recovery_action(self) -> RecoveryAction {
        match self {
            Self::InvalidCredentials | Self::CredentialRevoked | Self::InsufficientScopes => {
                RecoveryAction::ReconnectAccount
            }
            Self::TokenExpired | Self::NetworkError | Self::Timeout => RecoveryAction::Retry,
            Self::QuotaExceeded | Self::RateLimited | Self::ServiceUnavailable => {
                RecoveryAction::RetryLater
            }
            Self::StorageFull => RecoveryAction::FreeUpStorage,
            Self::ResourceTooLarge => RecoveryAction::ReduceSize,
            Self::DuplicateResource => RecoveryAction::RenameResource,
            Self::InvalidRequest | Self::InvalidResourceType => RecoveryAction::CheckInput,
            Self::Unknown => RecoveryAction::ContactSupport,
            Self::ResourceNotFound | Self::AccessDenied => RecoveryAction::None,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// What the caller should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryAction {
    /// Re-run the OAuth authorization flow
    ReconnectAccount,
    /// Retry immediately
    Retry,
    /// Retry after a delay
    RetryLater,
    /// Free provider-side storage
    FreeUpStorage,
    /// Shrink the payload
    ReduceSize,
    /// Pick a different resource name
    RenameResource,
    /// Fix the request input
    CheckInput,
    /// Escalate
    ContactSupport,
    /// Nothing to do
    None,
}

/// A provider failure after classification.
///
/// Transient value type: constructed per failed call, carried through the
/// retry orchestrator and surfaced to the caller. Never persisted.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    kind: ApiErrorKind,
    http_status: Option<u16>,
    retry_after_hint: Option<Duration>,
    message: String,
    raw: Option<serde_json::Value>,
}

impl ClassifiedError {
    /// Build a classified error from its kind and a diagnostic message.
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self { kind, http_status: None, retry_after_hint: None, message: message.into(), raw: None }
    }

    /// Attach the HTTP status the provider answered with.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Attach a provider-supplied retry delay (e.g. a `Retry-After` header).
    #[must_use]
    pub fn with_retry_after(mut self, hint: Duration) -> Self {
        self.retry_after_hint = Some(hint);
        self
    }

    /// Attach the raw response payload for diagnostics.
    #[must_use]
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// The stable kind.
    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    /// HTTP status, when the failure came with a response.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Provider-supplied retry delay, if any. Overrides computed backoff.
    pub fn retry_after_hint(&self) -> Option<Duration> {
        self.retry_after_hint
    }

    /// Diagnostic message (not user-facing).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Raw provider payload, when captured.
    pub fn raw(&self) -> Option<&serde_json::Value> {
        self.raw.as_ref()
    }

    /// Whether the retry orchestrator may re-attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Recommended caller recovery.
    pub fn recovery_action(&self) -> RecoveryAction {
        self.kind.recovery_action()
    }

    /// Stable user-facing message.
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(status) = self.http_status {
            write!(f, " (HTTP {status})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {}
