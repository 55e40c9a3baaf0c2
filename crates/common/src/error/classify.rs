//! Deterministic mapping from raw provider failures to the closed taxonomy.
//!
//! The only classification entry point in the workspace. Call sites never
//! string-match provider payloads themselves; they build a
//! [`RawProviderError`] and hand it here.
//!
//! Precedence when multiple signals are present, strongest first:
//! 1. structured `(domain, reason)` pair
//! 2. HTTP status code
//! 3. conservative free-text substring match
//! 4. `Unknown`

use serde::Deserialize;

use super::{ApiErrorKind, ClassifiedError};

/// A structured reason code from a provider error body.
///
/// Providers nest these under `error.errors[]`; the `domain` disambiguates
/// reasons that share a name (e.g. `usageLimits/rateLimitExceeded` vs a
/// storage quota).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StructuredReason {
    /// Namespace of the reason, e.g. `usageLimits` or `global`
    #[serde(default)]
    pub domain: String,
    /// The reason code itself, e.g. `rateLimitExceeded`
    pub reason: String,
}

/// A provider failure before classification.
///
/// Built by adapters from whatever the provider actually returned; any field
/// may be absent.
#[derive(Debug, Clone, Default)]
pub struct RawProviderError {
    /// HTTP status, when a response arrived
    pub http_status: Option<u16>,
    /// Structured reason codes parsed from the error body
    pub reasons: Vec<StructuredReason>,
    /// Free-text message (body text, transport error string)
    pub message: String,
    /// Provider-supplied retry delay in seconds, when present
    pub retry_after_secs: Option<u64>,
    /// Raw body for diagnostics
    pub raw: Option<serde_json::Value>,
}

impl RawProviderError {
    /// A transport-level failure with no HTTP response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::default() }
    }
}

/// Classify a raw provider failure into the closed taxonomy.
pub fn classify(raw: RawProviderError) -> ClassifiedError {
    let kind = raw
        .reasons
        .iter()
        .find_map(|r| kind_from_reason(&r.domain, &r.reason))
        .or_else(|| raw.http_status.and_then(kind_from_status))
        .or_else(|| kind_from_text(&raw.message))
        .unwrap_or(ApiErrorKind::Unknown);

    let mut err = ClassifiedError::new(kind, raw.message);
    if let Some(status) = raw.http_status {
        err = err.with_status(status);
    }
    if let Some(secs) = raw.retry_after_secs {
        err = err.with_retry_after(std::time::Duration::from_secs(secs));
    }
    if let Some(body) = raw.raw {
        err = err.with_raw(body);
    }
    err
}

/// Structured reason codes, the strongest signal.
fn kind_from_reason(domain: &str, reason: &str) -> Option<ApiErrorKind> {
    let kind = match reason {
        "rateLimitExceeded" | "userRateLimitExceeded" | "dailyLimitExceeded" => {
            ApiErrorKind::RateLimited
        }
        "quotaExceeded" => {
            // A usage-limits quota is throttling; a storage quota is capacity.
            if domain == "usageLimits" {
                ApiErrorKind::RateLimited
            } else {
                ApiErrorKind::QuotaExceeded
            }
        }
        "storageQuotaExceeded" | "quotaExceededForUser" => ApiErrorKind::QuotaExceeded,
        "storageFull" | "teamDriveFileLimitExceeded" => ApiErrorKind::StorageFull,
        "insufficientPermissions" | "insufficientScopes" | "forbiddenByPolicy" => {
            ApiErrorKind::InsufficientScopes
        }
        "appNotAuthorizedToFile" | "domainPolicy" | "userAccess" => ApiErrorKind::AccessDenied,
        "authError" | "invalid_grant" | "invalidCredentials" => ApiErrorKind::InvalidCredentials,
        "expired" | "authExpired" => ApiErrorKind::TokenExpired,
        "revoked" | "deleted_client" | "disabled_client" => ApiErrorKind::CredentialRevoked,
        "notFound" | "fileNotFound" => ApiErrorKind::ResourceNotFound,
        "duplicate" | "alreadyExists" => ApiErrorKind::DuplicateResource,
        "invalidResourceType" | "fileNeverWritable" | "mimeTypeNotSupported" => {
            ApiErrorKind::InvalidResourceType
        }
        "uploadTooLarge" | "payloadTooLarge" => ApiErrorKind::ResourceTooLarge,
        "badRequest" | "invalid" | "invalidParameter" | "required" => ApiErrorKind::InvalidRequest,
        "backendError" | "internalError" => ApiErrorKind::ServiceUnavailable,
        _ => return None,
    };
    Some(kind)
}

/// HTTP status codes, the second-strongest signal.
fn kind_from_status(status: u16) -> Option<ApiErrorKind> {
    let kind = match status {
        401 => ApiErrorKind::TokenExpired,
        403 => ApiErrorKind::AccessDenied,
        404 => ApiErrorKind::ResourceNotFound,
        408 => ApiErrorKind::Timeout,
        409 => ApiErrorKind::DuplicateResource,
        413 => ApiErrorKind::ResourceTooLarge,
        429 => ApiErrorKind::RateLimited,
        400 | 422 => ApiErrorKind::InvalidRequest,
        500..=599 => ApiErrorKind::ServiceUnavailable,
        _ => return None,
    };
    Some(kind)
}

/// Free-text matching, the last resort. Conservative on purpose: when the
/// text is ambiguous we return `None` and let the caller see `Unknown`
/// rather than guess a wrong specific kind.
fn kind_from_text(message: &str) -> Option<ApiErrorKind> {
    let text = message.to_lowercase();
    if text.is_empty() {
        return None;
    }
    let kind = if text.contains("rate limit") || text.contains("too many requests") {
        ApiErrorKind::RateLimited
    } else if text.contains("storage quota") || text.contains("storage full") {
        ApiErrorKind::StorageFull
    } else if text.contains("quota") {
        ApiErrorKind::QuotaExceeded
    } else if text.contains("invalid_grant") || text.contains("token has been revoked") {
        ApiErrorKind::CredentialRevoked
    } else if text.contains("token expired") || text.contains("invalid credentials") {
        ApiErrorKind::TokenExpired
    } else if text.contains("timed out") || text.contains("timeout") {
        ApiErrorKind::Timeout
    } else if text.contains("connection")
        || text.contains("dns")
        || text.contains("unreachable")
        || text.contains("broken pipe")
        || text.contains("connection reset")
    {
        ApiErrorKind::NetworkError
    } else if text.contains("service unavailable") || text.contains("backend error") {
        ApiErrorKind::ServiceUnavailable
    } else if text.contains("not found") {
        ApiErrorKind::ResourceNotFound
    } else if text.contains("permission") || text.contains("insufficient scope") {
        ApiErrorKind::InsufficientScopes
    } else {
        return None;
    };
    Some(kind)
}
