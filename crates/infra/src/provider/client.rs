//! Reqwest-backed OAuth provider client.
//!
//! Speaks the provider's token and revocation endpoints with form-encoded
//! grant requests and a bounded timeout. Every failure is funneled through
//! the central classifier: structured reason codes from the error body,
//! then HTTP status, then transport error text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use tallyport_common::error::{
    classify, ApiErrorKind, ClassifiedError, RawProviderError, StructuredReason,
};
use tallyport_core::credentials::ports::OAuthProvider;
use tallyport_core::credentials::types::TokenGrant;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`HttpOAuthProvider`].
#[derive(Debug, Clone)]
pub struct HttpOAuthProviderBuilder {
    token_endpoint: String,
    revoke_endpoint: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

impl HttpOAuthProviderBuilder {
    /// Start a builder from the two endpoints and client credentials.
    pub fn new(
        token_endpoint: impl Into<String>,
        revoke_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            revoke_endpoint: revoke_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the provider client.
    pub fn build(self) -> Result<HttpOAuthProvider, ClassifiedError> {
        let client = reqwest::Client::builder().timeout(self.timeout).build().map_err(|err| {
            ClassifiedError::new(ApiErrorKind::Unknown, format!("http client build failed: {err}"))
        })?;
        Ok(HttpOAuthProvider {
            client,
            token_endpoint: self.token_endpoint,
            revoke_endpoint: self.revoke_endpoint,
            client_id: self.client_id,
            client_secret: self.client_secret,
        })
    }
}

/// OAuth token/revocation client over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpOAuthProvider {
    client: reqwest::Client,
    token_endpoint: String,
    revoke_endpoint: String,
    client_id: String,
    client_secret: String,
}

impl HttpOAuthProvider {
    /// Builder entry point.
    pub fn builder(
        token_endpoint: impl Into<String>,
        revoke_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> HttpOAuthProviderBuilder {
        HttpOAuthProviderBuilder::new(token_endpoint, revoke_endpoint, client_id, client_secret)
    }

    /// POST a form to the token endpoint and parse the grant.
    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, ClassifiedError> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let retry_after = parse_retry_after(&response);
        let body = response.text().await.map_err(classify_transport)?;

        if status.is_success() {
            serde_json::from_str::<TokenGrant>(&body).map_err(|err| {
                ClassifiedError::new(
                    ApiErrorKind::Unknown,
                    format!("malformed token response: {err}"),
                )
                .with_status(status.as_u16())
            })
        } else {
            Err(classify(parse_error_body(status.as_u16(), retry_after, &body)))
        }
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthProvider {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ClassifiedError> {
        debug!("exchanging authorization code");
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, ClassifiedError> {
        debug!("refreshing access token");
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    /// Revocation is best-effort at the wire level too: a non-2xx answer is
    /// logged and swallowed, only transport failures surface.
    async fn revoke(&self, token: &str) -> Result<(), ClassifiedError> {
        let response = self
            .client
            .post(&self.revoke_endpoint)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "revoke endpoint answered non-2xx");
        }
        Ok(())
    }
}

/// Map a transport-level reqwest failure into the taxonomy. Timeouts are
/// their own kind, never conflated with connection failures.
fn classify_transport(err: reqwest::Error) -> ClassifiedError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    };
    classify(RawProviderError::transport(message))
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Parse a provider error body into the raw shape the classifier expects.
///
/// Two shapes are handled: the flat OAuth form
/// `{"error": "invalid_grant", "error_description": "..."}` and the nested
/// API form `{"error": {"code": 403, "message": "...", "errors":
/// [{"domain": "...", "reason": "..."}]}}`.
fn parse_error_body(status: u16, retry_after_secs: Option<u64>, body: &str) -> RawProviderError {
    let mut raw = RawProviderError {
        http_status: Some(status),
        retry_after_secs,
        message: body.chars().take(512).collect(),
        ..RawProviderError::default()
    };

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return raw;
    };

    match value.get("error") {
        Some(Value::String(code)) => {
            raw.reasons.push(StructuredReason { domain: "oauth".to_string(), reason: code.clone() });
            if let Some(description) = value.get("error_description").and_then(Value::as_str) {
                raw.message = description.to_string();
            }
        }
        Some(Value::Object(error)) => {
            if let Some(message) = error.get("message").and_then(Value::as_str) {
                raw.message = message.to_string();
            }
            if let Some(errors) = error.get("errors").and_then(Value::as_array) {
                for entry in errors {
                    if let Ok(reason) =
                        serde_json::from_value::<StructuredReason>(entry.clone())
                    {
                        raw.reasons.push(reason);
                    }
                }
            }
        }
        _ => {}
    }

    raw.raw = Some(value);
    raw
}
