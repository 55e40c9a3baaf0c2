//! Shared foundations for Tallyport crates.
//!
//! Dependency-light building blocks used by the lifecycle service and its
//! adapters:
//! - `error`: the closed provider-error taxonomy and classifier
//! - `vault`: authenticated encryption for credential material at rest
//! - `resilience`: retry orchestration and multi-window rate limiting

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod error;
pub mod resilience;
pub mod vault;

// Re-export commonly used types for convenience
// ------------------------
pub use error::{
    classify, ApiErrorKind, ClassifiedError, RawProviderError, RecoveryAction, StructuredReason,
};
pub use resilience::rate_limit::{
    Clock, CounterKey, InMemoryCounterStore, LimitDecision, LimitScope, MockClock,
    RateCounterStore, RateLimiter, ServiceLimits, SubjectLimits, SystemClock, WindowGranularity,
};
pub use resilience::retry::{PolicyTable, RetryOrchestrator, RetryPolicy};
pub use vault::{CredentialVault, Opened, VaultError};
