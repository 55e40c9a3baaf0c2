//! Resilience primitives: retry orchestration and rate limiting.

pub mod rate_limit;
pub mod retry;
