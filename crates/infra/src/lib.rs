//! Infrastructure adapters for the Tallyport core.
//!
//! Implements the core's ports against real backends: a reqwest OAuth
//! client, in-process credential storage, environment/file configuration,
//! and the background sweepers.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod provider;
pub mod store;
pub mod sweeper;

pub use config::{Config, ConfigError, LifecycleConfig, ProviderConfig, RateLimitConfig, VaultConfig};
pub use provider::HttpOAuthProvider;
pub use store::{InMemoryActivityLog, InMemoryCredentialStore, TracingActivityLog};
pub use sweeper::{spawn_counter_sweeper, spawn_retention_sweeper};
