//! Domain layer: credential types, storage/provider ports, and the token
//! lifecycle manager.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod credentials;

pub use credentials::manager::{CredentialManager, LifecycleError};
pub use credentials::ports::{ActivityLog, CredentialStore, OAuthProvider, StoreError};
pub use credentials::types::{
    CredentialHealth, CredentialKey, CredentialMetadata, CredentialRecord, TokenGrant, TokenKind,
};
