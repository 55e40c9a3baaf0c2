//! OAuth provider adapter.

mod client;

pub use client::{HttpOAuthProvider, HttpOAuthProviderBuilder};
