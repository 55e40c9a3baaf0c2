//! In-process adapters for the storage and activity-log ports.

mod memory;

pub use memory::{ActivityEntry, InMemoryActivityLog, InMemoryCredentialStore, TracingActivityLog};
