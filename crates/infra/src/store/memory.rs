//! In-process credential store and activity logs.
//!
//! Suitable for single-instance deployments and tests; a multi-instance
//! deployment supplies its own database-backed port implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tallyport_core::credentials::ports::{ActivityLog, CredentialStore, StoreError};
use tallyport_core::credentials::types::{CredentialKey, CredentialRecord};
use tracing::info;
use uuid::Uuid;

/// Concurrent-map credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: DashMap<CredentialKey, CredentialRecord>,
}

impl InMemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(
        &self,
        owner_id: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<CredentialRecord>, StoreError> {
        let key = (owner_id.to_string(), tenant_id.map(str::to_string));
        Ok(self.records.get(&key).map(|entry| entry.clone()))
    }

    async fn upsert(&self, record: CredentialRecord) -> Result<(), StoreError> {
        self.records.insert(record.key(), record);
        Ok(())
    }

    async fn delete(&self, owner_id: &str, tenant_id: Option<&str>) -> Result<(), StoreError> {
        let key = (owner_id.to_string(), tenant_id.map(str::to_string));
        self.records.remove(&key);
        Ok(())
    }

    async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.records.len();
        // Keep anything still valid, or refreshed since the cutoff
        self.records.retain(|_, record| {
            record.expires_at >= cutoff
                || record.metadata.last_refreshed_at.is_some_and(|at| at >= cutoff)
        });
        Ok((before - self.records.len()) as u64)
    }
}

/// Activity log that emits structured tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingActivityLog;

#[async_trait]
impl ActivityLog for TracingActivityLog {
    async fn record(
        &self,
        owner_id: &str,
        action: &str,
        metadata: serde_json::Value,
    ) -> Result<(), StoreError> {
        info!(owner_id, action, %metadata, "activity");
        Ok(())
    }
}

/// One captured activity entry.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    /// Entry id
    pub id: Uuid,
    /// Owning identity
    pub owner_id: String,
    /// What happened
    pub action: String,
    /// Free-form detail
    pub metadata: serde_json::Value,
    /// When it was recorded
    pub at: DateTime<Utc>,
}

/// Capturing activity log for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryActivityLog {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl InMemoryActivityLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.lock().clone()
    }

    /// Actions recorded so far, in order.
    pub fn actions(&self) -> Vec<String> {
        self.entries.lock().iter().map(|entry| entry.action.clone()).collect()
    }
}

#[async_trait]
impl ActivityLog for InMemoryActivityLog {
    async fn record(
        &self,
        owner_id: &str,
        action: &str,
        metadata: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.entries.lock().push(ActivityEntry {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            action: action.to_string(),
            metadata,
            at: Utc::now(),
        });
        Ok(())
    }
}
