//! In-memory usage store backed by DashMap.
//!
//! The DashMap entry API holds a shard lock for the duration of a merge,
//! which is what makes `merge_conditional` an atomic check-and-increment.

use super::{AdmitFn, LedgerError, MergeOutcome, UsageDelta, UsageKey, UsageRecord, UsageStore};
use async_trait::async_trait;
use dashmap::DashMap;

/// Process-local ledger, keyed by the record's storage path.
#[derive(Default)]
pub struct InMemoryUsageStore {
    records: DashMap<String, UsageRecord>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct (user, day) records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn read(&self, key: &UsageKey) -> Result<Option<UsageRecord>, LedgerError> {
        Ok(self.records.get(&key.path()).map(|r| r.clone()))
    }

    async fn merge(&self, key: &UsageKey, delta: &UsageDelta) -> Result<UsageRecord, LedgerError> {
        let mut entry = self.records.entry(key.path()).or_default();
        entry.apply(delta);
        Ok(entry.clone())
    }

    async fn merge_conditional(
        &self,
        key: &UsageKey,
        delta: &UsageDelta,
        admit: AdmitFn,
    ) -> Result<MergeOutcome, LedgerError> {
        let mut entry = self.records.entry(key.path()).or_default();
        if admit(&entry) {
            entry.apply(delta);
            Ok(MergeOutcome::Applied(entry.clone()))
        } else {
            Ok(MergeOutcome::Rejected(entry.clone()))
        }
    }
}
