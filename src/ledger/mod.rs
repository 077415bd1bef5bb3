//! Per-user, per-day usage ledger.
//!
//! One record exists per (user, calendar date), created lazily on first
//! write and addressed by a stable path key. All mutation is an additive
//! merge: counters and spend only ever grow, and a merge never overwrites
//! fields it does not touch. Spend is tracked in integer cents so repeated
//! additions cannot drift.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryUsageStore;

/// Errors from ledger storage operations.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Underlying store failed (I/O, serialization, backend outage).
    #[error("Ledger storage error: {0}")]
    Storage(String),
}

/// Address of one usage record: (user, ISO calendar date).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    pub user_id: String,
    pub date: NaiveDate,
}

impl UsageKey {
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
        }
    }

    /// Key for the current UTC day.
    pub fn today(user_id: impl Into<String>) -> Self {
        Self::new(user_id, Utc::now().date_naive())
    }

    /// Stable storage path, e.g. `usage/alice/2026-08-30`.
    pub fn path(&self) -> String {
        format!("usage/{}/{}", self.user_id, self.date.format("%Y-%m-%d"))
    }
}

/// Daily usage counters for one user.
///
/// A missing record reads as all-zero; the store materializes it on the
/// first merge of the day. Records for past dates are never touched again
/// because guards always address today's key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Videos generated today.
    pub videos: u32,
    /// Images generated today.
    pub images: u32,
    /// Projects created (counted against the total-project ceiling).
    pub projects: u32,
    /// Accumulated video seconds generated today.
    pub video_seconds: u64,
    /// Cumulative spend today, in integer cents.
    pub spend_cents: u64,
    /// Last merge timestamp.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Additive increment applied to a record. All fields are non-negative by
/// construction; the ledger never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub videos: u32,
    pub images: u32,
    pub projects: u32,
    pub video_seconds: u64,
    pub spend_cents: u64,
}

impl UsageDelta {
    pub fn videos(count: u32, seconds: u64) -> Self {
        Self {
            videos: count,
            video_seconds: seconds,
            ..Default::default()
        }
    }

    pub fn images(count: u32) -> Self {
        Self {
            images: count,
            ..Default::default()
        }
    }

    pub fn projects(count: u32) -> Self {
        Self {
            projects: count,
            ..Default::default()
        }
    }

    pub fn spend(cents: u64) -> Self {
        Self {
            spend_cents: cents,
            ..Default::default()
        }
    }
}

impl UsageRecord {
    /// Apply a delta in place. Saturating: the ledger can hit a ceiling but
    /// never wraps.
    pub fn apply(&mut self, delta: &UsageDelta) {
        self.videos = self.videos.saturating_add(delta.videos);
        self.images = self.images.saturating_add(delta.images);
        self.projects = self.projects.saturating_add(delta.projects);
        self.video_seconds = self.video_seconds.saturating_add(delta.video_seconds);
        self.spend_cents = self.spend_cents.saturating_add(delta.spend_cents);
        self.updated_at = Some(Utc::now());
    }

    /// Count for a resource kind.
    pub fn count_for(&self, kind: crate::tier::ResourceKind) -> u32 {
        match kind {
            crate::tier::ResourceKind::Video => self.videos,
            crate::tier::ResourceKind::Image => self.images,
            crate::tier::ResourceKind::Project => self.projects,
        }
    }
}

/// Outcome of a conditional merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Guard admitted the delta; contains the record after the merge.
    Applied(UsageRecord),
    /// Guard rejected the delta; contains the untouched record.
    Rejected(UsageRecord),
}

/// Admission guard evaluated against the current record, under the store's
/// per-key lock, before a conditional merge applies.
pub type AdmitFn = Arc<dyn Fn(&UsageRecord) -> bool + Send + Sync>;

/// Persistent usage-ledger boundary.
///
/// Reads return `None` for a day with no activity yet (all-zero semantics).
/// Writes are additive merges, never full overwrites.
#[async_trait]
pub trait UsageStore: Send + Sync + 'static {
    /// Read the record for a key, if one exists.
    async fn read(&self, key: &UsageKey) -> Result<Option<UsageRecord>, LedgerError>;

    /// Merge a delta into the record, creating it from zeros if missing.
    /// Returns the record after the merge.
    async fn merge(&self, key: &UsageKey, delta: &UsageDelta) -> Result<UsageRecord, LedgerError>;

    /// Atomically evaluate `admit` against the current record and merge the
    /// delta only if it returns true. The check and the merge happen under
    /// one per-key critical section, so two concurrent callers cannot both
    /// pass a ceiling check and jointly overshoot it.
    async fn merge_conditional(
        &self,
        key: &UsageKey,
        delta: &UsageDelta,
        admit: AdmitFn,
    ) -> Result<MergeOutcome, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn path_is_stable() {
        let key = UsageKey::new("alice", NaiveDate::from_ymd_opt(2026, 8, 30).unwrap());
        assert_eq!(key.path(), "usage/alice/2026-08-30");
    }

    #[test]
    fn apply_is_additive() {
        let mut record = UsageRecord::default();
        record.apply(&UsageDelta::videos(1, 120));
        record.apply(&UsageDelta::videos(2, 60));
        record.apply(&UsageDelta::spend(30));
        assert_eq!(record.videos, 3);
        assert_eq!(record.video_seconds, 180);
        assert_eq!(record.spend_cents, 30);
        assert_eq!(record.images, 0);
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn apply_saturates_instead_of_wrapping() {
        let mut record = UsageRecord {
            spend_cents: u64::MAX - 1,
            ..Default::default()
        };
        record.apply(&UsageDelta::spend(10));
        assert_eq!(record.spend_cents, u64::MAX);
    }
}
