//! Quota and budget circuit breaker.
//!
//! `QuotaGuard` reads the usage ledger and the tier limit table to approve
//! or deny a metered action before it runs, and to record it afterward. The
//! advisory `check_*` + `increment_usage`/`record_spend` pair mirrors the
//! caller-facing contract: a check consumes nothing, and a failed action
//! records nothing. The `try_consume`/`try_spend` variants collapse check
//! and record into one atomic conditional merge for callers that need the
//! ceiling to hold under concurrency.

use crate::ledger::{AdmitFn, LedgerError, MergeOutcome, UsageDelta, UsageKey, UsageStore};
use crate::tier::{self, MembershipTier, ResourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Resolved account identity and plan for the current caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub user_id: String,
    pub tier: MembershipTier,
}

/// Errors while resolving the active account.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("No authenticated account")]
    Unauthenticated,
    #[error("Account state unavailable: {0}")]
    Unavailable(String),
}

/// Injected accessor for the caller's account and plan.
///
/// The guard takes this at construction time instead of reaching into any
/// global state, so tests and embedders control resolution.
#[async_trait]
pub trait TierResolver: Send + Sync + 'static {
    async fn current_account(&self) -> Result<AccountContext, ResolveError>;
}

/// Fixed account resolver for tests, CLIs, and single-user embeddings.
pub struct StaticResolver {
    account: AccountContext,
}

impl StaticResolver {
    pub fn new(user_id: impl Into<String>, tier: MembershipTier) -> Self {
        Self {
            account: AccountContext {
                user_id: user_id.into(),
                tier,
            },
        }
    }
}

#[async_trait]
impl TierResolver for StaticResolver {
    async fn current_account(&self) -> Result<AccountContext, ResolveError> {
        Ok(self.account.clone())
    }
}

/// Result of a count-quota check. `max_allowed == None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub current_usage: u32,
    pub max_allowed: Option<u32>,
}

/// Result of the per-item video duration gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationCheck {
    pub allowed: bool,
    pub max_duration_secs: u32,
    pub tier: MembershipTier,
}

/// Result of a budget check. `remaining_cents` is what is available before
/// the candidate cost, not what would remain after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetCheck {
    pub allowed: bool,
    pub remaining_cents: u64,
}

/// Errors from the quota guard. Quota and budget rejections carry enough
/// context to render an upgrade prompt; they are policy decisions and must
/// never be retried.
#[derive(Debug, Clone, Error)]
pub enum QuotaError {
    #[error("{message}")]
    QuotaExceeded {
        kind: ResourceKind,
        tier: MembershipTier,
        current_usage: u32,
        max_allowed: u32,
        message: String,
    },

    #[error("{message}")]
    BudgetExceeded {
        remaining_cents: u64,
        requested_cents: u64,
        message: String,
    },

    #[error("{message}")]
    DurationExceeded {
        requested_secs: u32,
        max_duration_secs: u32,
        tier: MembershipTier,
        message: String,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Account resolution failed: {0}")]
    Account(#[from] ResolveError),
}

/// Quota + budget circuit breaker over a usage store and a tier resolver.
pub struct QuotaGuard {
    store: Arc<dyn UsageStore>,
    resolver: Arc<dyn TierResolver>,
}

impl QuotaGuard {
    pub fn new(store: Arc<dyn UsageStore>, resolver: Arc<dyn TierResolver>) -> Self {
        Self { store, resolver }
    }

    /// Resolve the active tier, failing closed to Free.
    ///
    /// A resolution failure is logged distinctly from genuine free-tier
    /// usage so operators can tell degraded mode apart from real traffic.
    pub async fn current_tier(&self) -> MembershipTier {
        match self.resolver.current_account().await {
            Ok(account) => account.tier,
            Err(err) => {
                tracing::warn!(error = %err, "tier resolution failed; defaulting to free");
                MembershipTier::Free
            }
        }
    }

    async fn account(&self) -> Result<AccountContext, QuotaError> {
        Ok(self.resolver.current_account().await?)
    }

    async fn today_record(
        &self,
        user_id: &str,
    ) -> Result<crate::ledger::UsageRecord, QuotaError> {
        let key = UsageKey::today(user_id);
        Ok(self.store.read(&key).await?.unwrap_or_default())
    }

    /// Advisory count-quota check. Consumes nothing.
    pub async fn check_quota(
        &self,
        kind: ResourceKind,
        amount: u32,
    ) -> Result<QuotaCheck, QuotaError> {
        let account = self.account().await?;
        let limits = tier::limits(account.tier);
        let record = self.today_record(&account.user_id).await?;
        let current = record.count_for(kind);

        let check = match limits.limit_for(kind) {
            Some(max) => QuotaCheck {
                allowed: current.saturating_add(amount) <= max,
                current_usage: current,
                max_allowed: Some(max),
            },
            None => QuotaCheck {
                allowed: true,
                current_usage: current,
                max_allowed: None,
            },
        };

        if !check.allowed {
            metrics::counter!("turnstile_quota_rejections", "kind" => kind.as_str()).increment(1);
            tracing::debug!(
                kind = %kind,
                tier = %account.tier,
                current,
                max = ?check.max_allowed,
                "quota check denied"
            );
        }
        Ok(check)
    }

    /// Per-item video duration gate. Independent of the daily count quota.
    pub async fn check_video_duration(
        &self,
        duration_secs: u32,
    ) -> Result<DurationCheck, QuotaError> {
        let tier = self.current_tier().await;
        let max = tier::limits(tier).max_video_duration_secs;
        Ok(DurationCheck {
            allowed: duration_secs <= max,
            max_duration_secs: max,
            tier,
        })
    }

    /// Advisory budget check against today's cumulative spend.
    ///
    /// A request whose estimated cost alone exceeds the entire daily limit
    /// is denied even at zero spend.
    pub async fn check_budget(&self, estimated_cost_cents: u64) -> Result<BudgetCheck, QuotaError> {
        let account = self.account().await?;
        let limit = tier::limits(account.tier).daily_spend_limit_cents;
        let record = self.today_record(&account.user_id).await?;
        let spent = record.spend_cents;

        let check = BudgetCheck {
            allowed: spent.saturating_add(estimated_cost_cents) <= limit,
            remaining_cents: limit.saturating_sub(spent),
        };
        if !check.allowed {
            metrics::counter!("turnstile_budget_rejections").increment(1);
            tracing::debug!(
                tier = %account.tier,
                spent_cents = spent,
                requested_cents = estimated_cost_cents,
                limit_cents = limit,
                "budget check denied"
            );
        }
        Ok(check)
    }

    /// Advisory gate that errors like `try_spend` but records nothing.
    ///
    /// Used ahead of upstream work so a doomed request is rejected before it
    /// queues; the actual charge happens after success.
    pub async fn ensure_budget(&self, estimated_cost_cents: u64) -> Result<BudgetCheck, QuotaError> {
        let account = self.account().await?;
        let limit = tier::limits(account.tier).daily_spend_limit_cents;
        let record = self.today_record(&account.user_id).await?;
        let spent = record.spend_cents;
        let remaining = limit.saturating_sub(spent);

        if spent.saturating_add(estimated_cost_cents) <= limit {
            return Ok(BudgetCheck {
                allowed: true,
                remaining_cents: remaining,
            });
        }

        metrics::counter!("turnstile_budget_rejections").increment(1);
        Err(QuotaError::BudgetExceeded {
            remaining_cents: remaining,
            requested_cents: estimated_cost_cents,
            message: format!(
                "Daily budget exhausted: ${:.2} requested, ${:.2} remaining. {}",
                estimated_cost_cents as f64 / 100.0,
                remaining as f64 / 100.0,
                tier::upgrade_message(account.tier, ResourceKind::Video)
            ),
        })
    }

    /// Record completed spend for the resolved account.
    pub async fn record_current_spend(&self, cost_cents: u64) -> Result<(), QuotaError> {
        let account = self.account().await?;
        self.record_spend(&account.user_id, cost_cents).await
    }

    /// Record completed usage. Additive and monotonic; creates today's
    /// record from zeros on first write. `secondary_amount` carries video
    /// seconds for duration-bounded resources.
    pub async fn increment_usage(
        &self,
        user_id: &str,
        kind: ResourceKind,
        amount: u32,
        secondary_amount: Option<u64>,
    ) -> Result<(), QuotaError> {
        let delta = match kind {
            ResourceKind::Video => UsageDelta::videos(amount, secondary_amount.unwrap_or(0)),
            ResourceKind::Image => UsageDelta::images(amount),
            ResourceKind::Project => UsageDelta::projects(amount),
        };
        self.store.merge(&UsageKey::today(user_id), &delta).await?;
        Ok(())
    }

    /// Record completed spend in cents.
    pub async fn record_spend(&self, user_id: &str, cost_cents: u64) -> Result<(), QuotaError> {
        self.store
            .merge(&UsageKey::today(user_id), &UsageDelta::spend(cost_cents))
            .await?;
        Ok(())
    }

    /// Atomic check-and-consume for a count quota. Unlike the advisory
    /// pair, two concurrent callers cannot both pass and jointly overshoot:
    /// the ceiling check runs under the store's per-key lock.
    pub async fn try_consume(
        &self,
        kind: ResourceKind,
        amount: u32,
        secondary_amount: Option<u64>,
    ) -> Result<QuotaCheck, QuotaError> {
        let account = self.account().await?;
        let limits = tier::limits(account.tier);
        let key = UsageKey::today(&account.user_id);

        let delta = match kind {
            ResourceKind::Video => UsageDelta::videos(amount, secondary_amount.unwrap_or(0)),
            ResourceKind::Image => UsageDelta::images(amount),
            ResourceKind::Project => UsageDelta::projects(amount),
        };

        let max_allowed = limits.limit_for(kind);
        let admit: AdmitFn = match max_allowed {
            Some(max) => Arc::new(move |record: &crate::ledger::UsageRecord| {
                record.count_for(kind).saturating_add(amount) <= max
            }),
            None => Arc::new(|_| true),
        };

        match self.store.merge_conditional(&key, &delta, admit).await? {
            MergeOutcome::Applied(record) => Ok(QuotaCheck {
                allowed: true,
                current_usage: record.count_for(kind),
                max_allowed,
            }),
            MergeOutcome::Rejected(record) => {
                let current = record.count_for(kind);
                let max = max_allowed.unwrap_or(u32::MAX);
                metrics::counter!("turnstile_quota_rejections", "kind" => kind.as_str())
                    .increment(1);
                Err(QuotaError::QuotaExceeded {
                    kind,
                    tier: account.tier,
                    current_usage: current,
                    max_allowed: max,
                    message: format!(
                        "Daily {} limit reached ({current}/{max}). {}",
                        kind,
                        tier::upgrade_message(account.tier, kind)
                    ),
                })
            }
        }
    }

    /// Atomic check-and-record for spend.
    pub async fn try_spend(&self, cost_cents: u64) -> Result<BudgetCheck, QuotaError> {
        let account = self.account().await?;
        let limit = tier::limits(account.tier).daily_spend_limit_cents;
        let key = UsageKey::today(&account.user_id);

        let admit: AdmitFn = Arc::new(move |record: &crate::ledger::UsageRecord| {
            record.spend_cents.saturating_add(cost_cents) <= limit
        });

        match self
            .store
            .merge_conditional(&key, &UsageDelta::spend(cost_cents), admit)
            .await?
        {
            MergeOutcome::Applied(record) => Ok(BudgetCheck {
                allowed: true,
                remaining_cents: limit.saturating_sub(record.spend_cents),
            }),
            MergeOutcome::Rejected(record) => {
                let remaining = limit.saturating_sub(record.spend_cents);
                metrics::counter!("turnstile_budget_rejections").increment(1);
                Err(QuotaError::BudgetExceeded {
                    remaining_cents: remaining,
                    requested_cents: cost_cents,
                    message: format!(
                        "Daily budget exhausted: ${:.2} requested, ${:.2} remaining. {}",
                        cost_cents as f64 / 100.0,
                        remaining as f64 / 100.0,
                        tier::upgrade_message(account.tier, ResourceKind::Video)
                    ),
                })
            }
        }
    }
}
