//! Membership tiers and their static limit tables.
//!
//! Limits are immutable at runtime: every quota decision reads this table
//! through `limits()`. Unlimited resources are encoded as `None` and reported
//! to callers as infinite.

use serde::{Deserialize, Serialize};

/// Named service level for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    Free,
    Pro,
    Enterprise,
}

impl MembershipTier {
    /// Parse a tier from a plan string. Unknown values default to Free.
    pub fn from_plan(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "pro" => MembershipTier::Pro,
            "enterprise" => MembershipTier::Enterprise,
            _ => MembershipTier::Free,
        }
    }

    /// Display name for user-facing messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            MembershipTier::Free => "Free",
            MembershipTier::Pro => "Pro",
            MembershipTier::Enterprise => "Enterprise",
        }
    }

    /// The tier an upgrade prompt should point at.
    pub fn next_tier(&self) -> MembershipTier {
        match self {
            MembershipTier::Free => MembershipTier::Pro,
            _ => MembershipTier::Enterprise,
        }
    }
}

impl std::fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Metered resource kinds tracked by the usage ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Image,
    Project,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Video => "video",
            ResourceKind::Image => "image",
            ResourceKind::Project => "project",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable per-tier limits. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierLimits {
    /// Max duration of a single video job, in seconds.
    pub max_video_duration_secs: u32,

    /// Daily video generation ceiling.
    pub max_videos_per_day: Option<u32>,

    /// Daily image generation ceiling.
    pub max_images_per_day: Option<u32>,

    /// Total project ceiling.
    pub max_projects: Option<u32>,

    /// Daily spend ceiling in integer cents.
    pub daily_spend_limit_cents: u64,

    /// Feature flags.
    pub has_advanced_editing: bool,
    pub has_custom_branding: bool,
    pub has_priority_queue: bool,
    pub has_api_access: bool,
}

const FREE_LIMITS: TierLimits = TierLimits {
    max_video_duration_secs: 8 * 60,
    max_videos_per_day: Some(5),
    max_images_per_day: Some(50),
    max_projects: Some(3),
    daily_spend_limit_cents: 100,
    has_advanced_editing: false,
    has_custom_branding: false,
    has_priority_queue: false,
    has_api_access: false,
};

const PRO_LIMITS: TierLimits = TierLimits {
    max_video_duration_secs: 60 * 60,
    max_videos_per_day: Some(50),
    max_images_per_day: Some(500),
    max_projects: Some(50),
    daily_spend_limit_cents: 1_000,
    has_advanced_editing: true,
    has_custom_branding: true,
    has_priority_queue: true,
    has_api_access: false,
};

const ENTERPRISE_LIMITS: TierLimits = TierLimits {
    max_video_duration_secs: 4 * 60 * 60,
    max_videos_per_day: Some(500),
    max_images_per_day: Some(5_000),
    max_projects: None,
    daily_spend_limit_cents: 10_000,
    has_advanced_editing: true,
    has_custom_branding: true,
    has_priority_queue: true,
    has_api_access: true,
};

/// Look up the limit table for a tier.
pub fn limits(tier: MembershipTier) -> &'static TierLimits {
    match tier {
        MembershipTier::Free => &FREE_LIMITS,
        MembershipTier::Pro => &PRO_LIMITS,
        MembershipTier::Enterprise => &ENTERPRISE_LIMITS,
    }
}

impl TierLimits {
    /// Daily count ceiling for a resource kind. `None` means unlimited.
    pub fn limit_for(&self, kind: ResourceKind) -> Option<u32> {
        match kind {
            ResourceKind::Video => self.max_videos_per_day,
            ResourceKind::Image => self.max_images_per_day,
            ResourceKind::Project => self.max_projects,
        }
    }
}

/// Human-readable upgrade prompt for a hit limit.
pub fn upgrade_message(current: MembershipTier, kind: ResourceKind) -> String {
    let next = current.next_tier().display_name();
    match kind {
        ResourceKind::Video => format!("Upgrade to {next} for more video generations"),
        ResourceKind::Image => format!("Upgrade to {next} for more image generations"),
        ResourceKind::Project => format!("Upgrade to {next} for more projects"),
    }
}

/// Upgrade prompt for the per-item video duration gate.
pub fn duration_upgrade_message(current: MembershipTier) -> String {
    format!(
        "Upgrade to {} for longer video durations",
        current.next_tier().display_name()
    )
}

/// Format a duration for display (e.g. "8 minutes", "1 hour 30 min").
pub fn format_duration(seconds: u32) -> String {
    if seconds < 60 {
        return format!("{seconds} seconds");
    }
    if seconds < 3_600 {
        return format!("{} minutes", seconds / 60);
    }
    let hours = seconds / 3_600;
    let mins = (seconds % 3_600) / 60;
    let plural = if hours > 1 { "s" } else { "" };
    if mins > 0 {
        format!("{hours} hour{plural} {mins} min")
    } else {
        format!("{hours} hour{plural}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parsing_defaults_to_free() {
        assert_eq!(MembershipTier::from_plan("pro"), MembershipTier::Pro);
        assert_eq!(MembershipTier::from_plan(" Enterprise "), MembershipTier::Enterprise);
        assert_eq!(MembershipTier::from_plan("gold"), MembershipTier::Free);
        assert_eq!(MembershipTier::from_plan(""), MembershipTier::Free);
    }

    #[test]
    fn free_tier_limits_match_table() {
        let l = limits(MembershipTier::Free);
        assert_eq!(l.max_video_duration_secs, 480);
        assert_eq!(l.limit_for(ResourceKind::Video), Some(5));
        assert_eq!(l.limit_for(ResourceKind::Image), Some(50));
        assert_eq!(l.daily_spend_limit_cents, 100);
        assert!(!l.has_api_access);
    }

    #[test]
    fn enterprise_projects_are_unlimited() {
        let l = limits(MembershipTier::Enterprise);
        assert_eq!(l.limit_for(ResourceKind::Project), None);
        assert!(l.has_api_access);
    }

    #[test]
    fn upgrade_messages_name_next_tier() {
        assert!(upgrade_message(MembershipTier::Free, ResourceKind::Video).contains("Pro"));
        assert!(upgrade_message(MembershipTier::Pro, ResourceKind::Image).contains("Enterprise"));
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(45), "45 seconds");
        assert_eq!(format_duration(480), "8 minutes");
        assert_eq!(format_duration(3_600), "1 hour");
        assert_eq!(format_duration(5_400), "1 hour 30 min");
        assert_eq!(format_duration(7_200), "2 hours");
    }
}
