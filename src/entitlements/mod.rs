pub mod evaluator;
pub mod gate;
pub mod limits;

pub use evaluator::{Decision, Denial, DenyReason, Grant, UpgradePrompt};
pub use gate::{GateEvent, GateFlow, GateState, Gatekeeper, SubmitOutcome};
pub use limits::{TierLimits, UsageMeter, UNLIMITED};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Subscription tiers, ordered by rank
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Pro,
    Ultimate,
}

impl Tier {
    /// The tier an upgrade prompt should point at
    pub fn next(&self) -> Option<Tier> {
        match self {
            Self::Free => Some(Self::Basic),
            Self::Basic => Some(Self::Pro),
            Self::Pro => Some(Self::Ultimate),
            Self::Ultimate => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Trial,
    Cancelled,
    Blocked,
}

/// Per-user usage row as last fetched from the remote store.
///
/// Ceilings travel with the snapshot so the evaluator never has to look
/// them up separately; counters reflect the remote state at `fetch` time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub tier: Tier,
    pub subscription_status: SubscriptionStatus,
    pub blocked_until: Option<DateTime<Utc>>,

    pub max_warranties: u32,
    pub max_storage_mb: u32,
    pub max_photos_per_warranty: u32,
    pub max_documents_per_warranty: u32,
    pub max_ocr_scans_per_month: u32,
    pub max_ai_lookups_per_month: u32,
    pub max_ai_support_requests_per_month: u32,

    pub current_warranties: u32,
    pub current_storage_mb: u32,
    pub ocr_scans_used: u32,
    pub ai_lookups_used: u32,
    pub ai_support_requests_used: u32,

    pub warning_count: u32,
}

impl UsageSnapshot {
    /// Fresh account on `tier` with nothing consumed yet
    pub fn new(tier: Tier) -> Self {
        let limits = TierLimits::for_tier(tier);
        Self {
            tier,
            subscription_status: SubscriptionStatus::Active,
            blocked_until: None,
            max_warranties: limits.max_warranties,
            max_storage_mb: limits.max_storage_mb,
            max_photos_per_warranty: limits.max_photos_per_warranty,
            max_documents_per_warranty: limits.max_documents_per_warranty,
            max_ocr_scans_per_month: limits.max_ocr_scans_per_month,
            max_ai_lookups_per_month: limits.max_ai_lookups_per_month,
            max_ai_support_requests_per_month: limits.max_ai_support_requests_per_month,
            current_warranties: 0,
            current_storage_mb: 0,
            ocr_scans_used: 0,
            ai_lookups_used: 0,
            ai_support_requests_used: 0,
            warning_count: 0,
        }
    }

    /// Blocked accounts are only denied while the block has not expired.
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.subscription_status == SubscriptionStatus::Blocked
            && self.blocked_until.is_some_and(|until| until > now)
    }

    pub fn warranty_meter(&self) -> UsageMeter {
        UsageMeter::new(self.current_warranties, self.max_warranties)
    }

    pub fn ocr_meter(&self) -> UsageMeter {
        UsageMeter::new(self.ocr_scans_used, self.max_ocr_scans_per_month)
    }

    pub fn ai_lookup_meter(&self) -> UsageMeter {
        UsageMeter::new(self.ai_lookups_used, self.max_ai_lookups_per_month)
    }

    pub fn ai_support_meter(&self) -> UsageMeter {
        UsageMeter::new(self.ai_support_requests_used, self.max_ai_support_requests_per_month)
    }

    pub fn storage_meter(&self) -> UsageMeter {
        UsageMeter::new(self.current_storage_mb, self.max_storage_mb)
    }
}

/// Monthly counter families tracked remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UsageCounter {
    Ocr,
    AiLookup,
    AiSupport,
}

impl UsageCounter {
    /// Name of the remote procedure that increments this counter
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Self::Ocr => "increment_ocr_usage",
            Self::AiLookup => "increment_ai_lookup_usage",
            Self::AiSupport => "increment_ai_support_usage",
        }
    }
}

/// Actions that must pass the entitlement gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GatedAction {
    AddWarranty,
    UseOcr,
    UseAiLookup,
    UseAiSupport,
}

impl GatedAction {
    pub const ALL: [GatedAction; 4] = [
        GatedAction::AddWarranty,
        GatedAction::UseOcr,
        GatedAction::UseAiLookup,
        GatedAction::UseAiSupport,
    ];

    /// Counter to bump once the action has succeeded, if any
    pub fn counter(&self) -> Option<UsageCounter> {
        match self {
            Self::AddWarranty => None,
            Self::UseOcr => Some(UsageCounter::Ocr),
            Self::UseAiLookup => Some(UsageCounter::AiLookup),
            Self::UseAiSupport => Some(UsageCounter::AiSupport),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_tier_ordering_and_upgrade_path() {
        let tiers: Vec<Tier> = Tier::iter().collect();
        assert_eq!(tiers, vec![Tier::Free, Tier::Basic, Tier::Pro, Tier::Ultimate]);
        assert!(Tier::Free < Tier::Basic && Tier::Pro < Tier::Ultimate);
        assert_eq!(Tier::Free.next(), Some(Tier::Basic));
        assert_eq!(Tier::Ultimate.next(), None);
    }

    #[test]
    fn test_tier_wire_names() {
        assert_eq!(Tier::from_str("ultimate").unwrap(), Tier::Ultimate);
        assert_eq!(Tier::Basic.to_string(), "basic");
        assert!(Tier::from_str("platinum").is_err());
        assert_eq!(serde_json::to_string(&Tier::Pro).unwrap(), "\"pro\"");
    }

    #[test]
    fn test_block_requires_future_timestamp() {
        let now = Utc::now();
        let mut snapshot = UsageSnapshot::new(Tier::Pro);
        snapshot.subscription_status = SubscriptionStatus::Blocked;
        assert!(!snapshot.is_blocked_at(now));

        snapshot.blocked_until = Some(now - Duration::minutes(5));
        assert!(!snapshot.is_blocked_at(now));

        snapshot.blocked_until = Some(now + Duration::hours(1));
        assert!(snapshot.is_blocked_at(now));

        snapshot.subscription_status = SubscriptionStatus::Active;
        assert!(!snapshot.is_blocked_at(now));
    }

    #[test]
    fn test_counted_actions() {
        assert_eq!(GatedAction::AddWarranty.counter(), None);
        assert_eq!(GatedAction::UseOcr.counter(), Some(UsageCounter::Ocr));
        assert_eq!(UsageCounter::AiSupport.rpc_name(), "increment_ai_support_usage");
        assert_eq!(GatedAction::UseAiLookup.to_string(), "use_ai_lookup");
    }
}
