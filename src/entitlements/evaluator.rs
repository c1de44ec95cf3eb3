//! Allow/deny decisions for quota-gated actions.
//!
//! Every check runs the same precedence: a missing snapshot denies with a
//! loading reason, an active block denies next, tier shortcuts come after
//! that and numeric ceilings are compared last. Denials always name the
//! tier so an upgrade prompt can be rendered without another lookup.

use super::limits::{UsageMeter, LOADING_MAX_PHOTOS};
use super::{GatedAction, Tier, UsageCounter, UsageSnapshot};
use crate::error::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error};

/// Why an action was denied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    /// No snapshot yet; retry shortly rather than upgrade
    Loading,
    BlockedUntil { until: DateTime<Utc> },
    WarrantyLimitReached { max: u32 },
    QuotaExhausted { counter: UsageCounter, used: u32, max: u32 },
    PremiumFeatureLocked { action: GatedAction },
    PhotoLimitReached { max: u32 },
    DocumentLimitReached { max: u32 },
    StorageLimitReached { available_mb: u32, max_mb: u32 },
    /// A decision from outside the process could not be read
    Unverifiable,
    ServerDenied { message: String },
}

impl DenyReason {
    /// Whether moving to a higher tier would lift this denial
    pub fn is_upgradeable(&self) -> bool {
        matches!(
            self,
            Self::WarrantyLimitReached { .. }
                | Self::QuotaExhausted { .. }
                | Self::PremiumFeatureLocked { .. }
                | Self::PhotoLimitReached { .. }
                | Self::DocumentLimitReached { .. }
                | Self::StorageLimitReached { .. }
                | Self::ServerDenied { .. }
        )
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading limits..."),
            Self::BlockedUntil { .. } => {
                write!(f, "Account temporarily blocked. Please contact support.")
            }
            Self::WarrantyLimitReached { max } => write!(
                f,
                "You've reached your limit of {} warranties. Upgrade to add more!",
                max
            ),
            Self::QuotaExhausted { counter, max, .. } => {
                let what = match counter {
                    UsageCounter::Ocr => "OCR scans",
                    UsageCounter::AiLookup => "AI lookups",
                    UsageCounter::AiSupport => "AI support requests",
                };
                write!(f, "You've used all {} {} this month. Upgrade for more!", max, what)
            }
            Self::PremiumFeatureLocked { action } => {
                let what = match action {
                    GatedAction::UseAiLookup => "AI product lookup",
                    GatedAction::UseAiSupport => "AI support",
                    GatedAction::UseOcr => "Receipt scanning",
                    GatedAction::AddWarranty => "Adding warranties",
                };
                write!(f, "{} is available on paid plans. Upgrade to unlock it!", what)
            }
            Self::PhotoLimitReached { max } => write!(
                f,
                "Your plan allows {} photos per warranty. Upgrade to add more!",
                max
            ),
            Self::DocumentLimitReached { max } => write!(
                f,
                "Your plan allows {} documents per warranty. Upgrade to add more!",
                max
            ),
            Self::StorageLimitReached { available_mb, max_mb } => write!(
                f,
                "Not enough storage: {} MB left of your {} MB. Upgrade for more space!",
                available_mb, max_mb
            ),
            Self::Unverifiable => {
                write!(f, "Unable to verify account limits. Please refresh and try again.")
            }
            Self::ServerDenied { message } => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub tier: Tier,
    pub max_photos: Option<u32>,
    pub meter: Option<UsageMeter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub reason: DenyReason,
    pub tier: Tier,
    pub max_photos: Option<u32>,
}

impl Denial {
    pub fn upgrade_prompt(&self) -> UpgradePrompt {
        UpgradePrompt {
            reason: self.reason.to_string(),
            current_tier: self.tier,
            suggested_tier: if self.reason.is_upgradeable() { self.tier.next() } else { None },
        }
    }
}

/// Inputs for the upgrade prompt surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePrompt {
    pub reason: String,
    pub current_tier: Tier,
    pub suggested_tier: Option<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    Allowed(Grant),
    Denied(Denial),
}

/// Decision shape exchanged with code outside this crate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDecision {
    allowed: bool,
    #[serde(default)]
    reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_tier: Option<Tier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_photos: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    used: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<u32>,
}

impl Decision {
    pub fn loading() -> Self {
        Self::Denied(Denial {
            reason: DenyReason::Loading,
            tier: Tier::Free,
            max_photos: Some(LOADING_MAX_PHOTOS),
        })
    }

    pub fn unverifiable(tier: Tier) -> Self {
        Self::Denied(Denial { reason: DenyReason::Unverifiable, tier, max_photos: None })
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    pub fn tier(&self) -> Tier {
        match self {
            Self::Allowed(grant) => grant.tier,
            Self::Denied(denial) => denial.tier,
        }
    }

    pub fn max_photos(&self) -> Option<u32> {
        match self {
            Self::Allowed(grant) => grant.max_photos,
            Self::Denied(denial) => denial.max_photos,
        }
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Allowed(_) => None,
            Self::Denied(denial) => Some(&denial.reason),
        }
    }

    /// User-facing sentence for a denial
    pub fn message(&self) -> Option<String> {
        self.deny_reason().map(|reason| reason.to_string())
    }

    /// Parse a decision that crossed a process boundary.
    ///
    /// Anything without a boolean `allowed` is denied; a malformed payload
    /// must never turn into an allow.
    pub fn from_wire(value: &serde_json::Value, fallback_tier: Tier) -> Self {
        Self::parse_wire(value, fallback_tier).unwrap_or_else(|_| Self::unverifiable(fallback_tier))
    }

    pub fn parse_wire(value: &serde_json::Value, fallback_tier: Tier) -> Result<Self, GateError> {
        if !value.get("allowed").is_some_and(|allowed| allowed.is_boolean()) {
            error!("Entitlement decision has no boolean 'allowed' field: {}", value);
            return Err(GateError::MalformedDecision);
        }

        let wire: WireDecision = serde_json::from_value(value.clone()).map_err(|e| {
            error!("Failed to parse entitlement decision: {}", e);
            GateError::MalformedDecision
        })?;

        let tier = wire.current_tier.unwrap_or(fallback_tier);
        if wire.allowed {
            let meter = match (wire.used, wire.max) {
                (Some(used), Some(max)) => Some(UsageMeter::new(used, max)),
                _ => None,
            };
            Ok(Self::Allowed(Grant { tier, max_photos: wire.max_photos, meter }))
        } else {
            let reason = if wire.reason.trim().is_empty() {
                DenyReason::Unverifiable
            } else {
                DenyReason::ServerDenied { message: wire.reason }
            };
            Ok(Self::Denied(Denial { reason, tier, max_photos: wire.max_photos }))
        }
    }

    pub fn to_wire(&self) -> serde_json::Value {
        let wire = match self {
            Self::Allowed(grant) => WireDecision {
                allowed: true,
                reason: String::new(),
                current_tier: Some(grant.tier),
                max_photos: grant.max_photos,
                used: grant.meter.map(|m| m.used),
                max: grant.meter.map(|m| m.max),
            },
            Self::Denied(denial) => WireDecision {
                allowed: false,
                reason: denial.reason.to_string(),
                current_tier: Some(denial.tier),
                max_photos: denial.max_photos,
                used: None,
                max: None,
            },
        };
        serde_json::to_value(wire).unwrap_or(serde_json::Value::Null)
    }
}

fn allow(snapshot: &UsageSnapshot, meter: Option<UsageMeter>) -> Decision {
    Decision::Allowed(Grant { tier: snapshot.tier, max_photos: None, meter })
}

fn deny(snapshot: &UsageSnapshot, reason: DenyReason) -> Decision {
    debug!("Denied on {} tier: {:?}", snapshot.tier, reason);
    Decision::Denied(Denial { reason, tier: snapshot.tier, max_photos: None })
}

fn blocked(snapshot: &UsageSnapshot, now: DateTime<Utc>) -> Option<Decision> {
    match snapshot.blocked_until {
        Some(until) if snapshot.is_blocked_at(now) => {
            Some(deny(snapshot, DenyReason::BlockedUntil { until }))
        }
        _ => None,
    }
}

fn with_max_photos(mut decision: Decision, max_photos: u32) -> Decision {
    match &mut decision {
        Decision::Allowed(grant) => grant.max_photos = Some(max_photos),
        Decision::Denied(denial) => denial.max_photos = Some(max_photos),
    }
    decision
}

pub fn can_add_warranty(snapshot: Option<&UsageSnapshot>, now: DateTime<Utc>) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::loading();
    };
    let max_photos = snapshot.max_photos_per_warranty;

    if let Some(denied) = blocked(snapshot, now) {
        return with_max_photos(denied, max_photos);
    }

    let meter = snapshot.warranty_meter();
    let decision = if meter.is_exhausted() {
        deny(snapshot, DenyReason::WarrantyLimitReached { max: snapshot.max_warranties })
    } else {
        allow(snapshot, Some(meter))
    };
    with_max_photos(decision, max_photos)
}

/// Scanning is open to every tier; only the warranty it feeds is gated.
pub fn can_use_ocr(snapshot: Option<&UsageSnapshot>, now: DateTime<Utc>) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::loading();
    };
    if let Some(denied) = blocked(snapshot, now) {
        return denied;
    }
    allow(snapshot, Some(snapshot.ocr_meter()))
}

pub fn can_use_ai_lookup(snapshot: Option<&UsageSnapshot>, now: DateTime<Utc>) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::loading();
    };
    if let Some(denied) = blocked(snapshot, now) {
        return denied;
    }

    let meter = snapshot.ai_lookup_meter();
    match snapshot.tier {
        Tier::Free => deny(
            snapshot,
            DenyReason::PremiumFeatureLocked { action: GatedAction::UseAiLookup },
        ),
        Tier::Ultimate => allow(snapshot, Some(meter)),
        Tier::Basic | Tier::Pro if meter.is_exhausted() => deny(
            snapshot,
            DenyReason::QuotaExhausted {
                counter: UsageCounter::AiLookup,
                used: meter.used,
                max: meter.max,
            },
        ),
        Tier::Basic | Tier::Pro => allow(snapshot, Some(meter)),
    }
}

pub fn can_use_ai_support(snapshot: Option<&UsageSnapshot>, now: DateTime<Utc>) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::loading();
    };
    if let Some(denied) = blocked(snapshot, now) {
        return denied;
    }

    let meter = snapshot.ai_support_meter();
    if snapshot.tier == Tier::Ultimate {
        return allow(snapshot, Some(meter));
    }
    if meter.is_exhausted() {
        return deny(
            snapshot,
            DenyReason::QuotaExhausted {
                counter: UsageCounter::AiSupport,
                used: meter.used,
                max: meter.max,
            },
        );
    }
    allow(snapshot, Some(meter))
}

/// Whether one more photo may be attached to a warranty that has `existing`
pub fn can_attach_photo(
    snapshot: Option<&UsageSnapshot>,
    existing: u32,
    now: DateTime<Utc>,
) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::loading();
    };
    let max = snapshot.max_photos_per_warranty;
    if let Some(denied) = blocked(snapshot, now) {
        return with_max_photos(denied, max);
    }
    let decision = if existing >= max {
        deny(snapshot, DenyReason::PhotoLimitReached { max })
    } else {
        allow(snapshot, Some(UsageMeter::new(existing, max)))
    };
    with_max_photos(decision, max)
}

pub fn can_attach_document(
    snapshot: Option<&UsageSnapshot>,
    existing: u32,
    now: DateTime<Utc>,
) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::loading();
    };
    if let Some(denied) = blocked(snapshot, now) {
        return denied;
    }
    let max = snapshot.max_documents_per_warranty;
    if existing >= max {
        deny(snapshot, DenyReason::DocumentLimitReached { max })
    } else {
        allow(snapshot, Some(UsageMeter::new(existing, max)))
    }
}

pub fn can_upload(snapshot: Option<&UsageSnapshot>, size_mb: u32, now: DateTime<Utc>) -> Decision {
    let Some(snapshot) = snapshot else {
        return Decision::loading();
    };
    if let Some(denied) = blocked(snapshot, now) {
        return denied;
    }
    let meter = snapshot.storage_meter();
    if meter.used.saturating_add(size_mb) > meter.max {
        deny(
            snapshot,
            DenyReason::StorageLimitReached {
                available_mb: meter.max.saturating_sub(meter.used),
                max_mb: meter.max,
            },
        )
    } else {
        allow(snapshot, Some(meter))
    }
}

/// Dispatch to the check for `action`
pub fn check(action: GatedAction, snapshot: Option<&UsageSnapshot>, now: DateTime<Utc>) -> Decision {
    match action {
        GatedAction::AddWarranty => can_add_warranty(snapshot, now),
        GatedAction::UseOcr => can_use_ocr(snapshot, now),
        GatedAction::UseAiLookup => can_use_ai_lookup(snapshot, now),
        GatedAction::UseAiSupport => can_use_ai_support(snapshot, now),
    }
}
