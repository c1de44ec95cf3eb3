pub mod api;
pub mod auth;

pub use api::{NewWarranty, RestClient, WarrantyRecord};
pub use auth::{AuthManager, Session, UserInfo};

use crate::entitlements::{
    GatedAction, SubscriptionStatus, Tier, TierLimits, UsageCounter, UsageSnapshot,
};
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Remote store holding the per-user usage row and its counters
#[async_trait]
pub trait UsageBackend: Send + Sync {
    /// Read the user's usage row
    async fn fetch_usage(&self, session: &Session) -> Result<UsageSnapshot, BackendError>;

    /// Atomically add one to `counter` on the server
    async fn increment_usage(
        &self,
        session: &Session,
        counter: UsageCounter,
    ) -> Result<(), BackendError>;

    /// Ask the server to re-check `action`; the answer is untrusted JSON
    async fn verify_action(
        &self,
        session: &Session,
        action: GatedAction,
    ) -> Result<serde_json::Value, BackendError>;
}

/// Remote table of the user's warranties
#[async_trait]
pub trait WarrantyStore: Send + Sync {
    async fn create_warranty(
        &self,
        session: &Session,
        warranty: &NewWarranty,
    ) -> Result<WarrantyRecord, BackendError>;
}

/// `user_usage` row as stored remotely. Ceiling columns may be absent or
/// null, in which case the tier defaults apply; null counters read as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRow {
    pub user_id: String,
    pub tier: String,
    pub subscription_status: String,
    #[serde(default)]
    pub blocked_until: Option<DateTime<Utc>>,

    #[serde(default)]
    pub max_warranties: Option<u32>,
    #[serde(default)]
    pub max_storage_mb: Option<u32>,
    #[serde(default)]
    pub max_photos_per_warranty: Option<u32>,
    #[serde(default)]
    pub max_documents_per_warranty: Option<u32>,
    #[serde(default)]
    pub max_ocr_scans_per_month: Option<u32>,
    #[serde(default)]
    pub max_ai_lookups_per_month: Option<u32>,
    #[serde(default)]
    pub max_ai_support_requests_per_month: Option<u32>,

    #[serde(default)]
    pub current_warranties: Option<u32>,
    #[serde(default)]
    pub current_storage_mb: Option<u32>,
    #[serde(default)]
    pub ocr_scans_used: Option<u32>,
    #[serde(default)]
    pub ai_lookups_used: Option<u32>,
    #[serde(default)]
    pub ai_support_requests_used: Option<u32>,
    #[serde(default)]
    pub warning_count: Option<u32>,
}

/// Decode a `user_usage` select body; the filter matches at most one row
pub fn decode_usage_rows(body: &str, user_id: &str) -> Result<UsageSnapshot, BackendError> {
    let rows: Vec<UsageRow> =
        serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::NotFound(user_id.to_string()))?;
    UsageSnapshot::try_from(row)
}

impl TryFrom<UsageRow> for UsageSnapshot {
    type Error = BackendError;

    fn try_from(row: UsageRow) -> Result<Self, Self::Error> {
        let tier = Tier::from_str(&row.tier)
            .map_err(|_| BackendError::Decode(format!("unknown tier '{}'", row.tier)))?;
        let subscription_status = SubscriptionStatus::from_str(&row.subscription_status)
            .map_err(|_| {
                BackendError::Decode(format!(
                    "unknown subscription status '{}'",
                    row.subscription_status
                ))
            })?;
        let defaults = TierLimits::for_tier(tier);

        Ok(UsageSnapshot {
            tier,
            subscription_status,
            blocked_until: row.blocked_until,
            max_warranties: row.max_warranties.unwrap_or(defaults.max_warranties),
            max_storage_mb: row.max_storage_mb.unwrap_or(defaults.max_storage_mb),
            max_photos_per_warranty: row
                .max_photos_per_warranty
                .unwrap_or(defaults.max_photos_per_warranty),
            max_documents_per_warranty: row
                .max_documents_per_warranty
                .unwrap_or(defaults.max_documents_per_warranty),
            max_ocr_scans_per_month: row
                .max_ocr_scans_per_month
                .unwrap_or(defaults.max_ocr_scans_per_month),
            max_ai_lookups_per_month: row
                .max_ai_lookups_per_month
                .unwrap_or(defaults.max_ai_lookups_per_month),
            max_ai_support_requests_per_month: row
                .max_ai_support_requests_per_month
                .unwrap_or(defaults.max_ai_support_requests_per_month),
            current_warranties: row.current_warranties.unwrap_or(0),
            current_storage_mb: row.current_storage_mb.unwrap_or(0),
            ocr_scans_used: row.ocr_scans_used.unwrap_or(0),
            ai_lookups_used: row.ai_lookups_used.unwrap_or(0),
            ai_support_requests_used: row.ai_support_requests_used.unwrap_or(0),
            warning_count: row.warning_count.unwrap_or(0),
        })
    }
}
