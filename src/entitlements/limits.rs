use super::Tier;
use serde::{Deserialize, Serialize};

/// Ceiling value standing in for "no limit"
pub const UNLIMITED: u32 = u32::MAX;

/// Photo ceiling assumed while limits are still loading
pub const LOADING_MAX_PHOTOS: u32 = 2;

/// Default quota ceilings for a tier.
///
/// | Tier | Warranties | Storage MB | Photos | Docs | OCR | AI lookups | AI support |
/// |------|-----------:|-----------:|-------:|-----:|----:|-----------:|-----------:|
/// | Free | 3 | 100 | 2 | 1 | 10 | 0 | 3 |
/// | Basic | 25 | 500 | 5 | 3 | 50 | 10 | 10 |
/// | Pro | 100 | 2000 | 10 | 10 | 200 | 50 | 50 |
/// | Ultimate | unlimited | 10000 | 20 | 20 | unlimited | unlimited | unlimited |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_warranties: u32,
    pub max_storage_mb: u32,
    pub max_photos_per_warranty: u32,
    pub max_documents_per_warranty: u32,
    pub max_ocr_scans_per_month: u32,
    pub max_ai_lookups_per_month: u32,
    pub max_ai_support_requests_per_month: u32,
}

impl TierLimits {
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self {
                max_warranties: 3,
                max_storage_mb: 100,
                max_photos_per_warranty: 2,
                max_documents_per_warranty: 1,
                max_ocr_scans_per_month: 10,
                max_ai_lookups_per_month: 0,
                max_ai_support_requests_per_month: 3,
            },
            Tier::Basic => Self {
                max_warranties: 25,
                max_storage_mb: 500,
                max_photos_per_warranty: 5,
                max_documents_per_warranty: 3,
                max_ocr_scans_per_month: 50,
                max_ai_lookups_per_month: 10,
                max_ai_support_requests_per_month: 10,
            },
            Tier::Pro => Self {
                max_warranties: 100,
                max_storage_mb: 2000,
                max_photos_per_warranty: 10,
                max_documents_per_warranty: 10,
                max_ocr_scans_per_month: 200,
                max_ai_lookups_per_month: 50,
                max_ai_support_requests_per_month: 50,
            },
            Tier::Ultimate => Self {
                max_warranties: UNLIMITED,
                max_storage_mb: 10_000,
                max_photos_per_warranty: 20,
                max_documents_per_warranty: 20,
                max_ocr_scans_per_month: UNLIMITED,
                max_ai_lookups_per_month: UNLIMITED,
                max_ai_support_requests_per_month: UNLIMITED,
            },
        }
    }
}

/// Used/max pair handed to the UI for progress bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMeter {
    pub used: u32,
    pub max: u32,
}

impl UsageMeter {
    pub fn new(used: u32, max: u32) -> Self {
        Self { used, max }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max == UNLIMITED
    }

    pub fn is_exhausted(&self) -> bool {
        !self.is_unlimited() && self.used >= self.max
    }

    pub fn remaining(&self) -> Option<u32> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.max.saturating_sub(self.used))
        }
    }
}
