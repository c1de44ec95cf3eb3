use crate::entitlements::{GateFlow, GatedAction, Gatekeeper, SubmitOutcome};
use crate::error::GateError;
use crate::reminders::ReminderScheduler;
use crate::remote::{NewWarranty, WarrantyRecord, WarrantyStore};
use crate::usage::UsageService;
use std::sync::Arc;
use tracing::{info, warn};

/// Adding a warranty end to end: gate the action, insert the row, then
/// start local expiry reminders for it
pub struct WarrantyService {
    gate: Arc<Gatekeeper>,
    store: Arc<dyn WarrantyStore>,
    usage: Arc<UsageService>,
    scheduler: Arc<ReminderScheduler>,
}

impl WarrantyService {
    pub fn new(
        gate: Arc<Gatekeeper>,
        store: Arc<dyn WarrantyStore>,
        usage: Arc<UsageService>,
        scheduler: Arc<ReminderScheduler>,
    ) -> Self {
        Self {
            gate,
            store,
            usage,
            scheduler,
        }
    }

    /// Pre-check when the user opens the add-warranty form
    pub async fn begin(&self) -> Result<GateFlow, GateError> {
        self.gate.begin(GatedAction::AddWarranty).await
    }

    /// Submit the form. Reminder scheduling failures are logged; the
    /// warranty already exists remotely at that point.
    pub async fn submit(
        &self,
        flow: &mut GateFlow,
        warranty: NewWarranty,
    ) -> Result<SubmitOutcome<WarrantyRecord>, GateError> {
        let outcome = self
            .gate
            .submit(flow, || async {
                let session = self.usage.session().await?;
                let record = self.store.create_warranty(&session, &warranty).await?;
                Ok::<_, anyhow::Error>(record)
            })
            .await?;

        if let SubmitOutcome::Completed(record) = &outcome {
            info!("Created warranty {} ({})", record.id, record.product_name);
            if let Err(e) = self.scheduler.track_record(record).await {
                warn!("Could not schedule reminders for {}: {}", record.id, e);
            }
        }
        Ok(outcome)
    }
}
