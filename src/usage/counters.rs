use super::service::UsageService;
use crate::entitlements::UsageCounter;
use crate::error::{CounterFailure, GateError};
use crate::ui::notifications::Notifier;
use std::sync::Arc;
use tracing::{debug, error, warn};

const TRACKING_WARNING_TITLE: &str = "Usage not recorded";
const TRACKING_WARNING_BODY: &str =
    "Your request went through, but we couldn't update your usage count.";

/// Records consumption after a counted action has already succeeded
pub struct UsageTracker {
    usage: Arc<UsageService>,
    notifier: Arc<dyn Notifier>,
}

impl UsageTracker {
    pub fn new(usage: Arc<UsageService>, notifier: Arc<dyn Notifier>) -> Self {
        Self { usage, notifier }
    }

    pub async fn increment_ocr_usage(&self) -> Result<(), GateError> {
        self.increment(UsageCounter::Ocr).await
    }

    pub async fn increment_ai_lookup_usage(&self) -> Result<(), GateError> {
        self.increment(UsageCounter::AiLookup).await
    }

    pub async fn increment_ai_support_usage(&self) -> Result<(), GateError> {
        self.increment(UsageCounter::AiSupport).await
    }

    /// One server-side atomic increment. Failures are reported to the user
    /// as a warning and returned, but never undo the counted action.
    pub async fn increment(&self, counter: UsageCounter) -> Result<(), GateError> {
        let session = self.usage.session().await?;

        match self.usage.backend().increment_usage(&session, counter).await {
            Ok(()) => {
                debug!("Recorded {} usage for {}", counter, session.user_id());
                self.usage.invalidate().await;
                Ok(())
            }
            Err(err) => {
                let failure = if err.is_missing_function() {
                    error!(
                        "Usage function {} is missing or misconfigured: {}",
                        counter.rpc_name(),
                        err
                    );
                    CounterFailure::FunctionMissing {
                        function: counter.rpc_name().to_string(),
                    }
                } else {
                    warn!("Failed to record {} usage: {}", counter, err);
                    CounterFailure::from(err)
                };

                self.notifier.show_warning(TRACKING_WARNING_TITLE, TRACKING_WARNING_BODY);
                Err(GateError::CounterIncrement { counter, failure })
            }
        }
    }
}
