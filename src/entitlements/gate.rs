//! Double-checked gating of quota-limited actions.
//!
//! ```text
//! Idle --intent--> PreCheck --allow--> FormOpen --submit--> FinalCheck
//! PreCheck / FinalCheck --deny--> ShowUpgradePrompt --dismiss--> Idle
//! FinalCheck --allow--> Mutate --success--> CountersIncrement --> Idle
//! Mutate --failure--> ShowError --acknowledge--> FormOpen
//! FinalCheck --sign-in required--> FormOpen
//! ```
//!
//! A missing or expired identity is never turned into a denial: `begin`
//! and `submit` return `GateError::NotAuthenticated` and the action is
//! aborted.

use super::evaluator::{self, Decision, UpgradePrompt};
use super::GatedAction;
use crate::error::GateError;
use crate::usage::{UsageService, UsageTracker};
use chrono::Utc;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Idle,
    PreCheck,
    ShowUpgradePrompt(UpgradePrompt),
    FormOpen,
    FinalCheck,
    Mutate,
    ShowError(String),
    CountersIncrement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    Intent,
    Allowed,
    Denied(UpgradePrompt),
    Submit,
    Cancel,
    SignInRequired,
    MutationSucceeded,
    MutationFailed(String),
    CountersRecorded,
    Dismiss,
    Acknowledge,
}

impl GateState {
    pub fn next(&self, event: GateEvent) -> Result<GateState, GateError> {
        use GateEvent as E;
        use GateState as S;

        let next = match (self, event) {
            (S::Idle, E::Intent) => S::PreCheck,
            (S::PreCheck, E::Allowed) => S::FormOpen,
            (S::PreCheck | S::FinalCheck, E::Denied(prompt)) => S::ShowUpgradePrompt(prompt),
            (S::ShowUpgradePrompt(_), E::Dismiss) => S::Idle,
            (S::FormOpen, E::Submit) => S::FinalCheck,
            (S::FormOpen, E::Cancel) => S::Idle,
            (S::FinalCheck, E::Allowed) => S::Mutate,
            (S::FinalCheck, E::SignInRequired) => S::FormOpen,
            (S::Mutate, E::MutationSucceeded) => S::CountersIncrement,
            (S::Mutate, E::MutationFailed(message)) => S::ShowError(message),
            (S::ShowError(_), E::Acknowledge) => S::FormOpen,
            (S::CountersIncrement, E::CountersRecorded) => S::Idle,
            (from, event) => {
                return Err(GateError::InvalidTransition { from: from.clone(), event });
            }
        };
        Ok(next)
    }

    /// States that wait on the user rather than on the gate
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Idle | Self::ShowUpgradePrompt(_))
    }
}

/// One gated action moving through the gate
#[derive(Debug, Clone)]
pub struct GateFlow {
    action: GatedAction,
    state: GateState,
    last_decision: Option<Decision>,
}

impl GateFlow {
    pub fn new(action: GatedAction) -> Self {
        Self {
            action,
            state: GateState::Idle,
            last_decision: None,
        }
    }

    pub fn action(&self) -> GatedAction {
        self.action
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.last_decision.as_ref()
    }

    pub fn apply(&mut self, event: GateEvent) -> Result<&GateState, GateError> {
        let next = self.state.next(event)?;
        debug!("{}: {:?} -> {:?}", self.action, self.state, next);
        self.state = next;
        Ok(&self.state)
    }

    fn settle(&mut self, decision: Decision) -> Result<&GateState, GateError> {
        let event = match &decision {
            Decision::Allowed(_) => GateEvent::Allowed,
            Decision::Denied(denial) => GateEvent::Denied(denial.upgrade_prompt()),
        };
        self.last_decision = Some(decision);
        self.apply(event)
    }
}

/// Result of submitting a gated action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome<T> {
    Completed(T),
    Denied(UpgradePrompt),
    Failed(String),
}

/// Runs the pre-flight and final checks around a mutation and records
/// usage once it succeeds
pub struct Gatekeeper {
    usage: Arc<UsageService>,
    tracker: Arc<UsageTracker>,
    server_verification: bool,
}

impl Gatekeeper {
    pub fn new(usage: Arc<UsageService>, tracker: Arc<UsageTracker>) -> Self {
        Self {
            usage,
            tracker,
            server_verification: false,
        }
    }

    /// Also ask the server to confirm before mutating
    pub fn with_server_verification(mut self, enabled: bool) -> Self {
        self.server_verification = enabled;
        self
    }

    /// Pre-flight check when the user expresses intent
    pub async fn begin(&self, action: GatedAction) -> Result<GateFlow, GateError> {
        let mut flow = GateFlow::new(action);
        flow.apply(GateEvent::Intent)?;

        let snapshot = self.usage.current().await?;
        let decision = evaluator::check(action, snapshot.as_ref(), Utc::now());
        if let Some(reason) = decision.message() {
            info!("Pre-check denied {}: {}", action, reason);
        }
        flow.settle(decision)?;
        Ok(flow)
    }

    /// Final check against a fresh snapshot, then `mutation`, then usage
    /// recording. A failed usage update never changes the outcome.
    pub async fn submit<F, Fut, T, E>(
        &self,
        flow: &mut GateFlow,
        mutation: F,
    ) -> Result<SubmitOutcome<T>, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        flow.apply(GateEvent::Submit)?;

        let decision = match self.final_check(flow.action).await {
            Ok(decision) => decision,
            Err(e) => {
                info!("{} aborted: {}", flow.action, e);
                flow.apply(GateEvent::SignInRequired)?;
                return Err(e);
            }
        };
        flow.settle(decision)?;
        if let GateState::ShowUpgradePrompt(prompt) = flow.state() {
            info!("Final check denied {}: {}", flow.action, prompt.reason);
            return Ok(SubmitOutcome::Denied(prompt.clone()));
        }

        let value = match mutation().await {
            Ok(value) => value,
            Err(e) => {
                let message = e.to_string();
                warn!("{} failed: {}", flow.action, message);
                flow.apply(GateEvent::MutationFailed(message.clone()))?;
                return Ok(SubmitOutcome::Failed(message));
            }
        };

        flow.apply(GateEvent::MutationSucceeded)?;
        self.record_usage(flow.action).await;
        flow.apply(GateEvent::CountersRecorded)?;

        Ok(SubmitOutcome::Completed(value))
    }

    pub fn dismiss(&self, flow: &mut GateFlow) -> Result<(), GateError> {
        flow.apply(GateEvent::Dismiss).map(|_| ())
    }

    pub fn cancel(&self, flow: &mut GateFlow) -> Result<(), GateError> {
        flow.apply(GateEvent::Cancel).map(|_| ())
    }

    pub fn acknowledge_error(&self, flow: &mut GateFlow) -> Result<(), GateError> {
        flow.apply(GateEvent::Acknowledge).map(|_| ())
    }

    async fn final_check(&self, action: GatedAction) -> Result<Decision, GateError> {
        let snapshot = match self.usage.refresh().await {
            Ok(snapshot) => Some(snapshot),
            Err(GateError::NotAuthenticated) => return Err(GateError::NotAuthenticated),
            Err(e) => {
                warn!("Final check without fresh usage: {}", e);
                None
            }
        };

        let local = evaluator::check(action, snapshot.as_ref(), Utc::now());
        if !local.is_allowed() || !self.server_verification {
            return Ok(local);
        }

        let tier = local.tier();
        let session = self.usage.session().await?;

        let decision = match self.usage.backend().verify_action(&session, action).await {
            Ok(answer) => {
                let remote = Decision::from_wire(&answer, tier);
                if remote.is_allowed() {
                    local
                } else {
                    remote
                }
            }
            Err(e) => {
                warn!("Server verification of {} failed: {}", action, e);
                Decision::unverifiable(tier)
            }
        };
        Ok(decision)
    }

    async fn record_usage(&self, action: GatedAction) {
        match action.counter() {
            Some(counter) => {
                if let Err(e) = self.tracker.increment(counter).await {
                    warn!("{} succeeded but usage was not recorded: {}", action, e);
                }
            }
            // The warranty count lives on the server; just refetch next time.
            None => self.usage.invalidate().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::Tier;

    fn prompt() -> UpgradePrompt {
        UpgradePrompt {
            reason: "You've reached your limit of 3 warranties. Upgrade to add more!".to_string(),
            current_tier: Tier::Free,
            suggested_tier: Some(Tier::Basic),
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut state = GateState::Idle;
        for event in [
            GateEvent::Intent,
            GateEvent::Allowed,
            GateEvent::Submit,
            GateEvent::Allowed,
            GateEvent::MutationSucceeded,
            GateEvent::CountersRecorded,
        ] {
            state = state.next(event).unwrap();
        }
        assert_eq!(state, GateState::Idle);
    }

    #[test]
    fn test_denials_lead_to_prompt() {
        let state = GateState::PreCheck.next(GateEvent::Denied(prompt())).unwrap();
        assert_eq!(state, GateState::ShowUpgradePrompt(prompt()));
        assert!(state.is_terminal());
        assert_eq!(state.next(GateEvent::Dismiss).unwrap(), GateState::Idle);

        let state = GateState::FinalCheck.next(GateEvent::Denied(prompt())).unwrap();
        assert!(matches!(state, GateState::ShowUpgradePrompt(_)));
    }

    #[test]
    fn test_mutation_failure_returns_to_form() {
        let state = GateState::Mutate
            .next(GateEvent::MutationFailed("network down".to_string()))
            .unwrap();
        assert_eq!(state, GateState::ShowError("network down".to_string()));
        assert_eq!(state.next(GateEvent::Acknowledge).unwrap(), GateState::FormOpen);
    }

    #[test]
    fn test_sign_in_required_returns_to_form() {
        let state = GateState::FinalCheck.next(GateEvent::SignInRequired).unwrap();
        assert_eq!(state, GateState::FormOpen);
        assert!(GateState::PreCheck.next(GateEvent::SignInRequired).is_err());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        assert!(matches!(
            GateState::Idle.next(GateEvent::Submit),
            Err(GateError::InvalidTransition { from: GateState::Idle, .. })
        ));
        // A denied action is never retried on its own
        assert!(GateState::ShowUpgradePrompt(prompt()).next(GateEvent::Allowed).is_err());
        assert!(GateState::FormOpen.next(GateEvent::MutationSucceeded).is_err());
    }

    #[test]
    fn test_flow_records_decision() {
        let mut flow = GateFlow::new(GatedAction::AddWarranty);
        flow.apply(GateEvent::Intent).unwrap();
        flow.settle(Decision::loading()).unwrap();

        assert!(matches!(flow.state(), GateState::ShowUpgradePrompt(_)));
        assert!(!flow.last_decision().unwrap().is_allowed());
        assert_eq!(flow.action(), GatedAction::AddWarranty);
    }
}
