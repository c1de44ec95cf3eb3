#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use warranty_keeper::entitlements::{GatedAction, Tier, UsageCounter, UsageSnapshot};
use warranty_keeper::error::BackendError;
use warranty_keeper::remote::{
    AuthManager, NewWarranty, Session, UsageBackend, UserInfo, WarrantyRecord, WarrantyStore,
};
use warranty_keeper::ui::Notifier;
use warranty_keeper::usage::{UsageService, UsageTracker};

pub const USER_ID: &str = "5f8a7c1e-0000-4000-8000-000000000001";

/// How the in-memory backend answers increment calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementMode {
    Succeed,
    MissingFunction,
    ServerError,
}

/// In-memory stand-in for the hosted usage table and its functions
pub struct MockBackend {
    snapshot: Mutex<Option<UsageSnapshot>>,
    fetch_fails: Mutex<bool>,
    token_rejected: Mutex<bool>,
    create_fails: Mutex<bool>,
    created: Mutex<Vec<WarrantyRecord>>,
    increment_mode: Mutex<IncrementMode>,
    verify_answer: Mutex<serde_json::Value>,
    increments: Mutex<HashMap<UsageCounter, u32>>,
    fetches: AtomicUsize,
}

impl MockBackend {
    pub fn new(snapshot: UsageSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Some(snapshot)),
            fetch_fails: Mutex::new(false),
            token_rejected: Mutex::new(false),
            create_fails: Mutex::new(false),
            created: Mutex::new(Vec::new()),
            increment_mode: Mutex::new(IncrementMode::Succeed),
            verify_answer: Mutex::new(serde_json::json!({ "allowed": true })),
            increments: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn set_snapshot(&self, snapshot: UsageSnapshot) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }

    /// Change the remote row in place, as another tab or device would
    pub fn update<F: FnOnce(&mut UsageSnapshot)>(&self, change: F) {
        if let Some(snapshot) = self.snapshot.lock().unwrap().as_mut() {
            change(snapshot);
        }
    }

    pub fn set_fetch_fails(&self, fails: bool) {
        *self.fetch_fails.lock().unwrap() = fails;
    }

    /// Answer every fetch with 401, as for a revoked token
    pub fn set_token_rejected(&self, rejected: bool) {
        *self.token_rejected.lock().unwrap() = rejected;
    }

    pub fn set_create_fails(&self, fails: bool) {
        *self.create_fails.lock().unwrap() = fails;
    }

    pub fn created(&self) -> Vec<WarrantyRecord> {
        self.created.lock().unwrap().clone()
    }

    pub fn set_increment_mode(&self, mode: IncrementMode) {
        *self.increment_mode.lock().unwrap() = mode;
    }

    pub fn set_verify_answer(&self, answer: serde_json::Value) {
        *self.verify_answer.lock().unwrap() = answer;
    }

    pub fn increments(&self, counter: UsageCounter) -> u32 {
        self.increments.lock().unwrap().get(&counter).copied().unwrap_or(0)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageBackend for MockBackend {
    async fn fetch_usage(&self, session: &Session) -> Result<UsageSnapshot, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if *self.token_rejected.lock().unwrap() {
            return Err(BackendError::Http {
                status: 401,
                code: Some("PGRST301".to_string()),
                message: "JWT expired".to_string(),
            });
        }
        if *self.fetch_fails.lock().unwrap() {
            return Err(BackendError::Http {
                status: 503,
                code: None,
                message: "service unavailable".to_string(),
            });
        }
        self.snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BackendError::NotFound(session.user_id().to_string()))
    }

    async fn increment_usage(
        &self,
        _session: &Session,
        counter: UsageCounter,
    ) -> Result<(), BackendError> {
        match *self.increment_mode.lock().unwrap() {
            IncrementMode::Succeed => {}
            IncrementMode::MissingFunction => {
                return Err(BackendError::Http {
                    status: 404,
                    code: Some("PGRST202".to_string()),
                    message: format!("Could not find the function public.{}", counter.rpc_name()),
                });
            }
            IncrementMode::ServerError => {
                return Err(BackendError::Http {
                    status: 500,
                    code: None,
                    message: "internal error".to_string(),
                });
            }
        }

        *self.increments.lock().unwrap().entry(counter).or_insert(0) += 1;
        self.update(|snapshot| match counter {
            UsageCounter::Ocr => snapshot.ocr_scans_used += 1,
            UsageCounter::AiLookup => snapshot.ai_lookups_used += 1,
            UsageCounter::AiSupport => snapshot.ai_support_requests_used += 1,
        });
        Ok(())
    }

    async fn verify_action(
        &self,
        _session: &Session,
        _action: GatedAction,
    ) -> Result<serde_json::Value, BackendError> {
        Ok(self.verify_answer.lock().unwrap().clone())
    }
}

#[async_trait]
impl WarrantyStore for MockBackend {
    async fn create_warranty(
        &self,
        session: &Session,
        warranty: &NewWarranty,
    ) -> Result<WarrantyRecord, BackendError> {
        if *self.create_fails.lock().unwrap() {
            return Err(BackendError::Http {
                status: 409,
                code: Some("23505".to_string()),
                message: "duplicate key value violates unique constraint".to_string(),
            });
        }

        let record = WarrantyRecord {
            id: Uuid::new_v4(),
            user_id: session.user_id().to_string(),
            product_name: warranty.product_name.clone(),
            purchase_date: warranty.purchase_date,
            expires_on: warranty.expires_on,
            created_at: chrono::Utc::now(),
        };
        self.created.lock().unwrap().push(record.clone());
        self.update(|snapshot| snapshot.current_warranties += 1);
        Ok(record)
    }
}

/// Notifier that remembers what it was asked to show
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, level: &str, title: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((level.to_string(), title.to_string(), message.to_string()));
    }

    pub fn warnings(&self) -> Vec<String> {
        self.by_level("warning")
    }

    pub fn infos(&self) -> Vec<String> {
        self.by_level("info")
    }

    fn by_level(&self, level: &str) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _, _)| l == level)
            .map(|(_, _, m)| m.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show_info(&self, title: &str, message: &str) {
        self.record("info", title, message);
    }

    fn show_warning(&self, title: &str, message: &str) {
        self.record("warning", title, message);
    }

    fn show_error(&self, title: &str, message: &str) {
        self.record("error", title, message);
    }
}

pub fn session() -> Session {
    Session {
        access_token: "test-access-token".to_string(),
        refresh_token: None,
        expires_at: None,
        user: UserInfo { id: USER_ID.to_string(), email: Some("owner@example.com".to_string()) },
    }
}

pub fn signed_in() -> Arc<AuthManager> {
    Arc::new(AuthManager::with_session(
        "http://localhost:54321".to_string(),
        "anon".to_string(),
        session(),
    ))
}

pub fn signed_out() -> Arc<AuthManager> {
    Arc::new(AuthManager::new("http://localhost:54321".to_string(), "anon".to_string()))
}

pub fn snapshot(tier: Tier) -> UsageSnapshot {
    UsageSnapshot::new(tier)
}

/// Usage service, tracker and notifier wired to `backend`
pub fn wire(
    backend: Arc<MockBackend>,
    auth: Arc<AuthManager>,
) -> (Arc<UsageService>, Arc<UsageTracker>, Arc<RecordingNotifier>) {
    let usage = Arc::new(UsageService::new(backend, auth, Duration::from_secs(30)));
    let notifier = RecordingNotifier::new();
    let tracker = Arc::new(UsageTracker::new(usage.clone(), notifier.clone()));
    (usage, tracker, notifier)
}
