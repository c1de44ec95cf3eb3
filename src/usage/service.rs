use super::cache::SnapshotCache;
use crate::entitlements::UsageSnapshot;
use crate::error::GateError;
use crate::remote::{AuthManager, Session, UsageBackend};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Session-scoped access to the user's usage snapshot
pub struct UsageService {
    backend: Arc<dyn UsageBackend>,
    auth: Arc<AuthManager>,
    cache: RwLock<SnapshotCache>,
}

impl UsageService {
    pub fn new(backend: Arc<dyn UsageBackend>, auth: Arc<AuthManager>, ttl: Duration) -> Self {
        Self {
            backend,
            auth,
            cache: RwLock::new(SnapshotCache::new(ttl)),
        }
    }

    pub fn backend(&self) -> &Arc<dyn UsageBackend> {
        &self.backend
    }

    /// Current identity. An expired session is refreshed once; if that
    /// fails the user has to sign in again.
    pub async fn session(&self) -> Result<Session, GateError> {
        let session = self.auth.session().await.ok_or(GateError::NotAuthenticated)?;
        if !session.is_expired_at(Utc::now()) {
            return Ok(session);
        }

        info!("Session for {} expired, refreshing", session.user_id());
        if let Err(e) = self.auth.refresh().await {
            warn!("Session refresh failed: {}", e);
            return Err(GateError::NotAuthenticated);
        }
        self.auth.session().await.ok_or(GateError::NotAuthenticated)
    }

    /// Snapshot for gating. Served from cache inside the staleness window;
    /// otherwise refetched. `Ok(None)` while the snapshot cannot be fetched;
    /// a missing identity is an error rather than a pending load.
    pub async fn current(&self) -> Result<Option<UsageSnapshot>, GateError> {
        if let Some(snapshot) = self.cache.read().await.fresh(Instant::now()) {
            debug!("Using cached usage snapshot");
            return Ok(Some(snapshot.clone()));
        }

        match self.refresh().await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(GateError::NotAuthenticated) => Err(GateError::NotAuthenticated),
            Err(e) => {
                warn!("Usage snapshot unavailable: {}", e);
                Ok(None)
            }
        }
    }

    /// Fetch from the remote store regardless of cache state
    pub async fn refresh(&self) -> Result<UsageSnapshot, GateError> {
        let session = self.session().await?;
        let snapshot = match self.backend.fetch_usage(&session).await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_unauthorized() => {
                warn!("Access token rejected: {}", e);
                return Err(GateError::NotAuthenticated);
            }
            Err(e) => return Err(GateError::SnapshotUnavailable(e)),
        };

        self.cache.write().await.store(snapshot.clone(), Instant::now());
        debug!(
            "Fetched usage snapshot: tier={} warranties={}/{}",
            snapshot.tier, snapshot.current_warranties, snapshot.max_warranties
        );
        Ok(snapshot)
    }

    pub async fn invalidate(&self) {
        self.cache.write().await.invalidate();
    }

    /// Last fetched snapshot without touching the network
    pub async fn cached(&self) -> Option<UsageSnapshot> {
        self.cache.read().await.last_known().cloned()
    }

    /// Forget everything, e.g. after sign-out
    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn sign_out(&self) {
        self.auth.sign_out().await;
        self.clear().await;
    }
}
