use crate::entitlements::UsageSnapshot;
use std::time::{Duration, Instant};
use tracing::debug;

/// Last fetched usage snapshot with its staleness window.
///
/// A value is served until `ttl` has passed since `fetched_at` or until it
/// is invalidated after a mutation, whichever comes first.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    value: Option<UsageSnapshot>,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            value: None,
            fetched_at: None,
            ttl,
        }
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        match (self.value.as_ref(), self.fetched_at) {
            (Some(_), Some(at)) => now.saturating_duration_since(at) < self.ttl,
            _ => false,
        }
    }

    /// The cached snapshot if it is still inside the staleness window
    pub fn fresh(&self, now: Instant) -> Option<&UsageSnapshot> {
        if self.is_fresh(now) {
            self.value.as_ref()
        } else {
            None
        }
    }

    /// Whatever was fetched last, fresh or not
    pub fn last_known(&self) -> Option<&UsageSnapshot> {
        self.value.as_ref()
    }

    pub fn store(&mut self, snapshot: UsageSnapshot, now: Instant) {
        self.value = Some(snapshot);
        self.fetched_at = Some(now);
    }

    /// Force the next read to go to the remote store
    pub fn invalidate(&mut self) {
        if self.fetched_at.take().is_some() {
            debug!("Usage snapshot invalidated");
        }
    }

    pub fn clear(&mut self) {
        self.value = None;
        self.fetched_at = None;
    }
}
