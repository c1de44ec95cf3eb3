pub mod cache;
pub mod counters;
pub mod service;

pub use cache::SnapshotCache;
pub use counters::UsageTracker;
pub use service::UsageService;
