// Expose modules for testing
pub mod config;
pub mod entitlements;
pub mod error;
pub mod reminders;
pub mod remote;
pub mod storage;
pub mod ui;
pub mod usage;
pub mod warranties;
