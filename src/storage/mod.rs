pub mod database;

pub use database::{Database, Reminder, TrackedWarranty};
