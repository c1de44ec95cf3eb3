pub mod notifications;

pub use notifications::{NotificationManager, Notifier};
