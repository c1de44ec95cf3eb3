pub mod scheduler;

pub use scheduler::{expiry_message, reminder_schedule, ReminderScheduler};
