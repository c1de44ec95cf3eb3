use notify_rust::{Notification, Timeout};
use tracing::{debug, info, warn};

/// Surface for short, non-blocking messages to the user
pub trait Notifier: Send + Sync {
    fn show_info(&self, title: &str, message: &str);
    fn show_warning(&self, title: &str, message: &str);
    fn show_error(&self, title: &str, message: &str);
}

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    fn icon(self) -> &'static str {
        match self {
            Self::Info => "dialog-information",
            Self::Warning => "dialog-warning",
            Self::Error => "dialog-error",
        }
    }

    fn timeout_ms(self) -> u32 {
        match self {
            Self::Info => 5000,
            Self::Warning => 7000,
            Self::Error => 10000,
        }
    }
}

/// Desktop notifications; falls back to the log when disabled
pub struct NotificationManager {
    enabled: bool,
    app_name: String,
}

impl NotificationManager {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            app_name: "Warranty Keeper".to_string(),
        }
    }

    fn show(&self, level: Level, title: &str, message: &str) {
        if !self.enabled {
            info!("{}: {}", title, message);
            return;
        }

        if let Err(e) = Notification::new()
            .summary(title)
            .body(message)
            .appname(&self.app_name)
            .icon(level.icon())
            .timeout(Timeout::Milliseconds(level.timeout_ms()))
            .show()
        {
            warn!("Failed to show notification: {}", e);
        } else {
            debug!("Showed {:?} notification: {} - {}", level, title, message);
        }
    }
}

impl Notifier for NotificationManager {
    fn show_info(&self, title: &str, message: &str) {
        self.show(Level::Info, title, message);
    }

    fn show_warning(&self, title: &str, message: &str) {
        self.show(Level::Warning, title, message);
    }

    fn show_error(&self, title: &str, message: &str) {
        self.show(Level::Error, title, message);
    }
}
