use crate::remote::WarrantyRecord;
use crate::storage::{Database, Reminder, TrackedWarranty};
use crate::ui::notifications::Notifier;
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Hour of day (UTC) at which reminders fire
const REMINDER_HOUR: u32 = 9;

/// Reminder times for a warranty expiring on `expires_on`, keeping only
/// those still ahead of `now`
pub fn reminder_schedule(
    expires_on: NaiveDate,
    offsets_days: &[u32],
    now: DateTime<Utc>,
) -> Vec<(u32, DateTime<Utc>)> {
    let fire_time = NaiveTime::from_hms_opt(REMINDER_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);

    let mut schedule: Vec<(u32, DateTime<Utc>)> = offsets_days
        .iter()
        .filter_map(|&days| {
            let day = expires_on.checked_sub_signed(ChronoDuration::days(days as i64))?;
            let at = day.and_time(fire_time).and_utc();
            (at > now).then_some((days, at))
        })
        .collect();

    schedule.sort_by_key(|(_, at)| *at);
    schedule.dedup_by_key(|(days, _)| *days);
    schedule
}

pub fn expiry_message(product: &str, days_left: i64) -> String {
    match days_left {
        d if d < 0 => format!("Your {} warranty has expired.", product),
        0 => format!("Your {} warranty expires today.", product),
        1 => format!("Your {} warranty expires tomorrow.", product),
        d => format!("Your {} warranty expires in {} days.", product, d),
    }
}

/// Keeps local expiry reminders and fires them when due
pub struct ReminderScheduler {
    db: Arc<Database>,
    offsets_days: Vec<u32>,
    poll_interval: Duration,
}

impl ReminderScheduler {
    pub fn new(db: Arc<Database>, offsets_days: Vec<u32>, poll_interval: Duration) -> Self {
        Self {
            db,
            offsets_days,
            poll_interval,
        }
    }

    /// Start (or refresh) watching a warranty. Returns the number of
    /// reminders scheduled.
    pub async fn track(&self, warranty: &TrackedWarranty, now: DateTime<Utc>) -> Result<usize> {
        self.db.upsert_warranty(warranty).await?;

        let schedule = reminder_schedule(warranty.expires_on, &self.offsets_days, now);
        let scheduled = self.db.replace_reminders(warranty.id, &schedule).await?;

        info!(
            "Scheduled {} reminder(s) for {} expiring {}",
            scheduled, warranty.product_name, warranty.expires_on
        );
        Ok(scheduled)
    }

    /// Watch a warranty that was just created remotely
    pub async fn track_record(&self, record: &WarrantyRecord) -> Result<usize> {
        let warranty = TrackedWarranty {
            id: record.id,
            product_name: record.product_name.clone(),
            expires_on: record.expires_on,
        };
        self.track(&warranty, Utc::now()).await
    }

    pub async fn untrack(&self, warranty_id: Uuid) -> Result<bool> {
        let removed = self.db.delete_warranty(warranty_id).await?;
        if removed {
            debug!("Stopped tracking warranty {}", warranty_id);
        }
        Ok(removed)
    }

    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        self.db.due_reminders(now).await
    }

    pub async fn mark_sent(&self, reminder_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.db.mark_reminder_sent(reminder_id, at).await
    }

    /// Show every due reminder once. Returns how many fired.
    pub async fn fire_due(&self, now: DateTime<Utc>, notifier: &dyn Notifier) -> Result<usize> {
        let due = self.due(now).await?;
        Ok(self.deliver(&due, now, notifier).await)
    }

    /// A reminder is marked sent before it is shown, so it is never shown
    /// twice. One that cannot be marked is skipped and left for a later tick.
    pub async fn deliver(
        &self,
        reminders: &[Reminder],
        now: DateTime<Utc>,
        notifier: &dyn Notifier,
    ) -> usize {
        let mut fired = 0;
        for reminder in reminders {
            if let Err(e) = self.mark_sent(reminder.id, now).await {
                error!("Failed to mark reminder {} as sent: {}", reminder.id, e);
                continue;
            }

            let days_left = (reminder.expires_on - now.date_naive()).num_days();
            notifier.show_info(
                "Warranty expiring",
                &expiry_message(&reminder.product_name, days_left),
            );
            fired += 1;
        }

        if fired > 0 {
            info!("Fired {} warranty reminder(s)", fired);
        }
        fired
    }

    /// Poll for due reminders until `shutdown` flips to true
    pub async fn run(&self, notifier: Arc<dyn Notifier>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Reminder scheduler started (every {:?})", self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.fire_due(Utc::now(), notifier.as_ref()).await {
                        error!("Failed to fire reminders: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reminder scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_schedule_skips_past_offsets() {
        let now = Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap();
        let schedule = reminder_schedule(date(2026, 4, 1), &[30, 7, 1], now);

        let days: Vec<u32> = schedule.iter().map(|(d, _)| *d).collect();
        assert_eq!(days, vec![7, 1]);
        assert_eq!(schedule[0].1, Utc.with_ymd_and_hms(2026, 3, 25, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_schedule_for_expired_warranty_is_empty() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        assert!(reminder_schedule(date(2026, 4, 1), &[30, 7, 1], now).is_empty());
    }

    #[test]
    fn test_schedule_sorted_and_deduplicated() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let schedule = reminder_schedule(date(2026, 12, 31), &[1, 30, 7, 30], now);
        let days: Vec<u32> = schedule.iter().map(|(d, _)| *d).collect();
        assert_eq!(days, vec![30, 7, 1]);
    }

    #[test]
    fn test_expiry_message() {
        assert_eq!(expiry_message("Laptop", 0), "Your Laptop warranty expires today.");
        assert_eq!(expiry_message("Laptop", 1), "Your Laptop warranty expires tomorrow.");
        assert_eq!(expiry_message("Laptop", 7), "Your Laptop warranty expires in 7 days.");
        assert_eq!(expiry_message("Laptop", -2), "Your Laptop warranty has expired.");
    }
}
