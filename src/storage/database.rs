use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

/// Warranty whose expiry is watched locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedWarranty {
    pub id: Uuid,
    pub product_name: String,
    pub expires_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub warranty_id: Uuid,
    pub product_name: String,
    pub expires_on: NaiveDate,
    pub days_before: u32,
    pub remind_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

fn parse_uuid(value: String) -> Result<Uuid> {
    Uuid::parse_str(&value).with_context(|| format!("Invalid warranty id in database: {}", value))
}

fn warranty_from_row(row: SqliteRow) -> Result<TrackedWarranty> {
    Ok(TrackedWarranty {
        id: parse_uuid(row.try_get("id")?)?,
        product_name: row.try_get("product_name")?,
        expires_on: row.try_get("expires_on")?,
    })
}

fn reminder_from_row(row: SqliteRow) -> Result<Reminder> {
    Ok(Reminder {
        id: row.try_get("id")?,
        warranty_id: parse_uuid(row.try_get("warranty_id")?)?,
        product_name: row.try_get("product_name")?,
        expires_on: row.try_get("expires_on")?,
        days_before: row.try_get::<i64, _>("days_before")? as u32,
        remind_at: row.try_get("remind_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

const REMINDER_COLUMNS: &str = "r.id, r.warranty_id, w.product_name, w.expires_on, \
     r.days_before, r.remind_at, r.sent_at";

impl Database {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        info!("Opening database at: {:?}", db_path);

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool, db_path };
        db.migrate().await?;

        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_warranties (
                id TEXT PRIMARY KEY,
                product_name TEXT NOT NULL,
                expires_on DATE NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                warranty_id TEXT NOT NULL,
                days_before INTEGER NOT NULL,
                remind_at DATETIME NOT NULL,
                sent_at DATETIME,
                UNIQUE(warranty_id, days_before),
                FOREIGN KEY (warranty_id) REFERENCES tracked_warranties(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reminders_remind_at ON reminders(remind_at)")
            .execute(&self.pool)
            .await?;

        debug!("Database migrations completed");
        Ok(())
    }

    /// Insert a warranty, or update name and expiry if it is already tracked
    pub async fn upsert_warranty(&self, warranty: &TrackedWarranty) -> Result<()> {
        sqlx::query(
            "INSERT INTO tracked_warranties (id, product_name, expires_on) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET product_name = excluded.product_name,
                                           expires_on = excluded.expires_on",
        )
        .bind(warranty.id.to_string())
        .bind(&warranty.product_name)
        .bind(warranty.expires_on)
        .execute(&self.pool)
        .await?;

        debug!("Tracking warranty {} ({})", warranty.id, warranty.product_name);
        Ok(())
    }

    pub async fn get_warranty(&self, id: Uuid) -> Result<Option<TrackedWarranty>> {
        let row = sqlx::query(
            "SELECT id, product_name, expires_on FROM tracked_warranties WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(warranty_from_row).transpose()
    }

    pub async fn list_warranties(&self) -> Result<Vec<TrackedWarranty>> {
        sqlx::query(
            "SELECT id, product_name, expires_on FROM tracked_warranties ORDER BY expires_on",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(warranty_from_row)
        .collect()
    }

    /// Remove a warranty and its reminders. Returns whether it existed.
    pub async fn delete_warranty(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM reminders WHERE warranty_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM tracked_warranties WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    /// Replace the unsent reminders of a warranty; sent ones are kept
    pub async fn replace_reminders(
        &self,
        warranty_id: Uuid,
        schedule: &[(u32, DateTime<Utc>)],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM reminders WHERE warranty_id = ? AND sent_at IS NULL")
            .bind(warranty_id.to_string())
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0;
        for (days_before, remind_at) in schedule {
            inserted += sqlx::query(
                "INSERT OR IGNORE INTO reminders (warranty_id, days_before, remind_at)
                 VALUES (?, ?, ?)",
            )
            .bind(warranty_id.to_string())
            .bind(*days_before as i64)
            .bind(remind_at)
            .execute(&mut *tx)
            .await?
            .rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn reminders_for(&self, warranty_id: Uuid) -> Result<Vec<Reminder>> {
        sqlx::query(&format!(
            "SELECT {} FROM reminders r JOIN tracked_warranties w ON w.id = r.warranty_id
             WHERE r.warranty_id = ? ORDER BY r.remind_at",
            REMINDER_COLUMNS
        ))
        .bind(warranty_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(reminder_from_row)
        .collect()
    }

    /// Unsent reminders whose time has come
    pub async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        sqlx::query(&format!(
            "SELECT {} FROM reminders r JOIN tracked_warranties w ON w.id = r.warranty_id
             WHERE r.sent_at IS NULL AND r.remind_at <= ? ORDER BY r.remind_at",
            REMINDER_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(reminder_from_row)
        .collect()
    }

    pub async fn mark_reminder_sent(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE reminders SET sent_at = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Reminder {} not found", id);
        }
        Ok(())
    }

    /// Tracked warranties and unsent reminders
    pub async fn get_stats(&self) -> Result<(i64, i64)> {
        let warranties: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tracked_warranties")
            .fetch_one(&self.pool)
            .await?;

        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reminders WHERE sent_at IS NULL")
            .fetch_one(&self.pool)
            .await?;

        Ok((warranties, pending))
    }
}
