use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warranty_keeper::config::AppConfig;
use warranty_keeper::entitlements::{evaluator, Decision, GatedAction};
use warranty_keeper::reminders::ReminderScheduler;
use warranty_keeper::remote::{AuthManager, RestClient, Session, UsageBackend, UserInfo};
use warranty_keeper::storage::Database;
use warranty_keeper::ui::{NotificationManager, Notifier};
use warranty_keeper::error::GateError;
use warranty_keeper::usage::UsageService;

/// Session handed over by the host application through the environment
fn session_from_env() -> Option<Session> {
    let access_token = std::env::var("WARRANTY_ACCESS_TOKEN").ok()?;
    let user_id = std::env::var("WARRANTY_USER_ID").ok()?;
    Some(Session {
        access_token,
        refresh_token: std::env::var("WARRANTY_REFRESH_TOKEN").ok(),
        expires_at: None,
        user: UserInfo { id: user_id, email: None },
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warranty_keeper=debug")),
        )
        .init();

    info!("Starting Warranty Keeper...");

    let config = AppConfig::load(None)?;

    let db = Arc::new(Database::new(config.database_path()).await?);
    let (warranties, pending) = db.get_stats().await?;
    info!("Database stats: {} tracked warranties, {} pending reminders", warranties, pending);

    let notifier: Arc<dyn Notifier> = Arc::new(NotificationManager::new(config.show_notifications));

    let mut signed_in_here = false;
    let auth = Arc::new(match session_from_env() {
        Some(session) => {
            info!("Restored session for user {}", session.user_id());
            AuthManager::with_session(config.api_url.clone(), config.anon_key.clone(), session)
        }
        None => AuthManager::new(config.api_url.clone(), config.anon_key.clone()),
    });

    if !auth.is_authenticated().await {
        match (std::env::var("WARRANTY_EMAIL"), std::env::var("WARRANTY_PASSWORD")) {
            (Ok(email), Ok(password)) => match auth.sign_in(&email, &password).await {
                Ok(_) => signed_in_here = true,
                Err(e) => error!("Sign-in failed: {:#}", e),
            },
            _ => warn!("No session provided; sign in to check entitlements"),
        }
    }

    let backend: Arc<dyn UsageBackend> =
        Arc::new(RestClient::new(&config.api_url, config.anon_key.clone())?);
    let usage = UsageService::new(backend, auth.clone(), config.snapshot_ttl());

    match usage.current().await {
        Ok(snapshot) => {
            let now = Utc::now();
            for action in GatedAction::ALL {
                match evaluator::check(action, snapshot.as_ref(), now) {
                    Decision::Allowed(grant) => {
                        match grant.meter.and_then(|meter| meter.remaining()) {
                            Some(left) => {
                                info!("{}: allowed on {} tier, {} left", action, grant.tier, left)
                            }
                            None => info!("{}: allowed on {} tier", action, grant.tier),
                        }
                    }
                    denied => {
                        info!("{}: denied ({})", action, denied.message().unwrap_or_default())
                    }
                }
            }
        }
        Err(GateError::NotAuthenticated) => warn!("Not signed in; skipping entitlement summary"),
        Err(e) => error!("Failed to load usage: {}", e),
    }

    let scheduler = Arc::new(ReminderScheduler::new(
        db.clone(),
        config.reminder_offsets_days.clone(),
        config.reminder_poll_interval(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let notifier = notifier.clone();
        tokio::spawn(async move { scheduler.run(notifier, shutdown_rx).await })
    };

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    info!("Shutting down Warranty Keeper...");

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        error!("Reminder scheduler task failed: {}", e);
    }

    if signed_in_here {
        usage.sign_out().await;
    }

    Ok(())
}
