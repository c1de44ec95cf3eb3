use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SIGN_OUT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session issued by the hosted auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserInfo,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: UserInfo,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            user: self.user,
        }
    }
}

/// Holds the current identity. Sign-in itself is delegated to the hosted
/// auth endpoint; this only keeps the session it hands back.
pub struct AuthManager {
    session: Arc<RwLock<Option<Session>>>,
    client: Client,
    api_base_url: String,
    anon_key: String,
}

impl AuthManager {
    pub fn new(api_base_url: String, anon_key: String) -> Self {
        Self {
            session: Arc::new(RwLock::new(None)),
            client: Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            anon_key,
        }
    }

    /// Manager with an already-issued session, e.g. restored from the environment
    pub fn with_session(api_base_url: String, anon_key: String, session: Session) -> Self {
        let mut manager = Self::new(api_base_url, anon_key);
        manager.session = Arc::new(RwLock::new(Some(session)));
        manager
    }

    /// Exchange email and password for a session
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<UserInfo> {
        #[derive(Serialize)]
        struct PasswordGrant<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=password", self.api_base_url))
            .header("apikey", &self.anon_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await
            .context("Failed to send sign-in request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Sign-in failed: {}", error_text));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse sign-in response")?;

        let session = token.into_session();
        let user = session.user.clone();
        self.set_session(session).await;

        info!("Signed in as {}", user.email.as_deref().unwrap_or(&user.id));
        Ok(user)
    }

    /// Trade the refresh token for a new session
    pub async fn refresh(&self) -> Result<()> {
        #[derive(Serialize)]
        struct RefreshGrant<'a> {
            refresh_token: &'a str,
        }

        let refresh_token = {
            let session = self.session.read().await;
            session
                .as_ref()
                .and_then(|s| s.refresh_token.clone())
                .context("No refresh token available")?
        };

        let response = self
            .client
            .post(format!("{}/auth/v1/token?grant_type=refresh_token", self.api_base_url))
            .header("apikey", &self.anon_key)
            .json(&RefreshGrant { refresh_token: &refresh_token })
            .send()
            .await
            .context("Failed to send refresh request")?;

        if !response.status().is_success() {
            warn!("Session refresh rejected with status {}", response.status());
            return Err(anyhow::anyhow!("Session refresh failed"));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse refresh response")?;
        self.set_session(token.into_session()).await;

        debug!("Session refreshed");
        Ok(())
    }

    /// Drop the local session and tell the server, best effort
    pub async fn sign_out(&self) {
        let previous = self.session.write().await.take();

        if let Some(session) = previous {
            let _ = self
                .client
                .post(format!("{}/auth/v1/logout", self.api_base_url))
                .header("apikey", &self.anon_key)
                .bearer_auth(&session.access_token)
                .timeout(SIGN_OUT_TIMEOUT)
                .send()
                .await;
        }

        info!("Signed out");
    }

    pub async fn set_session(&self, session: Session) {
        *self.session.write().await = Some(session);
    }

    /// Current session, if any
    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn user_id(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.user.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: None,
            user: UserInfo { id: "user-1".to_string(), email: None },
        }
    }

    #[tokio::test]
    async fn test_manager_without_session() {
        let auth = AuthManager::new("http://localhost:54321/".to_string(), "anon".to_string());
        assert!(!auth.is_authenticated().await);
        assert!(auth.session().await.is_none());
        assert!(auth.refresh().await.is_err());
    }

    #[tokio::test]
    async fn test_restored_session() {
        let auth = AuthManager::with_session(
            "http://localhost:54321".to_string(),
            "anon".to_string(),
            session(),
        );
        assert!(auth.is_authenticated().await);
        assert_eq!(auth.user_id().await.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_sign_out_forgets_session() {
        // Nothing listens on the discard port; the logout call fails and is ignored
        let auth = AuthManager::with_session(
            "http://127.0.0.1:9".to_string(),
            "anon".to_string(),
            session(),
        );
        auth.sign_out().await;
        assert!(!auth.is_authenticated().await);
        assert!(auth.user_id().await.is_none());
    }

    #[tokio::test]
    async fn test_set_session_replaces_identity() {
        let auth = AuthManager::new("http://localhost:54321".to_string(), "anon".to_string());
        let mut other = session();
        other.user.id = "user-2".to_string();
        auth.set_session(other).await;
        assert_eq!(auth.user_id().await.as_deref(), Some("user-2"));
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let mut s = session();
        assert!(!s.is_expired_at(now));
        s.expires_at = Some(now - Duration::seconds(1));
        assert!(s.is_expired_at(now));
    }
}
