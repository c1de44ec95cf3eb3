use super::{decode_usage_rows, Session, UsageBackend, WarrantyStore};
use crate::entitlements::{GatedAction, UsageCounter, UsageSnapshot};
use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWarranty {
    pub product_name: String,
    pub brand: Option<String>,
    pub retailer: Option<String>,
    pub purchase_date: NaiveDate,
    pub expires_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarrantyRecord {
    pub id: Uuid,
    pub user_id: String,
    pub product_name: String,
    pub purchase_date: NaiveDate,
    pub expires_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RemoteErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Map a failed response to `BackendError`, keeping the PostgREST error
/// code when the body carries one
pub fn error_from_body(status: u16, body: &str) -> BackendError {
    match serde_json::from_str::<RemoteErrorBody>(body) {
        Ok(parsed) => BackendError::Http {
            status,
            code: parsed.code,
            message: parsed.message.unwrap_or_else(|| body.to_string()),
        },
        Err(_) => BackendError::Http {
            status,
            code: None,
            message: body.to_string(),
        },
    }
}

/// REST client for the hosted database (tables under `rest/v1`, functions
/// under `rest/v1/rpc`)
pub struct RestClient {
    client: Client,
    base_url: Url,
    anon_key: String,
}

impl RestClient {
    pub fn new(base_url: &str, anon_key: String) -> Result<Self, BackendError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(&base)?,
            anon_key,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base_url.join(path)?)
    }

    fn authorized(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
    }

    async fn error_from(response: Response) -> BackendError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        error_from_body(status, &text)
    }

    async fn call_rpc(
        &self,
        session: &Session,
        function: &str,
        args: serde_json::Value,
    ) -> Result<Response, BackendError> {
        let url = self.endpoint(&format!("rest/v1/rpc/{}", function))?;
        debug!("Calling remote function {}", function);

        let response = self
            .authorized(self.client.post(url), session)
            .json(&args)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        Ok(response)
    }

}

#[async_trait]
impl WarrantyStore for RestClient {
    /// Insert a warranty row and return it as stored
    async fn create_warranty(
        &self,
        session: &Session,
        warranty: &NewWarranty,
    ) -> Result<WarrantyRecord, BackendError> {
        let url = self.endpoint("rest/v1/warranties")?;
        let mut body = serde_json::to_value(warranty)
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        body["user_id"] = json!(session.user_id());

        let response = self
            .authorized(self.client.post(url), session)
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let mut rows: Vec<WarrantyRecord> = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        rows.pop()
            .ok_or_else(|| BackendError::Decode("insert returned no rows".to_string()))
    }
}

#[async_trait]
impl UsageBackend for RestClient {
    async fn fetch_usage(&self, session: &Session) -> Result<UsageSnapshot, BackendError> {
        let mut url = self.endpoint("rest/v1/user_usage")?;
        url.query_pairs_mut()
            .append_pair("user_id", &format!("eq.{}", session.user_id()))
            .append_pair("select", "*");

        let response = self
            .authorized(self.client.get(url), session)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body = response.text().await?;
        decode_usage_rows(&body, session.user_id())
    }

    async fn increment_usage(
        &self,
        session: &Session,
        counter: UsageCounter,
    ) -> Result<(), BackendError> {
        self.call_rpc(session, counter.rpc_name(), json!({ "p_user_id": session.user_id() }))
            .await?;
        Ok(())
    }

    async fn verify_action(
        &self,
        session: &Session,
        action: GatedAction,
    ) -> Result<serde_json::Value, BackendError> {
        let response = self
            .call_rpc(
                session,
                "check_usage_limit",
                json!({ "p_user_id": session.user_id(), "p_action": action.as_ref() }),
            )
            .await?;

        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}
