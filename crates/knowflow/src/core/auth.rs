//! Per-principal OAuth token cache with lead-time refresh.
//!
//! One slot per `(connector instance, principal)` pair. A token is refreshed
//! through its token endpoint once `now + refresh_lead` crosses the recorded
//! expiry; the slot mutex guarantees a single refresh in flight while
//! concurrent callers await it. A terminal `invalid_grant` marks the
//! principal inactive so further sync attempts fail fast with an auth error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::error::{Error, Result};
use crate::core::retry::{with_retry, RetryPolicy};
use crate::core::time::epoch_ms;

/// Default refresh lead: tokens are renewed 20 minutes before expiry.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(20 * 60);

/// Credentials and current token for one principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Absolute expiry, epoch milliseconds.
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug)]
struct PrincipalSlot {
    token: Option<OAuthToken>,
    active: bool,
}

/// Process-wide token cache.
pub struct TokenManager {
    http: reqwest::Client,
    refresh_lead: ChronoDuration,
    retry_policy: RetryPolicy,
    slots: DashMap<(String, String), Arc<Mutex<PrincipalSlot>>>,
}

impl Default for TokenManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            refresh_lead: ChronoDuration::milliseconds(DEFAULT_REFRESH_LEAD.as_millis() as i64),
            retry_policy: RetryPolicy::exponential(3),
            slots: DashMap::new(),
        }
    }

    /// Override the refresh lead. Mostly for tests.
    #[must_use]
    pub fn with_refresh_lead(mut self, lead: Duration) -> Self {
        self.refresh_lead = ChronoDuration::milliseconds(lead.as_millis() as i64);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Seed (or replace) the token for a principal.
    pub fn insert_token(&self, instance: &str, principal: &str, token: OAuthToken) {
        self.slots.insert(
            (instance.to_string(), principal.to_string()),
            Arc::new(Mutex::new(PrincipalSlot {
                token: Some(token),
                active: true,
            })),
        );
    }

    /// Drop the principal's credentials entirely.
    pub fn revoke(&self, instance: &str, principal: &str) {
        self.slots
            .remove(&(instance.to_string(), principal.to_string()));
    }

    fn slot(&self, instance: &str, principal: &str) -> Result<Arc<Mutex<PrincipalSlot>>> {
        self.slots
            .get(&(instance.to_string(), principal.to_string()))
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::auth(format!("no credentials for {instance}/{principal}")))
    }

    /// The current access token, refreshing it when inside the lead window.
    pub async fn get_token(&self, instance: &str, principal: &str) -> Result<String> {
        let slot = self.slot(instance, principal)?;
        let mut guard = slot.lock().await;

        if !guard.active {
            return Err(Error::auth(format!(
                "principal {principal} is inactive on {instance}"
            )));
        }
        let token = guard
            .token
            .as_ref()
            .ok_or_else(|| Error::auth(format!("no token cached for {instance}/{principal}")))?
            .clone();

        if epoch_ms() + self.refresh_lead.num_milliseconds() < token.expires_at {
            return Ok(token.access_token);
        }

        match self.refresh(&token).await {
            Ok(refreshed) => {
                info!(instance, principal, "refreshed access token");
                let access = refreshed.access_token.clone();
                guard.token = Some(refreshed);
                Ok(access)
            }
            Err(Error::Auth(msg)) => {
                warn!(instance, principal, error = %msg, "terminal refresh failure; deactivating principal");
                guard.active = false;
                Err(Error::Auth(msg))
            }
            Err(other) => Err(other),
        }
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::auth("token expired and no refresh token is available"))?;

        let mut form = HashMap::new();
        form.insert("grant_type", "refresh_token");
        form.insert("refresh_token", refresh_token);
        form.insert("client_id", token.client_id.as_str());
        form.insert("client_secret", token.client_secret.as_str());

        let endpoint = token.token_endpoint.clone();
        let response = with_retry(&self.retry_policy, || {
            let form = form.clone();
            let endpoint = endpoint.clone();
            async move {
                let resp = self
                    .http
                    .post(&endpoint)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| Error::transient(format!("token refresh request failed: {e}")))?;

                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .map_err(|e| Error::transient(format!("token refresh body unreadable: {e}")))?;

                if status.is_success() {
                    serde_json::from_str::<RefreshResponse>(&body)
                        .map_err(|e| Error::serialization(format!("bad token response: {e}")))
                } else if status.as_u16() == 400 && body.contains("invalid_grant") {
                    Err(Error::auth("refresh rejected: invalid_grant"))
                } else if status.is_server_error() || status.as_u16() == 429 {
                    Err(Error::transient(format!("token endpoint returned {status}")))
                } else {
                    Err(Error::auth(format!(
                        "token endpoint returned {status}: {body}"
                    )))
                }
            }
        })
        .await?;

        let expires_at = epoch_ms() + response.expires_in.unwrap_or(3600) * 1000;
        Ok(OAuthToken {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| token.refresh_token.clone()),
            client_id: token.client_id.clone(),
            client_secret: token.client_secret.clone(),
            token_endpoint: token.token_endpoint.clone(),
            scopes: token.scopes.clone(),
            expires_at,
        })
    }
}
