//! Single entry point for every authenticated call to the backend.
//!
//! One parameterized `request` covers all verbs; `get_json` / `post_json`
//! are thin wrappers over it. Per call the gateway:
//!   1. reads the bearer token (fails fast with `Unauthenticated` if absent)
//!   2. dispatches with a per-call timeout, racing the caller's cancel token
//!   3. classifies the outcome (401 clears credentials → `SessionExpired`,
//!      5xx/transport → `Transient`, other 4xx → `Permanent`)
//!   4. retries transient failures within the configured budget

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use athenyx_common::{ApiError, TokenStore};

use crate::retry::{retry_transient, RetryPolicy};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Gateway tuning. Status polls use `timeout`; submission and other
/// long-running analysis calls use `extended_timeout`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub extended_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(15),
            extended_timeout: Duration::from_secs(180),
            retry: RetryPolicy::default(),
        }
    }
}

/// Authenticated HTTP gateway. Cheap to clone; clones share the
/// connection pool and the token store.
#[derive(Clone)]
pub struct RequestGateway {
    cfg: GatewayConfig,
    tokens: TokenStore,
    client: reqwest::Client,
}

impl RequestGateway {
    pub fn new(cfg: GatewayConfig, tokens: TokenStore) -> Self {
        Self {
            cfg,
            tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// GET with the short (poll) timeout.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, self.cfg.timeout, cancel)
            .await
    }

    /// POST with the short timeout.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body), self.cfg.timeout, cancel)
            .await
    }

    /// POST with the extended timeout, for calls the backend may chew on
    /// for minutes (analysis submission, bulk operations).
    pub async fn post_json_extended<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body), self.cfg.extended_timeout, cancel)
            .await
    }

    /// The one parameterized call everything routes through.
    #[instrument(skip(self, body, cancel), fields(method = %method))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        let url = format!(
            "{}/{}",
            self.cfg.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        retry_transient(&self.cfg.retry, cancel, |attempt| {
            debug!(url = %url, attempt = attempt.number, "Dispatching request");
            self.dispatch(method.clone(), &url, body, timeout, cancel)
        })
        .await
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        // Read the token per call, never cache: a refresh elsewhere in the
        // process must apply to the very next request.
        let bearer = self.tokens.bearer().ok_or(ApiError::Unauthenticated)?;

        let mut req = self
            .client
            .request(method, url)
            .bearer_auth(bearer)
            .timeout(timeout);
        if let Some(json) = body {
            req = req.json(json);
        }

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            sent = req.send() => sent.map_err(ApiError::from)?,
        };

        let status = resp.status();
        if status.as_u16() == 401 {
            warn!(url = %url, "Backend rejected the session token, clearing credentials");
            self.tokens.clear();
            return Err(ApiError::SessionExpired);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status.as_u16(), message));
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::Cancelled),
            decoded = resp.json::<T>() => decoded.map_err(ApiError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_policy() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.retry.budget, 1);
        assert_eq!(cfg.retry.backoff, Duration::from_secs(1));
        assert!(cfg.extended_timeout > cfg.timeout);
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_dispatch() {
        // Port 9 is discard; if the gateway tried the network this would
        // hang or error differently. Unauthenticated must win first.
        let gateway = RequestGateway::new(
            GatewayConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                ..GatewayConfig::default()
            },
            TokenStore::new(),
        );
        let cancel = CancellationToken::new();

        let out: Result<serde_json::Value, ApiError> =
            gateway.get_json("/jobs/abc", &cancel).await;
        assert!(matches!(out, Err(ApiError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_short_circuits() {
        let gateway = RequestGateway::new(
            GatewayConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                ..GatewayConfig::default()
            },
            TokenStore::with_token("tok"),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out: Result<serde_json::Value, ApiError> =
            gateway.get_json("/jobs/abc", &cancel).await;
        assert!(matches!(out, Err(ApiError::Cancelled)));
    }

    #[test]
    fn test_url_joining_tolerates_slashes() {
        // request() trims both sides; spot-check the format it builds.
        let base = "http://localhost:8000/".trim_end_matches('/');
        let path = "/analyze".trim_start_matches('/');
        assert_eq!(format!("{base}/{path}"), "http://localhost:8000/analyze");
    }
}
