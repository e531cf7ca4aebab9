//! Remote client for the signal scanning service.

use crate::error::ApiError;
use crate::models::{
    ApiResponse, ExitReason, FollowSignalRequest, MarketData, OppositeSignalDetection,
    RemoteFollowedSignal, ScanRequest, ScanResponse, Signal, Statistics, UserConfig,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[async_trait::async_trait]
pub trait SignalApi: Send + Sync {
    /// Run a one-off scan. The response is not wrapped in an envelope.
    async fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, ApiError>;

    async fn scan_status(&self) -> Result<ApiResponse<Statistics>, ApiError>;

    async fn recent_signals(&self, hours: u32) -> Result<ApiResponse<Vec<Signal>>, ApiError>;

    async fn market_data(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<ApiResponse<Vec<MarketData>>, ApiError>;

    async fn current_price(&self, symbol: &str) -> Result<ApiResponse<MarketData>, ApiError>;

    async fn user_config(&self) -> Result<ApiResponse<UserConfig>, ApiError>;

    async fn update_user_config(
        &self,
        config: &UserConfig,
    ) -> Result<ApiResponse<UserConfig>, ApiError>;

    async fn statistics(&self) -> Result<ApiResponse<Statistics>, ApiError>;

    async fn health(&self) -> Result<ApiResponse<Value>, ApiError>;

    async fn followed(
        &self,
        active_only: bool,
    ) -> Result<ApiResponse<Vec<RemoteFollowedSignal>>, ApiError>;

    async fn follow(
        &self,
        request: &FollowSignalRequest,
    ) -> Result<ApiResponse<RemoteFollowedSignal>, ApiError>;

    async fn unfollow(
        &self,
        followed_id: i64,
        reason: ExitReason,
        exit_price: Option<f64>,
    ) -> Result<ApiResponse<String>, ApiError>;

    async fn check_opposite(&self) -> Result<ApiResponse<Vec<OppositeSignalDetection>>, ApiError>;
}

/// `reqwest` implementation of [`SignalApi`]
pub struct HttpSignalApi {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpSignalApi {
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: with_trailing_slash(base_url),
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("Invalid endpoint '{}': {}", path, e)))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await.map_err(|e| {
            warn!(path = %path, error = %e, "SignalApi: request failed");
            ApiError::Transport(e.to_string())
        })?;
        decode(path, response).await
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Transport(format!("Failed to read response body: {}", e)))?;

    if !status.is_success() {
        let message = error_message(status, &body);
        warn!(path = %path, status = status.as_u16(), "SignalApi: {} returned {}", path, status);
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    debug!(path = %path, bytes = body.len(), "SignalApi: {} ok", path);
    serde_json::from_str(&body).map_err(|e| ApiError::Payload(format!("{}: {}", path, e)))
}

/// Error responses carry `{"detail": ...}`; fall back to the raw body.
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned())
        .map(|detail| match detail {
            Value::String(s) => s,
            other => other.to_string(),
        });

    match detail {
        Some(detail) => detail,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string(),
        None => body.trim().to_string(),
    }
}

#[async_trait::async_trait]
impl SignalApi for HttpSignalApi {
    async fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, ApiError> {
        let url = self.endpoint("scan/single")?;
        self.send("scan/single", self.client.post(url).json(request))
            .await
    }

    async fn scan_status(&self) -> Result<ApiResponse<Statistics>, ApiError> {
        let url = self.endpoint("scan/status")?;
        self.send("scan/status", self.client.get(url)).await
    }

    async fn recent_signals(&self, hours: u32) -> Result<ApiResponse<Vec<Signal>>, ApiError> {
        let url = self.endpoint("signals/recent")?;
        self.send(
            "signals/recent",
            self.client.get(url).query(&[("hours", hours)]),
        )
        .await
    }

    async fn market_data(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<ApiResponse<Vec<MarketData>>, ApiError> {
        let url = self.endpoint("market/data")?;
        let mut builder = self.client.get(url);
        if let Some(symbols) = symbols.filter(|s| !s.is_empty()) {
            builder = builder.query(&[("symbols", symbols.join(","))]);
        }
        self.send("market/data", builder).await
    }

    async fn current_price(&self, symbol: &str) -> Result<ApiResponse<MarketData>, ApiError> {
        let mut url = self.endpoint("market/price/")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Transport("Base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .push(symbol);
        self.send("market/price", self.client.get(url)).await
    }

    async fn user_config(&self) -> Result<ApiResponse<UserConfig>, ApiError> {
        let url = self.endpoint("config")?;
        self.send("config", self.client.get(url)).await
    }

    async fn update_user_config(
        &self,
        config: &UserConfig,
    ) -> Result<ApiResponse<UserConfig>, ApiError> {
        let url = self.endpoint("config")?;
        self.send("config", self.client.put(url).json(config)).await
    }

    async fn statistics(&self) -> Result<ApiResponse<Statistics>, ApiError> {
        let url = self.endpoint("statistics")?;
        self.send("statistics", self.client.get(url)).await
    }

    async fn health(&self) -> Result<ApiResponse<Value>, ApiError> {
        let url = self.endpoint("health")?;
        self.send("health", self.client.get(url)).await
    }

    async fn followed(
        &self,
        active_only: bool,
    ) -> Result<ApiResponse<Vec<RemoteFollowedSignal>>, ApiError> {
        let url = self.endpoint("signals/followed")?;
        let builder = self
            .authorized(self.client.get(url))
            .query(&[("active_only", active_only)]);
        self.send("signals/followed", builder).await
    }

    async fn follow(
        &self,
        request: &FollowSignalRequest,
    ) -> Result<ApiResponse<RemoteFollowedSignal>, ApiError> {
        let url = self.endpoint("signals/follow")?;
        let builder = self.authorized(self.client.post(url)).json(request);
        self.send("signals/follow", builder).await
    }

    async fn unfollow(
        &self,
        followed_id: i64,
        reason: ExitReason,
        exit_price: Option<f64>,
    ) -> Result<ApiResponse<String>, ApiError> {
        let url = self.endpoint(&format!("signals/followed/{}", followed_id))?;
        let mut builder = self
            .authorized(self.client.delete(url))
            .query(&[("exit_reason", reason.as_str())]);
        if let Some(price) = exit_price {
            builder = builder.query(&[("exit_price", price)]);
        }
        self.send("signals/followed", builder).await
    }

    async fn check_opposite(&self) -> Result<ApiResponse<Vec<OppositeSignalDetection>>, ApiError> {
        let url = self.endpoint("signals/followed/check-opposite")?;
        let builder = self.authorized(self.client.get(url));
        self.send("signals/followed/check-opposite", builder).await
    }
}
