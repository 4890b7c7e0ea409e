//! HTTP client for the provider's customer API
//!
//! Wraps the provider's REST endpoints for interval usage, bill forecasts
//! and token refresh. Auth failures, transport failures and other upstream
//! errors are mapped to distinct error variants so the coordinator can react
//! to each class differently.

use crate::error::{GridpulseError, Result};
use crate::logging::get_logger;
use crate::provider::types::{
    BillForecast, IntervalReading, SessionTokens, parse_bill_forecast, parse_interval_payload,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

/// Safety margin before the recorded access-token expiry triggers a refresh
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

/// Interface to the provider API consumed by the coordinator.
///
/// Implementations must surface rotated tokens through `take_rotated_tokens`
/// so the caller can persist them before the next operation proceeds.
#[async_trait]
pub trait ProviderApi: Send {
    /// Fetch interval readings for `start..=end` (provider-local dates)
    async fn interval_usage(
        &mut self,
        account: &str,
        meter: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IntervalReading>>;

    /// Fetch the billing snapshot for the account
    async fn bill_forecast(&mut self, account: &str) -> Result<BillForecast>;

    /// Exchange the refresh token for a new token pair
    async fn refresh_tokens(&mut self) -> Result<SessionTokens>;

    /// Drain the token pair rotated since the last call, if any
    fn take_rotated_tokens(&mut self) -> Option<SessionTokens>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    /// Access-token lifetime in seconds
    expires_in: Option<i64>,
}

/// Production `ProviderApi` over reqwest
pub struct UsageClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    refresh_token: String,
    access_expires_at: Option<DateTime<Utc>>,
    rotated: Option<SessionTokens>,
    logger: crate::logging::StructuredLogger,
}

impl UsageClient {
    /// Create a client from stored tokens
    pub fn new(base_url: &str, tokens: SessionTokens, timeout_seconds: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_expires_at: None,
            rotated: None,
            logger: get_logger("provider"),
        })
    }

    fn classify_status(status: StatusCode, body: &str) -> GridpulseError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            GridpulseError::token_expired(format!("provider rejected token ({})", status))
        } else {
            GridpulseError::api(format!("provider returned {}: {}", status, body))
        }
    }

    /// Refresh the access token when the recorded expiry is near
    async fn ensure_fresh_token(&mut self) -> Result<()> {
        if let Some(expires_at) = self.access_expires_at
            && Utc::now() + Duration::seconds(TOKEN_REFRESH_MARGIN_SECONDS) >= expires_at
        {
            self.logger.debug("Access token near expiry, refreshing");
            self.refresh_tokens().await?;
        }
        Ok(())
    }

    /// GET an authorized endpoint, retrying once through a token refresh on 401
    async fn authorized_get(&mut self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        self.ensure_fresh_token().await?;

        for attempt in 0..2 {
            let url = format!("{}{}", self.base_url, path);
            let resp = self
                .http
                .get(&url)
                .query(query)
                .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
                .header(ACCEPT, "application/json")
                .header(USER_AGENT, concat!("gridpulse/", env!("CARGO_PKG_VERSION")))
                .send()
                .await?;

            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED && attempt == 0 {
                self.logger
                    .debug("Got 401, attempting token refresh before retry");
                self.refresh_tokens().await?;
                continue;
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Self::classify_status(status, &body));
            }
            return Ok(resp.bytes().await?.to_vec());
        }

        // Second pass always returns above; kept for the type checker
        Err(GridpulseError::token_expired("token refresh did not stick"))
    }
}

#[async_trait]
impl ProviderApi for UsageClient {
    async fn interval_usage(
        &mut self,
        account: &str,
        meter: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IntervalReading>> {
        let path = format!("/accounts/{}/meters/{}/interval-usage", account, meter);
        let query = [
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
        ];
        let body = self.authorized_get(&path, &query).await?;
        parse_interval_payload(&body)
    }

    async fn bill_forecast(&mut self, account: &str) -> Result<BillForecast> {
        let path = format!("/accounts/{}/bill-forecast", account);
        let body = self.authorized_get(&path, &[]).await?;
        parse_bill_forecast(&body)
    }

    async fn refresh_tokens(&mut self) -> Result<SessionTokens> {
        let url = format!("{}/oauth/token", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("gridpulse/", env!("CARGO_PKG_VERSION")))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(GridpulseError::token_expired(format!(
                "refresh token rejected ({}): {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GridpulseError::api(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token_resp: TokenResponse = resp.json().await?;
        self.access_token = token_resp.access_token.clone();
        self.refresh_token = token_resp.refresh_token.clone();
        self.access_expires_at = token_resp
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs));

        let tokens = SessionTokens {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
        };
        self.rotated = Some(tokens.clone());
        self.logger.info("Provider tokens rotated");
        Ok(tokens)
    }

    fn take_rotated_tokens(&mut self) -> Option<SessionTokens> {
        self.rotated.take()
    }
}
