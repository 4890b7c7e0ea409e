//! Refresh coordinator
//!
//! Owns the periodic fetch cycle: every tick it pulls yesterday's interval
//! usage, the month-to-date series and the billing snapshot, computes costs,
//! reconciles the long-term statistics and publishes the result over watch
//! channels. Auth failures trigger a single non-interactive re-login with the
//! stored credentials; transient network or upstream errors keep the last
//! published data and wait for the next tick.

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{GridpulseError, Result};
use crate::logging::{LogContext, get_logger_with_context};
use crate::pricing;
use crate::provider::auth::{AuthenticatedSession, Authenticator, LoginOutcome};
use crate::provider::client::{ProviderApi, UsageClient};
use crate::provider::types::{BillForecast, CookieMap, IntervalReading, SessionTokens};
use crate::statistics::{StatisticsReconciler, StatisticsStore};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::{mpsc, watch};

/// Lifecycle state of the coordinator, published over a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No refresh has completed yet
    Uninitialized,
    /// Last refresh succeeded (or failed transiently with data retained)
    Ready,
    /// A refresh cycle is in progress
    Refreshing,
    /// Re-authentication failed; operator intervention required
    AuthFailed,
}

/// One refresh cycle's published result
#[derive(Debug, Clone, PartialEq)]
pub struct UsageData {
    /// Interval readings for the data date (the newest complete day)
    pub intervals: Vec<IntervalReading>,
    /// Total consumption on the data date, kWh
    pub daily_total: f64,
    /// Month-to-date consumption through the data date, kWh
    pub monthly_total: f64,
    /// Estimated cost of the data date's consumption
    pub daily_cost: f64,
    /// Estimated month-to-date cost
    pub monthly_cost: f64,
    /// Billing snapshot, absent when the forecast endpoint failed
    pub bill_forecast: Option<BillForecast>,
    /// The complete day this data covers (yesterday, provider-local)
    pub data_date: NaiveDate,
    /// First day of the billing month the data date falls in
    pub month_start_date: NaiveDate,
    /// Last covered day of the month window (same as `data_date`)
    pub month_end_date: NaiveDate,
}

impl UsageData {
    /// The most recent interval reading, if any
    pub fn latest_interval(&self) -> Option<&IntervalReading> {
        self.intervals.last()
    }

    /// Consumption of the most recent interval, kWh
    pub fn latest_usage(&self) -> Option<f64> {
        self.latest_interval().map(|i| i.consumption)
    }
}

/// Factory for provider sessions, injected so tests can fake the network.
#[async_trait]
pub trait ProviderConnector: Send {
    /// Build an API client from a stored token pair
    fn connect(&self, tokens: SessionTokens) -> Result<Box<dyn ProviderApi>>;

    /// Log in again with stored credentials, without user interaction.
    ///
    /// A login that demands interactive verification is a failure here.
    async fn reauthenticate(
        &self,
        username: &str,
        password: &str,
        cookies: Option<&CookieMap>,
    ) -> Result<AuthenticatedSession>;
}

/// Production connector over the HTTP client and login flow
pub struct HttpConnector {
    base_url: String,
    timeout_seconds: u64,
}

impl HttpConnector {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Self {
        Self {
            base_url: base_url.to_string(),
            timeout_seconds,
        }
    }
}

#[async_trait]
impl ProviderConnector for HttpConnector {
    fn connect(&self, tokens: SessionTokens) -> Result<Box<dyn ProviderApi>> {
        Ok(Box::new(UsageClient::new(
            &self.base_url,
            tokens,
            self.timeout_seconds,
        )?))
    }

    async fn reauthenticate(
        &self,
        username: &str,
        password: &str,
        cookies: Option<&CookieMap>,
    ) -> Result<AuthenticatedSession> {
        let mut auth = Authenticator::new(&self.base_url, self.timeout_seconds)?;
        if let Some(cookies) = cookies {
            auth.import_cookies(cookies);
        }
        match auth.submit_credentials(username, password).await? {
            LoginOutcome::Complete(session) => Ok(session),
            LoginOutcome::TwoFactor(_) => Err(GridpulseError::auth(
                "provider demanded interactive verification during automatic re-login",
            )),
        }
    }
}

/// Billing-month window for `today`: starts on the first of the month the
/// newest complete day falls in, ends on that day. On the first of a month
/// this pivots back to cover the previous month in full.
fn month_window(today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let yesterday = today
        .pred_opt()
        .ok_or_else(|| GridpulseError::validation("date", "no previous day exists"))?;
    let month_start = yesterday
        .with_day(1)
        .ok_or_else(|| GridpulseError::validation("date", "cannot derive month start"))?;
    Ok((month_start, yesterday))
}

fn total_consumption(intervals: &[IntervalReading]) -> f64 {
    intervals.iter().map(|i| i.consumption).sum()
}

/// Drives the refresh cycle and owns the provider session
pub struct Coordinator {
    config: Config,
    tz: Tz,
    connector: Box<dyn ProviderConnector>,
    api: Box<dyn ProviderApi>,
    credentials: CredentialStore,
    reconciler: StatisticsReconciler<Box<dyn StatisticsStore>>,
    state_tx: watch::Sender<CoordinatorState>,
    data_tx: watch::Sender<Option<UsageData>>,
    logger: crate::logging::StructuredLogger,
}

impl Coordinator {
    pub fn new(
        config: Config,
        connector: Box<dyn ProviderConnector>,
        api: Box<dyn ProviderApi>,
        credentials: CredentialStore,
        store: Box<dyn StatisticsStore>,
    ) -> Result<Self> {
        let tz = config.provider_timezone()?;
        let reconciler = StatisticsReconciler::new(store, tz, config.statistics.backfill_days);
        let (state_tx, _) = watch::channel(CoordinatorState::Uninitialized);
        let (data_tx, _) = watch::channel(None);
        let logger = get_logger_with_context(
            LogContext::new("coordinator")
                .with_account(config.provider.account_number.clone())
                .with_field("meter", config.provider.meter_number.clone()),
        );
        Ok(Self {
            config,
            tz,
            connector,
            api,
            credentials,
            reconciler,
            state_tx,
            data_tx,
            logger,
        })
    }

    /// Subscribe to lifecycle state changes
    pub fn state_watch(&self) -> watch::Receiver<CoordinatorState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to published usage data
    pub fn data_watch(&self) -> watch::Receiver<Option<UsageData>> {
        self.data_tx.subscribe()
    }

    /// Current lifecycle state
    pub fn state(&self) -> CoordinatorState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: CoordinatorState) {
        self.state_tx.send_replace(state);
    }

    /// Persist any token pair the client rotated during recent calls
    fn persist_rotated_tokens(&mut self) {
        if let Some(tokens) = self.api.take_rotated_tokens()
            && let Err(e) = self.credentials.set_tokens(tokens)
        {
            self.logger
                .warn(&format!("Failed to persist rotated tokens: {}", e));
        }
    }

    /// One full fetch cycle for the day `today` falls after
    async fn fetch_cycle(&mut self, today: NaiveDate) -> Result<UsageData> {
        let account = self.config.provider.account_number.clone();
        let meter = self.config.provider.meter_number.clone();
        let (month_start, data_date) = month_window(today)?;

        let intervals = self
            .api
            .interval_usage(&account, &meter, data_date, data_date)
            .await?;
        self.logger.debug(&format!(
            "Fetched {} intervals for {}",
            intervals.len(),
            data_date
        ));

        // On the first covered day of the month the daily fetch already is
        // the whole window
        let monthly_intervals = if month_start < data_date {
            self.api
                .interval_usage(&account, &meter, month_start, data_date)
                .await?
        } else {
            intervals.clone()
        };

        // Billing snapshot is optional; cost falls back to the fixed rate
        let bill_forecast = match self.api.bill_forecast(&account).await {
            Ok(forecast) => Some(forecast),
            Err(e) => {
                self.logger
                    .warn(&format!("Bill forecast unavailable: {}", e));
                None
            }
        };

        let daily_cost =
            pricing::calculate_cost(&intervals, &self.config.pricing, bill_forecast.as_ref());
        let monthly_cost = pricing::calculate_cost(
            &monthly_intervals,
            &self.config.pricing,
            bill_forecast.as_ref(),
        );

        self.reconciler
            .reconcile(self.api.as_mut(), &account, &meter, data_date)
            .await;

        self.persist_rotated_tokens();

        Ok(UsageData {
            daily_total: total_consumption(&intervals),
            monthly_total: total_consumption(&monthly_intervals),
            intervals,
            daily_cost,
            monthly_cost,
            bill_forecast,
            data_date,
            month_start_date: month_start,
            month_end_date: data_date,
        })
    }

    /// Rebuild the provider session from stored login credentials
    async fn reauthenticate(&mut self) -> Result<()> {
        let (username, password) = self
            .credentials
            .login_credentials()
            .map(|(u, p)| (u.to_string(), p.to_string()))
            .ok_or_else(|| {
                GridpulseError::auth("no stored login credentials for re-authentication")
            })?;

        self.logger.info("Re-authenticating with stored credentials");
        let session = self
            .connector
            .reauthenticate(&username, &password, self.credentials.cookies())
            .await?;

        self.credentials
            .set_session(session.tokens.clone(), session.cookies)?;
        self.api = self.connector.connect(session.tokens)?;
        self.logger.info("Re-authentication succeeded");
        Ok(())
    }

    /// Run one refresh for an explicit provider-local date
    pub async fn refresh_for_date(&mut self, today: NaiveDate) {
        self.set_state(CoordinatorState::Refreshing);

        match self.fetch_cycle(today).await {
            Ok(data) => {
                self.logger.info(&format!(
                    "Refresh complete: {:.3} kWh on {} ({:.3} kWh month-to-date)",
                    data.daily_total, data.data_date, data.monthly_total
                ));
                self.data_tx.send_replace(Some(data));
                self.set_state(CoordinatorState::Ready);
            }
            Err(e) if e.is_auth_failure() => {
                self.logger
                    .warn(&format!("Auth failure during refresh: {}", e));
                self.persist_rotated_tokens();
                match self.reauthenticate().await {
                    Ok(()) => match self.fetch_cycle(today).await {
                        Ok(data) => {
                            self.data_tx.send_replace(Some(data));
                            self.set_state(CoordinatorState::Ready);
                        }
                        Err(e) if e.is_auth_failure() => {
                            self.logger
                                .error(&format!("Refresh failed after re-login: {}", e));
                            self.set_state(CoordinatorState::AuthFailed);
                        }
                        Err(e) => {
                            // Re-login worked; this is an ordinary transient
                            // failure and the next tick retries
                            self.logger
                                .warn(&format!("Refresh failed after re-login: {}", e));
                            self.persist_rotated_tokens();
                            self.set_state(CoordinatorState::Ready);
                        }
                    },
                    Err(e) => {
                        self.logger.error(&format!("Re-authentication failed: {}", e));
                        self.set_state(CoordinatorState::AuthFailed);
                    }
                }
            }
            Err(e) => {
                // Transient: keep the last published data and wait for the
                // next tick
                self.logger.warn(&format!("Refresh failed: {}", e));
                self.persist_rotated_tokens();
                self.set_state(CoordinatorState::Ready);
            }
        }
    }

    /// Run one refresh for the provider's current local date
    pub async fn refresh(&mut self) {
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        self.refresh_for_date(today).await;
    }

    /// Main loop: refresh immediately, then on every poll interval until a
    /// shutdown signal arrives
    pub async fn run(&mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        let period =
            std::time::Duration::from_secs(u64::from(self.config.poll_interval_minutes) * 60);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.logger.info(&format!(
            "Starting refresh loop, polling every {} minutes",
            self.config.poll_interval_minutes
        ));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                _ = shutdown_rx.recv() => {
                    self.logger.info("Shutdown requested, stopping refresh loop");
                    break;
                }
            }
        }
    }
}
