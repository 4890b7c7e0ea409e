use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use gridpulse::config::{Config, CostMode};
use gridpulse::coordinator::{Coordinator, CoordinatorState, ProviderConnector};
use gridpulse::credentials::CredentialStore;
use gridpulse::error::{GridpulseError, Result};
use gridpulse::provider::auth::AuthenticatedSession;
use gridpulse::provider::client::ProviderApi;
use gridpulse::provider::types::{BillForecast, CookieMap, IntervalReading, SessionTokens};
use gridpulse::statistics::{StatisticPoint, StatisticsMetadata, StatisticsStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn ts(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, 0, 0).unwrap()
}

fn reading(t: NaiveDateTime, kwh: f64) -> IntervalReading {
    IntervalReading {
        timestamp: t,
        consumption: kwh,
    }
}

fn tokens(tag: &str) -> SessionTokens {
    SessionTokens {
        access_token: format!("access-{}", tag),
        refresh_token: format!("refresh-{}", tag),
    }
}

/// Behavior shared between a fake API instance and the test
#[derive(Clone, Default)]
struct Script {
    intervals: Vec<IntervalReading>,
    forecast: Option<BillForecast>,
    fail_auth: bool,
    fail_network: bool,
    rotated: Option<SessionTokens>,
    requests: Vec<(NaiveDate, NaiveDate)>,
}

struct FakeApi {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl ProviderApi for FakeApi {
    async fn interval_usage(
        &mut self,
        _account: &str,
        _meter: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IntervalReading>> {
        let mut script = self.script.lock().unwrap();
        script.requests.push((start, end));
        if script.fail_auth {
            return Err(GridpulseError::token_expired("session invalidated"));
        }
        if script.fail_network {
            return Err(GridpulseError::network("connection reset"));
        }
        Ok(script
            .intervals
            .iter()
            .filter(|r| {
                let day = r.timestamp.date();
                day >= start && day <= end
            })
            .cloned()
            .collect())
    }

    async fn bill_forecast(&mut self, _account: &str) -> Result<BillForecast> {
        let script = self.script.lock().unwrap();
        if script.fail_auth {
            return Err(GridpulseError::token_expired("session invalidated"));
        }
        script
            .forecast
            .clone()
            .ok_or_else(|| GridpulseError::api("forecast unavailable"))
    }

    async fn refresh_tokens(&mut self) -> Result<SessionTokens> {
        Err(GridpulseError::token_expired("refresh token rejected"))
    }

    fn take_rotated_tokens(&mut self) -> Option<SessionTokens> {
        self.script.lock().unwrap().rotated.take()
    }
}

/// Connector whose `connect` serves a replacement script after re-login
struct FakeConnector {
    script_after_reauth: Arc<Mutex<Script>>,
    reauth_count: Arc<AtomicUsize>,
    fail_reauth: bool,
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    fn connect(&self, _tokens: SessionTokens) -> Result<Box<dyn ProviderApi>> {
        Ok(Box::new(FakeApi {
            script: self.script_after_reauth.clone(),
        }))
    }

    async fn reauthenticate(
        &self,
        _username: &str,
        _password: &str,
        _cookies: Option<&CookieMap>,
    ) -> Result<AuthenticatedSession> {
        if self.fail_reauth {
            return Err(GridpulseError::auth("portal rejected credentials"));
        }
        self.reauth_count.fetch_add(1, Ordering::SeqCst);
        Ok(AuthenticatedSession {
            tokens: tokens("relogin"),
            cookies: CookieMap::new(),
        })
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<StatisticPoint>>>>,
}

impl MemoryStore {
    fn point_count(&self) -> usize {
        self.inner.lock().unwrap().values().map(Vec::len).sum()
    }
}

impl StatisticsStore for MemoryStore {
    fn last_point(&self, series_id: &str) -> Result<Option<StatisticPoint>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .get(series_id)
            .and_then(|points| points.last().cloned()))
    }

    fn append(
        &mut self,
        series_id: &str,
        _metadata: &StatisticsMetadata,
        points: &[StatisticPoint],
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let series = inner.entry(series_id.to_string()).or_default();
        for point in points {
            match series.binary_search_by_key(&point.start, |p| p.start) {
                Ok(idx) => series[idx] = point.clone(),
                Err(idx) => series.insert(idx, point.clone()),
            }
        }
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.provider.account_number = "12345".to_string();
    config.provider.meter_number = "M1".to_string();
    config.timezone = "UTC".to_string();
    config.pricing.cost_mode = CostMode::Fixed;
    config.pricing.fixed_rate = 0.10;
    config
}

struct Harness {
    coordinator: Coordinator,
    initial_script: Arc<Mutex<Script>>,
    reauth_script: Arc<Mutex<Script>>,
    reauth_count: Arc<AtomicUsize>,
    store: MemoryStore,
    credentials_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn harness(initial: Script, after_reauth: Script, fail_reauth: bool, with_login: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let credentials_path = dir.path().join("credentials.json");
    let mut credentials = CredentialStore::new(credentials_path.to_str().unwrap());
    if with_login {
        credentials.set_login("user", "hunter2").unwrap();
    }

    let initial_script = Arc::new(Mutex::new(initial));
    let reauth_script = Arc::new(Mutex::new(after_reauth));
    let reauth_count = Arc::new(AtomicUsize::new(0));
    let store = MemoryStore::default();

    let connector = FakeConnector {
        script_after_reauth: reauth_script.clone(),
        reauth_count: reauth_count.clone(),
        fail_reauth,
    };
    let api = Box::new(FakeApi {
        script: initial_script.clone(),
    });

    let coordinator = Coordinator::new(
        test_config(),
        Box::new(connector),
        api,
        credentials,
        Box::new(store.clone()),
    )
    .unwrap();

    Harness {
        coordinator,
        initial_script,
        reauth_script,
        reauth_count,
        store,
        credentials_path,
        _dir: dir,
    }
}

fn march_script() -> Script {
    Script {
        intervals: vec![
            reading(ts(2024, 3, 1, 8), 5.0),
            reading(ts(2024, 3, 4, 7), 1.0),
            reading(ts(2024, 3, 4, 8), 2.0),
        ],
        forecast: Some(BillForecast {
            last_bill_charges: 120.0,
            last_bill_usage_kwh: 800.0,
            current_usage_kwh: 95.0,
            current_period_start: date(2024, 2, 20),
            current_period_end: date(2024, 3, 20),
            is_tou: false,
        }),
        ..Script::default()
    }
}

#[tokio::test]
async fn successful_refresh_publishes_usage_and_costs() {
    let mut h = harness(march_script(), Script::default(), false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;

    assert_eq!(h.coordinator.state(), CoordinatorState::Ready);
    let data_rx = h.coordinator.data_watch();
    let data = data_rx.borrow().clone().unwrap();
    assert_eq!(data.data_date, date(2024, 3, 4));
    assert_eq!(data.month_start_date, date(2024, 3, 1));
    assert_eq!(data.month_end_date, date(2024, 3, 4));
    assert!((data.daily_total - 3.0).abs() < 1e-9);
    assert!((data.monthly_total - 8.0).abs() < 1e-9);
    assert!((data.daily_cost - 0.30).abs() < 1e-9);
    assert!((data.monthly_cost - 0.80).abs() < 1e-9);
    assert!(data.bill_forecast.is_some());
    assert_eq!(data.latest_usage(), Some(2.0));

    // Statistics were reconciled as part of the cycle
    assert!(h.store.point_count() > 0);
}

#[tokio::test]
async fn first_of_month_covers_previous_month() {
    let mut script = march_script();
    script
        .intervals
        .push(reading(ts(2024, 2, 15, 9), 4.0));
    script.intervals.push(reading(ts(2024, 2, 29, 9), 6.0));
    let mut h = harness(script, Script::default(), false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 1)).await;

    let data = h.coordinator.data_watch().borrow().clone().unwrap();
    assert_eq!(data.data_date, date(2024, 2, 29));
    assert_eq!(data.month_start_date, date(2024, 2, 1));
    assert!((data.daily_total - 6.0).abs() < 1e-9);
    assert!((data.monthly_total - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn second_of_month_reuses_daily_fetch_for_the_month() {
    let mut h = harness(march_script(), Script::default(), false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 2)).await;

    let data = h.coordinator.data_watch().borrow().clone().unwrap();
    assert_eq!(data.data_date, date(2024, 3, 1));
    assert_eq!(data.month_start_date, date(2024, 3, 1));
    assert!((data.daily_total - 5.0).abs() < 1e-9);
    assert!((data.monthly_total - data.daily_total).abs() < 1e-9);
}

#[tokio::test]
async fn transient_failure_keeps_last_published_data() {
    let mut h = harness(march_script(), Script::default(), false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;
    let first = h.coordinator.data_watch().borrow().clone().unwrap();

    h.initial_script.lock().unwrap().fail_network = true;
    h.coordinator.refresh_for_date(date(2024, 3, 6)).await;

    assert_eq!(h.coordinator.state(), CoordinatorState::Ready);
    let current = h.coordinator.data_watch().borrow().clone().unwrap();
    assert_eq!(current, first);
    assert_eq!(h.reauth_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn auth_failure_triggers_relogin_and_retry() {
    let mut broken = march_script();
    broken.fail_auth = true;
    let mut h = harness(broken, march_script(), false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;

    assert_eq!(h.reauth_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.state(), CoordinatorState::Ready);
    let data = h.coordinator.data_watch().borrow().clone().unwrap();
    assert!((data.daily_total - 3.0).abs() < 1e-9);
    // Retry went through the replacement session
    assert!(!h.reauth_script.lock().unwrap().requests.is_empty());

    // The new session tokens were persisted
    let mut reloaded = CredentialStore::new(h.credentials_path.to_str().unwrap());
    reloaded.load().unwrap();
    assert_eq!(reloaded.tokens(), Some(&tokens("relogin")));
}

#[tokio::test]
async fn transient_failure_after_relogin_stays_ready() {
    let mut broken = march_script();
    broken.fail_auth = true;
    let mut unreachable = march_script();
    unreachable.fail_network = true;
    let mut h = harness(broken, unreachable, false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;

    // Re-login succeeded; the connectivity blip on the retry is transient
    assert_eq!(h.reauth_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.state(), CoordinatorState::Ready);
    assert!(h.coordinator.data_watch().borrow().is_none());
}

#[tokio::test]
async fn auth_failure_after_relogin_halts() {
    let mut broken = march_script();
    broken.fail_auth = true;
    let mut h = harness(broken.clone(), broken, false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;

    assert_eq!(h.reauth_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.coordinator.state(), CoordinatorState::AuthFailed);
}

#[tokio::test]
async fn auth_failure_without_credentials_halts() {
    let mut broken = march_script();
    broken.fail_auth = true;
    let mut h = harness(broken, march_script(), false, false);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;

    assert_eq!(h.coordinator.state(), CoordinatorState::AuthFailed);
    assert!(h.coordinator.data_watch().borrow().is_none());
    assert_eq!(h.reauth_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_relogin_halts() {
    let mut broken = march_script();
    broken.fail_auth = true;
    let mut h = harness(broken, march_script(), true, true);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;

    assert_eq!(h.coordinator.state(), CoordinatorState::AuthFailed);
    assert!(h.coordinator.data_watch().borrow().is_none());
}

#[tokio::test]
async fn rotated_tokens_are_persisted_after_a_cycle() {
    let mut script = march_script();
    script.rotated = Some(tokens("rotated"));
    let mut h = harness(script, Script::default(), false, true);

    h.coordinator.refresh_for_date(date(2024, 3, 5)).await;

    let mut reloaded = CredentialStore::new(h.credentials_path.to_str().unwrap());
    reloaded.load().unwrap();
    assert_eq!(reloaded.tokens(), Some(&tokens("rotated")));
}
