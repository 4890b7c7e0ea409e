//! Long-term hourly consumption statistics
//!
//! Maintains a monotone hourly energy series per account, independent of the
//! cost model: interval readings are bucketed into hour-aligned groups in the
//! provider's local timezone, converted to UTC, and appended with a running
//! cumulative sum. On first run a fixed backfill window is loaded; afterwards
//! only the gap since the last persisted point is fetched. Every failure on
//! this path is logged and swallowed so the primary refresh never depends on
//! statistics being writable.

use crate::error::Result;
use crate::logging::get_logger;
use crate::provider::client::ProviderApi;
use crate::provider::types::IntervalReading;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One persisted point of the hourly series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticPoint {
    /// Hour-aligned UTC start of the bucket
    pub start: DateTime<Utc>,
    /// Consumption within the hour, in kWh
    pub state: f64,
    /// Cumulative consumption since series inception, non-decreasing
    pub sum: f64,
}

/// Series metadata written alongside the points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsMetadata {
    pub statistic_id: String,
    pub name: String,
    pub unit_of_measurement: String,
    pub has_sum: bool,
}

/// External statistics store, transactional per series id.
///
/// The reconciler only assumes "last write wins per series id": it re-derives
/// the last covered date from `last_point` on every run rather than trusting
/// local memory.
pub trait StatisticsStore: Send {
    /// Most recent point of the series, if any
    fn last_point(&self, series_id: &str) -> Result<Option<StatisticPoint>>;

    /// Append a batch of points, upserting by hour start
    fn append(
        &mut self,
        series_id: &str,
        metadata: &StatisticsMetadata,
        points: &[StatisticPoint],
    ) -> Result<()>;
}

impl StatisticsStore for Box<dyn StatisticsStore> {
    fn last_point(&self, series_id: &str) -> Result<Option<StatisticPoint>> {
        (**self).last_point(series_id)
    }

    fn append(
        &mut self,
        series_id: &str,
        metadata: &StatisticsMetadata,
        points: &[StatisticPoint],
    ) -> Result<()> {
        (**self).append(series_id, metadata, points)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SeriesRecord {
    metadata: StatisticsMetadata,
    points: Vec<StatisticPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    series: HashMap<String, SeriesRecord>,
}

/// Statistics store backed by a JSON file
pub struct JsonStatisticsStore {
    file_path: String,
    data: StoreFile,
    logger: crate::logging::StructuredLogger,
}

impl JsonStatisticsStore {
    /// Create a new store bound to `file_path`
    pub fn new(file_path: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            data: StoreFile::default(),
            logger: get_logger("statistics_store"),
        }
    }

    /// Load the store contents from disk
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);
        if !path.exists() {
            self.logger
                .info("No statistics file found, starting with an empty store");
            return Ok(());
        }
        let contents = std::fs::read_to_string(path)?;
        self.data = serde_json::from_str(&contents)?;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(&self.file_path, contents)?;
        Ok(())
    }
}

impl StatisticsStore for JsonStatisticsStore {
    fn last_point(&self, series_id: &str) -> Result<Option<StatisticPoint>> {
        Ok(self
            .data
            .series
            .get(series_id)
            .and_then(|s| s.points.last())
            .cloned())
    }

    fn append(
        &mut self,
        series_id: &str,
        metadata: &StatisticsMetadata,
        points: &[StatisticPoint],
    ) -> Result<()> {
        let record = self
            .data
            .series
            .entry(series_id.to_string())
            .or_insert_with(|| SeriesRecord {
                metadata: metadata.clone(),
                points: Vec::new(),
            });
        record.metadata = metadata.clone();

        for point in points {
            match record.points.binary_search_by_key(&point.start, |p| p.start) {
                Ok(idx) => record.points[idx] = point.clone(),
                Err(idx) => record.points.insert(idx, point.clone()),
            }
        }

        self.save()
    }
}

/// Truncate a local timestamp to its hour start
fn hour_start(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Group readings into hour buckets, summing consumption per truncated hour
fn bucket_hourly(intervals: &[IntervalReading]) -> BTreeMap<NaiveDateTime, f64> {
    let mut buckets: BTreeMap<NaiveDateTime, f64> = BTreeMap::new();
    for interval in intervals {
        *buckets.entry(hour_start(interval.timestamp)).or_insert(0.0) += interval.consumption;
    }
    buckets
}

/// Interpret a provider-local timestamp in `tz` and convert it to UTC.
///
/// Ambiguous local times (DST fold) take the earliest interpretation; local
/// times skipped by a forward transition resolve one hour later, into the
/// new offset, so converted instants stay ordered with their neighbors.
fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            let shifted = naive + chrono::Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

/// Build the ordered point batch for a set of hour buckets, continuing the
/// cumulative sum from `starting_sum`
fn build_points(
    buckets: &BTreeMap<NaiveDateTime, f64>,
    starting_sum: f64,
    tz: Tz,
) -> Vec<StatisticPoint> {
    let mut points = Vec::with_capacity(buckets.len());
    let mut sum = starting_sum;
    for (&hour, &consumption) in buckets {
        sum += consumption;
        points.push(StatisticPoint {
            start: local_to_utc(hour, tz),
            state: consumption,
            sum,
        });
    }
    points
}

/// Reconciles newly fetched interval data into the persisted hourly series
pub struct StatisticsReconciler<S: StatisticsStore> {
    store: S,
    tz: Tz,
    backfill_days: u32,
    logger: crate::logging::StructuredLogger,
}

impl<S: StatisticsStore> StatisticsReconciler<S> {
    /// Create a reconciler over `store`
    pub fn new(store: S, tz: Tz, backfill_days: u32) -> Self {
        Self {
            store,
            tz,
            backfill_days,
            logger: get_logger("statistics"),
        }
    }

    /// Series identifier for an account's consumption series
    pub fn series_id(account: &str) -> String {
        format!("gridpulse:{}_energy_consumption", account)
    }

    fn metadata(account: &str) -> StatisticsMetadata {
        StatisticsMetadata {
            statistic_id: Self::series_id(account),
            name: format!("Energy consumption {}", account),
            unit_of_measurement: "kWh".to_string(),
            has_sum: true,
        }
    }

    /// Bring the series up to `data_date` (the newest complete day).
    ///
    /// Best-effort: any failure is logged and swallowed so the caller's
    /// refresh cycle is unaffected.
    pub async fn reconcile(
        &mut self,
        api: &mut dyn ProviderApi,
        account: &str,
        meter: &str,
        data_date: NaiveDate,
    ) {
        if let Err(e) = self.try_reconcile(api, account, meter, data_date).await {
            self.logger
                .warn(&format!("Statistics reconciliation failed: {}", e));
        }
    }

    async fn try_reconcile(
        &mut self,
        api: &mut dyn ProviderApi,
        account: &str,
        meter: &str,
        data_date: NaiveDate,
    ) -> Result<()> {
        let series_id = Self::series_id(account);
        match self.store.last_point(&series_id)? {
            None => self.backfill(api, account, meter, data_date).await,
            Some(last) => self.update(api, account, meter, data_date, last).await,
        }
    }

    async fn backfill(
        &mut self,
        api: &mut dyn ProviderApi,
        account: &str,
        meter: &str,
        end_date: NaiveDate,
    ) -> Result<()> {
        let start_date = end_date
            .checked_sub_days(Days::new(u64::from(self.backfill_days.saturating_sub(1))))
            .unwrap_or(end_date);
        self.logger.info(&format!(
            "First statistics run for {} - backfilling {} through {}",
            account, start_date, end_date
        ));

        let intervals = api
            .interval_usage(account, meter, start_date, end_date)
            .await?;
        if intervals.is_empty() {
            self.logger.warn("No interval data available for backfill");
            return Ok(());
        }

        let buckets = bucket_hourly(&intervals);
        let points = build_points(&buckets, 0.0, self.tz);
        self.logger.debug(&format!(
            "Backfill produced {} hourly points",
            points.len()
        ));
        self.store
            .append(&Self::series_id(account), &Self::metadata(account), &points)
    }

    async fn update(
        &mut self,
        api: &mut dyn ProviderApi,
        account: &str,
        meter: &str,
        data_date: NaiveDate,
        last: StatisticPoint,
    ) -> Result<()> {
        // Points are stored in UTC; compare dates in provider-local time
        let last_covered_date = last.start.with_timezone(&self.tz).date_naive();
        if last_covered_date >= data_date {
            self.logger.debug(&format!(
                "Statistics already cover {} (newest data date {})",
                last_covered_date, data_date
            ));
            return Ok(());
        }

        let start_date = last_covered_date
            .succ_opt()
            .unwrap_or(data_date);
        self.logger.info(&format!(
            "Fetching statistics gap {} through {} (sum={:.3})",
            start_date, data_date, last.sum
        ));

        let intervals = api
            .interval_usage(account, meter, start_date, data_date)
            .await?;
        if intervals.is_empty() {
            self.logger.debug("No new interval data for statistics");
            return Ok(());
        }

        let buckets = bucket_hourly(&intervals);
        let points = build_points(&buckets, last.sum, self.tz);
        self.logger.info(&format!(
            "Appending {} hourly points for {} (sum={:.3})",
            points.len(),
            account,
            points.last().map(|p| p.sum).unwrap_or(last.sum)
        ));
        self.store
            .append(&Self::series_id(account), &Self::metadata(account), &points)
    }
}
