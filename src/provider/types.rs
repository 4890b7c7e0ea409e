//! Data types exchanged with the provider API

use crate::error::{GridpulseError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cookies captured from the provider's login portal, keyed by cookie name.
///
/// Re-imported on later logins to shortcut the two-factor challenge.
pub type CookieMap = HashMap<String, String>;

/// Access/refresh token pair minted by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// A single timestamped consumption measurement (typically 30 minutes).
///
/// Timestamps are naive datetimes in the provider's local timezone; the
/// statistics layer converts them to UTC using the configured timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalReading {
    pub timestamp: NaiveDateTime,
    /// Consumption in kWh, non-negative
    pub consumption: f64,
}

/// Billing snapshot used for the api-estimate cost mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillForecast {
    /// Total charges on the last bill, in dollars
    pub last_bill_charges: f64,
    /// Usage billed on the last bill, in kWh
    pub last_bill_usage_kwh: f64,
    /// Usage accumulated in the current billing period, in kWh
    pub current_usage_kwh: f64,
    pub current_period_start: NaiveDate,
    pub current_period_end: NaiveDate,
    /// Whether the account is on a time-of-use plan
    pub is_tou: bool,
}

impl BillForecast {
    /// Implied $/kWh rate from the last bill, `None` when usage is not positive
    pub fn derived_rate(&self) -> Option<f64> {
        if self.last_bill_usage_kwh > 0.0 {
            Some(self.last_bill_charges / self.last_bill_usage_kwh)
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntervalReadingWire {
    timestamp: String,
    consumption_kwh: f64,
}

#[derive(Debug, Deserialize)]
struct IntervalPayloadWire {
    readings: Vec<IntervalReadingWire>,
}

/// Parse the interval-usage response body.
///
/// Readings are returned sorted by timestamp with duplicate timestamps and
/// negative consumption values dropped, so one parsed batch is strictly
/// increasing and non-overlapping.
pub fn parse_interval_payload(body: &[u8]) -> Result<Vec<IntervalReading>> {
    let payload: IntervalPayloadWire = serde_json::from_slice(body)?;

    let mut readings = Vec::with_capacity(payload.readings.len());
    for entry in payload.readings {
        let timestamp = NaiveDateTime::parse_from_str(&entry.timestamp, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| {
                GridpulseError::api(format!(
                    "unparseable interval timestamp {:?}: {}",
                    entry.timestamp, e
                ))
            })?;
        if entry.consumption_kwh < 0.0 || !entry.consumption_kwh.is_finite() {
            continue;
        }
        readings.push(IntervalReading {
            timestamp,
            consumption: entry.consumption_kwh,
        });
    }

    readings.sort_by_key(|r| r.timestamp);
    readings.dedup_by_key(|r| r.timestamp);
    Ok(readings)
}

#[derive(Debug, Deserialize)]
struct BillForecastWire {
    last_bill_charges: f64,
    last_bill_usage_kwh: f64,
    current_usage_kwh: f64,
    current_period_start: NaiveDate,
    current_period_end: NaiveDate,
    #[serde(default)]
    is_time_of_use: bool,
}

/// Parse the bill-forecast response body
pub fn parse_bill_forecast(body: &[u8]) -> Result<BillForecast> {
    let wire: BillForecastWire = serde_json::from_slice(body)?;
    Ok(BillForecast {
        last_bill_charges: wire.last_bill_charges,
        last_bill_usage_kwh: wire.last_bill_usage_kwh,
        current_usage_kwh: wire.current_usage_kwh,
        current_period_start: wire.current_period_start,
        current_period_end: wire.current_period_end,
        is_tou: wire.is_time_of_use,
    })
}
