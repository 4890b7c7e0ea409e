//! Derived metrics over a refresh result
//!
//! A declarative table maps each published metric to its extraction from
//! `UsageData`, so the reporting surface stays in one place. The daemon logs
//! the table after every refresh; anything exporting these values elsewhere
//! reuses the same definitions.

use crate::coordinator::UsageData;

/// Value of one metric
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Energy(f64),
    Money(f64),
    Rate(f64),
    Date(chrono::NaiveDate),
    Flag(bool),
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Energy(v) => write!(f, "{:.3} kWh", v),
            MetricValue::Money(v) => write!(f, "${:.2}", v),
            MetricValue::Rate(v) => write!(f, "${:.4}/kWh", v),
            MetricValue::Date(d) => write!(f, "{}", d),
            MetricValue::Flag(b) => write!(f, "{}", b),
        }
    }
}

/// One metric definition: stable key plus extraction
pub struct Metric {
    pub key: &'static str,
    pub name: &'static str,
    extract: fn(&UsageData) -> Option<MetricValue>,
}

impl Metric {
    /// Evaluate the metric against a refresh result.
    ///
    /// `None` means the underlying data is absent this cycle, not zero.
    pub fn value(&self, data: &UsageData) -> Option<MetricValue> {
        (self.extract)(data)
    }
}

/// All published metrics, in reporting order
pub const METRICS: &[Metric] = &[
    Metric {
        key: "latest_interval_usage",
        name: "Latest interval usage",
        extract: |d| d.latest_usage().map(MetricValue::Energy),
    },
    Metric {
        key: "daily_usage",
        name: "Daily usage",
        extract: |d| Some(MetricValue::Energy(d.daily_total)),
    },
    Metric {
        key: "monthly_usage",
        name: "Monthly usage",
        extract: |d| Some(MetricValue::Energy(d.monthly_total)),
    },
    Metric {
        key: "daily_cost",
        name: "Daily cost",
        extract: |d| Some(MetricValue::Money(d.daily_cost)),
    },
    Metric {
        key: "monthly_cost",
        name: "Monthly cost",
        extract: |d| Some(MetricValue::Money(d.monthly_cost)),
    },
    Metric {
        key: "last_bill_charges",
        name: "Last bill charges",
        extract: |d| {
            d.bill_forecast
                .as_ref()
                .map(|b| MetricValue::Money(b.last_bill_charges))
        },
    },
    Metric {
        key: "last_bill_usage",
        name: "Last bill usage",
        extract: |d| {
            d.bill_forecast
                .as_ref()
                .map(|b| MetricValue::Energy(b.last_bill_usage_kwh))
        },
    },
    Metric {
        key: "current_period_usage",
        name: "Current billing period usage",
        extract: |d| {
            d.bill_forecast
                .as_ref()
                .map(|b| MetricValue::Energy(b.current_usage_kwh))
        },
    },
    Metric {
        key: "effective_rate",
        name: "Effective rate",
        extract: |d| {
            d.bill_forecast
                .as_ref()
                .and_then(|b| b.derived_rate())
                .map(MetricValue::Rate)
        },
    },
    Metric {
        key: "billing_period_start",
        name: "Billing period start",
        extract: |d| {
            d.bill_forecast
                .as_ref()
                .map(|b| MetricValue::Date(b.current_period_start))
        },
    },
    Metric {
        key: "billing_period_end",
        name: "Billing period end",
        extract: |d| {
            d.bill_forecast
                .as_ref()
                .map(|b| MetricValue::Date(b.current_period_end))
        },
    },
    Metric {
        key: "is_time_of_use",
        name: "Time-of-use plan",
        extract: |d| d.bill_forecast.as_ref().map(|b| MetricValue::Flag(b.is_tou)),
    },
];

/// Render all metrics for one refresh result as `key=value` lines
pub fn report(data: &UsageData) -> Vec<String> {
    METRICS
        .iter()
        .map(|m| match m.value(data) {
            Some(v) => format!("{}={}", m.key, v),
            None => format!("{}=unavailable", m.key),
        })
        .collect()
}
