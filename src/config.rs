//! Configuration management for Gridpulse
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{GridpulseError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_poll_interval() -> u64 {
    30
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_credentials_file() -> String {
    "/data/gridpulse_credentials.json".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider API connection and account selection
    pub provider: ProviderConfig,

    /// Pricing configuration for cost estimation
    pub pricing: PricingConfig,

    /// Long-term statistics configuration
    pub statistics: StatisticsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Refresh interval in minutes (matches the 30-minute interval granularity)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,

    /// Timezone the provider reports interval timestamps in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Path of the JSON file holding credentials, tokens and cookies
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,
}

/// Provider API connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider's customer API
    pub api_base_url: String,

    /// Utility account number
    pub account_number: String,

    /// AMI meter device id
    pub meter_number: String,

    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
}

/// Cost estimation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostMode {
    /// Derive a rate from the last bill (charges / usage)
    #[default]
    ApiEstimate,
    /// Flat rate per kWh
    Fixed,
    /// Peak / off-peak rates by hour of day
    TimeOfUse,
}

/// Pricing configuration
///
/// Rates are in $/kWh. The peak window is half-open: an interval starting
/// exactly at `peak_start_hour` is peak, one starting exactly at
/// `peak_end_hour` is off-peak. Equal start and end hours mean the peak
/// window is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Which cost model to apply
    pub cost_mode: CostMode,

    /// Flat rate, also the fallback when no derived rate is available
    pub fixed_rate: f64,

    /// Rate inside the peak window
    pub peak_rate: f64,

    /// Rate outside the peak window
    pub off_peak_rate: f64,

    /// First peak hour (0-23)
    pub peak_start_hour: u32,

    /// First off-peak hour after the window (0-23)
    pub peak_end_hour: u32,
}

/// Long-term statistics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Days of history to load when no prior statistics exist
    pub backfill_days: u32,

    /// Path of the JSON statistics store
    pub store_path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
    pub level: String,

    /// Path to log file
    pub file: String,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.utility.example/v1".to_string(),
            account_number: String::new(),
            meter_number: String::new(),
            request_timeout_seconds: 30,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cost_mode: CostMode::ApiEstimate,
            fixed_rate: 0.12,
            peak_rate: 0.15,
            off_peak_rate: 0.08,
            peak_start_hour: 14,
            peak_end_hour: 19,
        }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            backfill_days: 7,
            store_path: "/data/gridpulse_statistics.json".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/gridpulse.log".to_string(),
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            pricing: PricingConfig::default(),
            statistics: StatisticsConfig::default(),
            logging: LoggingConfig::default(),
            poll_interval_minutes: default_poll_interval(),
            timezone: default_timezone(),
            credentials_file: default_credentials_file(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "gridpulse_config.yaml",
            "/data/gridpulse_config.yaml",
            "/etc/gridpulse/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.provider.api_base_url.is_empty() {
            return Err(GridpulseError::validation(
                "provider.api_base_url",
                "Base URL cannot be empty",
            ));
        }

        if self.provider.account_number.is_empty() {
            return Err(GridpulseError::validation(
                "provider.account_number",
                "Account number cannot be empty",
            ));
        }

        if self.provider.meter_number.is_empty() {
            return Err(GridpulseError::validation(
                "provider.meter_number",
                "Meter number cannot be empty",
            ));
        }

        if self.poll_interval_minutes == 0 {
            return Err(GridpulseError::validation(
                "poll_interval_minutes",
                "Must be greater than 0",
            ));
        }

        if self.statistics.backfill_days == 0 {
            return Err(GridpulseError::validation(
                "statistics.backfill_days",
                "Must be greater than 0",
            ));
        }

        if self.pricing.peak_start_hour > 23 {
            return Err(GridpulseError::validation(
                "pricing.peak_start_hour",
                "Must be 0..=23",
            ));
        }

        if self.pricing.peak_end_hour > 23 {
            return Err(GridpulseError::validation(
                "pricing.peak_end_hour",
                "Must be 0..=23",
            ));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(GridpulseError::validation(
                "timezone",
                "Not a recognized IANA timezone",
            ));
        }

        Ok(())
    }

    /// Parsed provider timezone
    pub fn provider_timezone(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| GridpulseError::config(format!("invalid timezone: {}", self.timezone)))
    }
}
