//! # Gridpulse - Utility Usage Poller
//!
//! A daemon that polls a utility provider's customer API for electricity
//! usage and billing data, computes daily and month-to-date costs, and
//! maintains a long-term hourly consumption series.
//!
//! ## Features
//!
//! - **Lagged polling**: fetches the newest complete day so readings are
//!   never partial, with correct month-boundary handling
//! - **Cost models**: bill-derived rate, fixed rate, or time-of-use peak
//!   and off-peak rates
//! - **Long-term statistics**: monotone hourly series with first-run
//!   backfill and incremental gap filling
//! - **Session management**: token refresh with rotation persistence and
//!   automatic re-login on auth failure
//! - **Configuration**: YAML-based configuration with validation
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `provider`: Login flow, API client and wire types
//! - `credentials`: Persisted credentials, tokens and session cookies
//! - `pricing`: Cost calculation over interval readings
//! - `statistics`: Hourly series store and reconciler
//! - `coordinator`: Refresh loop and session lifecycle
//! - `sensors`: Derived metrics over refresh results

pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod pricing;
pub mod provider;
pub mod sensors;
pub mod statistics;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorState, UsageData};
pub use error::{GridpulseError, Result};
