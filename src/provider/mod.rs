//! Provider API integration
//!
//! This module is split across smaller files: wire types and parsing, the
//! authenticated usage client, and the multi-step login state machine.

pub mod auth;
pub mod client;
pub mod types;

// Re-exports for the public API surface
pub use auth::{AuthenticatedSession, Authenticator, LoginOutcome, TwoFactorChallenge, TwoFactorTarget};
pub use client::{ProviderApi, UsageClient};
pub use types::{BillForecast, CookieMap, IntervalReading, SessionTokens};
