//! Persistence for credentials, tokens and portal cookies
//!
//! This module handles saving and loading the secrets the coordinator needs
//! across restarts. Tokens are written back immediately whenever the client
//! rotates them so a restart never loses the newest pair.

use crate::error::Result;
use crate::logging::get_logger;
use crate::provider::types::{CookieMap, SessionTokens};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persistent credential state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Portal username, kept for automatic re-authentication
    pub username: Option<String>,

    /// Portal password, kept for automatic re-authentication
    pub password: Option<String>,

    /// Current access/refresh token pair
    pub tokens: Option<SessionTokens>,

    /// Portal cookies from the last successful login
    pub cookies: Option<CookieMap>,
}

/// Credential store backed by a JSON file
pub struct CredentialStore {
    file_path: String,
    state: StoredCredentials,
    logger: crate::logging::StructuredLogger,
}

impl CredentialStore {
    /// Create a new credential store
    pub fn new(file_path: &str) -> Self {
        let logger = get_logger("credentials");
        Self {
            file_path: file_path.to_string(),
            state: StoredCredentials::default(),
            logger,
        }
    }

    /// Load state from disk
    pub fn load(&mut self) -> Result<()> {
        let path = Path::new(&self.file_path);

        if !path.exists() {
            self.logger
                .info("No credential file found, starting unauthenticated");
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        self.state = serde_json::from_str(&contents)?;
        self.logger.info("Loaded credentials from disk");

        Ok(())
    }

    /// Save state to disk
    pub fn save(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.file_path, contents)?;
        self.logger.debug("Saved credentials to disk");

        Ok(())
    }

    /// Current token pair, if any
    pub fn tokens(&self) -> Option<&SessionTokens> {
        self.state.tokens.as_ref()
    }

    /// Stored username/password pair usable for automatic re-authentication
    pub fn login_credentials(&self) -> Option<(&str, &str)> {
        match (&self.state.username, &self.state.password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => {
                Some((u.as_str(), p.as_str()))
            }
            _ => None,
        }
    }

    /// Portal cookies from the last successful login
    pub fn cookies(&self) -> Option<&CookieMap> {
        self.state.cookies.as_ref()
    }

    /// Persist a rotated token pair immediately
    pub fn set_tokens(&mut self, tokens: SessionTokens) -> Result<()> {
        self.state.tokens = Some(tokens);
        self.save()
    }

    /// Persist the full outcome of a login (tokens and cookies)
    pub fn set_session(&mut self, tokens: SessionTokens, cookies: CookieMap) -> Result<()> {
        self.state.tokens = Some(tokens);
        self.state.cookies = Some(cookies);
        self.save()
    }

    /// Persist the username/password pair entered at setup
    pub fn set_login(&mut self, username: &str, password: &str) -> Result<()> {
        self.state.username = Some(username.to_string());
        self.state.password = Some(password.to_string());
        self.save()
    }
}
