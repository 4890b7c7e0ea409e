//! Multi-step login against the provider's identity portal
//!
//! The login sequence is modeled as a typed state machine with consuming
//! transitions: submitting credentials either completes directly with tokens
//! or yields a [`TwoFactorChallenge`] that must be advanced through target
//! selection, code delivery and verification. Portal cookies can be exported
//! after a successful login and imported on the next one, which lets the
//! provider skip the two-factor challenge for a remembered session.

use crate::error::{GridpulseError, Result};
use crate::logging::get_logger;
use crate::provider::types::{CookieMap, SessionTokens};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, COOKIE, SET_COOKIE, USER_AGENT};
use serde::Deserialize;
use serde_json::json;

/// A destination the provider can deliver a verification code to
#[derive(Debug, Clone, Deserialize)]
pub struct TwoFactorTarget {
    /// Opaque target id, passed back when requesting a code
    pub id: String,
    /// Masked description shown to the user, e.g. `"***-***-1234"`
    pub obfuscated: String,
}

/// Result of submitting credentials
pub enum LoginOutcome {
    /// Login completed without a challenge
    Complete(AuthenticatedSession),
    /// The provider requires two-factor verification
    TwoFactor(TwoFactorChallenge),
}

/// Tokens plus the portal cookies that produced them
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub tokens: SessionTokens,
    pub cookies: CookieMap,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    status: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TargetsResponse {
    targets: Vec<TwoFactorTarget>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    access_token: String,
    refresh_token: String,
}

/// Portal authenticator holding the HTTP session state
pub struct Authenticator {
    http: reqwest::Client,
    base_url: String,
    cookies: CookieMap,
    logger: crate::logging::StructuredLogger,
}

impl Authenticator {
    /// Create an authenticator for the given portal base URL
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookies: CookieMap::new(),
            logger: get_logger("auth"),
        })
    }

    /// Import cookies from a previous session
    pub fn import_cookies(&mut self, cookies: &CookieMap) {
        self.cookies.extend(cookies.clone());
    }

    /// Export the current portal cookies
    pub fn export_cookies(&self) -> CookieMap {
        self.cookies.clone()
    }

    fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn absorb_cookies(&mut self, resp: &reqwest::Response) {
        for value in resp.headers().get_all(SET_COOKIE) {
            if let Ok(s) = value.to_str()
                && let Some(pair) = s.split(';').next()
                && let Some((name, val)) = pair.split_once('=')
            {
                self.cookies
                    .insert(name.trim().to_string(), val.trim().to_string());
            }
        }
    }

    async fn post_json(&mut self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("gridpulse/", env!("CARGO_PKG_VERSION")))
            .json(&body);
        if !self.cookies.is_empty() {
            req = req.header(COOKIE, self.cookie_header());
        }
        let resp = req.send().await?;
        self.absorb_cookies(&resp);
        Ok(resp)
    }

    /// Submit credentials; consumes the authenticator and returns either a
    /// completed session or a pending two-factor challenge.
    pub async fn submit_credentials(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        // Initialize the portal session first so the login call carries its cookies
        let resp = self.post_json("/auth/session", json!({})).await?;
        if !resp.status().is_success() {
            return Err(GridpulseError::api(format!(
                "portal session init returned {}",
                resp.status()
            )));
        }

        let resp = self
            .post_json(
                "/auth/login",
                json!({ "username": username, "password": password }),
            )
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GridpulseError::auth("invalid username or password"));
        }
        if !status.is_success() {
            return Err(GridpulseError::api(format!(
                "login endpoint returned {}",
                status
            )));
        }

        let login: LoginResponse = resp.json().await?;
        match login.status.as_str() {
            "ok" => {
                let tokens = SessionTokens {
                    access_token: login
                        .access_token
                        .ok_or_else(|| GridpulseError::api("login response missing tokens"))?,
                    refresh_token: login
                        .refresh_token
                        .ok_or_else(|| GridpulseError::api("login response missing tokens"))?,
                };
                self.logger.info("Login completed without two-factor");
                Ok(LoginOutcome::Complete(AuthenticatedSession {
                    tokens,
                    cookies: self.export_cookies(),
                }))
            }
            "tfa_required" => {
                self.logger.info("Two-factor verification required");
                let challenge = TwoFactorChallenge::begin(self).await?;
                Ok(LoginOutcome::TwoFactor(challenge))
            }
            other => Err(GridpulseError::api(format!(
                "unexpected login status {:?}",
                other
            ))),
        }
    }
}

/// Pending two-factor challenge, advanced by sending and verifying a code
pub struct TwoFactorChallenge {
    auth: Authenticator,
    targets: Vec<TwoFactorTarget>,
    code_sent: bool,
}

impl TwoFactorChallenge {
    async fn begin(mut auth: Authenticator) -> Result<Self> {
        let url = format!("{}/auth/tfa/targets", auth.base_url);
        let resp = auth
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, concat!("gridpulse/", env!("CARGO_PKG_VERSION")))
            .header(COOKIE, auth.cookie_header())
            .send()
            .await?;
        auth.absorb_cookies(&resp);
        if !resp.status().is_success() {
            return Err(GridpulseError::api(format!(
                "two-factor target listing returned {}",
                resp.status()
            )));
        }
        let targets: TargetsResponse = resp.json().await?;
        if targets.targets.is_empty() {
            return Err(GridpulseError::api("no two-factor targets available"));
        }
        Ok(Self {
            auth,
            targets: targets.targets,
            code_sent: false,
        })
    }

    /// Targets the provider can deliver a code to
    pub fn targets(&self) -> &[TwoFactorTarget] {
        &self.targets
    }

    /// Request delivery of a verification code to the selected target
    pub async fn send_code(&mut self, target_id: &str) -> Result<()> {
        if !self.targets.iter().any(|t| t.id == target_id) {
            return Err(GridpulseError::validation(
                "target_id",
                "not one of the offered two-factor targets",
            ));
        }
        let resp = self
            .auth
            .post_json("/auth/tfa/send", json!({ "target_id": target_id }))
            .await?;
        if !resp.status().is_success() {
            return Err(GridpulseError::api(format!(
                "two-factor code delivery returned {}",
                resp.status()
            )));
        }
        self.code_sent = true;
        Ok(())
    }

    /// Verify the delivered code; consumes the challenge and completes the login
    pub async fn verify_code(mut self, code: &str) -> Result<AuthenticatedSession> {
        if !self.code_sent {
            return Err(GridpulseError::validation(
                "code",
                "no verification code has been requested yet",
            ));
        }
        let resp = self
            .auth
            .post_json("/auth/tfa/verify", json!({ "code": code }))
            .await?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(GridpulseError::auth("verification code rejected"));
        }
        if status == StatusCode::GONE {
            return Err(GridpulseError::two_factor_required(
                "challenge expired, restart the login",
            ));
        }
        if !status.is_success() {
            return Err(GridpulseError::api(format!(
                "two-factor verification returned {}",
                status
            )));
        }

        let verify: VerifyResponse = resp.json().await?;
        self.auth.logger.info("Two-factor verification succeeded");
        Ok(AuthenticatedSession {
            tokens: SessionTokens {
                access_token: verify.access_token,
                refresh_token: verify.refresh_token,
            },
            cookies: self.auth.export_cookies(),
        })
    }
}
