//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{PortalError, Result};
use crate::principal::PrincipalKind;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the donation REST API (e.g. http://localhost:5000/api)
    pub api_url: String,
    /// WebSocket endpoint of the realtime push channel
    pub realtime_url: String,
    /// File backing the persistent credential storage
    pub storage_path: PathBuf,
    /// Upper bound on the boot-time profile verification call (seconds)
    pub verify_timeout_secs: u64,
    /// Timeout applied to every outbound REST request (seconds)
    pub http_timeout_secs: u64,
    /// Delay between receiving a pushed snapshot and committing it (milliseconds)
    pub transition_delay_ms: u64,
    /// How long a notification stays visible (seconds)
    pub notification_ttl_secs: u64,
    /// First reconnect back-off step (milliseconds)
    pub reconnect_initial_ms: u64,
    /// Reconnect back-off ceiling (milliseconds)
    pub reconnect_max_ms: u64,
    /// Upper bound on a single WebSocket handshake (seconds)
    pub connect_timeout_secs: u64,
    /// Optional credentials for a headless login when no session is stored
    pub login: Option<LoginCredentials>,
}

#[derive(Debug, Clone)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub kind: PrincipalKind,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            api_url: env_var("API_URL")
                .unwrap_or_else(|_| "http://localhost:5000/api".to_string()),
            realtime_url: env_var("REALTIME_URL")
                .unwrap_or_else(|_| "ws://localhost:5000/realtime".to_string()),
            storage_path: env_var("STORAGE_PATH")
                .unwrap_or_else(|_| "./portal_session.json".to_string())
                .into(),
            verify_timeout_secs: parse_var("VERIFY_TIMEOUT_SECS", "10")?,
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", "30")?,
            transition_delay_ms: parse_var("TRANSITION_DELAY_MS", "300")?,
            notification_ttl_secs: parse_var("NOTIFICATION_TTL_SECS", "5")?,
            reconnect_initial_ms: parse_var("RECONNECT_INITIAL_MS", "1000")?,
            reconnect_max_ms: parse_var("RECONNECT_MAX_MS", "30000")?,
            connect_timeout_secs: parse_var("CONNECT_TIMEOUT_SECS", "10")?,
            login: login_from_env()?,
        })
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn transition_delay(&self) -> Duration {
        Duration::from_millis(self.transition_delay_ms)
    }

    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.notification_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: "http://localhost:5000/api".to_string(),
            realtime_url: "ws://localhost:5000/realtime".to_string(),
            storage_path: "./portal_session.json".into(),
            verify_timeout_secs: 10,
            http_timeout_secs: 30,
            transition_delay_ms: 300,
            notification_ttl_secs: 5,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 30_000,
            connect_timeout_secs: 10,
            login: None,
        }
    }
}

fn login_from_env() -> Result<Option<LoginCredentials>> {
    let (Ok(username), Ok(password)) = (env_var("PORTAL_USERNAME"), env_var("PORTAL_PASSWORD"))
    else {
        return Ok(None);
    };
    let kind_tag = env_var("PORTAL_KIND").unwrap_or_else(|_| "donor".to_string());
    let kind = PrincipalKind::from_tag(&kind_tag)
        .ok_or_else(|| PortalError::Config(format!("Invalid PORTAL_KIND: {kind_tag}")))?;
    Ok(Some(LoginCredentials {
        username,
        password,
        kind,
    }))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| PortalError::Config(format!("Invalid {key}")))
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| PortalError::Config(format!("Missing env var: {key}")))
}
