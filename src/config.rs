//! Engine configuration
//!
//! Loaded from environment variables (with `.env` support via dotenvy).
//! Channel settings are validated up front so a misconfigured deployment
//! fails at startup instead of on the first notification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Security type for the SMTP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SmtpSecurity {
    #[default]
    Ssl,
    Starttls,
}

impl SmtpSecurity {
    pub fn default_port(&self) -> u16 {
        match self {
            SmtpSecurity::Ssl => 465,
            SmtpSecurity::Starttls => 587,
        }
    }
}

/// SMTP settings for the email notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: String,
    pub password: String,
    /// From address on outgoing notifications
    pub from_address: String,
}

/// WhatsApp gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappGatewayConfig {
    /// Base URL of the messaging gateway, e.g. `https://gateway.example.com`
    pub base_url: String,
    pub api_key: String,
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    /// Account this engine instance processes
    pub account_id: i64,
    /// Unread-scan bound for full scans and poll ticks
    pub scan_limit: u32,
    pub smtp: Option<SmtpConfig>,
    pub whatsapp: Option<WhatsappGatewayConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: "mailwarden.db".to_string(),
            account_id: 1,
            scan_limit: 20,
            smtp: None,
            whatsapp: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment.
    ///
    /// SMTP and WhatsApp blocks are optional: a deployment without
    /// `MAILWARDEN_SMTP_HOST` simply has no email channel.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let db_path =
            std::env::var("MAILWARDEN_DB_PATH").unwrap_or_else(|_| "mailwarden.db".to_string());

        let account_id = match std::env::var("MAILWARDEN_ACCOUNT_ID") {
            Ok(v) => v.parse::<i64>().map_err(|_| {
                ConfigError::InvalidValue("MAILWARDEN_ACCOUNT_ID".to_string(), v.clone())
            })?,
            Err(_) => 1,
        };

        let scan_limit = match std::env::var("MAILWARDEN_SCAN_LIMIT") {
            Ok(v) => v.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue("MAILWARDEN_SCAN_LIMIT".to_string(), v.clone())
            })?,
            Err(_) => 20,
        };

        let smtp = match std::env::var("MAILWARDEN_SMTP_HOST") {
            Ok(host) => Some(Self::smtp_from_env(host)?),
            Err(_) => None,
        };

        let whatsapp = match std::env::var("MAILWARDEN_WA_GATEWAY_URL") {
            Ok(base_url) => {
                url::Url::parse(&base_url).map_err(|e| {
                    ConfigError::InvalidValue("MAILWARDEN_WA_GATEWAY_URL".to_string(), e.to_string())
                })?;
                Some(WhatsappGatewayConfig {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    api_key: require_var("MAILWARDEN_WA_API_KEY")?,
                })
            }
            Err(_) => None,
        };

        Ok(Self {
            db_path,
            account_id,
            scan_limit,
            smtp,
            whatsapp,
        })
    }

    fn smtp_from_env(host: String) -> Result<SmtpConfig, ConfigError> {
        if host.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "MAILWARDEN_SMTP_HOST".to_string(),
                "empty host".to_string(),
            ));
        }

        let security = match std::env::var("MAILWARDEN_SMTP_SECURITY").as_deref() {
            Ok("STARTTLS") | Ok("starttls") => SmtpSecurity::Starttls,
            Ok("SSL") | Ok("ssl") | Err(_) => SmtpSecurity::Ssl,
            Ok(other) => {
                return Err(ConfigError::InvalidValue(
                    "MAILWARDEN_SMTP_SECURITY".to_string(),
                    other.to_string(),
                ))
            }
        };

        let port = match std::env::var("MAILWARDEN_SMTP_PORT") {
            Ok(v) => v.parse::<u16>().map_err(|_| {
                ConfigError::InvalidValue("MAILWARDEN_SMTP_PORT".to_string(), v.clone())
            })?,
            Err(_) => security.default_port(),
        };

        let username = require_var("MAILWARDEN_SMTP_USER")?;

        Ok(SmtpConfig {
            host,
            port,
            security,
            password: require_var("MAILWARDEN_SMTP_PASSWORD")?,
            from_address: std::env::var("MAILWARDEN_SMTP_FROM").unwrap_or_else(|_| username.clone()),
            username,
        })
    }
}

fn require_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}
