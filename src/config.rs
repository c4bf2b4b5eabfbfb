//! Process configuration loaded from the environment.
//!
//! A `.env` file in the working directory is read first (if present), then
//! the following variables are consulted:
//!
//! | Variable                  | Default      |
//! |---------------------------|--------------|
//! | `HOST`                    | `127.0.0.1`  |
//! | `PORT`                    | `8001`       |
//! | `DATA_DIR`                | `./data`     |
//! | `ADMIN_EMAILS`            | (none)       |
//! | `SESSION_TTL_DAYS`        | `7`          |
//! | `GEONAMES_USERNAME`       | `demo`       |
//! | `SENDGRID_API_KEY`        | (none)       |
//! | `SENDGRID_FROM_EMAIL`     | (none)       |
//! | `EXPO_ACCESS_TOKEN`       | (none)       |
//! | `OAUTH_SESSION_URL`       | (none)       |
//! | `JOBS_ENABLED`            | `true`       |
//! | `RETENTION_SEND_DELAY_MS` | `500`        |

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Accounts with these emails are treated as admins regardless of role.
    pub admin_emails: Vec<String>,
    pub session_ttl_days: i64,
    pub geonames_username: String,
    pub email: EmailConfig,
    pub expo_access_token: Option<String>,
    /// Endpoint that exchanges a hosted-OAuth `session_id` for user data.
    pub oauth_session_url: Option<String>,
    pub jobs_enabled: bool,
    pub retention_send_delay_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub sendgrid_api_key: Option<String>,
    pub from_email: Option<String>,
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.sendgrid_api_key.is_some() && self.from_email.is_some()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!("Failed to read .env file: {}", e),
        }

        Ok(Self {
            host: env_or("HOST", "127.0.0.1"),
            port: parse_env("PORT", 8001)?,
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
            admin_emails: parse_list(&env_or("ADMIN_EMAILS", "")),
            session_ttl_days: parse_env("SESSION_TTL_DAYS", 7)?,
            geonames_username: env_or("GEONAMES_USERNAME", "demo"),
            email: EmailConfig {
                sendgrid_api_key: env_opt("SENDGRID_API_KEY"),
                from_email: env_opt("SENDGRID_FROM_EMAIL"),
            },
            expo_access_token: env_opt("EXPO_ACCESS_TOKEN"),
            oauth_session_url: env_opt("OAUTH_SESSION_URL"),
            jobs_enabled: parse_env("JOBS_ENABLED", true)?,
            retention_send_delay_ms: parse_env("RETENTION_SEND_DELAY_MS", 500)?,
        })
    }

    /// Whether `email` is listed in `ADMIN_EMAILS`.
    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email.trim()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
            data_dir: PathBuf::from("./data"),
            admin_emails: Vec::new(),
            session_ttl_days: 7,
            geonames_username: "demo".to_string(),
            email: EmailConfig::default(),
            expo_access_token: None,
            oauth_session_url: None,
            jobs_enabled: true,
            retention_send_delay_ms: 500,
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_opt(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
