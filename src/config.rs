//! Runtime configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::notifier::SmtpSettings;
use crate::scheduler::ScheduleConfig;
use crate::traits::{ExtractorConfig, PageSelectors};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Errors during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// A variable is set but does not parse.
    #[error("invalid value {value:?} for {key}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Everything the binary needs to wire the engine together.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `PostgreSQL` connection URL.
    pub database_url: String,
    pub max_connections: u32,
    pub schedule: ScheduleConfig,
    /// Run every job once before the timer starts.
    pub run_on_start: bool,
    pub extractor: ExtractorConfig,
    /// `None` when `SMTP_HOST` is unset; alerts then stay pending.
    pub smtp: Option<SmtpSettings>,
}

impl Settings {
    /// Load configuration from the process environment, honouring a `.env`
    /// file if one is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is not set and
    /// [`ConfigError::Invalid`] for any numeric or boolean value that does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let database_url = vars.get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let schedule = ScheduleConfig {
            refresh_interval: vars.secs("PRICE_WATCH_REFRESH_INTERVAL_SECS", 30 * 60)?,
            notify_interval: vars.secs("PRICE_WATCH_NOTIFY_INTERVAL_SECS", 30 * 60)?,
            reset_interval: vars.secs("PRICE_WATCH_RESET_INTERVAL_SECS", 60 * 60)?,
            misfire_grace: vars.secs("PRICE_WATCH_MISFIRE_GRACE_SECS", 60)?,
        };

        let extractor = ExtractorConfig {
            user_agent: vars
                .get("PRICE_WATCH_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: vars.secs("PRICE_WATCH_FETCH_TIMEOUT_SECS", 30)?,
            selectors: PageSelectors {
                name: vars
                    .get("PRICE_WATCH_NAME_SELECTOR")
                    .unwrap_or_else(|| "h1.product-title".to_string()),
                price: vars
                    .get("PRICE_WATCH_PRICE_SELECTOR")
                    .unwrap_or_else(|| ".sale-price".to_string()),
            },
        };

        let smtp = match vars.get("SMTP_HOST") {
            Some(host) => Some(SmtpSettings {
                host,
                port: vars.parse("SMTP_PORT", 587, "a port number")?,
                username: vars.get("SMTP_USERNAME"),
                password: vars.get("SMTP_PASSWORD"),
                from_address: vars
                    .get("SMTP_FROM_ADDRESS")
                    .ok_or(ConfigError::Missing("SMTP_FROM_ADDRESS"))?,
                from_name: vars
                    .get("SMTP_FROM_NAME")
                    .unwrap_or_else(|| "Price Tracker".to_string()),
                use_tls: vars.flag("SMTP_USE_TLS", true)?,
            }),
            None => None,
        };

        Ok(Self {
            database_url,
            max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", 10, "a positive integer")?,
            schedule,
            run_on_start: vars.flag("PRICE_WATCH_RUN_ON_START", true)?,
            extractor,
            smtp,
        })
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank are the same thing.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(
        &self,
        key: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key,
                value,
                expected,
            }),
        }
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse(key, default, "a positive number of seconds")?;
        if secs == 0 {
            return Err(ConfigError::Invalid {
                key,
                value: secs.to_string(),
                expected: "a positive number of seconds",
            });
        }
        Ok(Duration::from_secs(secs))
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                expected: "a boolean",
            }),
        }
    }
}
