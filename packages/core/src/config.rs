use std::env;
use std::time::Duration;

use crate::cli::Cli;
use crate::db::{redact_url, SqlDialect};

pub const DEFAULT_API_PORT: u16 = 8080;
pub const DEFAULT_IDLE_INTERVAL_SECONDS: u64 = 5;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub dialect: SqlDialect,
    pub api_port: u16,
    pub admin_api_key: Option<String>,
    pub default_capacity: f64,
    pub idle_interval: Duration,
}

// Neither the admin key nor the database password may end up in a log line.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &redact_url(&self.database_url))
            .field("dialect", &self.dialect)
            .field("api_port", &self.api_port)
            .field("admin_api_key", &self.admin_api_key.as_ref().map(|_| "<redacted>"))
            .field("default_capacity", &self.default_capacity)
            .field("idle_interval", &self.idle_interval)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_vars<F>(var: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = var("DATABASE_URL").ok_or("DATABASE_URL is required")?;
        let dialect = SqlDialect::from_url(&database_url)
            .ok_or_else(|| format!("Unsupported DATABASE_URL scheme: {}", redact_url(&database_url)))?;

        let api_port = match var("API_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| "API_PORT must be a valid port number")?,
            None => DEFAULT_API_PORT,
        };

        let admin_api_key = var("ADMIN_API_KEY").filter(|key| !key.is_empty());

        let default_capacity = match var("DEFAULT_CAPACITY") {
            Some(raw) => parse_capacity(&raw).ok_or("DEFAULT_CAPACITY must be a non-negative number")?,
            None => 0.0,
        };

        let idle_interval = match var("PROBE_IDLE_INTERVAL_SECONDS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| "PROBE_IDLE_INTERVAL_SECONDS must be a valid number")?,
            None => DEFAULT_IDLE_INTERVAL_SECONDS,
        };

        Ok(Self {
            database_url,
            dialect,
            api_port,
            admin_api_key,
            default_capacity,
            idle_interval: Duration::from_secs(idle_interval),
        })
    }

    /// Let command-line flags win over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(database_url) = &cli.database_url {
            self.dialect = SqlDialect::from_url(database_url)
                .ok_or_else(|| format!("Unsupported database URL scheme: {}", redact_url(database_url)))?;
            self.database_url = database_url.clone();
        }
        if let Some(port) = cli.port {
            self.api_port = port;
        }
        if let Some(capacity) = cli.default_capacity {
            if !(capacity.is_finite() && capacity >= 0.0) {
                return Err("--default-capacity must be a non-negative number".into());
            }
            self.default_capacity = capacity;
        }
        if let Some(seconds) = cli.idle_interval {
            self.idle_interval = Duration::from_secs(seconds);
        }
        Ok(self)
    }
}

fn parse_capacity(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value >= 0.0)
}
