//! Server configuration.

use std::time::Duration;

use ratekeeper_common::{Currency, RateKeeperError, Result};
use ratekeeper_fx::{HttpSourceConfig, RateSourceConfig};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Timer interval between ticks when there is no backlog.
    pub tick_interval: Duration,
    /// Maximum pending rows fetched per tick.
    pub fetch_size: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            fetch_size: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Main server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Listen port.
    pub listen_port: u16,
    /// Database URL.
    pub database_url: String,
    /// Pool size.
    pub database_max_connections: u32,
    /// Per-request timeout for the HTTP API.
    pub request_timeout: Duration,
    /// Currencies accepted by the API.
    pub supported_currencies: Vec<Currency>,
    /// Worker configuration.
    pub worker: WorkerConfig,
    /// Rate source selection.
    pub rate_source: RateSourceConfig,
    /// Log level.
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            database_url: "sqlite://ratekeeper.db".to_string(),
            database_max_connections: 8,
            request_timeout: Duration::from_secs(30),
            supported_currencies: vec![Currency::eur(), Currency::usd(), Currency::mxn()],
            worker: WorkerConfig::default(),
            rate_source: RateSourceConfig::Static(String::new()),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup. Unset keys keep their
    /// defaults; set keys that fail to parse are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = var("LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(port) = var("LISTEN_PORT") {
            config.listen_port = parse_number("LISTEN_PORT", &port)?;
        }
        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(max) = var("DATABASE_MAX_CONNECTIONS") {
            config.database_max_connections = parse_number("DATABASE_MAX_CONNECTIONS", &max)?;
        }
        if let Some(ms) = var("REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("REQUEST_TIMEOUT_MS", &ms)?;
        }
        if let Some(codes) = var("SUPPORTED_CURRENCIES") {
            config.supported_currencies = codes
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(Currency::parse)
                .collect::<Result<Vec<_>>>()?;
        }

        if let Some(ms) = var("WORKER_TICK_INTERVAL_MS") {
            config.worker.tick_interval = parse_millis("WORKER_TICK_INTERVAL_MS", &ms)?;
        }
        if let Some(size) = var("WORKER_FETCH_SIZE") {
            config.worker.fetch_size = parse_number("WORKER_FETCH_SIZE", &size)?;
        }

        config.rate_source = match var("RATE_SOURCE_URL") {
            Some(url) => {
                let mut http = HttpSourceConfig::new(url);
                if let Some(pointer) = var("RATE_SOURCE_RATE_POINTER") {
                    http.rate_pointer = pointer;
                }
                http.api_key = var("RATE_SOURCE_API_KEY");
                if let Some(ms) = var("RATE_SOURCE_TIMEOUT_MS") {
                    http.timeout = parse_millis("RATE_SOURCE_TIMEOUT_MS", &ms)?;
                }
                RateSourceConfig::Http(http)
            }
            None => RateSourceConfig::Static(var("STATIC_RATES").unwrap_or_default()),
        };

        if let Some(level) = var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = var("LOG_FORMAT") {
            config.log_format = match format.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(RateKeeperError::ConfigurationError(format!(
                        "LOG_FORMAT must be json or text, got {:?}",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.listen_port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }

        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.database_max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be 0".to_string());
        }

        if self.supported_currencies.is_empty() {
            return Err("At least one supported currency is required".to_string());
        }

        if self.worker.tick_interval.is_zero() {
            return Err("Worker tick interval cannot be 0".to_string());
        }

        if self.worker.fetch_size == 0 {
            return Err("Worker fetch size cannot be 0".to_string());
        }

        if let RateSourceConfig::Http(http) = &self.rate_source {
            if http.timeout.is_zero() {
                return Err("Rate source timeout cannot be 0".to_string());
            }
        }

        Ok(())
    }

    /// Socket address the API binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        RateKeeperError::ConfigurationError(format!("{} is not a valid number: {:?}", key, raw))
    })
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    parse_number::<u64>(key, raw).map(Duration::from_millis)
}
