//! Generic JSON-over-HTTP rate source.
//!
//! The endpoint is described entirely by configuration: a URL template and
//! a JSON pointer template locating the rate in the response body. Both
//! templates accept `{from}`, `{to}`, `{from_lower}`, `{to_lower}` and
//! `{api_key}`.

use std::time::Duration;

use async_trait::async_trait;
use ratekeeper_common::CurrencyPair;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{FxError, FxResult};
use crate::provider::{parse_decimal, RateSource};

/// Default pointer: `{"rates": {"EUR": 0.92}}`.
pub const DEFAULT_RATE_POINTER: &str = "/rates/{to}";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for [`HttpRateSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub url_template: String,
    pub rate_pointer: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl HttpSourceConfig {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            rate_pointer: DEFAULT_RATE_POINTER.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Rate source backed by a JSON HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: Client,
    config: HttpSourceConfig,
}

impl HttpRateSource {
    pub fn new(config: HttpSourceConfig) -> FxResult<Self> {
        if config.url_template.trim().is_empty() {
            return Err(FxError::Configuration("empty rate source URL".to_string()));
        }
        if config.timeout.is_zero() {
            return Err(FxError::Configuration(
                "rate source timeout must be positive".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FxError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url_for(&self, pair: &CurrencyPair) -> String {
        render(&self.config.url_template, pair, self.config.api_key.as_deref())
    }

    fn pointer_for(&self, pair: &CurrencyPair) -> String {
        render(&self.config.rate_pointer, pair, self.config.api_key.as_deref())
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self), fields(pair = %pair))]
    async fn get_rate(&self, pair: &CurrencyPair) -> FxResult<Decimal> {
        let response = self.client.get(self.url_for(pair)).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FxError::ProviderError(format!(
                "rate request failed: {}",
                status
            )));
        }

        let body: Value = response.json().await?;
        let rate = extract_rate(&body, &self.pointer_for(pair), pair)?;
        debug!(rate = %rate, "Fetched rate");
        Ok(rate)
    }
}

/// Substitute pair and key placeholders in a template.
pub fn render(template: &str, pair: &CurrencyPair, api_key: Option<&str>) -> String {
    template
        .replace("{from}", pair.from.code())
        .replace("{to}", pair.to.code())
        .replace("{from_lower}", &pair.from.code().to_ascii_lowercase())
        .replace("{to_lower}", &pair.to.code().to_ascii_lowercase())
        .replace("{api_key}", api_key.unwrap_or_default())
}

/// Read the rate at `pointer`. Numbers keep their literal digits, so no
/// precision is lost on the way to `Decimal`. Numeric strings are accepted.
pub fn extract_rate(body: &Value, pointer: &str, pair: &CurrencyPair) -> FxResult<Decimal> {
    let value = body.pointer(pointer).ok_or_else(|| {
        FxError::InvalidResponse(format!("no value at {} for {}", pointer, pair))
    })?;

    match value {
        Value::Number(n) => parse_decimal(pair, &n.to_string()),
        Value::String(s) => parse_decimal(pair, s.trim()),
        Value::Null => Err(FxError::RateNotAvailable(pair.clone())),
        other => Err(FxError::InvalidRate {
            pair: pair.clone(),
            value: other.to_string(),
        }),
    }
}
