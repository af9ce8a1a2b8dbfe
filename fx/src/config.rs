//! Rate source selection.

use std::sync::Arc;

use tracing::info;

use crate::error::FxResult;
use crate::http::{HttpRateSource, HttpSourceConfig};
use crate::provider::{RateSource, StaticRateSource};

/// Which rate source the process uses. Chosen once at startup.
#[derive(Debug, Clone)]
pub enum RateSourceConfig {
    /// JSON endpoint described by templates.
    Http(HttpSourceConfig),
    /// Fixed `FROM/TO=rate,...` table.
    Static(String),
}

/// Build the configured rate source.
pub fn build_rate_source(config: &RateSourceConfig) -> FxResult<Arc<dyn RateSource>> {
    match config {
        RateSourceConfig::Http(http) => {
            let source = HttpRateSource::new(http.clone())?;
            info!(timeout = ?http.timeout, "Using HTTP rate source");
            Ok(Arc::new(source))
        }
        RateSourceConfig::Static(table) => {
            let source = StaticRateSource::parse_table(table)?;
            info!(pairs = source.len(), "Using static rate source");
            Ok(Arc::new(source))
        }
    }
}
