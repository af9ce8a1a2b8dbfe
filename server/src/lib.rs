//! Ratekeeper Server
//!
//! HTTP API for starting and polling exchange rate updates, and the
//! background worker that resolves them against the configured rate source.

pub mod api;
pub mod config;
pub mod metrics;
pub mod rate_service;
pub mod state;
pub mod worker;

pub use api::app_router;
pub use config::{LogFormat, ServerConfig, WorkerConfig};
pub use rate_service::RateService;
pub use worker::{BatchAborted, RateUpdateWorker};
