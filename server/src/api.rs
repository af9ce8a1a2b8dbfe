//! HTTP API.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::error;

use ratekeeper_common::{RateKeeperError, RateReading};

use crate::rate_service::RateService;

/// Shared handler state.
pub struct AppState {
    pub rates: RateService,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Service(#[from] RateKeeperError),
    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Service(e) if e.is_client_error() => (StatusCode::BAD_REQUEST, e.error_code()),
            ApiError::Service(e) if e.is_not_found() => (StatusCode::NOT_FOUND, e.error_code()),
            ApiError::Service(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.error_code())
            }
        };
        let body = Json(ErrorBody {
            code,
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct StartUpdateRequest {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartUpdateResponse {
    update_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateQuery {
    update_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PairQuery {
    from: Option<String>,
    to: Option<String>,
}

/// Rate as a decimal string and time as RFC 3339 with nanoseconds; both
/// null until resolved.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RateResponse {
    rate: Option<String>,
    update_time: Option<String>,
}

impl From<RateReading> for RateResponse {
    fn from(reading: RateReading) -> Self {
        match (reading.rate, reading.resolved_at) {
            (Some(rate), Some(at)) => Self {
                rate: Some(rate.to_string()),
                update_time: Some(at.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            },
            _ => Self {
                rate: None,
                update_time: None,
            },
        }
    }
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is not set", name)))
}

async fn start_update(
    State(state): State<Arc<AppState>>,
    body: Result<Json<StartUpdateRequest>, JsonRejection>,
) -> ApiResult<Json<StartUpdateResponse>> {
    let Json(request) = body?;
    let from = required(request.from, "from currency")?;
    let to = required(request.to, "to currency")?;

    let update_id = state.rates.start_update(&from, &to).await?;
    Ok(Json(StartUpdateResponse {
        update_id: update_id.to_string(),
    }))
}

async fn get_update(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UpdateQuery>, QueryRejection>,
) -> ApiResult<Json<RateResponse>> {
    let Query(query) = query?;
    let update_id = required(query.update_id, "updateId")?;

    let reading = state.rates.get_update(&update_id).await?;
    Ok(Json(reading.into()))
}

async fn get_last_rate(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PairQuery>, QueryRejection>,
) -> ApiResult<Json<RateResponse>> {
    let Query(query) = query?;
    let from = required(query.from, "from currency")?;
    let to = required(query.to, "to currency")?;

    let reading = state.rates.get_last_rate(&from, &to).await?;
    Ok(Json(reading.into()))
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    state.rates.ping().await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Build the application router.
pub fn app_router(rates: RateService, request_timeout: Duration) -> Router {
    let state = Arc::new(AppState { rates });

    let api = Router::new()
        .route("/update/start", post(start_update))
        .route("/update", get(get_update))
        .route("/update/last", get(get_last_rate));

    Router::new()
        .nest("/api/rates/v1", api)
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}
