//! HTTP handlers for the JSON API.

use crate::control::{ControlEnable, ControlState, LightState, SettingsPatch};
use crate::error::ThermoError;
use crate::service::ThermoService;
use crate::storage::HistoryRange;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

/// Shared handler state.
pub type AppState = Arc<ThermoService>;

/// Error response carrying a [`ThermoError`] as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError(pub ThermoError);

impl From<ThermoError> for ApiError {
    fn from(err: ThermoError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ThermoError::InvalidSettings(_) | ThermoError::Config(_) => StatusCode::BAD_REQUEST,
            ThermoError::SensorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint.
pub async fn health_check(State(service): State<AppState>) -> Json<Value> {
    let watchdog = service.get_watchdog_status();
    Json(json!({
        "status": "ok",
        "service": "thermo-pi",
        "version": env!("CARGO_PKG_VERSION"),
        "sensorsHealthy": watchdog.healthy,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// All display-tier readings.
pub async fn get_temps(State(service): State<AppState>) -> Json<Value> {
    let sensors = service.get_all_sensors().await;
    Json(json!({ "sensors": sensors }))
}

/// Room and safety readings; 503 when neither is available.
pub async fn get_control_sensors(State(service): State<AppState>) -> Response {
    let readings = service.get_control_sensors().await;
    let status = if readings.room.is_none() && readings.safety.is_none() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(readings)).into_response()
}

pub async fn get_status(State(service): State<AppState>) -> Response {
    Json(service.get_status().await).into_response()
}

pub async fn get_watchdog(State(service): State<AppState>) -> Response {
    Json(service.get_watchdog_status()).into_response()
}

pub async fn get_settings(State(service): State<AppState>) -> Response {
    Json(service.settings()).into_response()
}

/// Apply a full or partial settings update.
pub async fn update_settings(
    State(service): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> ApiResult<Value> {
    let settings = service.apply_settings_patch(&patch)?;
    Ok(Json(json!({ "success": true, "settings": settings })))
}

pub async fn set_control_enable(
    State(service): State<AppState>,
    Json(request): Json<ControlEnable>,
) -> Json<ControlState> {
    Json(service.set_control_enabled(request.enabled).await)
}

pub async fn get_light(State(service): State<AppState>) -> Json<LightState> {
    Json(service.light_state())
}

pub async fn set_light(
    State(service): State<AppState>,
    Json(request): Json<LightState>,
) -> ApiResult<LightState> {
    Ok(Json(service.set_light(request.on)?))
}

pub async fn get_offsets(State(service): State<AppState>) -> Json<Value> {
    Json(json!({ "offsets": service.offsets() }))
}

/// Body of `POST /api/offsets`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetRequest {
    pub sensor_id: String,
    pub offset: f64,
}

pub async fn set_offset(
    State(service): State<AppState>,
    Json(request): Json<OffsetRequest>,
) -> ApiResult<Value> {
    service.set_offset(&request.sensor_id, request.offset)?;
    Ok(Json(json!({ "success": true, "offsets": service.offsets() })))
}

pub async fn get_history(
    State(service): State<AppState>,
    Query(range): Query<HistoryRange>,
) -> ApiResult<Value> {
    let records = service.get_history(&range).await?;
    Ok(Json(json!({ "count": records.len(), "records": records })))
}
