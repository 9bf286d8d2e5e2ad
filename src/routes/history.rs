//! Sensor and heating history endpoint.
//!
//! GET /api/history?hours=H — pivoted sensor rows, heating-period events and
//! the present relay state for the dashboard charts.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::AppState;
use crate::db::models::{EventRow, SensorHistoryRow};
use crate::errors::AppError;

/// Cap on pivoted rows per response; wider windows are averaged down to it.
const HISTORY_ROW_LIMIT: usize = 500;

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Window size in hours (default 24)
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

/// History response for the dashboard charts.
#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    /// Time-ordered pivoted sensor rows.
    pub sensors: Vec<SensorHistoryRow>,
    /// Time-ordered heating on/off events (automatic and manual).
    pub heating_periods: Vec<EventRow>,
    /// Present relay state.
    pub heating_on: bool,
}

/// Sensor and heating history over the requested window.
#[utoipa::path(
    get,
    path = "/api/history",
    tag = "History",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Sensor and heating history", body = HistoryResponse),
    )
)]
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let sensors = state
        .store
        .get_sensor_history(query.hours, HISTORY_ROW_LIMIT)
        .await?;
    let heating_periods = state.store.get_heating_periods(query.hours).await?;
    let heating_on = state.controller.lock().await.is_on();

    Ok(Json(HistoryResponse {
        sensors,
        heating_periods,
        heating_on,
    }))
}
