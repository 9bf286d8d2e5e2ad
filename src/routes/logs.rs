//! Raw log listing endpoint.
//!
//! GET /api/log?limit=N — the newest weather samples, sensor samples and
//! system events side by side.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::AppState;
use crate::db::models::{EventRow, SensorRow, WeatherRow};
use crate::errors::AppError;

#[derive(Debug, Deserialize, IntoParams)]
pub struct LogQuery {
    /// Maximum rows per table (default 50)
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Newest-first log listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct LogResponse {
    pub weather: Vec<WeatherRow>,
    pub sensors: Vec<SensorRow>,
    pub events: Vec<EventRow>,
}

/// Newest log rows from all three tables.
#[utoipa::path(
    get,
    path = "/api/log",
    tag = "Logs",
    params(LogQuery),
    responses(
        (status = 200, description = "Newest log rows", body = LogResponse),
    )
)]
pub async fn log(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogResponse>, AppError> {
    Ok(Json(LogResponse {
        weather: state.store.get_weather_log(query.limit).await?,
        sensors: state.store.get_sensor_log(None, query.limit).await?,
        events: state.store.get_events(query.limit).await?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;

    #[tokio::test]
    async fn test_log_returns_all_three_tables_newest_first() {
        let state = test_state("http://127.0.0.1:9").await;
        state
            .store
            .log_weather(Some(1.0), None, None, None, None)
            .await
            .unwrap();
        state
            .store
            .log_weather(Some(2.0), None, None, None, None)
            .await
            .unwrap();
        state.store.log_sensor("tank", 44.0, None).await.unwrap();
        state.store.log_event("startup", "", None).await.unwrap();

        let response = log(State(state), Query(LogQuery { limit: 1 }))
            .await
            .unwrap();

        assert_eq!(response.0.weather.len(), 1);
        assert_eq!(response.0.weather[0].temperature, Some(2.0));
        assert_eq!(response.0.sensors.len(), 1);
        assert_eq!(response.0.events.len(), 1);
    }
}
