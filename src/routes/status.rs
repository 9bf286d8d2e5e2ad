//! Read-only status endpoints.
//!
//! - GET /api/status  — dashboard summary: current weather, relay state, sensors
//! - GET /api/weather — current conditions plus the next 24 forecast hours
//! - GET /api/sensors — one fresh reading per configured sensor

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;
use crate::errors::{AppError, ErrorResponse};
use crate::services::met::WeatherSnapshot;

/// Current weather conditions, reduced to the fields the dashboard shows.
#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentWeather {
    pub air_temperature: Option<f64>,
    pub precipitation_amount: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

impl From<&WeatherSnapshot> for CurrentWeather {
    fn from(s: &WeatherSnapshot) -> Self {
        Self {
            air_temperature: s.air_temperature,
            precipitation_amount: s.precipitation_amount,
            relative_humidity: s.relative_humidity,
            wind_speed: s.wind_speed,
        }
    }
}

/// Relay state as shown to the dashboard.
#[derive(Debug, Serialize, ToSchema)]
pub struct HeatingState {
    pub on: bool,
}

/// Combined status response. `weather` is null while the forecast provider
/// is unreachable; the dashboard renders absent values as "unknown".
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub weather: Option<CurrentWeather>,
    pub heating: Option<HeatingState>,
    pub sensors: BTreeMap<String, Option<f64>>,
}

/// Weather response: the current snapshot and up to 24 forecast hours.
#[derive(Debug, Serialize, ToSchema)]
pub struct WeatherResponse {
    pub current: WeatherSnapshot,
    pub forecast: Vec<WeatherSnapshot>,
}

/// Sensor readings keyed by logical name.
#[derive(Debug, Serialize, ToSchema)]
pub struct SensorsResponse {
    pub sensors: BTreeMap<String, Option<f64>>,
}

async fn read_sensor_map(state: &AppState) -> BTreeMap<String, Option<f64>> {
    let reads = state
        .sensors
        .iter()
        .map(|(name, sensor)| async move { (name.clone(), sensor.read().await) });
    futures::future::join_all(reads).await.into_iter().collect()
}

/// Combined system status for the dashboard.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "Status",
    responses(
        (status = 200, description = "Current system status", body = StatusResponse),
    )
)]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let weather = state
        .met
        .fetch_forecast(state.lat, state.lon)
        .await
        .ok()
        .map(|f| CurrentWeather::from(&f.current));

    let heating = {
        let controller = state.controller.lock().await;
        Some(HeatingState {
            on: controller.is_on(),
        })
    };

    let sensors = read_sensor_map(&state).await;

    Json(StatusResponse {
        weather,
        heating,
        sensors,
    })
}

/// Current weather and the next 24 forecast hours.
#[utoipa::path(
    get,
    path = "/api/weather",
    tag = "Status",
    responses(
        (status = 200, description = "Current weather and forecast", body = WeatherResponse),
        (status = 502, description = "Forecast provider unreachable", body = ErrorResponse),
    )
)]
pub async fn weather(State(state): State<AppState>) -> Result<Json<WeatherResponse>, AppError> {
    let forecast = state.met.fetch_forecast(state.lat, state.lon).await?;
    let upcoming: Vec<WeatherSnapshot> = forecast.timeseries.iter().take(24).cloned().collect();
    Ok(Json(WeatherResponse {
        current: forecast.current,
        forecast: upcoming,
    }))
}

/// Read all configured sensors.
#[utoipa::path(
    get,
    path = "/api/sensors",
    tag = "Status",
    responses(
        (status = 200, description = "Current sensor readings", body = SensorsResponse),
    )
)]
pub async fn sensors(State(state): State<AppState>) -> Json<SensorsResponse> {
    Json(SensorsResponse {
        sensors: read_sensor_map(&state).await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;

    #[tokio::test]
    async fn test_status_reports_null_weather_when_provider_unreachable() {
        // Port 9 (discard) refuses connections; the fetch fails fast
        let state = test_state("http://127.0.0.1:9").await;
        let response = status(State(state)).await;

        assert!(response.0.weather.is_none());
        assert_eq!(response.0.heating.as_ref().map(|h| h.on), Some(false));
        assert_eq!(response.0.sensors.get("loop_inlet"), Some(&Some(25.0)));
    }

    #[tokio::test]
    async fn test_sensors_returns_one_entry_per_configured_sensor() {
        let state = test_state("http://127.0.0.1:9").await;
        let response = sensors(State(state)).await;
        assert_eq!(response.0.sensors.len(), 3);
        assert_eq!(response.0.sensors.get("tank"), Some(&None));
    }
}
