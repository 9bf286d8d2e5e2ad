//! Manual heating override endpoints.
//!
//! - POST /api/heating/on
//! - POST /api/heating/off
//!
//! Overrides drive the same state machine as the control loop and emit
//! `manual_on` / `manual_off` events. The next control cycle may immediately
//! revert the manual state if the policy disagrees; that is intentional.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::status::HeatingState;
use super::AppState;
use crate::errors::AppError;

/// Response to a manual override.
#[derive(Debug, Serialize, ToSchema)]
pub struct HeatingResponse {
    pub heating: HeatingState,
}

/// Manual override: turn heating on.
#[utoipa::path(
    post,
    path = "/api/heating/on",
    tag = "Heating",
    responses(
        (status = 200, description = "Heating turned on", body = HeatingResponse),
    )
)]
pub async fn heating_on(State(state): State<AppState>) -> Result<Json<HeatingResponse>, AppError> {
    {
        let mut controller = state.controller.lock().await;
        controller.turn_on()?;
    }
    state
        .store
        .log_event("manual_on", "Manual override: heating ON", None)
        .await?;
    tracing::info!("Manual override: heating ON");
    Ok(Json(HeatingResponse {
        heating: HeatingState { on: true },
    }))
}

/// Manual override: turn heating off.
#[utoipa::path(
    post,
    path = "/api/heating/off",
    tag = "Heating",
    responses(
        (status = 200, description = "Heating turned off", body = HeatingResponse),
    )
)]
pub async fn heating_off(State(state): State<AppState>) -> Result<Json<HeatingResponse>, AppError> {
    {
        let mut controller = state.controller.lock().await;
        controller.turn_off()?;
    }
    state
        .store
        .log_event("manual_off", "Manual override: heating OFF", None)
        .await?;
    tracing::info!("Manual override: heating OFF");
    Ok(Json(HeatingResponse {
        heating: HeatingState { on: false },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;

    #[tokio::test]
    async fn test_heating_on_actuates_and_logs_manual_event() {
        let state = test_state("http://127.0.0.1:9").await;

        let response = heating_on(State(state.clone())).await.unwrap();
        assert!(response.0.heating.on);
        assert!(state.controller.lock().await.is_on());

        let events = state.store.get_events(10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "manual_on"));
    }

    #[tokio::test]
    async fn test_heating_off_actuates_and_logs_manual_event() {
        let state = test_state("http://127.0.0.1:9").await;
        state.controller.lock().await.turn_on().unwrap();

        let response = heating_off(State(state.clone())).await.unwrap();
        assert!(!response.0.heating.on);
        assert!(!state.controller.lock().await.is_on());

        let events = state.store.get_events(10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "manual_off"));
    }
}
