//! Scheduled control pipeline.
//!
//! Three periodic jobs share the runtime: a one-minute sensor poll, a
//! ten-minute control cycle and an hourly sensor-log compaction. The sensor
//! poll and the control cycle also run once immediately at startup. Any
//! failure inside a job is caught, logged and recorded as an `error` event;
//! the scheduler always continues.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::db::store::Store;
use crate::errors::AppError;
use crate::hal::{SharedController, TemperatureSensor};
use crate::services::ice_risk::{evaluate, EvaluationResult, HeatingDecision, SensorReadings};
use crate::services::met::MetClient;

/// Sensor poll period (seconds).
const SENSOR_POLL_PERIOD_SECS: u64 = 60;

/// Control cycle period (seconds).
const CONTROL_CYCLE_PERIOD_SECS: u64 = 600;

/// Compaction period (seconds).
const COMPACTION_PERIOD_SECS: u64 = 3600;

/// Everything the periodic jobs need. Cheap to clone; each long-lived
/// resource has exactly one owner behind the shared handles.
#[derive(Clone)]
pub struct ControlContext {
    pub store: Store,
    pub met: MetClient,
    pub sensors: Arc<BTreeMap<String, TemperatureSensor>>,
    pub controller: SharedController,
    pub lat: f64,
    pub lon: f64,
}

/// Run the sensor poll and control cycle once, then hand the three jobs to
/// their periodic loops.
pub async fn start(ctx: ControlContext) {
    tracing::info!("Scheduler started");

    sensor_poll(&ctx).await;
    control_cycle(&ctx).await;

    let poll_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut tick = periodic(SENSOR_POLL_PERIOD_SECS).await;
        loop {
            tick.tick().await;
            sensor_poll(&poll_ctx).await;
        }
    });

    let cycle_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut tick = periodic(CONTROL_CYCLE_PERIOD_SECS).await;
        loop {
            tick.tick().await;
            control_cycle(&cycle_ctx).await;
        }
    });

    tokio::spawn(async move {
        let mut tick = periodic(COMPACTION_PERIOD_SECS).await;
        loop {
            tick.tick().await;
            run_compaction(&ctx).await;
        }
    });
}

/// Build an interval whose first tick lies one full period in the future
/// (the immediate tick is consumed here).
async fn periodic(period_secs: u64) -> tokio::time::Interval {
    let mut tick = tokio::time::interval(Duration::from_secs(period_secs));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick.tick().await;
    tick
}

/// Read every sensor concurrently into a named readings bundle.
pub async fn read_all_sensors(sensors: &BTreeMap<String, TemperatureSensor>) -> SensorReadings {
    let reads = sensors
        .iter()
        .map(|(name, sensor)| async move { (name.as_str(), sensor.read().await) });
    let values: BTreeMap<&str, Option<f64>> = join_all(reads).await.into_iter().collect();

    let get = |name: &str| values.get(name).copied().flatten();
    SensorReadings {
        loop_inlet: get("loop_inlet"),
        loop_outlet: get("loop_outlet"),
        hp_inlet: get("hp_inlet"),
        hp_outlet: get("hp_outlet"),
        tank: get("tank"),
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Sensor poll: read all sensors concurrently and log every present value
/// with one shared cycle timestamp so the samples align as columns.
async fn sensor_poll(ctx: &ControlContext) {
    if let Err(e) = sensor_poll_inner(ctx).await {
        tracing::error!("Sensor poll failed: {}", e);
        record_job_error(ctx, &format!("Sensor poll failed: {}", e)).await;
    }
}

async fn sensor_poll_inner(ctx: &ControlContext) -> Result<(), AppError> {
    let cycle_ts = Utc::now();

    let reads = ctx
        .sensors
        .iter()
        .map(|(name, sensor)| async move { (name.as_str(), sensor.read().await) });

    for (name, value) in join_all(reads).await {
        if let Some(value) = value {
            ctx.store.log_sensor(name, value, Some(cycle_ts)).await?;
        }
    }
    Ok(())
}

/// Control cycle: read sensors, fetch the forecast, log the current weather,
/// evaluate ice risk and actuate the relays when the decision differs from
/// the present state.
async fn control_cycle(ctx: &ControlContext) {
    match control_cycle_inner(ctx).await {
        Ok(result) => {
            tracing::info!(
                "Control cycle: {} (risk={:?}, decision={:?})",
                result.reason,
                result.risk_level,
                result.decision,
            );
        }
        Err(e) => {
            tracing::error!("Control cycle failed: {}", e);
            record_job_error(ctx, &format!("Control cycle failed: {}", e)).await;
        }
    }
}

async fn control_cycle_inner(ctx: &ControlContext) -> Result<EvaluationResult, AppError> {
    // Readings feed the evaluation only; persistence is the sensor poll's job
    let readings = read_all_sensors(&ctx.sensors).await;

    let forecast = ctx.met.fetch_forecast(ctx.lat, ctx.lon).await?;
    let current = &forecast.current;
    ctx.store
        .log_weather(
            current.air_temperature,
            current.precipitation_amount,
            current.relative_humidity,
            current.wind_speed,
            None,
        )
        .await?;

    // Holding the lock across actuation keeps manual overrides from
    // interleaving with a half-finished cycle.
    let mut controller = ctx.controller.lock().await;
    let currently_on = controller.is_on();
    let result = evaluate(&forecast, Some(&readings), currently_on);

    match result.decision {
        HeatingDecision::TurnOn if !currently_on => {
            controller.turn_on()?;
            ctx.store.log_event("heating_on", &result.reason, None).await?;
        }
        HeatingDecision::TurnOff if currently_on => {
            controller.turn_off()?;
            ctx.store
                .log_event("heating_off", &result.reason, None)
                .await?;
        }
        _ => {}
    }

    Ok(result)
}

/// Hourly rolling compaction of the sensor log.
async fn run_compaction(ctx: &ControlContext) {
    match ctx.store.compact_sensor_data().await {
        Ok(()) => tracing::info!("Sensor data compaction complete"),
        Err(e) => {
            tracing::error!("Compaction failed: {}", e);
            record_job_error(ctx, &format!("Compaction failed: {}", e)).await;
        }
    }
}

async fn record_job_error(ctx: &ControlContext, message: &str) {
    if let Err(e) = ctx.store.log_event("error", message, None).await {
        tracing::error!("Failed to record error event: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{HeatingController, StubController, StubSensor};
    use tokio::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forecast_body(temperature: f64, precipitation: f64) -> serde_json::Value {
        let timeseries: Vec<serde_json::Value> = (0..24)
            .map(|i| {
                serde_json::json!({
                    "time": format!("2026-01-15T{:02}:00:00Z", i),
                    "data": {
                        "instant": {
                            "details": {
                                "air_temperature": temperature,
                                "relative_humidity": 80.0,
                                "wind_speed": 2.0
                            }
                        },
                        "next_1_hours": {
                            "details": { "precipitation_amount": precipitation }
                        }
                    }
                })
            })
            .collect();
        serde_json::json!({ "properties": { "timeseries": timeseries } })
    }

    async fn context_with_forecast(body: serde_json::Value) -> (ControlContext, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        (context_against(&server.uri()).await, server)
    }

    async fn context_against(base_url: &str) -> ControlContext {
        let mut sensors = BTreeMap::new();
        sensors.insert(
            "loop_inlet".to_string(),
            TemperatureSensor::Stub(StubSensor::new("loop_inlet", Some(25.0))),
        );
        sensors.insert(
            "loop_outlet".to_string(),
            TemperatureSensor::Stub(StubSensor::new("loop_outlet", Some(22.0))),
        );
        sensors.insert(
            "tank".to_string(),
            TemperatureSensor::Stub(StubSensor::new("tank", None)),
        );

        ControlContext {
            store: Store::open_in_memory().await.unwrap(),
            met: MetClient::for_test("frostguard-test/0.1", base_url),
            sensors: Arc::new(sensors),
            controller: Arc::new(Mutex::new(HeatingController::Stub(StubController::new()))),
            lat: 59.91,
            lon: 10.75,
        }
    }

    #[tokio::test]
    async fn test_read_all_sensors_maps_names() {
        let (ctx, _server) = context_with_forecast(forecast_body(15.0, 0.0)).await;
        let readings = read_all_sensors(&ctx.sensors).await;
        assert_eq!(readings.loop_inlet, Some(25.0));
        assert_eq!(readings.loop_outlet, Some(22.0));
        assert_eq!(readings.tank, None, "failed sensor stays absent");
        assert_eq!(readings.hp_inlet, None, "unconfigured sensor stays absent");
    }

    #[tokio::test]
    async fn test_sensor_poll_shares_one_cycle_timestamp() {
        let (ctx, _server) = context_with_forecast(forecast_body(15.0, 0.0)).await;
        sensor_poll(&ctx).await;

        let rows = ctx.store.get_sensor_log(None, 100).await.unwrap();
        assert_eq!(rows.len(), 2, "only present values are logged");
        assert_eq!(rows[0].timestamp, rows[1].timestamp);
    }

    #[tokio::test]
    async fn test_control_cycle_turns_on_at_high_risk() {
        // Precipitation at 0.5 °C → HIGH risk
        let (ctx, _server) = context_with_forecast(forecast_body(0.5, 1.0)).await;
        control_cycle(&ctx).await;

        assert!(ctx.controller.lock().await.is_on());
        let events = ctx.store.get_events(100).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "heating_on"));
    }

    #[tokio::test]
    async fn test_control_cycle_turns_off_when_risk_clears() {
        let (ctx, _server) = context_with_forecast(forecast_body(15.0, 0.0)).await;
        ctx.controller.lock().await.turn_on().unwrap();

        control_cycle(&ctx).await;

        assert!(!ctx.controller.lock().await.is_on());
        let events = ctx.store.get_events(100).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "heating_off"));
    }

    #[tokio::test]
    async fn test_control_cycle_does_not_toggle_when_state_matches() {
        let (ctx, _server) = context_with_forecast(forecast_body(15.0, 0.0)).await;

        control_cycle(&ctx).await;

        assert!(!ctx.controller.lock().await.is_on());
        let events = ctx.store.get_events(100).await.unwrap();
        assert!(!events
            .iter()
            .any(|e| e.event_type == "heating_on" || e.event_type == "heating_off"));
    }

    #[tokio::test]
    async fn test_control_cycle_keeps_state_at_low_risk() {
        // Three icing-band hours → LOW risk → hysteresis
        let mut timeseries: Vec<serde_json::Value> = Vec::new();
        for i in 0..24 {
            let temp = if i < 3 { 3.0 } else { 15.0 };
            timeseries.push(serde_json::json!({
                "time": format!("2026-01-15T{:02}:00:00Z", i),
                "data": { "instant": { "details": { "air_temperature": temp } } }
            }));
        }
        let body = serde_json::json!({ "properties": { "timeseries": timeseries } });

        let (ctx, _server) = context_with_forecast(body).await;
        ctx.controller.lock().await.turn_on().unwrap();

        control_cycle(&ctx).await;

        assert!(ctx.controller.lock().await.is_on(), "KEEP preserves the state");
        let events = ctx.store.get_events(100).await.unwrap();
        assert!(!events
            .iter()
            .any(|e| e.event_type == "heating_on" || e.event_type == "heating_off"));
    }

    #[tokio::test]
    async fn test_control_cycle_logs_current_weather() {
        let (ctx, _server) = context_with_forecast(forecast_body(15.0, 0.0)).await;
        control_cycle(&ctx).await;

        let weather = ctx.store.get_weather_log(10).await.unwrap();
        assert_eq!(weather.len(), 1);
        assert_eq!(weather[0].temperature, Some(15.0));
        assert_eq!(weather[0].precipitation, Some(0.0));
    }

    #[tokio::test]
    async fn test_control_cycle_records_error_event_on_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let ctx = context_against(&server.uri()).await;

        control_cycle(&ctx).await;

        assert!(!ctx.controller.lock().await.is_on(), "cycle aborts before actuation");
        let events = ctx.store.get_events(100).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "error"));
    }
}
