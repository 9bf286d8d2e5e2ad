// frostguard v0.1
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod db;
mod errors;
mod hal;
mod routes;
mod services;

use config::AppConfig;
use db::store::Store;
use hal::ds18b20::Ds18b20Sensor;
use hal::relay::RelayController;
use hal::{HeatingController, StubController, StubSensor, TemperatureSensor};
use routes::AppState;
use services::control::ControlContext;
use services::met::MetClient;

/// Logical sensor names the store pivots on.
const LOGICAL_SENSORS: [&str; 5] = ["loop_inlet", "loop_outlet", "hp_inlet", "hp_outlet", "tank"];

/// frostguard — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "frostguard",
        version = "0.1.0",
        description = "Ice-prevention controller for a ground-loop heat pump installation. \
            Polls temperature probes and the MET Norway forecast, classifies icing risk \
            in the exterior ground loop, and drives the heat-pump and circulation-pump \
            relays accordingly.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Status", description = "Current weather, relay and sensor state"),
        (name = "Heating", description = "Manual heating override"),
        (name = "History", description = "Sensor and heating history"),
        (name = "Logs", description = "Raw log listings"),
    ),
    paths(
        routes::status::status,
        routes::status::weather,
        routes::status::sensors,
        routes::heating::heating_on,
        routes::heating::heating_off,
        routes::history::history,
        routes::logs::log,
    ),
    components(
        schemas(
            routes::status::StatusResponse,
            routes::status::CurrentWeather,
            routes::status::HeatingState,
            routes::status::WeatherResponse,
            routes::status::SensorsResponse,
            routes::heating::HeatingResponse,
            routes::history::HistoryResponse,
            routes::logs::LogResponse,
            services::met::WeatherSnapshot,
            db::models::WeatherRow,
            db::models::SensorRow,
            db::models::EventRow,
            db::models::SensorHistoryRow,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frostguard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load(None).expect("Failed to load configuration");
    tracing::info!(
        "Forecast location {:.4}, {:.4} (weather poll interval {} min)",
        config.location.lat,
        config.location.lon,
        config.weather.poll_interval_minutes,
    );
    if let Some(gl) = &config.ground_loop {
        tracing::info!(
            "Ground loop: {} loops, {} m of {}/{} mm pipe",
            gl.loops,
            gl.total_length_m,
            gl.pipe_outer_mm,
            gl.pipe_wall_mm,
        );
    }
    if let Some(tank) = &config.tank {
        tracing::info!("Buffer tank: {} l", tank.volume_liters);
    }

    let store = Store::open(&config.database.path)
        .await
        .expect("Failed to open database");
    tracing::info!("Database ready at {}", config.database.path);

    let met = MetClient::new(&config.weather.user_agent);
    let sensors = Arc::new(build_sensors(&config));
    let controller = Arc::new(Mutex::new(build_controller(&config)));

    store
        .log_event("startup", "frostguard started", None)
        .await
        .expect("Failed to record startup event");

    // Run the sensor poll and control cycle once, then start the periodic jobs
    let ctx = ControlContext {
        store: store.clone(),
        met: met.clone(),
        sensors: sensors.clone(),
        controller: controller.clone(),
        lat: config.location.lat,
        lon: config.location.lon,
    };
    services::control::start(ctx).await;

    let app_state = AppState {
        store: store.clone(),
        met,
        sensors,
        controller: controller.clone(),
        lat: config.location.lat,
        lon: config.location.lon,
    };

    // CORS — local dashboard plus manual overrides
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/api/status", get(routes::status::status))
        .route("/api/weather", get(routes::status::weather))
        .route("/api/sensors", get(routes::status::sensors))
        .route("/api/log", get(routes::logs::log))
        .route("/api/history", get(routes::history::history))
        .route("/api/heating/on", post(routes::heating::heating_on))
        .route("/api/heating/off", post(routes::heating::heating_off))
        .with_state(app_state);

    // The bundled dashboard: "/" resolves to static/index.html
    let app = Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback_service(ServeDir::new("static").append_index_html_on_directories(true))
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port)
        .parse()
        .expect("Invalid web.host/web.port");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    tracing::info!("Web server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server terminated unexpectedly");

    // Release hardware and the database before exiting
    controller.lock().await.close();
    store.close().await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
}

/// Default stub reading for a logical sensor name.
fn stub_default(name: &str) -> f64 {
    match name {
        "loop_inlet" => 0.5,
        "loop_outlet" => 4.2,
        "hp_inlet" => 35.0,
        "hp_outlet" => 45.8,
        "tank" => 44.1,
        _ => 20.0,
    }
}

/// Create sensors from configuration, falling back to stubs.
///
/// Sensor ids containing the placeholder marker "xxx" (as shipped in
/// config.example.yaml) get stubs so an unedited config still produces a
/// working system.
fn build_sensors(config: &AppConfig) -> BTreeMap<String, TemperatureSensor> {
    let mut sensors = BTreeMap::new();

    let Some(configured) = &config.sensors else {
        tracing::info!("No sensors configured — using stubs");
        for name in LOGICAL_SENSORS {
            sensors.insert(
                name.to_string(),
                TemperatureSensor::Stub(StubSensor::new(name, Some(20.0))),
            );
        }
        return sensors;
    };

    for (name, sensor_cfg) in configured {
        if sensor_cfg.id.contains("xxx") {
            let value = stub_default(name);
            tracing::info!(
                "Sensor {}: placeholder id — using stub ({:.1} °C)",
                name,
                value,
            );
            sensors.insert(
                name.clone(),
                TemperatureSensor::Stub(StubSensor::new(name, Some(value))),
            );
        } else {
            sensors.insert(
                name.clone(),
                TemperatureSensor::Ds18b20(Ds18b20Sensor::new(&sensor_cfg.id)),
            );
        }
    }

    let summary: Vec<String> = sensors
        .iter()
        .map(|(name, sensor)| format!("{}={}", name, sensor.id()))
        .collect();
    tracing::info!("Sensors ready: {:?}", summary);
    sensors
}

/// Create the relay controller from configuration, falling back to the stub.
fn build_controller(config: &AppConfig) -> HeatingController {
    let Some(relays) = &config.relays else {
        tracing::info!("No relays configured — using stub controller");
        return HeatingController::Stub(StubController::new());
    };

    let (Some(hp), Some(cp)) = (relays.get("heat_pump"), relays.get("circulation_pump")) else {
        tracing::warn!("Missing heat_pump/circulation_pump relay config — using stub controller");
        return HeatingController::Stub(StubController::new());
    };

    match RelayController::new(hp.gpio_pin, cp.gpio_pin, hp.active_high) {
        Ok(controller) => {
            tracing::info!(
                "Relay controller created (GPIO{}, GPIO{})",
                hp.gpio_pin,
                cp.gpio_pin,
            );
            HeatingController::Relay(controller)
        }
        Err(e) => {
            tracing::warn!(
                "Cannot initialize relay controller ({}) — using stub controller",
                e,
            );
            HeatingController::Stub(StubController::new())
        }
    }
}
