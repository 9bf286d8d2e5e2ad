use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// One row of the `weather_log` table.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct WeatherRow {
    pub id: i64,
    /// ISO 8601 with explicit UTC offset.
    pub timestamp: String,
    pub temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
}

/// One row of the `sensor_log` table.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct SensorRow {
    pub id: i64,
    pub timestamp: String,
    pub sensor_id: String,
    pub value: f64,
    /// Compaction tier: 0 = raw, 1 = 5-minute average, 2 = 30-minute average.
    pub compacted: i64,
}

/// One row of the `system_events` table.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct EventRow {
    pub id: i64,
    pub timestamp: String,
    pub event_type: String,
    pub message: String,
}

/// A pivoted sensor-history record: one timestamp, one column per logical
/// sensor. Absent columns mean no sample for that sensor in the slot.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct SensorHistoryRow {
    pub timestamp: String,
    pub loop_inlet: Option<f64>,
    pub loop_outlet: Option<f64>,
    pub hp_inlet: Option<f64>,
    pub hp_outlet: Option<f64>,
    pub tank: Option<f64>,
}

impl SensorHistoryRow {
    /// Assign a value to the column matching `sensor_id`; unknown ids are
    /// dropped from the pivot.
    pub(crate) fn set_value(&mut self, sensor_id: &str, value: f64) {
        match sensor_id {
            "loop_inlet" => self.loop_inlet = Some(value),
            "loop_outlet" => self.loop_outlet = Some(value),
            "hp_inlet" => self.hp_inlet = Some(value),
            "hp_outlet" => self.hp_outlet = Some(value),
            "tank" => self.tank = Some(value),
            _ => {}
        }
    }
}
