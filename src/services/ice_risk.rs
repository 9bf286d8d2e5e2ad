//! Ice-risk classification and heating decision policy.
//!
//! `evaluate` is a pure function over the forecast: it scans the next 24
//! forecast hours for temperatures in the icing band and for precipitation
//! near the freezing point, then maps the risk level to an actuation intent.

use serde::Serialize;
use utoipa::ToSchema;

use crate::services::met::WeatherForecast;

// Temperature bands for ice risk
const ICE_TEMP_MIN: f64 = -5.0;
const ICE_TEMP_MAX: f64 = 5.0;
const CRITICAL_TEMP_MIN: f64 = -1.0;
const CRITICAL_TEMP_MAX: f64 = 2.0;

/// How many forecast hours the classifier considers.
const FORECAST_HORIZON_HOURS: usize = 24;

/// Ice risk level, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IceRiskLevel {
    High,
    Moderate,
    Low,
    None,
}

/// Actuation intent produced by the decision policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HeatingDecision {
    TurnOn,
    TurnOff,
    Keep,
}

/// Temperature readings from the heating loop (°C).
///
/// A `None` means the sensor failed or is not configured; the engine treats
/// absent values as non-informative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReadings {
    pub loop_inlet: Option<f64>,
    pub loop_outlet: Option<f64>,
    pub hp_inlet: Option<f64>,
    pub hp_outlet: Option<f64>,
    pub tank: Option<f64>,
}

/// Hour counters behind a risk classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, ToSchema)]
pub struct RiskDetails {
    /// Hours with temperature in [-5 °C, +5 °C].
    pub ice_zone_hours: u32,
    /// Hours with temperature in [-1 °C, +2 °C].
    pub critical_hours: u32,
    /// Critical-band hours that also carry precipitation.
    pub precip_near_zero_hours: u32,
    /// Number of forecast entries considered.
    pub timeseries_count: usize,
}

/// Result of an ice-risk evaluation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EvaluationResult {
    pub decision: HeatingDecision,
    pub risk_level: IceRiskLevel,
    pub reason: String,
    pub details: RiskDetails,
}

/// Classify ice risk from the first 24 hours of the forecast.
///
/// Scans every forecast entry for:
/// - temperature inside the icing band [-5 °C, +5 °C]
/// - temperature near 0 °C combined with precipitation (most critical)
fn classify_risk(forecast: &WeatherForecast) -> (IceRiskLevel, RiskDetails) {
    let horizon = forecast
        .timeseries
        .iter()
        .take(FORECAST_HORIZON_HOURS);

    let mut details = RiskDetails::default();

    for snapshot in horizon {
        details.timeseries_count += 1;

        let Some(temp) = snapshot.air_temperature else {
            continue;
        };

        if (ICE_TEMP_MIN..=ICE_TEMP_MAX).contains(&temp) {
            details.ice_zone_hours += 1;
        }

        if (CRITICAL_TEMP_MIN..=CRITICAL_TEMP_MAX).contains(&temp) {
            details.critical_hours += 1;
            if snapshot.precipitation_amount.is_some_and(|p| p > 0.0) {
                details.precip_near_zero_hours += 1;
            }
        }
    }

    // Precipitation near 0 °C is the highest risk
    let level = if details.precip_near_zero_hours >= 1 {
        IceRiskLevel::High
    } else if details.critical_hours >= 4 {
        IceRiskLevel::High
    } else if details.ice_zone_hours >= 6 {
        IceRiskLevel::Moderate
    } else if details.ice_zone_hours >= 2 {
        IceRiskLevel::Low
    } else {
        IceRiskLevel::None
    };

    (level, details)
}

/// Evaluate ice risk and decide the heating action.
///
/// Pure function with no side effects. Decision policy:
/// - HIGH:     TURN_ON  (icing danger, run regardless of state)
/// - MODERATE: TURN_ON  (safety bias)
/// - LOW:      KEEP     (hysteresis — preserve the current state)
/// - NONE:     TURN_OFF (no danger, save energy)
///
/// `sensor_readings` is accepted for future policies but does not influence
/// the current decision.
pub fn evaluate(
    forecast: &WeatherForecast,
    sensor_readings: Option<&SensorReadings>,
    currently_on: bool,
) -> EvaluationResult {
    let _ = sensor_readings;

    let (risk_level, details) = classify_risk(forecast);

    match risk_level {
        IceRiskLevel::High => EvaluationResult {
            decision: HeatingDecision::TurnOn,
            risk_level,
            reason: "High ice risk — turning heating on".to_string(),
            details,
        },
        IceRiskLevel::Moderate => EvaluationResult {
            decision: HeatingDecision::TurnOn,
            risk_level,
            reason: "Moderate ice risk — turning heating on (safety bias)".to_string(),
            details,
        },
        IceRiskLevel::Low => {
            let state = if currently_on { "on" } else { "off" };
            EvaluationResult {
                decision: HeatingDecision::Keep,
                risk_level,
                reason: format!("Low ice risk — keeping current state ({})", state),
                details,
            }
        }
        IceRiskLevel::None => {
            let reason = if details.timeseries_count == 0 {
                "No forecast data available".to_string()
            } else {
                "No ice risk — turning heating off".to_string()
            };
            EvaluationResult {
                decision: HeatingDecision::TurnOff,
                risk_level,
                reason,
                details,
            }
        }
    }
}
