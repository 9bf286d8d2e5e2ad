//! Hardware abstraction layer.
//!
//! Sensors and the heating controller are small capability sets with one
//! tagged variant per concrete implementation, selected from configuration
//! at construction. The stub variants keep the whole system operational on
//! machines without the real hardware.

pub mod ds18b20;
pub mod relay;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::errors::AppError;
use ds18b20::Ds18b20Sensor;
use relay::RelayController;

/// A temperature sensor: stable id plus a read that surfaces every failure
/// as an absent value.
#[derive(Debug, Clone)]
pub enum TemperatureSensor {
    Ds18b20(Ds18b20Sensor),
    Stub(StubSensor),
}

impl TemperatureSensor {
    pub fn id(&self) -> &str {
        match self {
            TemperatureSensor::Ds18b20(s) => s.id(),
            TemperatureSensor::Stub(s) => s.id(),
        }
    }

    /// Read the temperature in °C. Returns `None` on any error.
    pub async fn read(&self) -> Option<f64> {
        match self {
            TemperatureSensor::Ds18b20(s) => s.read().await,
            TemperatureSensor::Stub(s) => s.read(),
        }
    }
}

/// Stub sensor for development and testing without hardware.
#[derive(Debug, Clone)]
pub struct StubSensor {
    sensor_id: String,
    value: Option<f64>,
}

impl StubSensor {
    pub fn new(sensor_id: &str, value: Option<f64>) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            value,
        }
    }

    pub fn id(&self) -> &str {
        &self.sensor_id
    }

    pub fn read(&self) -> Option<f64> {
        self.value
    }
}

/// The interlocked heat-pump + circulation-pump actuator.
#[derive(Debug)]
pub enum HeatingController {
    Relay(RelayController),
    Stub(StubController),
}

/// Shared controller handle: one long-lived owner, accessed through the lock
/// by the control loop and the manual-override endpoints.
pub type SharedController = Arc<Mutex<HeatingController>>;

impl HeatingController {
    pub fn turn_on(&mut self) -> Result<(), AppError> {
        match self {
            HeatingController::Relay(c) => c.turn_on(),
            HeatingController::Stub(c) => c.turn_on(),
        }
    }

    pub fn turn_off(&mut self) -> Result<(), AppError> {
        match self {
            HeatingController::Relay(c) => c.turn_off(),
            HeatingController::Stub(c) => c.turn_off(),
        }
    }

    /// Reflects the last successful command, not hardware readback.
    pub fn is_on(&self) -> bool {
        match self {
            HeatingController::Relay(c) => c.is_on(),
            HeatingController::Stub(c) => c.is_on(),
        }
    }

    /// Release hardware resources. No-op for the stub.
    pub fn close(&mut self) {
        if let HeatingController::Relay(c) = self {
            c.close();
        }
    }
}

/// Stub controller holding its state in memory.
#[derive(Debug, Default)]
pub struct StubController {
    on: bool,
}

impl StubController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_on(&mut self) -> Result<(), AppError> {
        self.on = true;
        tracing::info!("Stub controller: ON");
        Ok(())
    }

    pub fn turn_off(&mut self) -> Result<(), AppError> {
        self.on = false;
        tracing::info!("Stub controller: OFF");
        Ok(())
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}
