//! Dual-relay heating controller on Raspberry Pi GPIO.
//!
//! K1 drives the heat pump, K2 the circulation pump. K2 always mirrors K1;
//! there is no state where one runs without the other.

use rppal::gpio::{Gpio, Level, OutputPin};

use crate::errors::AppError;

#[derive(Debug)]
pub struct RelayController {
    k1: Option<OutputPin>,
    k2: Option<OutputPin>,
    active_high: bool,
    on: bool,
}

/// Electrical level that puts a line of the given polarity into `logical_on`.
fn line_level(active_high: bool, logical_on: bool) -> Level {
    if logical_on == active_high {
        Level::High
    } else {
        Level::Low
    }
}

impl RelayController {
    /// Claim both GPIO lines. Both start in the logical OFF state.
    pub fn new(
        heat_pump_pin: u8,
        circulation_pump_pin: u8,
        active_high: bool,
    ) -> Result<Self, AppError> {
        let gpio =
            Gpio::new().map_err(|e| AppError::Hardware(format!("GPIO init failed: {}", e)))?;

        let claim = |pin: u8| -> Result<OutputPin, AppError> {
            let pin = gpio
                .get(pin)
                .map_err(|e| AppError::Hardware(format!("GPIO{} unavailable: {}", pin, e)))?;
            Ok(if active_high {
                pin.into_output_low()
            } else {
                pin.into_output_high()
            })
        };

        let k1 = claim(heat_pump_pin)?;
        let k2 = claim(circulation_pump_pin)?;

        tracing::info!(
            "Relay controller ready: K1=GPIO{}, K2=GPIO{}",
            heat_pump_pin,
            circulation_pump_pin,
        );

        Ok(Self {
            k1: Some(k1),
            k2: Some(k2),
            active_high,
            on: false,
        })
    }

    /// Energize heat pump and circulation pump together.
    pub fn turn_on(&mut self) -> Result<(), AppError> {
        self.write_both(true)?;
        self.on = true;
        tracing::info!("Relays ON (K1 + K2)");
        Ok(())
    }

    /// De-energize heat pump and circulation pump together.
    pub fn turn_off(&mut self) -> Result<(), AppError> {
        self.write_both(false)?;
        self.on = false;
        tracing::info!("Relays OFF (K1 + K2)");
        Ok(())
    }

    /// Last successfully commanded state; not a hardware readback.
    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Drive both lines to OFF and release them.
    pub fn close(&mut self) {
        let level = line_level(self.active_high, false);
        if let Some(k1) = self.k1.as_mut() {
            k1.write(level);
        }
        if let Some(k2) = self.k2.as_mut() {
            k2.write(level);
        }
        self.k1 = None;
        self.k2 = None;
        tracing::info!("GPIO lines released");
    }

    // The commanded state only changes after both pins were written, so K2
    // can never diverge from K1.
    fn write_both(&mut self, logical_on: bool) -> Result<(), AppError> {
        let level = line_level(self.active_high, logical_on);
        match (self.k1.as_mut(), self.k2.as_mut()) {
            (Some(k1), Some(k2)) => {
                k1.write(level);
                k2.write(level);
                Ok(())
            }
            _ => Err(AppError::Hardware("GPIO lines already released".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_level_active_high() {
        assert_eq!(line_level(true, true), Level::High);
        assert_eq!(line_level(true, false), Level::Low);
    }

    #[test]
    fn test_line_level_active_low() {
        assert_eq!(line_level(false, true), Level::Low);
        assert_eq!(line_level(false, false), Level::High);
    }
}
