//! DS18B20 one-wire temperature probe.
//!
//! Reads the kernel pseudo-file `/sys/bus/w1/devices/{id}/w1_slave`. The
//! filesystem read blocks, so it runs on tokio's blocking worker pool.

use std::path::{Path, PathBuf};

const W1_DEVICES_PATH: &str = "/sys/bus/w1/devices";

#[derive(Debug, Clone)]
pub struct Ds18b20Sensor {
    sensor_id: String,
    path: PathBuf,
}

impl Ds18b20Sensor {
    pub fn new(sensor_id: &str) -> Self {
        let path = Path::new(W1_DEVICES_PATH)
            .join(sensor_id)
            .join("w1_slave");
        Self {
            sensor_id: sensor_id.to_string(),
            path,
        }
    }

    #[cfg(test)]
    fn with_path(sensor_id: &str, path: PathBuf) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            path,
        }
    }

    pub fn id(&self) -> &str {
        &self.sensor_id
    }

    /// Read the temperature in °C. Returns `None` on any failure.
    pub async fn read(&self) -> Option<f64> {
        let path = self.path.clone();
        let sensor_id = self.sensor_id.clone();
        match tokio::task::spawn_blocking(move || read_sync(&path, &sensor_id)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Sensor {} read task failed: {}", self.sensor_id, e);
                None
            }
        }
    }
}

fn read_sync(path: &Path, sensor_id: &str) -> Option<f64> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => {
            tracing::warn!("Cannot read sensor {}", sensor_id);
            return None;
        }
    };

    let value = parse_w1_payload(&text);
    if value.is_none() {
        tracing::warn!("Unexpected w1_slave payload from sensor {}", sensor_id);
    }
    value
}

/// Parse a `w1_slave` payload.
///
/// Line 1 must end with `YES` (CRC ok); line 2 must contain a single
/// `t=<integer>` holding thousandths of a degree Celsius.
fn parse_w1_payload(text: &str) -> Option<f64> {
    let mut lines = text.trim().lines();
    let crc_line = lines.next()?;
    let temp_line = lines.next()?;

    if !crc_line.trim_end().ends_with("YES") {
        return None;
    }

    let mut parts = temp_line.split("t=");
    parts.next()?;
    let raw = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let millidegrees: i64 = raw.trim().parse().ok()?;
    Some(millidegrees as f64 / 1000.0)
}
