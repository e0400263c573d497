//! Door reed switch read through a sysfs-style GPIO value file.
//!
//! With `active_low` (the default wiring, input pulled up) a `0` on the pin
//! means the door is open.

use std::path::PathBuf;

use stockbox_core::DoorConfig;

use crate::error::{HardwareError, Result};
use crate::traits::{Device, DoorSensor};
use crate::types::DoorState;

/// Interpret a raw pin value.
pub fn decode_pin(raw: &str, active_low: bool) -> Result<DoorState> {
    let high = match raw.trim() {
        "0" => false,
        "1" => true,
        other => {
            return Err(HardwareError::invalid_data(format!(
                "unexpected GPIO value {other:?}"
            )));
        }
    };

    let open = if active_low { !high } else { high };
    Ok(if open { DoorState::Open } else { DoorState::Closed })
}

#[derive(Debug)]
pub struct GpioDoorSensor {
    name: String,
    path: PathBuf,
    active_low: bool,
    connected: bool,
}

impl GpioDoorSensor {
    pub fn new(config: &DoorConfig) -> Self {
        Self {
            name: format!("GPIO door {}", config.value_path.display()),
            path: config.value_path.clone(),
            active_low: config.active_low,
            connected: false,
        }
    }

    async fn read_pin(&self) -> Result<DoorState> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        decode_pin(&raw, self.active_low)
    }
}

impl Device for GpioDoorSensor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        self.read_pin().await?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    async fn health_check(&mut self) -> Result<()> {
        if !self.connected {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        self.read_pin().await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl DoorSensor for GpioDoorSensor {
    async fn read(&mut self) -> Result<DoorState> {
        if !self.connected {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        self.read_pin().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[rstest]
    #[case("0\n", true, DoorState::Open)]
    #[case("1\n", true, DoorState::Closed)]
    #[case("0", false, DoorState::Closed)]
    #[case("1", false, DoorState::Open)]
    fn test_decode_pin(#[case] raw: &str, #[case] active_low: bool, #[case] expected: DoorState) {
        assert_eq!(decode_pin(raw, active_low).unwrap(), expected);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_pin("x", true).is_err());
    }

    #[tokio::test]
    async fn test_reads_value_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "1").unwrap();

        let config = DoorConfig {
            value_path: file.path().to_path_buf(),
            active_low: true,
            poll_interval_ms: 10,
        };
        let mut sensor = GpioDoorSensor::new(&config);
        sensor.connect().await.unwrap();
        assert_eq!(sensor.read().await.unwrap(), DoorState::Closed);

        std::fs::write(file.path(), "0\n").unwrap();
        assert_eq!(sensor.read().await.unwrap(), DoorState::Open);
    }

    #[tokio::test]
    async fn test_missing_file_fails_connect() {
        let config = DoorConfig {
            value_path: PathBuf::from("/nonexistent/gpio/value"),
            active_low: true,
            poll_interval_ms: 10,
        };
        let mut sensor = GpioDoorSensor::new(&config);
        assert!(sensor.connect().await.is_err());
        assert!(!sensor.is_connected());
    }
}
