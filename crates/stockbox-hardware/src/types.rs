//! Common types shared across hardware device implementations.
//!
//! This module defines the device inventory ([`DeviceKind`], [`DeviceRecord`],
//! [`HealthReport`]) and the values exchanged with drivers ([`DoorState`],
//! [`LedColor`], [`Animation`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four physical subsystems of a kiosk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Relay bank driving the door locks and the dispense motor.
    LockBank,

    /// Addressable light strip.
    LightStrip,

    /// Door position sensor.
    DoorSensor,

    /// Audio output.
    Audio,
}

impl DeviceKind {
    /// All device kinds in reporting order.
    pub const ALL: [DeviceKind; 4] = [
        DeviceKind::LockBank,
        DeviceKind::LightStrip,
        DeviceKind::DoorSensor,
        DeviceKind::Audio,
    ];
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockBank => write!(f, "lock bank"),
            Self::LightStrip => write!(f, "light strip"),
            Self::DoorSensor => write!(f, "door sensor"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Connectivity and fallback status of one device.
///
/// Owned by the device's manager worker; everyone else sees copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub kind: DeviceKind,
    pub connected: bool,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,

    /// Commands are currently routed to the simulated driver.
    pub using_fallback: bool,
}

impl DeviceRecord {
    /// A fresh, not yet connected record.
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            connected: false,
            last_health_check_at: None,
            consecutive_failures: 0,
            using_fallback: false,
        }
    }

    /// Whether the user-visible status differs from `other`.
    pub fn status_changed(&self, other: &DeviceRecord) -> bool {
        self.connected != other.connected || self.using_fallback != other.using_fallback
    }
}

/// Snapshot of all device records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub devices: Vec<DeviceRecord>,
}

impl HealthReport {
    /// Record for one device kind.
    pub fn get(&self, kind: DeviceKind) -> Option<&DeviceRecord> {
        self.devices.iter().find(|record| record.kind == kind)
    }

    /// Every device is served by its real driver.
    pub fn all_real(&self) -> bool {
        self.devices.iter().all(|record| !record.using_fallback)
    }

    /// Devices currently running on their simulated driver.
    pub fn fallbacks(&self) -> impl Iterator<Item = DeviceKind> + '_ {
        self.devices
            .iter()
            .filter(|record| record.using_fallback)
            .map(|record| record.kind)
    }
}

/// Debounced door position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Open,
    Closed,
}

impl DoorState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// LED colors for the light strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LedColor {
    /// LED off.
    Off,

    Red,
    Green,
    Blue,
    Amber,
    White,

    /// Custom RGB color (red, green, blue).
    Custom(u8, u8, u8),
}

impl LedColor {
    /// Create a custom RGB LED color.
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::Custom(r, g, b)
    }

    /// Get the RGB components of the LED color.
    pub fn as_rgb(&self) -> (u8, u8, u8) {
        match self {
            Self::Off => (0, 0, 0),
            Self::Red => (255, 0, 0),
            Self::Green => (0, 255, 0),
            Self::Blue => (0, 0, 255),
            Self::Amber => (255, 191, 0),
            Self::White => (255, 255, 255),
            Self::Custom(r, g, b) => (*r, *g, *b),
        }
    }

    /// Scale the color by `brightness / 255`.
    pub fn scaled(&self, brightness: u8) -> (u8, u8, u8) {
        let (r, g, b) = self.as_rgb();
        let scale = |c: u8| ((u16::from(c) * u16::from(brightness)) / 255) as u8;
        (scale(r), scale(g), scale(b))
    }
}

/// Named light strip presets.
///
/// Drivers render each preset as a solid fill of [`Animation::base_color`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Animation {
    Idle,
    Sleep,
    Wake,
    ValidPurchase,
    InvalidPurchase,
    DoorAlarm,
    Off,
}

impl Animation {
    pub fn base_color(&self) -> LedColor {
        match self {
            Self::Idle | Self::Wake => LedColor::White,
            Self::Sleep => LedColor::Blue,
            Self::ValidPurchase => LedColor::Green,
            Self::InvalidPurchase | Self::DoorAlarm => LedColor::Red,
            Self::Off => LedColor::Off,
        }
    }

    /// Effective brightness for this preset given the configured level.
    pub fn brightness(&self, configured: u8) -> u8 {
        match self {
            Self::Sleep => configured / 8,
            Self::DoorAlarm => u8::MAX,
            Self::Off => 0,
            _ => configured,
        }
    }
}

impl fmt::Display for Animation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Sleep => "sleep",
            Self::Wake => "wake",
            Self::ValidPurchase => "valid_purchase",
            Self::InvalidPurchase => "invalid_purchase",
            Self::DoorAlarm => "door_alarm",
            Self::Off => "off",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_record_new() {
        let record = DeviceRecord::new(DeviceKind::LockBank);
        assert!(!record.connected);
        assert!(!record.using_fallback);
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_health_check_at.is_none());
    }

    #[test]
    fn test_status_changed_ignores_counters() {
        let a = DeviceRecord::new(DeviceKind::Audio);
        let mut b = a.clone();
        b.consecutive_failures = 2;
        b.last_health_check_at = Some(Utc::now());
        assert!(!a.status_changed(&b));

        b.using_fallback = true;
        assert!(a.status_changed(&b));
    }

    #[test]
    fn test_health_report_fallbacks() {
        let mut light = DeviceRecord::new(DeviceKind::LightStrip);
        light.using_fallback = true;
        let report = HealthReport {
            devices: vec![DeviceRecord::new(DeviceKind::LockBank), light],
        };

        assert!(!report.all_real());
        assert_eq!(report.fallbacks().collect::<Vec<_>>(), vec![DeviceKind::LightStrip]);
        assert!(report.get(DeviceKind::LockBank).is_some());
        assert!(report.get(DeviceKind::Audio).is_none());
    }

    #[test]
    fn test_led_color_scaled() {
        assert_eq!(LedColor::White.scaled(255), (255, 255, 255));
        assert_eq!(LedColor::White.scaled(0), (0, 0, 0));
        assert_eq!(LedColor::Green.scaled(128), (0, 128, 0));
    }

    #[test]
    fn test_animation_presets() {
        assert_eq!(Animation::ValidPurchase.base_color(), LedColor::Green);
        assert_eq!(Animation::Sleep.brightness(128), 16);
        assert_eq!(Animation::DoorAlarm.brightness(10), 255);
        assert_eq!(Animation::DoorAlarm.to_string(), "door_alarm");
    }

    #[test]
    fn test_door_state_serialization() {
        let json = serde_json::to_string(&DoorState::Open).unwrap();
        assert_eq!(json, "\"open\"");
    }
}
