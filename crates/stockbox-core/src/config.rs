//! Layered kiosk configuration.
//!
//! Configuration is merged with figment in this order (later wins):
//!
//! 1. Compiled defaults ([`KioskConfig::default`])
//! 2. `/etc/stockbox/stockbox.toml`
//! 3. `./stockbox.toml`, or the explicit path given on the command line
//! 4. `STOCKBOX_*` environment variables
//!
//! Environment keys map section-wise: `STOCKBOX_KIOSK_MACHINE_ID` sets
//! `kiosk.machine_id` and `STOCKBOX_HARDWARE_RELAY_PORT` sets
//! `hardware.relay.port`.
//!
//! # Examples
//!
//! ```
//! use stockbox_core::config::load_config_from_str;
//!
//! let config = load_config_from_str(
//!     r#"
//!     [kiosk]
//!     machine_id = "lobby-2"
//!     levels = 4
//!
//!     [hardware.relay]
//!     door_channels = [1, 2, 3, 4]
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.kiosk.machine_id, "lobby-2");
//! assert!(config.validate().is_ok());
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Error, Result};

/// Root configuration for a kiosk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KioskConfig {
    #[serde(default)]
    pub kiosk: KioskSection,

    #[serde(default)]
    pub timings: TimingConfig,

    #[serde(default)]
    pub authorization: AuthorizationConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cabinet identity and layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskSection {
    /// Identifier sent to the purchase server with every request.
    pub machine_id: String,

    /// Number of product levels (valid levels are `1..=levels`).
    pub levels: u16,
}

impl Default for KioskSection {
    fn default() -> Self {
        Self {
            machine_id: DEFAULT_MACHINE_ID.to_string(),
            levels: DEFAULT_LEVELS,
        }
    }
}

/// Flow timeouts and supervision intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub sleep_timeout_secs: u64,
    pub purchase_timeout_secs: u64,
    pub door_unlock_timeout_secs: u64,
    pub door_alarm_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub command_timeout_ms: u64,
    pub debounce_ms: u64,
    pub health_interval_secs: u64,
    pub reconnect_interval_secs: u64,
    pub failure_threshold: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sleep_timeout_secs: DEFAULT_SLEEP_TIMEOUT_SECS,
            purchase_timeout_secs: DEFAULT_PURCHASE_TIMEOUT_SECS,
            door_unlock_timeout_secs: DEFAULT_DOOR_UNLOCK_TIMEOUT_SECS,
            door_alarm_timeout_secs: DEFAULT_DOOR_ALARM_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            debounce_ms: DEBOUNCE_WINDOW_MS,
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            reconnect_interval_secs: DEFAULT_RECONNECT_INTERVAL_SECS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl TimingConfig {
    pub fn sleep_timeout(&self) -> Duration {
        Duration::from_secs(self.sleep_timeout_secs)
    }

    pub fn purchase_timeout(&self) -> Duration {
        Duration::from_secs(self.purchase_timeout_secs)
    }

    pub fn door_unlock_timeout(&self) -> Duration {
        Duration::from_secs(self.door_unlock_timeout_secs)
    }

    pub fn door_alarm_timeout(&self) -> Duration {
        Duration::from_secs(self.door_alarm_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }
}

/// Purchase server endpoints and completion retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub base_url: String,
    pub check_path: String,
    pub complete_path: String,
    pub request_timeout_ms: u64,
    pub report_initial_backoff_ms: u64,
    pub report_max_backoff_ms: u64,
    pub report_max_attempts: u32,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            check_path: "/api/purchase/check".to_string(),
            complete_path: "/api/purchase/complete".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            report_initial_backoff_ms: DEFAULT_REPORT_INITIAL_BACKOFF_MS,
            report_max_backoff_ms: DEFAULT_REPORT_MAX_BACKOFF_MS,
            report_max_attempts: DEFAULT_REPORT_MAX_ATTEMPTS,
        }
    }
}

impl AuthorizationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn report_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.report_initial_backoff_ms)
    }

    pub fn report_max_backoff(&self) -> Duration {
        Duration::from_millis(self.report_max_backoff_ms)
    }
}

/// Device endpoints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Start every device on its simulated driver.
    pub simulate: bool,
    pub relay: RelayConfig,
    pub light: LightConfig,
    pub door: DoorConfig,
    pub audio: AudioConfig,
}

/// Modbus RTU relay bank driving the door locks and the dispense motor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub port: String,
    pub baud_rate: u32,
    pub slave_address: u8,
    pub channels: u16,

    /// Zero-based relay channel for each level, in level order.
    pub door_channels: Vec<u16>,

    pub motor_channel: u16,
    pub spindle_channel: u16,
    pub spindle_pre_delay_ms: u64,
    pub spin_ms: u64,
    pub spindle_post_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: MODBUS_DEFAULT_BAUD_RATE,
            slave_address: MODBUS_DEFAULT_SLAVE_ADDRESS,
            channels: RELAY_CHANNELS,
            door_channels: (1..=DEFAULT_LEVELS).collect(),
            motor_channel: DEFAULT_MOTOR_CHANNEL,
            spindle_channel: DEFAULT_SPINDLE_CHANNEL,
            spindle_pre_delay_ms: DEFAULT_SPINDLE_PRE_DELAY_MS,
            spin_ms: DEFAULT_SPIN_MS,
            spindle_post_delay_ms: DEFAULT_SPINDLE_POST_DELAY_MS,
        }
    }
}

/// Art-Net light strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub address: String,
    pub port: u16,
    pub universe: u16,
    pub pixel_count: u16,
    pub brightness: u8,

    /// Inclusive `[start, end]` pixel range for each level, in level order.
    pub zones: Vec<[u16; 2]>,
}

impl Default for LightConfig {
    fn default() -> Self {
        let zone_width = DEFAULT_PIXEL_COUNT / DEFAULT_LEVELS;
        Self {
            address: "192.168.1.50".to_string(),
            port: ARTNET_PORT,
            universe: 0,
            pixel_count: DEFAULT_PIXEL_COUNT,
            brightness: DEFAULT_BRIGHTNESS,
            zones: (0..DEFAULT_LEVELS)
                .map(|i| [i * zone_width, (i + 1) * zone_width - 1])
                .collect(),
        }
    }
}

/// Door position sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    /// sysfs-style value file (`0`/`1`).
    pub value_path: PathBuf,
    pub active_low: bool,
    pub poll_interval_ms: u64,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            value_path: PathBuf::from("/sys/class/gpio/gpio17/value"),
            active_low: true,
            poll_interval_ms: DEFAULT_DOOR_POLL_INTERVAL_MS,
        }
    }
}

impl DoorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Audio output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Player executable invoked with the sound file as last argument.
    pub player: String,

    /// Extra player arguments; `{volume}` expands to the volume in percent.
    pub player_args: Vec<String>,

    pub volume: f32,

    /// Sound name to file.
    pub sounds: BTreeMap<String, PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let sounds = ["select", "success", "error", "alarm", "wake"]
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    PathBuf::from(format!("/usr/share/stockbox/sounds/{name}.wav")),
                )
            })
            .collect();

        Self {
            player: "mpv".to_string(),
            player_args: vec![
                "--really-quiet".to_string(),
                "--no-video".to_string(),
                "--volume={volume}".to_string(),
            ],
            volume: 0.7,
            sounds,
        }
    }
}

/// Local persistence of transitions and statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: "stockbox.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl KioskConfig {
    /// Check cross-field constraints figment cannot express.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let levels = self.kiosk.levels;
        if levels == 0 {
            return Err(Error::Config("kiosk.levels must be greater than zero".into()));
        }

        let relay = &self.hardware.relay;
        if relay.door_channels.len() < usize::from(levels) {
            return Err(Error::Config(format!(
                "hardware.relay.door_channels has {} entries, kiosk has {} levels",
                relay.door_channels.len(),
                levels
            )));
        }

        let out_of_bank = relay
            .door_channels
            .iter()
            .chain([&relay.motor_channel, &relay.spindle_channel])
            .find(|channel| **channel >= relay.channels);
        if let Some(channel) = out_of_bank {
            return Err(Error::Config(format!(
                "relay channel {} outside bank of {} channels",
                channel, relay.channels
            )));
        }

        let timings = &self.timings;
        let zero_timing = [
            ("sleep_timeout_secs", timings.sleep_timeout_secs),
            ("purchase_timeout_secs", timings.purchase_timeout_secs),
            ("door_unlock_timeout_secs", timings.door_unlock_timeout_secs),
            ("door_alarm_timeout_secs", timings.door_alarm_timeout_secs),
            ("poll_interval_ms", timings.poll_interval_ms),
            ("command_timeout_ms", timings.command_timeout_ms),
            ("health_interval_secs", timings.health_interval_secs),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);
        if let Some((name, _)) = zero_timing {
            return Err(Error::Config(format!("timings.{name} must be non-zero")));
        }

        let light = &self.hardware.light;
        for (i, [start, end]) in light.zones.iter().enumerate() {
            if start > end || *end >= light.pixel_count {
                return Err(Error::Config(format!(
                    "hardware.light.zones[{i}] = [{start}, {end}] is not a valid range for {} pixels",
                    light.pixel_count
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.hardware.audio.volume) {
            return Err(Error::Config(format!(
                "hardware.audio.volume must be within 0.0..=1.0, got {}",
                self.hardware.audio.volume
            )));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigRender` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Load configuration from the standard locations with env overrides.
///
/// When `explicit` is given it replaces `./stockbox.toml` in the merge order.
pub fn load_config(explicit: Option<&Path>) -> Result<KioskConfig> {
    build_figment(explicit)
        .extract()
        .map_err(|e| Error::ConfigLoad(Box::new(e)))
}

/// Load configuration from a TOML string on top of the defaults.
///
/// No files or environment variables are consulted.
pub fn load_config_from_str(toml_content: &str) -> Result<KioskConfig> {
    Figment::new()
        .merge(Serialized::defaults(KioskConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
        .map_err(|e| Error::ConfigLoad(Box::new(e)))
}

/// Build the figment used by [`load_config`].
pub fn build_figment(explicit: Option<&Path>) -> Figment {
    let local = explicit.map_or_else(|| PathBuf::from(CONFIG_FILE_NAME), Path::to_path_buf);

    Figment::new()
        .merge(Serialized::defaults(KioskConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(local))
        .merge(env_provider())
}

/// Section prefixes in match order. Nested hardware sections come first so
/// `hardware_relay_port` is not read as `hardware.relay_port`.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("hardware_relay_", "hardware.relay."),
    ("hardware_light_", "hardware.light."),
    ("hardware_door_", "hardware.door."),
    ("hardware_audio_", "hardware.audio."),
    ("hardware_", "hardware."),
    ("kiosk_", "kiosk."),
    ("timings_", "timings."),
    ("authorization_", "authorization."),
    ("storage_", "storage."),
    ("logging_", "logging."),
];

fn env_provider() -> Env {
    Env::prefixed(CONFIG_ENV_PREFIX).map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env key onto a config path.
fn map_env_key(key: &str) -> String {
    ENV_SECTIONS
        .iter()
        .find_map(|(prefix, section)| {
            key.strip_prefix(prefix)
                .map(|rest| format!("{section}{rest}"))
        })
        .unwrap_or_else(|| key.to_string())
}
