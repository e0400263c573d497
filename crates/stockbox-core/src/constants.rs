//! Default timings, hardware parameters and wire constants for the kiosk.
//!
//! The defaults mirror the values the kiosks were commissioned with. Every
//! timing here can be overridden through [`KioskConfig`](crate::KioskConfig);
//! the wire constants cannot.
//!
//! # Usage
//!
//! ```
//! use stockbox_core::constants::*;
//! use std::time::Duration;
//!
//! let debounce = Duration::from_millis(DEBOUNCE_WINDOW_MS);
//! assert_eq!(debounce, Duration::from_millis(50));
//! ```

// ============================================================================
// Kiosk layout
// ============================================================================

/// Number of product levels on a standard cabinet.
pub const DEFAULT_LEVELS: u16 = 10;

/// Default machine identifier reported to the purchase server.
pub const DEFAULT_MACHINE_ID: &str = "stockbox-001";

// ============================================================================
// Flow timeouts
// ============================================================================

/// Inactivity in Idle before the screen dims into Sleep (seconds).
pub const DEFAULT_SLEEP_TIMEOUT_SECS: u64 = 60;

/// Maximum wait for the purchase server to authorize a selection (seconds).
pub const DEFAULT_PURCHASE_TIMEOUT_SECS: u64 = 120;

/// How long an unlocked door may stay closed before it is relocked (seconds).
pub const DEFAULT_DOOR_UNLOCK_TIMEOUT_SECS: u64 = 30;

/// How long a door may stay open before the alarm starts (seconds).
pub const DEFAULT_DOOR_ALARM_TIMEOUT_SECS: u64 = 10;

/// Interval between authorization polls (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

// ============================================================================
// Hardware supervision
// ============================================================================

/// Upper bound for a single device command (milliseconds).
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 3000;

/// A door reading must be stable for this long before it becomes an edge.
pub const DEBOUNCE_WINDOW_MS: u64 = 50;

/// Door sensor polling interval (milliseconds).
pub const DEFAULT_DOOR_POLL_INTERVAL_MS: u64 = 10;

/// Interval between health checks (seconds).
pub const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 10;

/// Interval between reconnection attempts for demoted devices (seconds).
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 30;

/// Consecutive failed health checks before a device is demoted.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

// ============================================================================
// Completion reporting
// ============================================================================

pub const DEFAULT_REPORT_INITIAL_BACKOFF_MS: u64 = 500;
pub const DEFAULT_REPORT_MAX_BACKOFF_MS: u64 = 30_000;
pub const DEFAULT_REPORT_MAX_ATTEMPTS: u32 = 6;

/// Per-request timeout for the purchase server (milliseconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// Relay bank (Modbus RTU)
// ============================================================================

/// Channels on the relay board.
pub const RELAY_CHANNELS: u16 = 32;

pub const MODBUS_DEFAULT_BAUD_RATE: u32 = 9600;
pub const MODBUS_DEFAULT_SLAVE_ADDRESS: u8 = 1;

/// Default channel driving the dispense motor.
pub const DEFAULT_MOTOR_CHANNEL: u16 = 0;

/// Default channel releasing the spindle lock.
pub const DEFAULT_SPINDLE_CHANNEL: u16 = 11;

pub const DEFAULT_SPINDLE_PRE_DELAY_MS: u64 = 200;
pub const DEFAULT_SPIN_MS: u64 = 500;
pub const DEFAULT_SPINDLE_POST_DELAY_MS: u64 = 100;

// ============================================================================
// Light strip (Art-Net)
// ============================================================================

pub const ARTNET_PORT: u16 = 6454;

/// DMX channels carried by one Art-Net universe.
pub const DMX_UNIVERSE_SIZE: usize = 512;

pub const DEFAULT_PIXEL_COUNT: u16 = 300;
pub const DEFAULT_BRIGHTNESS: u8 = 128;

// ============================================================================
// Configuration
// ============================================================================

/// Prefix for environment variable overrides.
pub const CONFIG_ENV_PREFIX: &str = "STOCKBOX_";

/// Name of the local configuration file.
pub const CONFIG_FILE_NAME: &str = "stockbox.toml";

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/stockbox/stockbox.toml";
