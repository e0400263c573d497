//! Hardware device trait definitions.
//!
//! Every physical subsystem implements [`Device`] for its lifecycle
//! (connect, disconnect, health) plus one capability trait for its
//! operations. Real transports and simulated drivers implement the same
//! traits, so the [`HardwareManager`](crate::manager::HardwareManager) can
//! swap one for the other without its callers noticing.
//!
//! Methods return `impl Future + Send` so the manager can drive any device
//! from a spawned worker task. Implementations simply write `async fn`.
//!
//! # Object Safety
//!
//! These traits are not object-safe. For dynamic selection between variants
//! use the enum wrappers in [`devices`](crate::devices):
//!
//! ```no_run
//! use stockbox_hardware::devices::AnyRelayBank;
//! use stockbox_hardware::simulated::SimulatedRelayBank;
//! use stockbox_hardware::traits::{Device, RelayBank};
//!
//! # async fn example() -> stockbox_hardware::Result<()> {
//! let (relay, _handle) = SimulatedRelayBank::new(32);
//! let mut relay = AnyRelayBank::Simulated(relay);
//!
//! relay.connect().await?;
//! relay.set_channel(3, true).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use crate::error::Result;
use crate::types::{Animation, DoorState, LedColor};

/// Lifecycle shared by all devices.
pub trait Device: Send {
    /// Human readable device name for logs.
    fn name(&self) -> &str;

    /// Open the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be reached.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release the transport, leaving the device in a safe state.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Check that the device still answers.
    ///
    /// # Errors
    ///
    /// Returns an error describing why the device is unhealthy.
    fn health_check(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Whether the transport is currently open.
    fn is_connected(&self) -> bool;
}

/// Bank of on/off relay channels (door locks, motor, spindle).
///
/// Channels are addressed by zero-based index `0..channel_count()`.
pub trait RelayBank: Device {
    fn channel_count(&self) -> u16;

    /// Switch one channel on or off.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is out of range or the bank rejects
    /// the command.
    fn set_channel(&mut self, channel: u16, on: bool) -> impl Future<Output = Result<()>> + Send;
}

/// Addressable light strip.
pub trait LightStrip: Device {
    /// Show a named preset on the whole strip.
    fn set_animation(
        &mut self,
        animation: Animation,
        brightness: u8,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Paint the inclusive pixel range `start..=end`, keeping the rest.
    fn highlight_zone(
        &mut self,
        start: u16,
        end: u16,
        color: LedColor,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Binary door position sensor.
///
/// Readings are raw. Debouncing happens in the manager's door monitor.
pub trait DoorSensor: Device {
    fn read(&mut self) -> impl Future<Output = Result<DoorState>> + Send;
}

/// Audio output playing named sounds.
pub trait AudioSink: Device {
    /// Start playing a configured sound.
    ///
    /// # Errors
    ///
    /// Returns an error if the sound name is unknown or playback cannot start.
    fn play(&mut self, sound: &str) -> impl Future<Output = Result<()>> + Send;

    /// Set the output volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32) -> impl Future<Output = Result<()>> + Send;

    /// Stop whatever is playing. Stopping silence is not an error.
    fn stop(&mut self) -> impl Future<Output = Result<()>> + Send;
}
