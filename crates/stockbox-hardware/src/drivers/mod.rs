//! Drivers for the physical kiosk hardware.
//!
//! - [`modbus`]: 32-channel Modbus RTU relay board (door locks, motor)
//! - [`artnet`]: WLED-compatible light strip over Art-Net
//! - [`gpio`]: door reed switch exposed as a sysfs value file
//! - [`audio`]: sound playback through an external player process

pub mod artnet;
pub mod audio;
pub mod gpio;
#[cfg(feature = "serial")]
pub mod modbus;

pub use artnet::ArtNetLightStrip;
pub use audio::CommandAudioSink;
pub use gpio::GpioDoorSensor;
#[cfg(feature = "serial")]
pub use modbus::ModbusRelayBank;
