//! Enum wrappers for hardware device dispatch.
//!
//! Native `async fn` in traits is not object-safe, so the manager cannot
//! hold a `Box<dyn RelayBank>`. Each `Any*` enum instead lists the concrete
//! drivers of one device kind and forwards every trait method with a
//! `match`. A manager slot holds two values of the same enum: the primary
//! driver and the simulated fallback.
//!
//! # Examples
//!
//! ```
//! use stockbox_hardware::devices::AnyDoorSensor;
//! use stockbox_hardware::simulated::SimulatedDoorSensor;
//!
//! let (sensor, _handle) = SimulatedDoorSensor::new();
//! let sensor = AnyDoorSensor::Simulated(sensor);
//! ```

use std::fmt;
use std::future::Future;

#[cfg(feature = "serial")]
use crate::drivers::ModbusRelayBank;
use crate::drivers::{ArtNetLightStrip, CommandAudioSink, GpioDoorSensor};
use crate::error::Result;
use crate::simulated::{
    SimulatedAudioSink, SimulatedDoorSensor, SimulatedLightStrip, SimulatedRelayBank,
};
use crate::traits::{AudioSink, Device, DoorSensor, LightStrip, RelayBank};
use crate::types::{Animation, DeviceKind, DoorState, LedColor};

/// Enum wrapper for relay bank dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyRelayBank {
    #[cfg(feature = "serial")]
    Modbus(ModbusRelayBank),
    Simulated(SimulatedRelayBank),
}

/// Enum wrapper for light strip dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyLightStrip {
    ArtNet(ArtNetLightStrip),
    Simulated(SimulatedLightStrip),
}

/// Enum wrapper for door sensor dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyDoorSensor {
    Gpio(GpioDoorSensor),
    Simulated(SimulatedDoorSensor),
}

/// Enum wrapper for audio sink dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyAudioSink {
    Command(CommandAudioSink),
    Simulated(SimulatedAudioSink),
}

impl Device for AnyRelayBank {
    fn name(&self) -> &str {
        match self {
            #[cfg(feature = "serial")]
            Self::Modbus(device) => device.name(),
            Self::Simulated(device) => device.name(),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "serial")]
            Self::Modbus(device) => device.connect().await,
            Self::Simulated(device) => device.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "serial")]
            Self::Modbus(device) => device.disconnect().await,
            Self::Simulated(device) => device.disconnect().await,
        }
    }

    async fn health_check(&mut self) -> Result<()> {
        match self {
            #[cfg(feature = "serial")]
            Self::Modbus(device) => device.health_check().await,
            Self::Simulated(device) => device.health_check().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            #[cfg(feature = "serial")]
            Self::Modbus(device) => device.is_connected(),
            Self::Simulated(device) => device.is_connected(),
        }
    }
}

impl RelayBank for AnyRelayBank {
    fn channel_count(&self) -> u16 {
        match self {
            #[cfg(feature = "serial")]
            Self::Modbus(device) => device.channel_count(),
            Self::Simulated(device) => device.channel_count(),
        }
    }

    async fn set_channel(&mut self, channel: u16, on: bool) -> Result<()> {
        match self {
            #[cfg(feature = "serial")]
            Self::Modbus(device) => device.set_channel(channel, on).await,
            Self::Simulated(device) => device.set_channel(channel, on).await,
        }
    }
}

impl Device for AnyLightStrip {
    fn name(&self) -> &str {
        match self {
            Self::ArtNet(device) => device.name(),
            Self::Simulated(device) => device.name(),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::ArtNet(device) => device.connect().await,
            Self::Simulated(device) => device.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::ArtNet(device) => device.disconnect().await,
            Self::Simulated(device) => device.disconnect().await,
        }
    }

    async fn health_check(&mut self) -> Result<()> {
        match self {
            Self::ArtNet(device) => device.health_check().await,
            Self::Simulated(device) => device.health_check().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::ArtNet(device) => device.is_connected(),
            Self::Simulated(device) => device.is_connected(),
        }
    }
}

impl LightStrip for AnyLightStrip {
    async fn set_animation(&mut self, animation: Animation, brightness: u8) -> Result<()> {
        match self {
            Self::ArtNet(device) => device.set_animation(animation, brightness).await,
            Self::Simulated(device) => device.set_animation(animation, brightness).await,
        }
    }

    async fn highlight_zone(&mut self, start: u16, end: u16, color: LedColor) -> Result<()> {
        match self {
            Self::ArtNet(device) => device.highlight_zone(start, end, color).await,
            Self::Simulated(device) => device.highlight_zone(start, end, color).await,
        }
    }
}

impl Device for AnyDoorSensor {
    fn name(&self) -> &str {
        match self {
            Self::Gpio(device) => device.name(),
            Self::Simulated(device) => device.name(),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Gpio(device) => device.connect().await,
            Self::Simulated(device) => device.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Gpio(device) => device.disconnect().await,
            Self::Simulated(device) => device.disconnect().await,
        }
    }

    async fn health_check(&mut self) -> Result<()> {
        match self {
            Self::Gpio(device) => device.health_check().await,
            Self::Simulated(device) => device.health_check().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Gpio(device) => device.is_connected(),
            Self::Simulated(device) => device.is_connected(),
        }
    }
}

impl DoorSensor for AnyDoorSensor {
    async fn read(&mut self) -> Result<DoorState> {
        match self {
            Self::Gpio(device) => device.read().await,
            Self::Simulated(device) => device.read().await,
        }
    }
}

impl Device for AnyAudioSink {
    fn name(&self) -> &str {
        match self {
            Self::Command(device) => device.name(),
            Self::Simulated(device) => device.name(),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Command(device) => device.connect().await,
            Self::Simulated(device) => device.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Command(device) => device.disconnect().await,
            Self::Simulated(device) => device.disconnect().await,
        }
    }

    async fn health_check(&mut self) -> Result<()> {
        match self {
            Self::Command(device) => device.health_check().await,
            Self::Simulated(device) => device.health_check().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Command(device) => device.is_connected(),
            Self::Simulated(device) => device.is_connected(),
        }
    }
}

impl AudioSink for AnyAudioSink {
    async fn play(&mut self, sound: &str) -> Result<()> {
        match self {
            Self::Command(device) => device.play(sound).await,
            Self::Simulated(device) => device.play(sound).await,
        }
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        match self {
            Self::Command(device) => device.set_volume(volume).await,
            Self::Simulated(device) => device.set_volume(volume).await,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Command(device) => device.stop().await,
            Self::Simulated(device) => device.stop().await,
        }
    }
}

/// Uniform command interface used by the manager's per-device workers.
///
/// Each device kind gets one command enum so a single generic worker loop
/// can serialize every operation for that device.
pub trait Driver: Device + 'static {
    type Command: fmt::Debug + Send + 'static;
    type Output: Send + 'static;

    const KIND: DeviceKind;

    fn execute(
        &mut self,
        command: Self::Command,
    ) -> impl Future<Output = Result<Self::Output>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Set { channel: u16, on: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCommand {
    Animate { animation: Animation, brightness: u8 },
    Highlight { start: u16, end: u16, color: LedColor },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorCommand {
    Read,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioCommand {
    Play(String),
    SetVolume(f32),
    Stop,
}

impl Driver for AnyRelayBank {
    type Command = RelayCommand;
    type Output = ();

    const KIND: DeviceKind = DeviceKind::LockBank;

    async fn execute(&mut self, command: RelayCommand) -> Result<()> {
        match command {
            RelayCommand::Set { channel, on } => self.set_channel(channel, on).await,
        }
    }
}

impl Driver for AnyLightStrip {
    type Command = LightCommand;
    type Output = ();

    const KIND: DeviceKind = DeviceKind::LightStrip;

    async fn execute(&mut self, command: LightCommand) -> Result<()> {
        match command {
            LightCommand::Animate {
                animation,
                brightness,
            } => self.set_animation(animation, brightness).await,
            LightCommand::Highlight { start, end, color } => {
                self.highlight_zone(start, end, color).await
            }
        }
    }
}

impl Driver for AnyDoorSensor {
    type Command = DoorCommand;
    type Output = DoorState;

    const KIND: DeviceKind = DeviceKind::DoorSensor;

    async fn execute(&mut self, command: DoorCommand) -> Result<DoorState> {
        match command {
            DoorCommand::Read => self.read().await,
        }
    }
}

impl Driver for AnyAudioSink {
    type Command = AudioCommand;
    type Output = ();

    const KIND: DeviceKind = DeviceKind::Audio;

    async fn execute(&mut self, command: AudioCommand) -> Result<()> {
        match command {
            AudioCommand::Play(sound) => self.play(&sound).await,
            AudioCommand::SetVolume(volume) => self.set_volume(volume).await,
            AudioCommand::Stop => self.stop().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::AudioCall;

    #[tokio::test]
    async fn test_any_relay_dispatches_to_simulated() {
        let (relay, handle) = SimulatedRelayBank::new(8);
        let mut relay = AnyRelayBank::Simulated(relay);

        relay.connect().await.unwrap();
        relay
            .execute(RelayCommand::Set { channel: 2, on: true })
            .await
            .unwrap();

        assert!(relay.is_connected());
        assert_eq!(relay.channel_count(), 8);
        assert!(handle.is_on(2));
    }

    #[tokio::test]
    async fn test_any_door_execute_read() {
        let (sensor, handle) = SimulatedDoorSensor::new();
        let mut sensor = AnyDoorSensor::Simulated(sensor);
        sensor.connect().await.unwrap();

        handle.open();
        assert_eq!(sensor.execute(DoorCommand::Read).await.unwrap(), DoorState::Open);
    }

    #[tokio::test]
    async fn test_any_audio_execute_play() {
        let (sink, handle) = SimulatedAudioSink::new();
        let mut sink = AnyAudioSink::Simulated(sink);
        sink.connect().await.unwrap();

        sink.execute(AudioCommand::Play("wake".into())).await.unwrap();
        sink.execute(AudioCommand::Stop).await.unwrap();
        assert_eq!(handle.played(), vec!["wake"]);
        assert_eq!(handle.calls().last(), Some(&AudioCall::Stop));
    }

    #[test]
    fn test_driver_kinds() {
        assert_eq!(AnyRelayBank::KIND, DeviceKind::LockBank);
        assert_eq!(AnyLightStrip::KIND, DeviceKind::LightStrip);
        assert_eq!(AnyDoorSensor::KIND, DeviceKind::DoorSensor);
        assert_eq!(AnyAudioSink::KIND, DeviceKind::Audio);
    }
}
