//! Simulated audio sink.

use super::{CallLog, FaultInjector, SimulatedLink};
use crate::error::{HardwareError, Result};
use crate::traits::{AudioSink, Device};

/// One recorded audio call.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioCall {
    Play(String),
    Volume(f32),
    Stop,
}

/// Audio sink that records which sounds were played.
#[derive(Debug)]
pub struct SimulatedAudioSink {
    link: SimulatedLink,
    volume: f32,
    calls: CallLog<AudioCall>,
}

impl SimulatedAudioSink {
    pub fn new() -> (Self, SimulatedAudioHandle) {
        Self::with_name("Simulated audio")
    }

    pub fn with_name(name: impl Into<String>) -> (Self, SimulatedAudioHandle) {
        let faults = FaultInjector::default();
        let calls = CallLog::default();

        let sink = Self {
            link: SimulatedLink::new(name, faults.clone()),
            volume: 1.0,
            calls: calls.clone(),
        };

        (sink, SimulatedAudioHandle { faults, calls })
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
}

impl Default for SimulatedAudioSink {
    fn default() -> Self {
        Self::new().0
    }
}

impl Device for SimulatedAudioSink {
    fn name(&self) -> &str {
        self.link.name()
    }

    async fn connect(&mut self) -> Result<()> {
        self.link.connect()
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.link.disconnect();
        Ok(())
    }

    async fn health_check(&mut self) -> Result<()> {
        self.link.health_check()
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}

impl AudioSink for SimulatedAudioSink {
    async fn play(&mut self, sound: &str) -> Result<()> {
        self.link.ensure_ready()?;
        self.calls.push(AudioCall::Play(sound.to_string()));
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.link.ensure_ready()?;
        if !(0.0..=1.0).contains(&volume) {
            return Err(HardwareError::invalid_data(format!(
                "volume {volume} outside 0.0..=1.0"
            )));
        }
        self.volume = volume;
        self.calls.push(AudioCall::Volume(volume));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.link.ensure_ready()?;
        self.calls.push(AudioCall::Stop);
        Ok(())
    }
}

/// Handle for inspecting a [`SimulatedAudioSink`].
#[derive(Debug, Clone)]
pub struct SimulatedAudioHandle {
    faults: FaultInjector,
    calls: CallLog<AudioCall>,
}

impl SimulatedAudioHandle {
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn calls(&self) -> Vec<AudioCall> {
        self.calls.snapshot()
    }

    /// Names of the sounds played so far, oldest first.
    pub fn played(&self) -> Vec<String> {
        self.calls
            .snapshot()
            .into_iter()
            .filter_map(|call| match call {
                AudioCall::Play(name) => Some(name),
                AudioCall::Volume(_) | AudioCall::Stop => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_played_sounds() {
        let (mut sink, handle) = SimulatedAudioSink::new();
        sink.connect().await.unwrap();

        sink.play("success").await.unwrap();
        sink.set_volume(0.5).await.unwrap();
        sink.play("alarm").await.unwrap();

        assert_eq!(handle.played(), vec!["success", "alarm"]);
        assert_eq!(sink.volume(), 0.5);
    }

    #[tokio::test]
    async fn test_records_stop() {
        let (mut sink, handle) = SimulatedAudioSink::new();
        sink.connect().await.unwrap();

        sink.play("alarm").await.unwrap();
        sink.stop().await.unwrap();

        assert_eq!(
            handle.calls(),
            vec![AudioCall::Play("alarm".to_string()), AudioCall::Stop]
        );
        assert_eq!(handle.played(), vec!["alarm"]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_volume() {
        let (mut sink, _handle) = SimulatedAudioSink::new();
        sink.connect().await.unwrap();
        assert!(sink.set_volume(1.5).await.is_err());
    }
}
