//! Sound playback through an external player process.
//!
//! Each `play` spawns the configured player with the sound file as its last
//! argument. A new sound stops the one still playing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use stockbox_core::AudioConfig;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{HardwareError, Result};
use crate::traits::{AudioSink, Device};

#[derive(Debug)]
pub struct CommandAudioSink {
    name: String,
    player: String,
    player_args: Vec<String>,
    volume: f32,
    sounds: BTreeMap<String, PathBuf>,
    current: Option<Child>,
    connected: bool,
}

impl CommandAudioSink {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            name: format!("Audio via {}", config.player),
            player: config.player.clone(),
            player_args: config.player_args.clone(),
            volume: config.volume,
            sounds: config.sounds.clone(),
            current: None,
            connected: false,
        }
    }

    /// Player arguments with `{volume}` expanded to percent.
    pub fn expand_args(&self) -> Vec<String> {
        let percent = (self.volume * 100.0).round() as u32;
        self.player_args
            .iter()
            .map(|arg| arg.replace("{volume}", &percent.to_string()))
            .collect()
    }

    async fn stop_current(&mut self) {
        if let Some(mut child) = self.current.take()
            && let Ok(None) = child.try_wait()
        {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop previous sound: {}", e);
            }
        }
    }
}

impl Device for CommandAudioSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<()> {
        for (name, path) in &self.sounds {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(HardwareError::configuration(format!(
                    "sound {:?} missing at {}",
                    name,
                    path.display()
                )));
            }
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.stop_current().await;
        self.connected = false;
        Ok(())
    }

    async fn health_check(&mut self) -> Result<()> {
        if !self.connected {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        // A player that exited with an error hints at a broken output device
        if let Some(child) = self.current.as_mut()
            && let Ok(Some(status)) = child.try_wait()
        {
            self.current = None;
            if !status.success() {
                return Err(HardwareError::unhealthy(format!(
                    "player exited with {status}"
                )));
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl AudioSink for CommandAudioSink {
    async fn play(&mut self, sound: &str) -> Result<()> {
        if !self.connected {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        let path = self
            .sounds
            .get(sound)
            .cloned()
            .ok_or_else(|| HardwareError::configuration(format!("unknown sound {sound:?}")))?;

        self.stop_current().await;

        debug!("Playing {} ({})", sound, path.display());
        let child = Command::new(&self.player)
            .args(self.expand_args())
            .arg(&path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.current = Some(child);
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(HardwareError::invalid_data(format!(
                "volume {volume} outside 0.0..=1.0"
            )));
        }
        self.volume = volume;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.connected {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        self.stop_current().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(dir: &std::path::Path) -> AudioConfig {
        let sound = dir.join("success.wav");
        std::fs::write(&sound, b"RIFF").unwrap();

        AudioConfig {
            player: "true".to_string(),
            player_args: vec!["--volume={volume}".to_string()],
            volume: 0.7,
            sounds: BTreeMap::from([("success".to_string(), sound)]),
        }
    }

    #[test]
    fn test_expand_volume_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CommandAudioSink::new(&config_with(dir.path()));
        assert_eq!(sink.expand_args(), vec!["--volume=70"]);
    }

    #[tokio::test]
    async fn test_play_known_and_unknown_sounds() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CommandAudioSink::new(&config_with(dir.path()));
        sink.connect().await.unwrap();

        sink.play("success").await.unwrap();
        assert!(matches!(
            sink.play("fanfare").await,
            Err(HardwareError::ConfigurationError { .. })
        ));
        sink.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_clears_current_player() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CommandAudioSink::new(&config_with(dir.path()));
        assert!(sink.stop().await.is_err());

        sink.connect().await.unwrap();
        sink.stop().await.unwrap();

        sink.play("success").await.unwrap();
        assert!(sink.current.is_some());
        sink.stop().await.unwrap();
        assert!(sink.current.is_none());
    }

    #[tokio::test]
    async fn test_connect_fails_on_missing_sound() {
        let mut config = AudioConfig::default();
        config.sounds = BTreeMap::from([(
            "alarm".to_string(),
            PathBuf::from("/nonexistent/alarm.wav"),
        )]);
        let mut sink = CommandAudioSink::new(&config);
        assert!(sink.connect().await.is_err());
    }
}
