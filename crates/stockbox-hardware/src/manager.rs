//! Hardware manager.
//!
//! This module provides the [`HardwareManager`], one reliable async facade
//! over the four independently failing kiosk devices.
//!
//! # Architecture
//!
//! Every device is owned by its own worker task. Callers talk to a worker
//! through an mpsc queue and wait for the answer on a oneshot channel, so a
//! device only ever has one command in flight and a second command queues
//! behind the first. A slow device never blocks the others.
//!
//! ```text
//!                  ┌────────────┐   queue    ┌─────────────────────────┐
//!                  │            │──────────►│ relay worker            │
//!  Dispatcher ───► │  Hardware  │           │  primary │ fallback     │
//!                  │  Manager   │──────────►│ light worker            │
//!  (clones)        │  (facade)  │──────────►│ door worker             │
//!                  │            │──────────►│ audio worker            │
//!                  └────────────┘           └─────────────────────────┘
//!                        ▲
//!                        │ HardwareEvent (door edges, health changes)
//!                  ┌─────┴──────┐
//!                  │  monitors  │  door poller + debouncer, health loop
//!                  └────────────┘
//! ```
//!
//! Each worker holds two drivers of the same kind: the primary (real
//! transport) and a simulated fallback. A primary that fails to connect, or
//! fails `failure_threshold` consecutive health checks, is demoted and all
//! commands go to the fallback. Demoted primaries are retried every
//! `reconnect_interval` and promoted back once they answer. Callers never
//! see which driver served them.
//!
//! # Examples
//!
//! ```no_run
//! use stockbox_core::{KioskConfig, Level};
//! use stockbox_hardware::manager::HardwareManager;
//!
//! #[tokio::main]
//! async fn main() -> stockbox_hardware::Result<()> {
//!     let mut config = KioskConfig::default();
//!     config.hardware.simulate = true;
//!
//!     let (manager, mut handle) = HardwareManager::builder(&config).build();
//!     manager.connect_all().await;
//!     handle.start_monitors(&manager);
//!
//!     let level = Level::new(3).unwrap();
//!     manager.unlock(level).await?;
//!     manager.lock(level).await?;
//!
//!     manager.shutdown().await;
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stockbox_core::{KioskConfig, Level};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::debounce::Debouncer;
use crate::devices::{
    AnyAudioSink, AnyDoorSensor, AnyLightStrip, AnyRelayBank, AudioCommand, DoorCommand, Driver,
    LightCommand, RelayCommand,
};
#[cfg(feature = "serial")]
use crate::drivers::ModbusRelayBank;
use crate::drivers::{ArtNetLightStrip, CommandAudioSink, GpioDoorSensor};
use crate::error::{HardwareError, Result};
use crate::simulated::{
    SimulatedAudioSink, SimulatedDoorSensor, SimulatedLightStrip, SimulatedRelayBank,
};
use crate::types::{Animation, DeviceKind, DeviceRecord, DoorState, HealthReport, LedColor};

/// Commands a worker queue can hold before callers wait.
const WORKER_QUEUE_SIZE: usize = 32;

/// Hardware events buffered for the dispatcher.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Event raised by the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HardwareEvent {
    /// Debounced door edge.
    Door(DoorState),

    /// A device changed connection or fallback status.
    Health(DeviceRecord),
}

/// Timing policy shared by the workers and monitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub command_timeout: Duration,
    pub failure_threshold: u32,
    pub reconnect_interval: Duration,
    pub health_interval: Duration,
    pub door_poll_interval: Duration,
    pub debounce: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &KioskConfig) -> Self {
        Self {
            command_timeout: config.timings.command_timeout(),
            failure_threshold: config.timings.failure_threshold.max(1),
            reconnect_interval: config.timings.reconnect_interval(),
            health_interval: config.timings.health_interval(),
            door_poll_interval: config.hardware.door.poll_interval(),
            debounce: config.timings.debounce(),
        }
    }
}

/// Where each level lives on the relay bank and light strip.
#[derive(Debug, Clone, PartialEq)]
struct Layout {
    door_channels: Vec<u16>,
    zones: Vec<[u16; 2]>,
    motor_channel: u16,
    spindle_channel: u16,
    spindle_pre_delay: Duration,
    spin: Duration,
    spindle_post_delay: Duration,
    brightness: u8,
    volume: f32,
}

impl Layout {
    fn from_config(config: &KioskConfig) -> Self {
        let relay = &config.hardware.relay;
        Self {
            door_channels: relay.door_channels.clone(),
            zones: config.hardware.light.zones.clone(),
            motor_channel: relay.motor_channel,
            spindle_channel: relay.spindle_channel,
            spindle_pre_delay: Duration::from_millis(relay.spindle_pre_delay_ms),
            spin: Duration::from_millis(relay.spin_ms),
            spindle_post_delay: Duration::from_millis(relay.spindle_post_delay_ms),
            brightness: config.hardware.light.brightness,
            volume: config.hardware.audio.volume,
        }
    }
}

/// Bound a device future by the command timeout.
async fn bounded<T>(limit: Duration, future: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::timeout(limit.as_millis() as u64)),
    }
}

enum WorkerMessage<D: Driver> {
    Execute {
        command: D::Command,
        reply: oneshot::Sender<Result<D::Output>>,
    },
    Connect {
        reply: oneshot::Sender<()>,
    },
    HealthCheck {
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Task owning one device's primary and fallback drivers.
struct DeviceWorker<D: Driver> {
    primary: D,
    fallback: D,
    record: DeviceRecord,
    settings: Arc<ManagerSettings>,
    last_reconnect_attempt: Option<Instant>,
    status: watch::Sender<DeviceRecord>,
}

impl<D: Driver> DeviceWorker<D> {
    async fn run(mut self, mut queue: mpsc::Receiver<WorkerMessage<D>>) {
        while let Some(message) = queue.recv().await {
            match message {
                WorkerMessage::Execute { command, reply } => {
                    let result = self.execute(command).await;
                    let _ = reply.send(result);
                }
                WorkerMessage::Connect { reply } => {
                    self.connect().await;
                    let _ = reply.send(());
                }
                WorkerMessage::HealthCheck { reply } => {
                    self.health_check().await;
                    let _ = reply.send(());
                }
                WorkerMessage::Disconnect { reply } => {
                    self.disconnect().await;
                    let _ = reply.send(());
                }
            }
            self.status.send_replace(self.record.clone());
        }
        trace!("{} worker stopped", D::KIND);
    }

    fn active(&mut self) -> &mut D {
        if self.record.using_fallback {
            &mut self.fallback
        } else {
            &mut self.primary
        }
    }

    async fn execute(&mut self, command: D::Command) -> Result<D::Output> {
        trace!("{} <- {:?}", D::KIND, command);
        let limit = self.settings.command_timeout;
        bounded(limit, self.active().execute(command)).await
    }

    async fn connect(&mut self) {
        let limit = self.settings.command_timeout;

        if let Err(e) = bounded(limit, self.fallback.connect()).await {
            error!("{} simulated driver failed to start: {}", D::KIND, e);
        }

        match bounded(limit, self.primary.connect()).await {
            Ok(()) => {
                info!("{} connected ({})", D::KIND, self.primary.name());
                self.record.using_fallback = false;
                self.record.connected = true;
                self.record.consecutive_failures = 0;
            }
            Err(e) => {
                warn!(
                    "{} unavailable, routing to simulated driver: {}",
                    D::KIND,
                    e
                );
                self.record.using_fallback = true;
                self.record.connected = self.fallback.is_connected();
                self.last_reconnect_attempt = Some(Instant::now());
            }
        }
    }

    async fn health_check(&mut self) {
        self.record.last_health_check_at = Some(Utc::now());

        if self.record.using_fallback {
            self.try_promote().await;
            if self.record.using_fallback {
                self.record.connected = self.fallback.is_connected();
            }
            return;
        }

        let limit = self.settings.command_timeout;
        match bounded(limit, self.primary.health_check()).await {
            Ok(()) => {
                self.record.consecutive_failures = 0;
                self.record.connected = true;
            }
            Err(e) => {
                self.record.consecutive_failures += 1;
                self.record.connected = false;
                debug!(
                    "{} health check failed ({}/{}): {}",
                    D::KIND,
                    self.record.consecutive_failures,
                    self.settings.failure_threshold,
                    e
                );
                if self.record.consecutive_failures >= self.settings.failure_threshold {
                    self.demote().await;
                }
            }
        }
    }

    async fn demote(&mut self) {
        warn!(
            "{} failed {} health checks, switching to simulated driver",
            D::KIND,
            self.record.consecutive_failures
        );
        let limit = self.settings.command_timeout;
        let _ = bounded(limit, self.primary.disconnect()).await;
        if !self.fallback.is_connected()
            && let Err(e) = bounded(limit, self.fallback.connect()).await
        {
            error!("{} simulated driver failed to start: {}", D::KIND, e);
        }

        self.record.using_fallback = true;
        self.record.connected = self.fallback.is_connected();
        self.last_reconnect_attempt = Some(Instant::now());
    }

    async fn try_promote(&mut self) {
        let due = self
            .last_reconnect_attempt
            .is_none_or(|at| at.elapsed() >= self.settings.reconnect_interval);
        if !due {
            return;
        }
        self.last_reconnect_attempt = Some(Instant::now());

        let limit = self.settings.command_timeout;
        let primary = &mut self.primary;
        let attempt = bounded(limit, async move {
            primary.connect().await?;
            primary.health_check().await
        })
        .await;

        match attempt {
            Ok(()) => {
                info!("{} recovered, leaving simulated driver", D::KIND);
                self.record.using_fallback = false;
                self.record.connected = true;
                self.record.consecutive_failures = 0;
            }
            Err(e) => debug!("{} still unavailable: {}", D::KIND, e),
        }
    }

    async fn disconnect(&mut self) {
        let limit = self.settings.command_timeout;
        if self.primary.is_connected()
            && let Err(e) = bounded(limit, self.primary.disconnect()).await
        {
            warn!("{} disconnect failed: {}", D::KIND, e);
        }
        let _ = bounded(limit, self.fallback.disconnect()).await;
        self.record.connected = false;
    }
}

/// Caller side of a device worker.
struct DeviceClient<D: Driver> {
    queue: mpsc::Sender<WorkerMessage<D>>,
    status: watch::Receiver<DeviceRecord>,
}

impl<D: Driver> Clone for DeviceClient<D> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            status: self.status.clone(),
        }
    }
}

impl<D: Driver> DeviceClient<D> {
    fn spawn(primary: D, fallback: D, settings: Arc<ManagerSettings>) -> Self {
        let record = DeviceRecord::new(D::KIND);
        let (status_tx, status_rx) = watch::channel(record.clone());
        let (queue_tx, queue_rx) = mpsc::channel(WORKER_QUEUE_SIZE);

        let worker = DeviceWorker {
            primary,
            fallback,
            record,
            settings,
            last_reconnect_attempt: None,
            status: status_tx,
        };
        tokio::spawn(worker.run(queue_rx));

        Self {
            queue: queue_tx,
            status: status_rx,
        }
    }

    async fn execute(&self, command: D::Command) -> Result<D::Output> {
        let (reply, answer) = oneshot::channel();
        self.queue
            .send(WorkerMessage::Execute { command, reply })
            .await
            .map_err(|_| HardwareError::worker_unavailable(D::KIND))?;
        answer
            .await
            .map_err(|_| HardwareError::worker_unavailable(D::KIND))?
    }

    async fn request(&self, build: impl FnOnce(oneshot::Sender<()>) -> WorkerMessage<D>) {
        let (reply, answer) = oneshot::channel();
        if self.queue.send(build(reply)).await.is_ok() {
            let _ = answer.await;
        }
    }

    async fn connect(&self) -> DeviceRecord {
        self.request(|reply| WorkerMessage::Connect { reply }).await;
        self.record()
    }

    async fn health_check(&self) -> DeviceRecord {
        self.request(|reply| WorkerMessage::HealthCheck { reply })
            .await;
        self.record()
    }

    async fn disconnect(&self) {
        self.request(|reply| WorkerMessage::Disconnect { reply })
            .await;
    }

    fn record(&self) -> DeviceRecord {
        self.status.borrow().clone()
    }
}

/// Builder for [`HardwareManager`].
///
/// Devices not supplied explicitly are created from the configuration: real
/// drivers normally, simulated ones when `hardware.simulate` is set. Every
/// slot gets a fresh simulated fallback unless one is given.
pub struct HardwareManagerBuilder {
    config: KioskConfig,
    settings: Option<ManagerSettings>,
    relay: Option<(AnyRelayBank, Option<AnyRelayBank>)>,
    light: Option<(AnyLightStrip, Option<AnyLightStrip>)>,
    door: Option<(AnyDoorSensor, Option<AnyDoorSensor>)>,
    audio: Option<(AnyAudioSink, Option<AnyAudioSink>)>,
}

impl HardwareManagerBuilder {
    /// Override the timing policy derived from the configuration.
    pub fn settings(mut self, settings: ManagerSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn relay(mut self, primary: AnyRelayBank) -> Self {
        self.relay = Some((primary, None));
        self
    }

    pub fn relay_with_fallback(mut self, primary: AnyRelayBank, fallback: AnyRelayBank) -> Self {
        self.relay = Some((primary, Some(fallback)));
        self
    }

    pub fn light(mut self, primary: AnyLightStrip) -> Self {
        self.light = Some((primary, None));
        self
    }

    pub fn light_with_fallback(mut self, primary: AnyLightStrip, fallback: AnyLightStrip) -> Self {
        self.light = Some((primary, Some(fallback)));
        self
    }

    pub fn door(mut self, primary: AnyDoorSensor) -> Self {
        self.door = Some((primary, None));
        self
    }

    pub fn door_with_fallback(mut self, primary: AnyDoorSensor, fallback: AnyDoorSensor) -> Self {
        self.door = Some((primary, Some(fallback)));
        self
    }

    pub fn audio(mut self, primary: AnyAudioSink) -> Self {
        self.audio = Some((primary, None));
        self
    }

    pub fn audio_with_fallback(mut self, primary: AnyAudioSink, fallback: AnyAudioSink) -> Self {
        self.audio = Some((primary, Some(fallback)));
        self
    }

    /// Spawn the device workers.
    ///
    /// Must be called inside a Tokio runtime. Devices are not connected
    /// yet; call [`HardwareManager::connect_all`].
    pub fn build(self) -> (HardwareManager, HardwareHandle) {
        let config = self.config;
        let settings = Arc::new(
            self.settings
                .unwrap_or_else(|| ManagerSettings::from_config(&config)),
        );
        let simulate = config.hardware.simulate;
        let channels = config.hardware.relay.channels;
        let pixels = config.hardware.light.pixel_count;

        let (relay, relay_fallback) = self
            .relay
            .unwrap_or_else(|| (default_relay(&config, simulate), None));
        let relay_fallback = relay_fallback
            .unwrap_or_else(|| AnyRelayBank::Simulated(SimulatedRelayBank::new(channels).0));

        let (light, light_fallback) = self.light.unwrap_or_else(|| {
            let primary = if simulate {
                AnyLightStrip::Simulated(SimulatedLightStrip::new(pixels).0)
            } else {
                AnyLightStrip::ArtNet(ArtNetLightStrip::new(config.hardware.light.clone()))
            };
            (primary, None)
        });
        let light_fallback = light_fallback
            .unwrap_or_else(|| AnyLightStrip::Simulated(SimulatedLightStrip::new(pixels).0));

        let (door, door_fallback) = self.door.unwrap_or_else(|| {
            let primary = if simulate {
                AnyDoorSensor::Simulated(SimulatedDoorSensor::new().0)
            } else {
                AnyDoorSensor::Gpio(GpioDoorSensor::new(&config.hardware.door))
            };
            (primary, None)
        });
        let door_fallback =
            door_fallback.unwrap_or_else(|| AnyDoorSensor::Simulated(SimulatedDoorSensor::new().0));

        let (audio, audio_fallback) = self.audio.unwrap_or_else(|| {
            let primary = if simulate {
                AnyAudioSink::Simulated(SimulatedAudioSink::new().0)
            } else {
                AnyAudioSink::Command(CommandAudioSink::new(&config.hardware.audio))
            };
            (primary, None)
        });
        let audio_fallback =
            audio_fallback.unwrap_or_else(|| AnyAudioSink::Simulated(SimulatedAudioSink::new().0));

        let manager = HardwareManager {
            relay: DeviceClient::spawn(relay, relay_fallback, Arc::clone(&settings)),
            light: DeviceClient::spawn(light, light_fallback, Arc::clone(&settings)),
            door: DeviceClient::spawn(door, door_fallback, Arc::clone(&settings)),
            audio: DeviceClient::spawn(audio, audio_fallback, Arc::clone(&settings)),
            layout: Arc::new(Layout::from_config(&config)),
            settings,
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let handle = HardwareHandle {
            event_tx,
            event_rx: Some(event_rx),
            tasks: JoinSet::new(),
        };

        (manager, handle)
    }
}

#[cfg(feature = "serial")]
fn default_relay(config: &KioskConfig, simulate: bool) -> AnyRelayBank {
    if simulate {
        AnyRelayBank::Simulated(SimulatedRelayBank::new(config.hardware.relay.channels).0)
    } else {
        AnyRelayBank::Modbus(ModbusRelayBank::new(config.hardware.relay.clone()))
    }
}

#[cfg(not(feature = "serial"))]
fn default_relay(config: &KioskConfig, simulate: bool) -> AnyRelayBank {
    if !simulate {
        warn!("Built without serial support, relay bank runs simulated");
    }
    AnyRelayBank::Simulated(SimulatedRelayBank::new(config.hardware.relay.channels).0)
}

/// Facade over the kiosk devices.
///
/// Cheap to clone; all clones talk to the same device workers. Every
/// operation returns a `Result` value. Failures are never raised past this
/// boundary and callers never learn whether the real or simulated driver
/// served a request.
#[derive(Clone)]
pub struct HardwareManager {
    relay: DeviceClient<AnyRelayBank>,
    light: DeviceClient<AnyLightStrip>,
    door: DeviceClient<AnyDoorSensor>,
    audio: DeviceClient<AnyAudioSink>,
    layout: Arc<Layout>,
    settings: Arc<ManagerSettings>,
}

impl std::fmt::Debug for HardwareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareManager")
            .field("devices", &self.device_records())
            .finish()
    }
}

impl HardwareManager {
    /// Start building a manager for `config`.
    pub fn builder(config: &KioskConfig) -> HardwareManagerBuilder {
        HardwareManagerBuilder {
            config: config.clone(),
            settings: None,
            relay: None,
            light: None,
            door: None,
            audio: None,
        }
    }

    /// Timing policy in effect.
    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Connect every device, falling back to simulation where needed.
    ///
    /// All doors are locked and the configured volume applied afterwards.
    pub async fn connect_all(&self) -> HealthReport {
        tokio::join!(
            self.relay.connect(),
            self.light.connect(),
            self.door.connect(),
            self.audio.connect(),
        );

        if let Err(e) = self.lock_all().await {
            error!("Failed to lock all doors at startup: {}", e);
        }
        if let Err(e) = self.set_volume(self.layout.volume).await {
            warn!("Failed to set volume: {}", e);
        }

        let report = self.device_records();
        for kind in report.fallbacks() {
            warn!("{} running on simulated driver", kind);
        }
        report
    }

    /// Run one health check on every device.
    pub async fn health_check(&self) -> HealthReport {
        let (relay, light, door, audio) = tokio::join!(
            self.relay.health_check(),
            self.light.health_check(),
            self.door.health_check(),
            self.audio.health_check(),
        );
        HealthReport {
            devices: vec![relay, light, door, audio],
        }
    }

    /// Current device records without touching the devices.
    pub fn device_records(&self) -> HealthReport {
        HealthReport {
            devices: vec![
                self.relay.record(),
                self.light.record(),
                self.door.record(),
                self.audio.record(),
            ],
        }
    }

    fn door_channel(&self, level: Level) -> Result<u16> {
        self.layout
            .door_channels
            .get(level.index())
            .copied()
            .ok_or_else(|| {
                HardwareError::configuration(format!("no door channel for level {}", level))
            })
    }

    async fn set_relay(&self, channel: u16, on: bool) -> Result<()> {
        self.relay.execute(RelayCommand::Set { channel, on }).await
    }

    /// Release the lock of `level`.
    pub async fn unlock(&self, level: Level) -> Result<()> {
        let channel = self.door_channel(level)?;
        info!("Unlocking level {} (relay {})", level, channel);
        self.set_relay(channel, true).await
    }

    /// Engage the lock of `level`.
    pub async fn lock(&self, level: Level) -> Result<()> {
        let channel = self.door_channel(level)?;
        info!("Locking level {} (relay {})", level, channel);
        self.set_relay(channel, false).await
    }

    /// Engage every door lock, reporting the first failure.
    pub async fn lock_all(&self) -> Result<()> {
        let mut first_error = None;
        for channel in self.layout.door_channels.iter().copied() {
            if let Err(e) = self.set_relay(channel, false).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run the dispense sequence.
    ///
    /// Spindle lock released, pre-delay, motor on for the spin time, motor
    /// off, post-delay, spindle lock engaged. Both off commands run even if
    /// an earlier step failed; the first failure is returned.
    pub async fn spin_motor(&self) -> Result<()> {
        let layout = &self.layout;
        info!("Spinning dispense motor");

        let spindle_on = self.set_relay(layout.spindle_channel, true).await;
        let mut motor_on = Ok(());
        if spindle_on.is_ok() {
            tokio::time::sleep(layout.spindle_pre_delay).await;
            motor_on = self.set_relay(layout.motor_channel, true).await;
            if motor_on.is_ok() {
                tokio::time::sleep(layout.spin).await;
            }
        }

        let motor_off = self.set_relay(layout.motor_channel, false).await;
        tokio::time::sleep(layout.spindle_post_delay).await;
        let spindle_off = self.set_relay(layout.spindle_channel, false).await;

        spindle_on.and(motor_on).and(motor_off).and(spindle_off)
    }

    /// Play a named sound.
    pub async fn play(&self, sound: &str) -> Result<()> {
        self.audio
            .execute(AudioCommand::Play(sound.to_string()))
            .await
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.audio.execute(AudioCommand::SetVolume(volume)).await
    }

    /// Silence the current sound.
    pub async fn stop_sound(&self) -> Result<()> {
        self.audio.execute(AudioCommand::Stop).await
    }

    /// Show a named light preset.
    pub async fn animate(&self, animation: Animation) -> Result<()> {
        let brightness = animation.brightness(self.layout.brightness);
        self.light
            .execute(LightCommand::Animate {
                animation,
                brightness,
            })
            .await
    }

    /// Light the zone of `level` in green.
    pub async fn highlight_level(&self, level: Level) -> Result<()> {
        let [start, end] = self
            .layout
            .zones
            .get(level.index())
            .copied()
            .ok_or_else(|| {
                HardwareError::configuration(format!("no light zone for level {}", level))
            })?;
        self.light
            .execute(LightCommand::Highlight {
                start,
                end,
                color: LedColor::Green,
            })
            .await
    }

    /// Raw door reading (not debounced).
    pub async fn door_state(&self) -> Result<DoorState> {
        self.door.execute(DoorCommand::Read).await
    }

    /// Lock every door and disconnect every device.
    pub async fn shutdown(&self) {
        if let Err(e) = self.lock_all().await {
            error!("Failed to lock all doors on shutdown: {}", e);
        }
        tokio::join!(
            self.relay.disconnect(),
            self.light.disconnect(),
            self.door.disconnect(),
            self.audio.disconnect(),
        );
        info!("Hardware shut down");
    }
}

/// Owner of the hardware event stream and monitor tasks.
pub struct HardwareHandle {
    event_tx: mpsc::Sender<HardwareEvent>,
    event_rx: Option<mpsc::Receiver<HardwareEvent>>,
    tasks: JoinSet<()>,
}

impl HardwareHandle {
    /// Take the event receiver, e.g. to hand it to the dispatcher.
    ///
    /// Returns `None` if it was already taken.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<HardwareEvent>> {
        self.event_rx.take()
    }

    /// Receive the next event, if the receiver was not taken.
    pub async fn recv(&mut self) -> Option<HardwareEvent> {
        match self.event_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Spawn the door and health monitors.
    pub fn start_monitors(&mut self, manager: &HardwareManager) {
        self.tasks
            .spawn(door_monitor(manager.clone(), self.event_tx.clone()));
        self.tasks
            .spawn(health_monitor(manager.clone(), self.event_tx.clone()));
    }

    /// Stop the monitor tasks.
    pub async fn shutdown(mut self) {
        self.tasks.abort_all();

        let mut panics = 0;
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                panics += 1;
            }
        }
        if panics > 0 {
            error!("{} hardware monitor task(s) panicked", panics);
        }
    }
}

/// Forward an event, waiting if the channel is full.
///
/// Returns `false` once the receiver is gone.
async fn forward(tx: &mpsc::Sender<HardwareEvent>, event: HardwareEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!("Hardware event channel full, applying backpressure");
            tx.send(event).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn door_monitor(manager: HardwareManager, tx: mpsc::Sender<HardwareEvent>) {
    let mut debouncer = Debouncer::new(manager.settings.debounce);
    let mut ticker = tokio::time::interval(manager.settings.door_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let reading = match manager.door_state().await {
            Ok(reading) => reading,
            Err(e) => {
                trace!("Door read failed: {}", e);
                continue;
            }
        };

        if let Some(edge) = debouncer.update(reading, Instant::now()) {
            info!("Door {}", edge);
            if !forward(&tx, HardwareEvent::Door(edge)).await {
                break;
            }
        }
    }
}

async fn health_monitor(manager: HardwareManager, tx: mpsc::Sender<HardwareEvent>) {
    let mut previous = manager.device_records();
    let mut ticker = tokio::time::interval(manager.settings.health_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately; connect_all just ran
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let report = manager.health_check().await;

        for record in &report.devices {
            let changed = previous
                .get(record.kind)
                .is_none_or(|before| before.status_changed(record));
            if changed && !forward(&tx, HardwareEvent::Health(record.clone())).await {
                return;
            }
        }
        previous = report;
    }
}
