//! Hardware layer for the stockbox kiosk.
//!
//! The kiosk drives four devices, each of which can fail on its own:
//!
//! - a Modbus RTU relay bank holding the door locks and the dispense motor,
//! - an Art-Net LED strip with one zone per level,
//! - a GPIO door sensor,
//! - an audio player for feedback sounds.
//!
//! # Layers
//!
//! - [`traits`]: async capability traits ([`Device`], [`RelayBank`],
//!   [`LightStrip`], [`DoorSensor`], [`AudioSink`]) using native `async fn`
//!   in traits (RPITIT).
//! - [`drivers`]: real transports. Modbus over `serialport`, Art-Net over
//!   UDP, sysfs GPIO, and an external player process.
//! - [`simulated`]: in-memory drivers with a handle for scripting faults and
//!   inspecting calls. They serve as runtime fallback and as test doubles.
//! - [`devices`]: enum dispatch over real and simulated drivers so the
//!   manager stays monomorphic.
//! - [`manager`]: the [`HardwareManager`] facade with per-device worker
//!   queues, fallback routing, health monitoring and the door monitor.
//!
//! # Error Handling
//!
//! Every operation returns [`Result<T>`][error::Result] with a
//! [`HardwareError`]. The manager never panics and never raises past its
//! boundary; callers decide what a failure means.
//!
//! ```no_run
//! use stockbox_core::{KioskConfig, Level};
//! use stockbox_hardware::{Animation, HardwareManager};
//!
//! # async fn run() -> stockbox_hardware::Result<()> {
//! let config = KioskConfig::default();
//! let (manager, _handle) = HardwareManager::builder(&config).build();
//!
//! let report = manager.connect_all().await;
//! for kind in report.fallbacks() {
//!     println!("{kind} is simulated");
//! }
//!
//! manager.animate(Animation::Idle).await?;
//! manager.highlight_level(Level::new(1).unwrap()).await?;
//! # Ok(())
//! # }
//! ```

pub mod debounce;
pub mod devices;
pub mod drivers;
pub mod error;
pub mod manager;
pub mod simulated;
pub mod traits;
pub mod types;

pub use error::{HardwareError, Result};
pub use traits::{AudioSink, Device, DoorSensor, LightStrip, RelayBank};
pub use types::{Animation, DeviceKind, DeviceRecord, DoorState, HealthReport, LedColor};

pub use devices::{AnyAudioSink, AnyDoorSensor, AnyLightStrip, AnyRelayBank};
pub use manager::{
    HardwareEvent, HardwareHandle, HardwareManager, HardwareManagerBuilder, ManagerSettings,
};
