//! Shared building blocks for the stockbox kiosk controller.
//!
//! Every other crate in the workspace depends on this one for the
//! domain primitives ([`Level`], [`SessionId`]), the common [`Error`] type,
//! protocol and timing constants, and the layered [`KioskConfig`].

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{
    AudioConfig, AuthorizationConfig, DoorConfig, HardwareConfig, KioskConfig, KioskSection,
    LightConfig, LoggingConfig, RelayConfig, StorageConfig, TimingConfig,
};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
