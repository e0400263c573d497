//! Simulated device implementations.
//!
//! Each simulated driver succeeds immediately and records what it was asked
//! to do. They serve two purposes: the fallback the
//! [`HardwareManager`](crate::manager::HardwareManager) switches to when a
//! real device is unreachable, and scriptable devices for tests.
//!
//! Constructors return a `(driver, handle)` pair. The handle inspects the
//! recorded calls and injects faults through a [`FaultInjector`].

pub mod audio;
pub mod door;
pub mod light;
pub mod relay;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{HardwareError, Result};

// Re-export commonly used types
pub use audio::{AudioCall, SimulatedAudioHandle, SimulatedAudioSink};
pub use door::{SimulatedDoorHandle, SimulatedDoorSensor};
pub use light::{LightCall, SimulatedLightHandle, SimulatedLightStrip};
pub use relay::{RelayCall, SimulatedRelayBank, SimulatedRelayHandle};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Faults {
    connect: bool,
    health: bool,
    commands: bool,
}

/// Switches that make a simulated device misbehave.
///
/// Shared between a simulated driver and its handle.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    inner: Arc<Mutex<Faults>>,
}

impl FaultInjector {
    /// Make `connect()` fail.
    pub fn fail_connect(&self, fail: bool) {
        lock(&self.inner).connect = fail;
    }

    /// Make `health_check()` fail.
    pub fn fail_health(&self, fail: bool) {
        lock(&self.inner).health = fail;
    }

    /// Make device-specific operations fail.
    pub fn fail_commands(&self, fail: bool) {
        lock(&self.inner).commands = fail;
    }

    pub(crate) fn check_connect(&self, device: &str) -> Result<()> {
        if lock(&self.inner).connect {
            return Err(HardwareError::communication(format!(
                "{device}: simulated connect failure"
            )));
        }
        Ok(())
    }

    pub(crate) fn check_health(&self, device: &str) -> Result<()> {
        if lock(&self.inner).health {
            return Err(HardwareError::unhealthy(format!(
                "{device}: simulated health failure"
            )));
        }
        Ok(())
    }

    pub(crate) fn check_command(&self, device: &str) -> Result<()> {
        if lock(&self.inner).commands {
            return Err(HardwareError::communication(format!(
                "{device}: simulated command failure"
            )));
        }
        Ok(())
    }
}

/// Shared, append-only record of calls made to a simulated device.
#[derive(Debug)]
pub(crate) struct CallLog<C> {
    inner: Arc<Mutex<Vec<C>>>,
}

impl<C> Clone for CallLog<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for CallLog<C> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<C: Clone> CallLog<C> {
    pub(crate) fn push(&self, call: C) {
        lock(&self.inner).push(call);
    }

    pub(crate) fn snapshot(&self) -> Vec<C> {
        lock(&self.inner).clone()
    }

    pub(crate) fn clear(&self) {
        lock(&self.inner).clear();
    }
}

/// Lifecycle shared by the simulated drivers.
#[derive(Debug, Clone)]
pub(crate) struct SimulatedLink {
    name: String,
    connected: bool,
    faults: FaultInjector,
}

impl SimulatedLink {
    pub(crate) fn new(name: impl Into<String>, faults: FaultInjector) -> Self {
        Self {
            name: name.into(),
            connected: false,
            faults,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.faults.check_connect(&self.name)?;
        self.connected = true;
        Ok(())
    }

    pub(crate) fn disconnect(&mut self) {
        self.connected = false;
    }

    pub(crate) fn health_check(&self) -> Result<()> {
        self.ensure_connected()?;
        self.faults.check_health(&self.name)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    /// Gate for device-specific operations.
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        self.ensure_connected()?;
        self.faults.check_command(&self.name)
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected {
            return Err(HardwareError::disconnected(self.name.clone()));
        }
        Ok(())
    }
}
