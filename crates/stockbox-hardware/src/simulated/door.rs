//! Simulated door sensor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{FaultInjector, SimulatedLink};
use crate::error::Result;
use crate::traits::{Device, DoorSensor};
use crate::types::DoorState;

/// Door sensor whose reading is set through its handle.
///
/// The door starts closed.
///
/// # Examples
///
/// ```
/// use stockbox_hardware::simulated::SimulatedDoorSensor;
/// use stockbox_hardware::traits::{Device, DoorSensor};
/// use stockbox_hardware::types::DoorState;
///
/// #[tokio::main]
/// async fn main() -> stockbox_hardware::Result<()> {
///     let (mut sensor, handle) = SimulatedDoorSensor::new();
///     sensor.connect().await?;
///
///     handle.open();
///     assert_eq!(sensor.read().await?, DoorState::Open);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct SimulatedDoorSensor {
    link: SimulatedLink,
    open: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl SimulatedDoorSensor {
    pub fn new() -> (Self, SimulatedDoorHandle) {
        Self::with_name("Simulated door sensor")
    }

    pub fn with_name(name: impl Into<String>) -> (Self, SimulatedDoorHandle) {
        let faults = FaultInjector::default();
        let open = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));

        let sensor = Self {
            link: SimulatedLink::new(name, faults.clone()),
            open: Arc::clone(&open),
            reads: Arc::clone(&reads),
        };

        (sensor, SimulatedDoorHandle { faults, open, reads })
    }
}

impl Default for SimulatedDoorSensor {
    fn default() -> Self {
        Self::new().0
    }
}

impl Device for SimulatedDoorSensor {
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

impl DoorSensor for SimulatedDoorSensor {
    async fn read(&mut self) -> Result<DoorState> {
        self.link.ensure_ready()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.open.load(Ordering::SeqCst) {
            Ok(DoorState::Open)
        } else {
            Ok(DoorState::Closed)
        }
    }
}

/// Handle for driving a [`SimulatedDoorSensor`].
#[derive(Debug, Clone)]
pub struct SimulatedDoorHandle {
    faults: FaultInjector,
    open: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl SimulatedDoorHandle {
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn open(&self) {
        self.set(DoorState::Open);
    }

    pub fn close(&self) {
        self.set(DoorState::Closed);
    }

    pub fn set(&self, state: DoorState) {
        self.open.store(state.is_open(), Ordering::SeqCst);
    }

    /// Number of successful reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reading_follows_handle() {
        let (mut sensor, handle) = SimulatedDoorSensor::new();
        sensor.connect().await.unwrap();

        assert_eq!(sensor.read().await.unwrap(), DoorState::Closed);
        handle.open();
        assert_eq!(sensor.read().await.unwrap(), DoorState::Open);
        handle.close();
        assert_eq!(sensor.read().await.unwrap(), DoorState::Closed);
        assert_eq!(handle.reads(), 3);
    }
}
