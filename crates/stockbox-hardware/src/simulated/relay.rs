//! Simulated relay bank.

use super::{CallLog, FaultInjector, SimulatedLink};
use crate::error::{HardwareError, Result};
use crate::traits::{Device, RelayBank};

/// One recorded `set_channel` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayCall {
    pub channel: u16,
    pub on: bool,
}

/// Relay bank that records channel changes instead of switching relays.
///
/// # Examples
///
/// ```
/// use stockbox_hardware::simulated::SimulatedRelayBank;
/// use stockbox_hardware::traits::{Device, RelayBank};
///
/// #[tokio::main]
/// async fn main() -> stockbox_hardware::Result<()> {
///     let (mut relay, handle) = SimulatedRelayBank::new(32);
///
///     relay.connect().await?;
///     relay.set_channel(3, true).await?;
///
///     assert!(handle.is_on(3));
///     assert_eq!(handle.count(3, true), 1);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct SimulatedRelayBank {
    link: SimulatedLink,
    channels: u16,
    calls: CallLog<RelayCall>,
}

impl SimulatedRelayBank {
    /// Create a simulated bank with `channels` relays.
    pub fn new(channels: u16) -> (Self, SimulatedRelayHandle) {
        Self::with_name("Simulated relay bank", channels)
    }

    /// Create a simulated bank with a custom name.
    pub fn with_name(name: impl Into<String>, channels: u16) -> (Self, SimulatedRelayHandle) {
        let faults = FaultInjector::default();
        let calls = CallLog::default();

        let relay = Self {
            link: SimulatedLink::new(name, faults.clone()),
            channels,
            calls: calls.clone(),
        };
        let handle = SimulatedRelayHandle { faults, calls };

        (relay, handle)
    }
}

impl Device for SimulatedRelayBank {
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

impl RelayBank for SimulatedRelayBank {
    fn channel_count(&self) -> u16 {
        self.channels
    }

    async fn set_channel(&mut self, channel: u16, on: bool) -> Result<()> {
        self.link.ensure_ready()?;
        if channel >= self.channels {
            return Err(HardwareError::invalid_data(format!(
                "relay channel {} outside 0..{}",
                channel, self.channels
            )));
        }
        self.calls.push(RelayCall { channel, on });
        Ok(())
    }
}

/// Handle for inspecting and scripting a [`SimulatedRelayBank`].
#[derive(Debug, Clone)]
pub struct SimulatedRelayHandle {
    faults: FaultInjector,
    calls: CallLog<RelayCall>,
}

impl SimulatedRelayHandle {
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Every accepted `set_channel` call, oldest first.
    pub fn calls(&self) -> Vec<RelayCall> {
        self.calls.snapshot()
    }

    /// Number of times `channel` was switched to `on`.
    pub fn count(&self, channel: u16, on: bool) -> usize {
        self.calls
            .snapshot()
            .iter()
            .filter(|call| call.channel == channel && call.on == on)
            .count()
    }

    /// Last commanded state of `channel` (off if never set).
    pub fn is_on(&self, channel: u16) -> bool {
        self.calls
            .snapshot()
            .iter()
            .rev()
            .find(|call| call.channel == channel)
            .is_some_and(|call| call.on)
    }

    pub fn clear(&self) {
        self.calls.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls() {
        let (mut relay, handle) = SimulatedRelayBank::new(32);
        relay.connect().await.unwrap();

        relay.set_channel(1, true).await.unwrap();
        relay.set_channel(1, false).await.unwrap();
        relay.set_channel(2, true).await.unwrap();

        assert_eq!(handle.calls().len(), 3);
        assert!(!handle.is_on(1));
        assert!(handle.is_on(2));
        assert!(!handle.is_on(7));
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_channel() {
        let (mut relay, handle) = SimulatedRelayBank::new(4);
        relay.connect().await.unwrap();

        assert!(relay.set_channel(4, true).await.is_err());
        assert!(handle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let (mut relay, handle) = SimulatedRelayBank::new(4);
        assert!(relay.set_channel(0, true).await.is_err());

        handle.faults().fail_connect(true);
        assert!(relay.connect().await.is_err());
        assert!(!relay.is_connected());
    }

    #[tokio::test]
    async fn test_command_failure_is_not_recorded() {
        let (mut relay, handle) = SimulatedRelayBank::new(4);
        relay.connect().await.unwrap();
        handle.faults().fail_commands(true);

        assert!(relay.set_channel(0, true).await.is_err());
        assert_eq!(handle.count(0, true), 0);
    }
}
