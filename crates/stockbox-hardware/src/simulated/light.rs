//! Simulated light strip.

use super::{CallLog, FaultInjector, SimulatedLink};
use crate::error::{HardwareError, Result};
use crate::traits::{Device, LightStrip};
use crate::types::{Animation, LedColor};

/// One recorded light strip call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightCall {
    Animation { animation: Animation, brightness: u8 },
    Highlight { start: u16, end: u16, color: LedColor },
}

/// Light strip that records presets and highlights.
#[derive(Debug)]
pub struct SimulatedLightStrip {
    link: SimulatedLink,
    pixel_count: u16,
    calls: CallLog<LightCall>,
}

impl SimulatedLightStrip {
    pub fn new(pixel_count: u16) -> (Self, SimulatedLightHandle) {
        Self::with_name("Simulated light strip", pixel_count)
    }

    pub fn with_name(name: impl Into<String>, pixel_count: u16) -> (Self, SimulatedLightHandle) {
        let faults = FaultInjector::default();
        let calls = CallLog::default();

        let strip = Self {
            link: SimulatedLink::new(name, faults.clone()),
            pixel_count,
            calls: calls.clone(),
        };

        (strip, SimulatedLightHandle { faults, calls })
    }
}

impl Device for SimulatedLightStrip {
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

impl LightStrip for SimulatedLightStrip {
    async fn set_animation(&mut self, animation: Animation, brightness: u8) -> Result<()> {
        self.link.ensure_ready()?;
        self.calls.push(LightCall::Animation {
            animation,
            brightness,
        });
        Ok(())
    }

    async fn highlight_zone(&mut self, start: u16, end: u16, color: LedColor) -> Result<()> {
        self.link.ensure_ready()?;
        if start > end || end >= self.pixel_count {
            return Err(HardwareError::invalid_data(format!(
                "zone {}..={} outside strip of {} pixels",
                start, end, self.pixel_count
            )));
        }
        self.calls.push(LightCall::Highlight { start, end, color });
        Ok(())
    }
}

/// Handle for inspecting a [`SimulatedLightStrip`].
#[derive(Debug, Clone)]
pub struct SimulatedLightHandle {
    faults: FaultInjector,
    calls: CallLog<LightCall>,
}

impl SimulatedLightHandle {
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn calls(&self) -> Vec<LightCall> {
        self.calls.snapshot()
    }

    /// Presets shown so far, oldest first.
    pub fn animations(&self) -> Vec<Animation> {
        self.calls
            .snapshot()
            .into_iter()
            .filter_map(|call| match call {
                LightCall::Animation { animation, .. } => Some(animation),
                LightCall::Highlight { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.clear();
    }
}
