//! In-memory hardware for the simulator binary and the test suite.

use super::channel::{LedBus, Rgb};
use super::faults::Sensors;

/// Records every transfer and models DMA as busy-until-waited: a channel
/// stays busy from `start_transfer` until `wait_idle`, which makes any
/// missing wait-before-swap show up as an overlapping-transfer panic.
#[derive(Default)]
pub struct RecordingBus {
    pub transfers: Vec<(usize, Vec<Rgb>)>,
    pub waits: u64,
    busy: [bool; 8],
}

impl LedBus for RecordingBus {
    fn busy(&self, channel: usize) -> bool {
        self.busy[channel]
    }

    fn wait_idle(&mut self, channel: usize) {
        if self.busy[channel] {
            self.waits += 1;
            self.busy[channel] = false;
        }
    }

    fn start_transfer(&mut self, channel: usize, pixels: &[Rgb]) {
        assert!(
            !self.busy[channel],
            "transfer started on channel {channel} while DMA in progress"
        );
        self.busy[channel] = true;
        self.transfers.push((channel, pixels.to_vec()));
    }
}

impl RecordingBus {
    /// Last frame transferred on a channel.
    pub fn last_frame(&self, channel: usize) -> Option<&[Rgb]> {
        self.transfers
            .iter()
            .rev()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, px)| px.as_slice())
    }
}

/// Fixed sensor readings, adjustable per test.
#[derive(Debug, Clone)]
pub struct StaticSensors {
    pub feedback_voltages: [f32; 8],
    pub temperatures: [f32; 2],
    pub bus_voltage: f32,
    pub bus_current: f32,
}

impl Default for StaticSensors {
    fn default() -> Self {
        Self {
            feedback_voltages: [2.5; 8],
            temperatures: [25.0, 25.0],
            bus_voltage: 5.0,
            bus_current: 1.0,
        }
    }
}

impl Sensors for StaticSensors {
    fn feedback_voltage(&mut self, channel: usize) -> f32 {
        self.feedback_voltages[channel]
    }

    fn temperature(&mut self, index: usize) -> f32 {
        self.temperatures[index]
    }

    fn bus_voltage(&mut self) -> f32 {
        self.bus_voltage
    }

    fn bus_current(&mut self) -> f32 {
        self.bus_current
    }
}
