//! Device-side protocol decoder and channel engine.
//!
//! This is the same state machine the LED proxy firmware runs, expressed
//! against narrow hardware traits ([`channel::LedBus`], [`faults::Sensors`])
//! so it can be driven by the `devsim` binary and the test suite with
//! in-memory hardware.

pub mod channel;
pub mod decoder;
pub mod faults;
pub mod gamma;
pub mod limiter;
pub mod patterns;
pub mod runtime;
pub mod testing;

pub use channel::{ChannelBank, ChannelState, LedBus, Rgb};
pub use decoder::{Action, Decoder, ParserState};
pub use faults::{FaultMonitor, Sensors};
pub use gamma::GammaLut;
pub use runtime::{DeviceRuntime, Mode};

/// Device behavior knobs, fixed at boot.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub gamma: f32,
    /// Per-channel brightness-unit budget for the current limiter.
    pub current_limit: u32,
    /// Silence on the serial link before the fallback pattern starts.
    pub pattern_timeout: std::time::Duration,
    /// Temperature above which a global fault is raised (either sensor).
    pub fault_temp: f32,
    /// Bus current above which a global fault is raised.
    pub fault_current: f32,
    /// Feedback voltage at or below which a channel is tripped.
    pub fault_voltage: f32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            gamma: 2.8,
            current_limit: 30_000,
            pattern_timeout: std::time::Duration::from_secs(5),
            fault_temp: 60.0,
            fault_current: 10.0,
            fault_voltage: 1.0,
        }
    }
}

/// Decoder and traffic counters reported in the 1 Hz `STATS` line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub commands: u64,
    pub pixels: u64,
    pub flushes: u64,
    pub errors: u64,
}
