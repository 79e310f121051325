use crate::serial::protocol::MAX_CHANNELS;

use super::channel::ChannelState;
use super::DeviceConfig;

/// Analog measurement sources behind the multiplexed ADC and the power
/// monitor.
pub trait Sensors {
    /// Feedback voltage for one LED channel (mux already selected).
    fn feedback_voltage(&mut self, channel: usize) -> f32;
    /// One of the two temperature probes.
    fn temperature(&mut self, index: usize) -> f32;
    fn bus_voltage(&mut self) -> f32;
    fn bus_current(&mut self) -> f32;
}

/// Trip/recovery edge observed while sampling, for the device log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripEvent {
    Tripped { channel: usize, millivolts: u32 },
    Recovered { channel: usize, millivolts: u32 },
}

/// Round-robin sampler over the 8 voltage-feedback lines plus the slower
/// temperature and power readings, with the global fault flags.
///
/// A channel whose feedback voltage is at or below the threshold is
/// tripped: advisory only, the channel keeps receiving data. `fault_present`
/// tracks live threshold violations; `fault_history` latches until reboot.
pub struct FaultMonitor {
    fault_temp: f32,
    fault_current: f32,
    fault_voltage: f32,

    fb_channel: usize,
    cycle: u8,
    pub fb_mask: u8,
    pub temps: [f32; 2],
    pub bus_voltage: f32,
    pub bus_current: f32,
    pub fault_present: bool,
    pub fault_history: bool,
}

impl FaultMonitor {
    pub fn new(cfg: &DeviceConfig) -> Self {
        Self {
            fault_temp: cfg.fault_temp,
            fault_current: cfg.fault_current,
            fault_voltage: cfg.fault_voltage,
            fb_channel: 0,
            cycle: 0,
            fb_mask: 0xFF,
            temps: [0.0; 2],
            bus_voltage: 0.0,
            bus_current: 0.0,
            fault_present: false,
            fault_history: false,
        }
    }

    /// One 20 Hz sampling step: read the current feedback line, detect
    /// trip/recovery edges, and stagger the slower sensors across the
    /// 20-step cycle.
    pub fn sample<S: Sensors>(
        &mut self,
        sensors: &mut S,
        channels: &mut [ChannelState],
    ) -> Option<TripEvent> {
        let ch = self.fb_channel;
        let voltage = sensors.feedback_voltage(ch);
        let active = voltage > self.fault_voltage;
        let state = &mut channels[ch];

        let event = if active {
            self.fb_mask |= 1 << ch;
            if state.tripped {
                state.tripped = false;
                Some(TripEvent::Recovered {
                    channel: ch,
                    millivolts: (voltage * 1000.0) as u32,
                })
            } else {
                None
            }
        } else {
            self.fb_mask &= !(1 << ch);
            if !state.tripped {
                state.tripped = true;
                state.trip_count += 1;
                Some(TripEvent::Tripped {
                    channel: ch,
                    millivolts: (voltage * 1000.0) as u32,
                })
            } else {
                None
            }
        };

        self.fb_channel = (self.fb_channel + 1) % MAX_CHANNELS;

        // Temperatures at ~1 Hz, power at ~4 Hz, staggered.
        match self.cycle {
            0 => self.temps[0] = sensors.temperature(0),
            10 => self.temps[1] = sensors.temperature(1),
            c if c % 5 == 2 => {
                self.bus_voltage = sensors.bus_voltage();
                self.bus_current = sensors.bus_current();
            }
            _ => {}
        }
        self.cycle = (self.cycle + 1) % 20;

        event
    }

    /// Recompute the global fault flags (run with the 1 Hz status report).
    pub fn evaluate(&mut self) {
        self.fault_present = self.temps[0] > self.fault_temp
            || self.temps[1] > self.fault_temp
            || self.bus_current > self.fault_current
            || self.fb_mask != 0xFF;
        if self.fault_present {
            self.fault_history = true;
        }
    }

    /// Whether the secondary (fault) status LED is lit at `now` since boot:
    /// a 250 ms blink while a fault is present, a 50 ms flash once per
    /// second if only history remains, otherwise dark.
    pub fn fault_led(&self, now: std::time::Duration) -> bool {
        if self.fault_present {
            (now.as_millis() / 250) % 2 == 0
        } else if self.fault_history {
            now.as_millis() % 1000 < 50
        } else {
            false
        }
    }
}
