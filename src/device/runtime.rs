use std::time::Duration;

use super::channel::{ChannelBank, LedBus};
use super::decoder::{Action, Decoder};
use super::faults::{FaultMonitor, Sensors, TripEvent};
use super::gamma::GammaLut;
use super::patterns::PatternPlayer;
use super::{DeviceConfig, Stats};

const SENSOR_INTERVAL: Duration = Duration::from_millis(50); // 20 Hz
const PATTERN_INTERVAL: Duration = Duration::from_micros(33_333); // 30 Hz
const STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    TestPattern,
}

/// The device's single cooperative loop, time-driven from outside: callers
/// feed received bytes and poll with the current time since boot. Output
/// lines (the 1 Hz `STATS` report and trip/recovery messages) are returned
/// for the caller to put on the wire.
pub struct DeviceRuntime<B: LedBus, S: Sensors> {
    cfg: DeviceConfig,
    bus: B,
    sensors: S,
    bank: ChannelBank,
    decoder: Decoder,
    stats: Stats,
    pattern: PatternPlayer,
    faults: FaultMonitor,
    mode: Mode,
    reboot_requested: bool,
    last_data: Duration,
    next_sensor: Duration,
    next_pattern: Duration,
    next_stats: Duration,
}

impl<B: LedBus, S: Sensors> DeviceRuntime<B, S> {
    pub fn new(cfg: DeviceConfig, bus: B, sensors: S) -> Self {
        let bank = ChannelBank::new(GammaLut::new(cfg.gamma), cfg.current_limit);
        let faults = FaultMonitor::new(&cfg);
        Self {
            cfg,
            bus,
            sensors,
            bank,
            decoder: Decoder::new(),
            stats: Stats::default(),
            pattern: PatternPlayer::new(),
            faults,
            mode: Mode::Normal,
            reboot_requested: false,
            last_data: Duration::ZERO,
            next_sensor: Duration::ZERO,
            next_pattern: Duration::ZERO,
            next_stats: STATS_INTERVAL,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn bank(&self) -> &ChannelBank {
        &self.bank
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Feed received serial bytes through the protocol decoder.
    pub fn feed(&mut self, now: Duration, bytes: &[u8]) {
        for &byte in bytes {
            self.last_data = now;
            let action =
                self.decoder
                    .feed(byte, &mut self.bank, &mut self.bus, &mut self.stats);
            match action {
                Action::None => {}
                Action::ExitPattern => {
                    if self.mode == Mode::TestPattern {
                        self.mode = Mode::Normal;
                    }
                }
                Action::StartPattern(id) => {
                    self.pattern.activate(id, &mut self.bank);
                    self.mode = Mode::TestPattern;
                }
                Action::StopPattern => {
                    self.mode = Mode::Normal;
                }
                Action::Reboot => {
                    self.reboot_requested = true;
                }
            }
        }
    }

    /// Advance the time-driven tasks: timeout fallback, pattern frames,
    /// sensor sampling, and the status report. Returns output lines.
    pub fn poll(&mut self, now: Duration) -> Vec<String> {
        let mut lines = Vec::new();

        // Silence on the link falls back to the safe default pattern.
        if self.mode == Mode::Normal && now.saturating_sub(self.last_data) > self.cfg.pattern_timeout
        {
            lines.push("Timeout: activating test pattern 0".to_string());
            self.pattern.activate(0, &mut self.bank);
            self.mode = Mode::TestPattern;
        }

        if self.mode == Mode::TestPattern && now >= self.next_pattern {
            self.stats.flushes += self.pattern.step(&mut self.bank, &mut self.bus);
            self.next_pattern = now + PATTERN_INTERVAL;
        }

        if now >= self.next_sensor {
            if let Some(event) = self
                .faults
                .sample(&mut self.sensors, self.bank.channels_mut())
            {
                lines.push(match event {
                    TripEvent::Tripped {
                        channel,
                        millivolts,
                    } => format!(
                        "Channel {channel} TRIPPED! (voltage: {:.3}V)",
                        millivolts as f32 / 1000.0
                    ),
                    TripEvent::Recovered {
                        channel,
                        millivolts,
                    } => format!(
                        "Channel {channel} recovered (voltage: {:.3}V)",
                        millivolts as f32 / 1000.0
                    ),
                });
            }
            self.next_sensor = now + SENSOR_INTERVAL;
        }

        if now >= self.next_stats {
            self.faults.evaluate();
            lines.push(self.stats_line(now));
            self.next_stats = now + STATS_INTERVAL;
        }

        lines
    }

    fn stats_line(&self, now: Duration) -> String {
        let (mut trips, mut limits) = (0u64, 0u64);
        for ch in self.bank.channels() {
            trips += ch.trip_count as u64;
            limits += ch.limit_events as u64;
        }
        format!(
            "STATS up={} cmd={} pix={} flush={} err={} t0={:.1} t1={:.1} v={:.2} i={:.2} fb={:02X} trip={} lim={} mode={}",
            now.as_secs(),
            self.stats.commands,
            self.stats.pixels,
            self.stats.flushes,
            self.stats.errors,
            self.faults.temps[0],
            self.faults.temps[1],
            self.faults.bus_voltage,
            self.faults.bus_current,
            self.faults.fb_mask,
            trips,
            limits,
            match self.mode {
                Mode::Normal => 0,
                Mode::TestPattern => 1,
            },
        )
    }

    /// Whether the primary (activity) status LED is lit at `now`: a slow
    /// blink in pattern mode, a fast blink while serial data is arriving,
    /// a slow blink otherwise.
    pub fn activity_led(&self, now: Duration) -> bool {
        let interval_ms = if self.mode == Mode::TestPattern {
            500
        } else if now.saturating_sub(self.last_data) < Duration::from_secs(1) {
            100
        } else {
            500
        };
        (now.as_millis() / interval_ms) % 2 == 0
    }

    /// Secondary status LED (fault indicator).
    pub fn fault_led(&self, now: Duration) -> bool {
        self.faults.fault_led(now)
    }
}
