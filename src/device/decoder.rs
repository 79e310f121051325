use tracing::debug;

use crate::serial::protocol::{
    CMD_CLEAR_ALL, CMD_FLUSH, CMD_RESET, CMD_START_PATTERN, CMD_STOP_PATTERN, CMD_UPDATE_AND_FLUSH,
    CMD_UPDATE_ONLY, MAX_CHANNELS, MAX_LEDS_PER_CHANNEL,
};

use super::channel::{ChannelBank, LedBus};
use super::Stats;

/// Byte-stream parser state. Persists across reads; every completed or
/// aborted command returns to `WaitCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    WaitCommand,
    ReadChannel,
    ReadCountLo,
    ReadCountHi,
    ReadRgb,
    ReadFlushMask,
    ReadPatternId,
}

/// Mode transitions and hardware requests the surrounding runtime must act
/// on; the decoder itself only touches the channel bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// A valid update header or clear-all arrived: leave test-pattern mode.
    ExitPattern,
    StartPattern(u8),
    StopPattern,
    Reboot,
}

/// Command-stream state machine. Transitions are a function of
/// `(state, byte)` plus writes into the active channel buffer.
///
/// An invalid channel counts one error and puts the parser into discard
/// mode: the rest of that command frame (count header and RGB payload) is
/// consumed but nothing is stored, so the payload bytes cannot be
/// misread as commands and the very next command parses cleanly. An
/// invalid count aborts immediately; nothing of an aborted command ever
/// reaches a buffer.
#[derive(Debug, Default)]
pub struct Decoder {
    state: ParserState,
    channel: u8,
    led_count: u16,
    led_index: u16,
    rgb_index: u8,
    rgb: [u8; 3],
    auto_flush: bool,
    discard: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Feed one byte. Pixel data is gamma-corrected and stored into the
    /// bank as it streams in; completion of an update applies current
    /// limiting and, for update+flush, publishes the frame.
    pub fn feed<B: LedBus>(
        &mut self,
        byte: u8,
        bank: &mut ChannelBank,
        bus: &mut B,
        stats: &mut Stats,
    ) -> Action {
        match self.state {
            ParserState::WaitCommand => self.begin_command(byte, bank, bus, stats),
            ParserState::ReadPatternId => {
                self.state = ParserState::WaitCommand;
                Action::StartPattern(byte)
            }
            ParserState::ReadFlushMask => {
                self.state = ParserState::WaitCommand;
                stats.flushes += bank.flush_mask(byte, bus);
                Action::None
            }
            ParserState::ReadChannel => {
                if (byte as usize) < MAX_CHANNELS {
                    self.channel = byte;
                } else {
                    debug!("Invalid channel {byte}, discarding command");
                    stats.errors += 1;
                    self.discard = true;
                }
                self.state = ParserState::ReadCountLo;
                Action::None
            }
            ParserState::ReadCountLo => {
                self.led_count = byte as u16;
                self.state = ParserState::ReadCountHi;
                Action::None
            }
            ParserState::ReadCountHi => {
                self.led_count |= (byte as u16) << 8;
                let count_ok =
                    self.led_count > 0 && self.led_count as usize <= MAX_LEDS_PER_CHANNEL;
                if !count_ok {
                    debug!("Invalid LED count {}", self.led_count);
                    if !self.discard {
                        stats.errors += 1;
                    }
                    self.discard = false;
                    self.state = ParserState::WaitCommand;
                    return Action::None;
                }
                self.led_index = 0;
                self.rgb_index = 0;
                self.state = ParserState::ReadRgb;
                if self.discard {
                    // Drain the payload without storing it.
                    return Action::None;
                }
                bank.set_led_count(self.channel as usize, self.led_count);
                Action::ExitPattern
            }
            ParserState::ReadRgb => {
                self.rgb[self.rgb_index as usize] = byte;
                if self.rgb_index < 2 {
                    self.rgb_index += 1;
                    return Action::None;
                }
                self.rgb_index = 0;
                if !self.discard {
                    bank.store_pixel(
                        self.channel as usize,
                        self.led_index as usize,
                        self.rgb[0],
                        self.rgb[1],
                        self.rgb[2],
                    );
                    stats.pixels += 1;
                }
                self.led_index += 1;

                if self.led_index >= self.led_count {
                    if !self.discard {
                        bank.finish_frame(self.channel as usize);
                        if self.auto_flush && bank.flush(self.channel as usize, bus) {
                            stats.flushes += 1;
                        }
                    }
                    self.discard = false;
                    self.state = ParserState::WaitCommand;
                }
                Action::None
            }
        }
    }

    fn begin_command<B: LedBus>(
        &mut self,
        byte: u8,
        bank: &mut ChannelBank,
        bus: &mut B,
        stats: &mut Stats,
    ) -> Action {
        stats.commands += 1;
        match byte {
            CMD_UPDATE_AND_FLUSH => {
                self.auto_flush = true;
                self.state = ParserState::ReadChannel;
                Action::None
            }
            CMD_UPDATE_ONLY => {
                self.auto_flush = false;
                self.state = ParserState::ReadChannel;
                Action::None
            }
            CMD_FLUSH => {
                self.state = ParserState::ReadFlushMask;
                Action::None
            }
            CMD_START_PATTERN => {
                self.state = ParserState::ReadPatternId;
                Action::None
            }
            CMD_STOP_PATTERN => Action::StopPattern,
            CMD_CLEAR_ALL => {
                stats.flushes += bank.clear_all(bus);
                Action::ExitPattern
            }
            CMD_RESET => Action::Reboot,
            other => {
                // Unknown command byte: stay put and resync on the next
                // recognized command.
                debug!("Unknown command byte 0x{other:02X}");
                Action::None
            }
        }
    }
}
