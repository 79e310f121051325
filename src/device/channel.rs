use crate::serial::protocol::{MAX_CHANNELS, MAX_LEDS_PER_CHANNEL};

use super::gamma::GammaLut;
use super::limiter::apply_current_limit;

/// One gamma-corrected LED color word as stored in the channel buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Brightness units for current limiting.
    pub fn brightness_units(&self) -> u32 {
        self.r as u32 + self.g as u32 + self.b as u32
    }
}

/// DMA-fed LED output hardware. A transfer reads from the channel's output
/// buffer; `wait_idle` must block until an in-progress transfer finishes.
pub trait LedBus {
    fn busy(&self, channel: usize) -> bool;
    fn wait_idle(&mut self, channel: usize);
    fn start_transfer(&mut self, channel: usize, pixels: &[Rgb]);
}

/// Per-channel double buffer. The parser writes into `active`; DMA reads
/// from `output`; a flush exchanges the roles. Both arrays live for the
/// device lifetime and are never reallocated.
pub struct ChannelState {
    buf_a: Box<[Rgb]>,
    buf_b: Box<[Rgb]>,
    active_is_a: bool,
    pub led_count: u16,
    pub tripped: bool,
    pub trip_count: u32,
    pub limit_events: u32,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            buf_a: vec![Rgb::BLACK; MAX_LEDS_PER_CHANNEL].into_boxed_slice(),
            buf_b: vec![Rgb::BLACK; MAX_LEDS_PER_CHANNEL].into_boxed_slice(),
            active_is_a: true,
            led_count: 0,
            tripped: false,
            trip_count: 0,
            limit_events: 0,
        }
    }

    pub fn active(&self) -> &[Rgb] {
        if self.active_is_a {
            &self.buf_a
        } else {
            &self.buf_b
        }
    }

    pub fn active_mut(&mut self) -> &mut [Rgb] {
        if self.active_is_a {
            &mut self.buf_a
        } else {
            &mut self.buf_b
        }
    }

    pub fn output(&self) -> &[Rgb] {
        if self.active_is_a {
            &self.buf_b
        } else {
            &self.buf_a
        }
    }

    fn swap(&mut self) {
        self.active_is_a = !self.active_is_a;
    }
}

/// All eight channels plus the packing-time gamma table and the current
/// limiter budget.
pub struct ChannelBank {
    channels: Vec<ChannelState>,
    gamma: GammaLut,
    current_limit: u32,
}

impl ChannelBank {
    pub fn new(gamma: GammaLut, current_limit: u32) -> Self {
        Self {
            channels: (0..MAX_CHANNELS).map(|_| ChannelState::new()).collect(),
            gamma,
            current_limit,
        }
    }

    pub fn channel(&self, ch: usize) -> &ChannelState {
        &self.channels[ch]
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [ChannelState] {
        &mut self.channels
    }

    pub fn set_led_count(&mut self, ch: usize, count: u16) {
        self.channels[ch].led_count = count;
    }

    /// Gamma-correct and store one parsed pixel into the active buffer.
    pub fn store_pixel(&mut self, ch: usize, index: usize, r: u8, g: u8, b: u8) {
        let pixel = Rgb::new(self.gamma.apply(r), self.gamma.apply(g), self.gamma.apply(b));
        self.channels[ch].active_mut()[index] = pixel;
    }

    /// Store an already gamma-corrected pixel (pattern generator path).
    pub fn store_corrected(&mut self, ch: usize, index: usize, pixel: Rgb) {
        self.channels[ch].active_mut()[index] = pixel;
    }

    pub fn correct(&self, r: u8, g: u8, b: u8) -> Rgb {
        Rgb::new(self.gamma.apply(r), self.gamma.apply(g), self.gamma.apply(b))
    }

    /// Run the current limiter over the completed frame in the active
    /// buffer. Must precede the flush that publishes the frame.
    pub fn finish_frame(&mut self, ch: usize) {
        let count = self.channels[ch].led_count as usize;
        let limit = self.current_limit;
        let state = &mut self.channels[ch];
        if apply_current_limit(&mut state.active_mut()[..count], limit) {
            state.limit_events += 1;
        }
    }

    /// Publish the active buffer: wait out any in-progress DMA on this
    /// channel, swap buffers, and start the transfer from the new output
    /// buffer. The stale active buffer is overwritten lazily by the next
    /// frame. Returns false for a channel with no LEDs configured.
    pub fn flush<B: LedBus>(&mut self, ch: usize, bus: &mut B) -> bool {
        if self.channels[ch].led_count == 0 {
            return false;
        }
        if bus.busy(ch) {
            bus.wait_idle(ch);
        }
        self.channels[ch].swap();
        let count = self.channels[ch].led_count as usize;
        bus.start_transfer(ch, &self.channels[ch].output()[..count]);
        true
    }

    /// Flush every channel whose mask bit is set. Returns the flush count.
    pub fn flush_mask<B: LedBus>(&mut self, mask: u8, bus: &mut B) -> u64 {
        let mut flushes = 0;
        for ch in 0..MAX_CHANNELS {
            if mask & (1 << ch) != 0 && self.flush(ch, bus) {
                flushes += 1;
            }
        }
        flushes
    }

    /// Zero every channel at full length and flush. Returns the flush count.
    pub fn clear_all<B: LedBus>(&mut self, bus: &mut B) -> u64 {
        let mut flushes = 0;
        for ch in 0..MAX_CHANNELS {
            self.channels[ch].led_count = MAX_LEDS_PER_CHANNEL as u16;
            self.channels[ch].active_mut().fill(Rgb::BLACK);
            if self.flush(ch, bus) {
                flushes += 1;
            }
        }
        flushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::RecordingBus;

    fn bank() -> ChannelBank {
        ChannelBank::new(GammaLut::identity(), u32::MAX)
    }

    #[test]
    fn flush_swaps_active_and_output() {
        let mut bank = bank();
        let mut bus = RecordingBus::default();
        bank.set_led_count(0, 2);
        bank.store_pixel(0, 0, 1, 2, 3);
        bank.store_pixel(0, 1, 4, 5, 6);

        assert!(bank.flush(0, &mut bus));
        assert_eq!(bank.channel(0).output()[0], Rgb::new(1, 2, 3));
        assert_eq!(
            bus.transfers[0],
            (0, vec![Rgb::new(1, 2, 3), Rgb::new(4, 5, 6)])
        );
    }

    #[test]
    fn flush_waits_for_dma_before_swap() {
        let mut bank = bank();
        let mut bus = RecordingBus::default();
        bank.set_led_count(0, 1);
        bank.store_pixel(0, 0, 9, 9, 9);
        assert!(bank.flush(0, &mut bus));

        // The fake bus stays busy until wait_idle is called; a second flush
        // must go through wait_idle, not start a concurrent transfer.
        assert!(bus.busy(0));
        bank.store_pixel(0, 0, 7, 7, 7);
        assert!(bank.flush(0, &mut bus));
        assert_eq!(bus.waits, 1);
        assert_eq!(bus.transfers.len(), 2);
    }

    #[test]
    fn flush_of_unconfigured_channel_is_a_noop() {
        let mut bank = bank();
        let mut bus = RecordingBus::default();
        assert!(!bank.flush(3, &mut bus));
        assert!(bus.transfers.is_empty());
    }

    #[test]
    fn flush_mask_hits_selected_channels_in_order() {
        let mut bank = bank();
        let mut bus = RecordingBus::default();
        for ch in 0..4 {
            bank.set_led_count(ch, 1);
        }
        assert_eq!(bank.flush_mask(0b0000_1010, &mut bus), 2);
        let hit: Vec<usize> = bus.transfers.iter().map(|t| t.0).collect();
        assert_eq!(hit, vec![1, 3]);
    }

    #[test]
    fn clear_all_zeroes_and_flushes_every_channel() {
        let mut bank = bank();
        let mut bus = RecordingBus::default();
        bank.set_led_count(0, 2);
        bank.store_pixel(0, 0, 255, 255, 255);

        assert_eq!(bank.clear_all(&mut bus), 8);
        assert_eq!(bus.transfers.len(), 8);
        for (ch, pixels) in &bus.transfers {
            assert_eq!(pixels.len(), MAX_LEDS_PER_CHANNEL, "channel {ch}");
            assert!(pixels.iter().all(|p| *p == Rgb::BLACK));
        }
    }

    #[test]
    fn store_pixel_applies_gamma() {
        let mut bank = ChannelBank::new(GammaLut::new(2.8), u32::MAX);
        bank.set_led_count(0, 1);
        bank.store_pixel(0, 0, 128, 0, 255);
        let px = bank.channel(0).active()[0];
        assert!(px.r < 128);
        assert_eq!(px.g, 0);
        assert_eq!(px.b, 255);
    }
}
