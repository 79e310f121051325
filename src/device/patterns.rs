use crate::serial::protocol::{MAX_CHANNELS, MAX_LEDS_PER_CHANNEL};

use super::channel::{ChannelBank, LedBus};

pub const NUM_PATTERNS: u8 = 6;

const SINE_TABLE_SIZE: usize = 512;

/// Per-channel identification colors: high saturation, easily told apart.
const CHANNEL_COLORS: [(u8, u8, u8); 8] = [
    (255, 0, 0),     // red
    (0, 255, 0),     // green
    (0, 0, 255),     // blue
    (0, 255, 255),   // cyan
    (255, 0, 255),   // magenta
    (255, 255, 0),   // yellow
    (255, 128, 128), // light red
    (128, 128, 255), // light blue
];

const CYCLE_COLORS: [(u8, u8, u8); 8] = [
    (255, 0, 0),
    (0, 255, 0),
    (0, 0, 255),
    (0, 255, 255),
    (255, 0, 255),
    (255, 255, 0),
    (255, 255, 255),
    (0, 0, 0),
];

/// Ternary digit colors for the calibration pattern: 0=red, 1=green, 2=blue.
const TERNARY_COLORS: [(u8, u8, u8); 3] = [(255, 0, 0), (0, 255, 0), (0, 0, 255)];

pub const TERNARY_DIGITS: u8 = 9;

/// Base-3 digit `pos` (0 = least significant) of the calibration code for a
/// global LED id. The code is `id * 9` plus the padding that makes it
/// divisible by 7, which keeps any two ids at least one digit apart.
pub fn ternary_digit(led_id: u32, pos: u8) -> u8 {
    let mut n = led_id * 9;
    n += 7 - (n % 7);
    for _ in 0..pos {
        n /= 3;
    }
    (n % 3) as u8
}

/// Device-local fallback animations, advanced at 30 Hz regardless of the
/// host frame rate. Every frame is a deterministic function of the frame
/// counter, channel, and LED index.
pub struct PatternPlayer {
    pattern: u8,
    frame_counter: u32,
    sine: [u16; SINE_TABLE_SIZE],
}

impl Default for PatternPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternPlayer {
    pub fn new() -> Self {
        let mut sine = [0u16; SINE_TABLE_SIZE];
        for (i, slot) in sine.iter_mut().enumerate() {
            let angle = i as f32 * core::f32::consts::TAU / SINE_TABLE_SIZE as f32;
            let brightness = 0.3 + 0.7 * (angle.sin() * 0.5 + 0.5);
            *slot = (brightness * 32_768.0) as u16;
        }
        Self {
            pattern: 0,
            frame_counter: 0,
            sine,
        }
    }

    pub fn pattern(&self) -> u8 {
        self.pattern
    }

    /// Select a pattern (ids wrap) and size every channel for it.
    pub fn activate(&mut self, id: u8, bank: &mut ChannelBank) {
        self.pattern = id % NUM_PATTERNS;
        self.frame_counter = 0;
        for ch in 0..MAX_CHANNELS {
            bank.set_led_count(ch, MAX_LEDS_PER_CHANNEL as u16);
        }
    }

    /// Render and publish one 30 Hz pattern frame on every channel.
    pub fn step<B: LedBus>(&mut self, bank: &mut ChannelBank, bus: &mut B) -> u64 {
        self.frame_counter += 1;
        let frame = self.frame_counter;
        let mut flushes = 0;
        for ch in 0..MAX_CHANNELS {
            let count = bank.channel(ch).led_count as usize;
            for i in 0..count {
                let (r, g, b) = self.shade(frame, ch, i, count);
                bank.store_pixel(ch, i, r, g, b);
            }
            bank.finish_frame(ch);
            if bank.flush(ch, bus) {
                flushes += 1;
            }
        }
        flushes
    }

    fn shade(&self, frame: u32, ch: usize, i: usize, count: usize) -> (u8, u8, u8) {
        match self.pattern {
            0 => channel_id_shade(frame, ch, i, count),
            1 => {
                // 1 Hz cycle through red, green, blue.
                let phase = (frame / 30) % 3;
                match phase {
                    0 => (255, 0, 0),
                    1 => (0, 255, 0),
                    _ => (0, 0, 255),
                }
            }
            2 => {
                let phase = ((frame / 30) % 8) as usize;
                CYCLE_COLORS[phase]
            }
            3 => {
                // Alternating red blink on the first and last LED.
                let blink = (frame / 15) % 2 == 1;
                if i == 0 {
                    if blink { (255, 0, 0) } else { (0, 0, 0) }
                } else if i == count - 1 {
                    if blink { (0, 0, 0) } else { (255, 0, 0) }
                } else {
                    (0, 0, 0)
                }
            }
            4 => ternary_shade(frame, ch, i),
            _ => self.twinkle_shade(frame, ch, i),
        }
    }

    fn twinkle_shade(&self, frame: u32, ch: usize, i: usize) -> (u8, u8, u8) {
        // Deterministic per-LED phase and speed.
        let seed = (ch as u32 * 37 + i as u32 * 73) as usize;
        let phase_offset = (seed * 17) % SINE_TABLE_SIZE;
        let speed = (seed % 7) as u32 + 1;
        let position = (frame * speed + phase_offset as u32) as usize % SINE_TABLE_SIZE;
        let brightness = self.sine[position] as u32;
        let (r, g, b) = CHANNEL_COLORS[ch];
        (
            ((r as u32 * brightness) >> 15) as u8,
            ((g as u32 * brightness) >> 15) as u8,
            ((b as u32 * brightness) >> 15) as u8,
        )
    }
}

/// Pattern 0: first and last `ch + 1` LEDs blink in the channel color on
/// opposite half-cycles; everything else stays dark to minimize power.
fn channel_id_shade(frame: u32, ch: usize, i: usize, count: usize) -> (u8, u8, u8) {
    let blink = (frame / 15) & 1 == 1;
    let ident = ch + 1;
    let is_first = i < ident;
    let is_last = i >= count.saturating_sub(ident);
    let lit = (is_first && blink) || (is_last && !is_first && !blink);
    if lit {
        CHANNEL_COLORS[ch]
    } else {
        (0, 0, 0)
    }
}

/// Pattern 4: camera-calibration encoding. A 21-frame cycle held 6 ticks
/// per frame: black, magenta sync, black, then nine digit frames each
/// separated by black. Digit frames color every LED by one base-3 digit of
/// its global id code.
fn ternary_shade(frame: u32, ch: usize, i: usize) -> (u8, u8, u8) {
    const FRAMES_PER_STATE: u32 = 6; // 0.2 s at 30 Hz
    let total_frames = 3 + TERNARY_DIGITS as u32 * 2;
    let cycle_frame = (frame / FRAMES_PER_STATE) % total_frames;

    match cycle_frame {
        0 | 2 => (0, 0, 0),
        1 => (255, 0, 255), // sync marker
        _ => {
            let digit_frame = cycle_frame - 3;
            if digit_frame % 2 != 0 {
                return (0, 0, 0); // spacing between digits
            }
            let digit_index = (digit_frame / 2) as u8;
            let global_id = (ch * MAX_LEDS_PER_CHANNEL + i) as u32;
            let digit = ternary_digit(global_id, digit_index);
            TERNARY_COLORS[digit as usize]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::gamma::GammaLut;
    use crate::device::testing::RecordingBus;
    use crate::device::Rgb;

    fn fixture() -> (PatternPlayer, ChannelBank, RecordingBus) {
        let mut player = PatternPlayer::new();
        let mut bank = ChannelBank::new(GammaLut::identity(), u32::MAX);
        player.activate(0, &mut bank);
        (player, bank, RecordingBus::default())
    }

    fn digits(id: u32) -> [u8; TERNARY_DIGITS as usize] {
        let mut out = [0u8; TERNARY_DIGITS as usize];
        for (pos, slot) in out.iter_mut().enumerate() {
            *slot = ternary_digit(id, pos as u8);
        }
        out
    }

    #[test]
    fn ternary_codes_are_unique_across_the_display() {
        let total = (MAX_CHANNELS * MAX_LEDS_PER_CHANNEL) as u32;
        let mut seen = std::collections::HashSet::new();
        for id in 0..total {
            assert!(seen.insert(digits(id)), "duplicate code for id {id}");
        }
    }

    #[test]
    fn ternary_code_is_divisible_by_seven() {
        for id in [0u32, 1, 7, 199, 1599] {
            let mut n = id * 9;
            n += 7 - (n % 7);
            assert_eq!(n % 7, 0);
        }
    }

    #[test]
    fn ternary_digits_fit_nine_positions() {
        // The largest code must be expressible in nine base-3 digits.
        let max_id = (MAX_CHANNELS * MAX_LEDS_PER_CHANNEL - 1) as u32;
        let mut n = max_id * 9;
        n += 7 - (n % 7);
        assert!(n < 3u32.pow(TERNARY_DIGITS as u32));
    }

    #[test]
    fn activation_wraps_and_sizes_channels() {
        let (mut player, mut bank, _) = fixture();
        player.activate(NUM_PATTERNS + 1, &mut bank);
        assert_eq!(player.pattern(), 1);
        for ch in 0..MAX_CHANNELS {
            assert_eq!(bank.channel(ch).led_count, MAX_LEDS_PER_CHANNEL as u16);
        }
    }

    #[test]
    fn step_flushes_every_channel() {
        let (mut player, mut bank, mut bus) = fixture();
        let flushes = player.step(&mut bank, &mut bus);
        assert_eq!(flushes, MAX_CHANNELS as u64);
        assert_eq!(bus.transfers.len(), MAX_CHANNELS);
    }

    #[test]
    fn rgb_cycle_is_solid_per_phase() {
        let (mut player, mut bank, mut bus) = fixture();
        player.activate(1, &mut bank);
        player.step(&mut bank, &mut bus);
        let frame = bus.last_frame(0).unwrap();
        assert!(frame.iter().all(|p| *p == Rgb::new(255, 0, 0)));
    }

    #[test]
    fn ternary_sync_frame_is_magenta_everywhere() {
        let (mut player, mut bank, mut bus) = fixture();
        player.activate(4, &mut bank);
        // Frames 1..=6 are cycle frame 0 (black); 7..=12 are the sync frame.
        for _ in 0..7 {
            player.step(&mut bank, &mut bus);
        }
        let frame = bus.last_frame(3).unwrap();
        assert!(frame.iter().all(|p| *p == Rgb::new(255, 0, 255)));
    }

    #[test]
    fn ternary_first_digit_frame_encodes_ids() {
        let (mut player, mut bank, mut bus) = fixture();
        player.activate(4, &mut bank);
        // Cycle frame 3 (first digit frame) starts at frame counter 18.
        for _ in 0..19 {
            player.step(&mut bank, &mut bus);
        }
        let frame = bus.last_frame(0).unwrap();
        for (i, px) in frame.iter().enumerate() {
            let digit = ternary_digit(i as u32, 0);
            let (r, g, b) = TERNARY_COLORS[digit as usize];
            assert_eq!(*px, Rgb::new(r, g, b), "led {i}");
        }
    }

    #[test]
    fn end_blink_alternates_first_and_last() {
        let (mut player, mut bank, mut bus) = fixture();
        player.activate(3, &mut bank);
        player.step(&mut bank, &mut bus); // frame 1: blink false
        let frame = bus.last_frame(0).unwrap();
        assert_eq!(frame[0], Rgb::BLACK);
        assert_eq!(frame[MAX_LEDS_PER_CHANNEL - 1], Rgb::new(255, 0, 0));
        for _ in 0..15 {
            player.step(&mut bank, &mut bus); // frame 16: blink true
        }
        let frame = bus.last_frame(0).unwrap();
        assert_eq!(frame[0], Rgb::new(255, 0, 0));
        assert_eq!(frame[MAX_LEDS_PER_CHANNEL - 1], Rgb::BLACK);
    }

    #[test]
    fn twinkle_is_deterministic_and_channel_tinted() {
        let mut a = PatternPlayer::new();
        let mut b = PatternPlayer::new();
        let mut bank_a = ChannelBank::new(GammaLut::identity(), u32::MAX);
        let mut bank_b = ChannelBank::new(GammaLut::identity(), u32::MAX);
        let (mut bus_a, mut bus_b) = (RecordingBus::default(), RecordingBus::default());
        a.activate(5, &mut bank_a);
        b.activate(5, &mut bank_b);
        for _ in 0..10 {
            a.step(&mut bank_a, &mut bus_a);
            b.step(&mut bank_b, &mut bus_b);
        }
        assert_eq!(bus_a.transfers, bus_b.transfers);
        // Channel 0 is red-tinted: green and blue stay zero.
        let frame = bus_a.last_frame(0).unwrap();
        assert!(frame.iter().all(|p| p.g == 0 && p.b == 0));
        assert!(frame.iter().any(|p| p.r > 0));
    }
}
