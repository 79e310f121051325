//! Binary command framing toward the LED proxy device.
//!
//! All multi-byte lengths are little-endian. The device validates channel
//! and count and drops the whole command on violation, so the builders here
//! assert the same bounds at the host side.

pub const CMD_UPDATE_AND_FLUSH: u8 = 0xFF;
pub const CMD_UPDATE_ONLY: u8 = 0xFE;
pub const CMD_FLUSH: u8 = 0xFD;
pub const CMD_RESET: u8 = 0xFC;
pub const CMD_START_PATTERN: u8 = 0xFB;
pub const CMD_STOP_PATTERN: u8 = 0xFA;
pub const CMD_CLEAR_ALL: u8 = 0xF9;

pub const MAX_CHANNELS: usize = 8;
pub const MAX_LEDS_PER_CHANNEL: usize = 200;

/// Channel update packet: `[cmd][ch][cnt_lo][cnt_hi][R G B]...`.
///
/// `rgb` is the channel slice of the frame buffer, three bytes per LED.
pub fn update_packet(channel: u8, rgb: &[u8], flush: bool) -> Vec<u8> {
    let count = rgb.len() / 3;
    debug_assert_eq!(rgb.len() % 3, 0, "rgb payload must be whole LEDs");
    debug_assert!((channel as usize) < MAX_CHANNELS);
    debug_assert!(count >= 1 && count <= MAX_LEDS_PER_CHANNEL);

    let mut packet = Vec::with_capacity(4 + rgb.len());
    packet.push(if flush {
        CMD_UPDATE_AND_FLUSH
    } else {
        CMD_UPDATE_ONLY
    });
    packet.push(channel);
    packet.extend_from_slice(&(count as u16).to_le_bytes());
    packet.extend_from_slice(rgb);
    packet
}

/// Flush packet: swap double buffers on every channel whose mask bit is set.
pub fn flush_packet(mask: u8) -> Vec<u8> {
    vec![CMD_FLUSH, mask]
}

pub fn reset_packet() -> Vec<u8> {
    vec![CMD_RESET]
}

pub fn start_pattern_packet(pattern_id: u8) -> Vec<u8> {
    vec![CMD_START_PATTERN, pattern_id]
}

pub fn stop_pattern_packet() -> Vec<u8> {
    vec![CMD_STOP_PATTERN]
}

pub fn clear_all_packet() -> Vec<u8> {
    vec![CMD_CLEAR_ALL]
}

/// Mask covering channels `0..channels`.
pub fn full_mask(channels: usize) -> u8 {
    debug_assert!(channels <= MAX_CHANNELS);
    if channels >= 8 {
        0xFF
    } else {
        (1u8 << channels) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_only_packet_bytes() {
        // Two solid-red LEDs on channel 0.
        let packet = update_packet(0, &[0xFF, 0, 0, 0xFF, 0, 0], false);
        assert_eq!(
            packet,
            [0xFE, 0x00, 0x02, 0x00, 0xFF, 0x00, 0x00, 0xFF, 0x00, 0x00]
        );
    }

    #[test]
    fn update_and_flush_packet_bytes() {
        let packet = update_packet(3, &[0x10, 0x20, 0x30], true);
        assert_eq!(packet, [0xFF, 0x03, 0x01, 0x00, 0x10, 0x20, 0x30]);
    }

    #[test]
    fn count_is_little_endian() {
        let rgb = vec![0u8; 200 * 3];
        let packet = update_packet(1, &rgb, false);
        assert_eq!(packet[2], 200);
        assert_eq!(packet[3], 0);
    }

    #[test]
    fn flush_packet_bytes() {
        assert_eq!(flush_packet(0x01), [0xFD, 0x01]);
        assert_eq!(flush_packet(0xFF), [0xFD, 0xFF]);
    }

    #[test]
    fn single_byte_commands() {
        assert_eq!(reset_packet(), [0xFC]);
        assert_eq!(stop_pattern_packet(), [0xFA]);
        assert_eq!(clear_all_packet(), [0xF9]);
        assert_eq!(start_pattern_packet(4), [0xFB, 0x04]);
    }

    #[test]
    fn full_mask_covers_used_channels() {
        assert_eq!(full_mask(1), 0x01);
        assert_eq!(full_mask(3), 0x07);
        assert_eq!(full_mask(8), 0xFF);
    }
}
