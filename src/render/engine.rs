use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::animation::AnimationSlot;
use crate::coords::CoordinateStore;
use crate::serial::{protocol, SerialWriter};

use super::{RenderControl, SessionState};

#[derive(Debug, Clone, Copy)]
pub struct RenderConfig {
    pub channels: usize,
    pub leds_per_channel: usize,
    pub fps: u32,
}

impl RenderConfig {
    pub fn led_count(&self) -> usize {
        self.channels * self.leds_per_channel
    }
}

/// Convert one animation color component to its wire byte.
pub fn encode_component(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Fill the frame buffer for one tick. LEDs without a coordinate and LEDs
/// whose evaluation faults stay black.
pub fn render_frame<F>(frame: &mut [u8], coords: &CoordinateStore, color: F, t: f32)
where
    F: Fn(f32, f32, f32, f32, usize) -> Option<[f32; 3]>,
{
    frame.fill(0);
    let led_count = frame.len() / 3;
    for id in 0..led_count {
        let Some(p) = coords.coord(id) else {
            continue;
        };
        let Some([r, g, b]) = color(p.x, p.y, p.z, t, id) else {
            continue;
        };
        frame[id * 3] = encode_component(r);
        frame[id * 3 + 1] = encode_component(g);
        frame[id * 3 + 2] = encode_component(b);
    }
}

/// Emit one frame: an update-only packet per channel in ascending order,
/// then a single flush covering every channel. All channels swap together
/// at the device, so a frame is atomic at the display.
///
/// Returns false when backpressure dropped part of the frame; the remainder
/// (including the flush) is skipped so a partial frame is never displayed.
pub fn emit_frame(frame: &[u8], cfg: &RenderConfig, writer: &SerialWriter) -> bool {
    let stride = cfg.leds_per_channel * 3;
    for ch in 0..cfg.channels {
        let slice = &frame[ch * stride..(ch + 1) * stride];
        if writer
            .send(protocol::update_packet(ch as u8, slice, false))
            .is_err()
        {
            return false;
        }
    }
    writer
        .send(protocol::flush_packet(protocol::full_mask(cfg.channels)))
        .is_ok()
}

/// Fixed-rate render loop. One frame per tick; `t` derives from wall
/// elapsed time, so an overrun skips ahead without replaying timestamps.
/// Exits when the stop flag is set, leaving the display dark.
pub fn run(
    cfg: RenderConfig,
    coords: Arc<CoordinateStore>,
    slot: AnimationSlot,
    control: RenderControl,
    writer: SerialWriter,
    stop: Arc<AtomicBool>,
) {
    let tick = Duration::from_secs_f64(1.0 / cfg.fps as f64);
    let mut frame = vec![0u8; cfg.led_count() * 3];
    let start = Instant::now();
    let mut next_tick = start;
    let mut dropped_frames: u64 = 0;
    let mut last_drop_warn = start;

    control.begin_rendering();
    info!(
        "Render engine: {} channels x {} LEDs at {} fps",
        cfg.channels, cfg.leds_per_channel, cfg.fps
    );

    while !stop.load(Ordering::SeqCst) {
        {
            // Held across render+emit: pause/resume serialize on tick start.
            let state = control.lock_state();
            if *state == SessionState::Rendering {
                let t = start.elapsed().as_secs_f32();
                let animation = slot.current();
                render_frame(
                    &mut frame,
                    &coords,
                    |x, y, z, t, id| animation.color(x, y, z, t, id),
                    t,
                );
                if !emit_frame(&frame, &cfg, &writer) {
                    dropped_frames += 1;
                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                        warn!("Serial backpressure: {dropped_frames} frames dropped so far");
                        last_drop_warn = Instant::now();
                    }
                }
            }
        }

        next_tick += tick;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            // Overrun: keep phase, do not burst-render missed ticks.
            next_tick = now;
        }
    }

    // One last command so the display goes dark on shutdown.
    let _ = writer.send_blocking(protocol::clear_all_packet());
    debug!("Render engine stopped after {dropped_frames} dropped frames");
}
