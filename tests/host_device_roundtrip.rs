//! Drives the emitted host packet stream straight into the device decoder
//! and checks what the LED hardware would display.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use showrunner::animation::ScriptHost;
use showrunner::coords::CoordinateStore;
use showrunner::device::testing::{RecordingBus, StaticSensors};
use showrunner::device::{DeviceConfig, DeviceRuntime, Rgb};
use showrunner::render::engine::{emit_frame, render_frame, RenderConfig};
use showrunner::serial::SerialWriter;

fn device_with_unity_gamma() -> DeviceRuntime<RecordingBus, StaticSensors> {
    DeviceRuntime::new(
        DeviceConfig {
            gamma: 1.0,
            ..DeviceConfig::default()
        },
        RecordingBus::default(),
        StaticSensors::default(),
    )
}

#[test]
fn rendered_frame_reaches_all_channels_atomically() {
    // 2 channels x 3 LEDs; a gradient animation over x.
    let coords = Arc::new(
        CoordinateStore::parse(
            "LED_0000 0 0 0\nLED_0001 1 0 0\nLED_0002 2 0 0\n\
             LED_0003 3 0 0\nLED_0004 4 0 0\nLED_0005 5 0 0\n",
        )
        .unwrap(),
    );
    let mut script = std::env::temp_dir();
    script.push(format!(
        "showrunner_roundtrip_{}.rhai",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    fs::write(&script, "fn color(x, y, z, t, params, id) { [x, 0.0, 1.0 - x] }").unwrap();
    let animation = ScriptHost::load(&script, coords.clone()).expect("load");

    let cfg = RenderConfig {
        channels: 2,
        leds_per_channel: 3,
        fps: 30,
    };
    let mut frame = vec![0u8; cfg.led_count() * 3];
    render_frame(
        &mut frame,
        &coords,
        |x, y, z, t, id| animation.color(x, y, z, t, id),
        0.0,
    );

    let (writer, rx) = SerialWriter::detached(16);
    assert!(emit_frame(&frame, &cfg, &writer));
    let bytes: Vec<u8> = rx.try_iter().flatten().collect();

    let mut device = device_with_unity_gamma();
    // Updates alone must not publish anything: the flush swaps everything
    // together, so the display never mixes two frames.
    let flush_offset = bytes.len() - 2;
    device.feed(Duration::from_secs(1), &bytes[..flush_offset]);
    assert!(device.bus().transfers.is_empty());
    device.feed(Duration::from_secs(1), &bytes[flush_offset..]);

    let ch0 = device.bus().last_frame(0).expect("channel 0 displayed");
    let ch1 = device.bus().last_frame(1).expect("channel 1 displayed");
    assert_eq!(ch0.len(), 3);
    assert_eq!(ch1.len(), 3);

    // x is normalized over the six LEDs: 0, 0.2, 0.4 on channel 0.
    assert_eq!(ch0[0], Rgb::new(0, 0, 255));
    assert_eq!(ch0[1], Rgb::new(51, 0, 204));
    assert_eq!(ch1[2], Rgb::new(255, 0, 0));

    assert_eq!(device.stats().errors, 0);
    assert_eq!(device.stats().pixels, 6);
    let _ = fs::remove_file(&script);
}

#[test]
fn consecutive_ticks_alternate_buffers_without_tearing() {
    let coords = Arc::new(CoordinateStore::parse("LED_0000 0 0 0\nLED_0001 1 0 0\n").unwrap());
    let cfg = RenderConfig {
        channels: 1,
        leds_per_channel: 2,
        fps: 30,
    };
    let mut device = device_with_unity_gamma();

    for tick in 0..4u8 {
        let level = tick * 60;
        let mut frame = vec![0u8; cfg.led_count() * 3];
        render_frame(
            &mut frame,
            &coords,
            |_, _, _, _, _| Some([level as f32 / 255.0, 0.0, 0.0]),
            tick as f32 / 30.0,
        );
        let (writer, rx) = SerialWriter::detached(8);
        assert!(emit_frame(&frame, &cfg, &writer));
        let bytes: Vec<u8> = rx.try_iter().flatten().collect();
        device.feed(Duration::from_millis(33 * tick as u64), &bytes);

        let displayed = device.bus().last_frame(0).unwrap();
        assert!(
            displayed.iter().all(|p| p.r == level),
            "tick {tick}: displayed frame is uniform"
        );
    }
    assert_eq!(device.stats().flushes, 4);
}
