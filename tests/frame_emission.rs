use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use showrunner::animation::ScriptHost;
use showrunner::coords::CoordinateStore;
use showrunner::render::engine::{emit_frame, render_frame, RenderConfig};
use showrunner::serial::SerialWriter;

fn temp_script(name: &str, body: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!(
        "showrunner_emission_{}_{}.rhai",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    fs::write(&p, body).unwrap();
    p
}

#[test]
fn solid_red_frame_produces_exact_wire_bytes() {
    // 1 channel, 2 LEDs, animation returns pure red for every LED.
    let coords = Arc::new(CoordinateStore::parse("LED_0000 0 0 0\nLED_0001 1 1 1\n").unwrap());
    let script = temp_script("red", "fn color(x, y, z, t, params, id) { [1.0, 0.0, 0.0] }");
    let animation = ScriptHost::load(&script, coords.clone()).expect("load animation");

    let cfg = RenderConfig {
        channels: 1,
        leds_per_channel: 2,
        fps: 30,
    };
    let mut frame = vec![0u8; cfg.led_count() * 3];
    render_frame(
        &mut frame,
        &coords,
        |x, y, z, t, id| animation.color(x, y, z, t, id),
        0.0,
    );

    let (writer, rx) = SerialWriter::detached(8);
    assert!(emit_frame(&frame, &cfg, &writer));

    let bytes: Vec<u8> = rx.try_iter().flatten().collect();
    assert_eq!(
        bytes,
        [0xFE, 0x00, 0x02, 0x00, 0xFF, 0x00, 0x00, 0xFF, 0x00, 0x00, 0xFD, 0x01]
    );
    let _ = fs::remove_file(&script);
}

#[test]
fn missing_coordinates_render_black_between_lit_leds() {
    // 1 channel, 3 LEDs; only ids 0 and 2 have coordinates.
    let coords = Arc::new(CoordinateStore::parse("LED_0000 0 0 0\nLED_0002 1 1 1\n").unwrap());
    let script = temp_script("green", "fn color(x, y, z, t, params, id) { [0.0, 1.0, 0.0] }");
    let animation = ScriptHost::load(&script, coords.clone()).expect("load animation");

    let mut frame = vec![0u8; 9];
    render_frame(
        &mut frame,
        &coords,
        |x, y, z, t, id| animation.color(x, y, z, t, id),
        0.5,
    );
    assert_eq!(frame, [0, 255, 0, 0, 0, 0, 0, 255, 0]);
    let _ = fs::remove_file(&script);
}

#[test]
fn every_tick_is_updates_then_one_flush_across_channels() {
    let coords = Arc::new(CoordinateStore::parse("LED_0000 0 0 0\nLED_0007 1 1 1\n").unwrap());
    let cfg = RenderConfig {
        channels: 4,
        leds_per_channel: 2,
        fps: 30,
    };
    let mut frame = vec![0u8; cfg.led_count() * 3];
    render_frame(&mut frame, &coords, |_, _, _, _, _| Some([0.5, 0.5, 0.5]), 1.0);

    let (writer, rx) = SerialWriter::detached(16);
    for _ in 0..3 {
        assert!(emit_frame(&frame, &cfg, &writer));
        let packets: Vec<Vec<u8>> = rx.try_iter().collect();
        assert_eq!(packets.len(), cfg.channels + 1);
        for (ch, packet) in packets[..cfg.channels].iter().enumerate() {
            assert_eq!(packet[0], 0xFE, "update-only per channel");
            assert_eq!(packet[1] as usize, ch, "ascending channel order");
        }
        assert_eq!(packets[cfg.channels], vec![0xFD, 0x0F]);
    }
}

#[test]
fn time_flows_into_the_animation() {
    let coords = Arc::new(CoordinateStore::parse("LED_0000 0 0 0\n").unwrap());
    let script = temp_script(
        "timed",
        "fn color(x, y, z, t, params, id) { if t > 1.0 { [1.0, 1.0, 1.0] } else { [0.0, 0.0, 0.0] } }",
    );
    let animation = ScriptHost::load(&script, coords.clone()).expect("load animation");

    let mut frame = vec![0u8; 3];
    render_frame(
        &mut frame,
        &coords,
        |x, y, z, t, id| animation.color(x, y, z, t, id),
        0.5,
    );
    assert_eq!(frame, [0, 0, 0]);
    render_frame(
        &mut frame,
        &coords,
        |x, y, z, t, id| animation.color(x, y, z, t, id),
        2.0,
    );
    assert_eq!(frame, [255, 255, 255]);
    let _ = fs::remove_file(&script);
}
