//! In-memory stand-in for the LED proxy device.
//!
//! Runs the real protocol decoder, channel engine, and fallback patterns
//! against fake hardware, speaking the device's wire protocol on
//! stdin/stdout. Point the showrunner at a pty pair (e.g. `socat`) backed
//! by this binary to exercise the full host/device loop without hardware.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing_subscriber::EnvFilter;

use showrunner::device::testing::{RecordingBus, StaticSensors};
use showrunner::device::{DeviceConfig, DeviceRuntime, LedBus, Rgb};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Gamma correction exponent
    #[arg(long, default_value_t = 2.8)]
    gamma: f32,

    /// Per-channel current limit in brightness units
    #[arg(long, default_value_t = 30_000)]
    current_limit: u32,

    /// Seconds of serial silence before the fallback pattern starts
    #[arg(long, default_value_t = 5)]
    pattern_timeout: u64,

    /// Print a per-channel summary line on every flush
    #[arg(long, default_value_t = false)]
    show_frames: bool,
}

/// LED hardware that optionally narrates flushed frames to stderr.
#[derive(Default)]
struct NarratingBus {
    inner: RecordingBus,
    show_frames: bool,
    frames: u64,
}

impl LedBus for NarratingBus {
    fn busy(&self, channel: usize) -> bool {
        self.inner.busy(channel)
    }

    fn wait_idle(&mut self, channel: usize) {
        self.inner.wait_idle(channel);
    }

    fn start_transfer(&mut self, channel: usize, pixels: &[Rgb]) {
        self.frames += 1;
        if self.show_frames {
            let lit = pixels.iter().filter(|p| **p != Rgb::BLACK).count();
            eprintln!(
                "[devsim] ch{channel} frame {}: {} LEDs, {} lit",
                self.frames,
                pixels.len(),
                lit
            );
        }
        // Keep only the latest frame per channel; a long session would
        // otherwise grow without bound.
        self.inner.transfers.retain(|(ch, _)| *ch != channel);
        self.inner.start_transfer(channel, pixels);
        self.inner.wait_idle(channel);
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    let args = Args::parse();
    let cfg = DeviceConfig {
        gamma: args.gamma,
        current_limit: args.current_limit,
        pattern_timeout: Duration::from_secs(args.pattern_timeout),
        ..DeviceConfig::default()
    };

    let bus = NarratingBus {
        show_frames: args.show_frames,
        ..NarratingBus::default()
    };
    let mut runtime = DeviceRuntime::new(cfg, bus, StaticSensors::default());

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_ctrlc = stop.clone();
    ctrlc::set_handler(move || stop_for_ctrlc.store(true, Ordering::SeqCst))
        .expect("set Ctrl-C handler");

    // Blocking stdin reads on a separate thread, bytes over a channel.
    let (byte_tx, byte_rx) = bounded::<Vec<u8>>(64);
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut stdin = stdin.lock();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if byte_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        })?;

    let boot = Instant::now();
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "=== LED proxy simulator ready ===")?;
    stdout.flush()?;

    while !stop.load(Ordering::SeqCst) {
        let now = boot.elapsed();
        match byte_rx.recv_timeout(Duration::from_millis(5)) {
            Ok(bytes) => runtime.feed(now, &bytes),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        for line in runtime.poll(boot.elapsed()) {
            writeln!(stdout, "{line}")?;
            stdout.flush()?;
        }
        if runtime.reboot_requested() {
            writeln!(stdout, "Rebooting...")?;
            stdout.flush()?;
            break;
        }
    }
    Ok(())
}
