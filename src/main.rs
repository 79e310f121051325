// Entry point: wires the coordinate store, animation host, render engine,
// serial session, takeover server, and control-file switcher together, then
// parks until shutdown or a fatal serial condition.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use showrunner::animation::switcher::AnimationSwitcher;
use showrunner::animation::{AnimationSlot, ScriptHost};
use showrunner::cli::Args;
use showrunner::config::Config;
use showrunner::coords::CoordinateStore;
use showrunner::render::engine::{self, RenderConfig};
use showrunner::render::RenderControl;
use showrunner::serial::{SerialSession, TelemetryHub};
use showrunner::takeover::{TakeoverConfig, TakeoverServer};

fn main() -> ExitCode {
    // Initialize tracing/logging (honors RUST_LOG); info default.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            error!("Fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    let mut config = Config::from_env().context("read configuration")?;
    args.apply(&mut config);
    config.validate().context("validate configuration")?;

    let coords =
        Arc::new(CoordinateStore::load(&config.coords_file).context("load coordinate store")?);

    let initial_script = config.animation_dir.join(&config.initial_animation);
    let animation = ScriptHost::load(&initial_script, coords.clone())
        .map_err(|err| anyhow::anyhow!("load initial animation: {err}"))?;
    info!(
        "Initial animation {} ({} parameter groups)",
        initial_script.display(),
        animation.schema().len()
    );
    let slot = AnimationSlot::new(Arc::new(animation));

    if args.check {
        info!("Configuration and inputs valid; exiting (--check)");
        return Ok(ExitCode::SUCCESS);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let link_lost = Arc::new(AtomicBool::new(false));

    let stop_for_ctrlc = stop.clone();
    ctrlc::set_handler(move || {
        stop_for_ctrlc.store(true, Ordering::SeqCst);
    })
    .expect("set Ctrl-C handler");

    let hub = Arc::new(TelemetryHub::new(config.status_file.clone()));
    let session = SerialSession::open(
        &config.serial_base,
        config.serial_baud,
        hub,
        stop.clone(),
        link_lost.clone(),
    )
    .context("open serial session")?;
    let writer = session.writer();

    // Bind before spawning anything render-related so a bind failure is a
    // clean fatal startup error.
    let server = TakeoverServer::bind(TakeoverConfig {
        listen: config.ws_listen.clone(),
        eviction_age: Duration::from_secs(config.ws_eviction_age_secs),
        idle_timeout: Duration::from_secs(config.ws_idle_timeout_secs),
    })?;

    let control = RenderControl::new(writer.clone());
    let server_handle = server.spawn(control.clone(), writer.clone(), stop.clone());

    let switcher = AnimationSwitcher::spawn(
        config.control_file.clone(),
        config.animation_dir.clone(),
        &config.initial_animation,
        slot.clone(),
        coords.clone(),
        stop.clone(),
    )
    .context("start animation switcher")?;

    let render_cfg = RenderConfig {
        channels: config.channels,
        leds_per_channel: config.leds_per_channel,
        fps: config.fps,
    };
    let render_handle = {
        let coords = coords.clone();
        let control = control.clone();
        let writer = writer.clone();
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("render".into())
            .spawn(move || engine::run(render_cfg, coords, slot, control, writer, stop))
            .context("spawn render thread")?
    };

    info!("Showrunner up on {}", session.port_path);
    while !stop.load(Ordering::SeqCst) && !link_lost.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
    }

    let lost = link_lost.load(Ordering::SeqCst);
    if lost {
        error!("Serial link lost; shutting down for supervisor restart");
    } else {
        info!("Shutting down");
    }
    stop.store(true, Ordering::SeqCst);

    let _ = render_handle.join();
    let _ = server_handle.join();
    switcher.join();
    session.close();

    Ok(if lost {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
