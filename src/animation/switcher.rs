use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::RecvTimeoutError;
use notify::{RecursiveMode, Watcher};
use tracing::{error, info, warn};

use crate::coords::CoordinateStore;

use super::{AnimationSlot, ScriptHost};

/// Quiet period after a filesystem event before the control file is re-read.
/// Editors and `echo >` both produce bursts of events for one logical write.
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Watches the control file and hot-swaps the installed animation.
///
/// The control file holds a single animation filename (trimmed). On change,
/// the named script is loaded from the animation directory and installed
/// into the slot; a load failure keeps the current animation. Empty contents
/// are ignored.
pub struct AnimationSwitcher {
    handle: JoinHandle<()>,
}

impl AnimationSwitcher {
    pub fn spawn(
        control_file: PathBuf,
        animation_dir: PathBuf,
        initial: &str,
        slot: AnimationSlot,
        coords: Arc<CoordinateStore>,
        stop: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        if !control_file.exists() {
            fs::write(&control_file, initial).with_context(|| {
                format!("create control file {}", control_file.display())
            })?;
            info!(
                "Created control file {} with {initial}",
                control_file.display()
            );
        }

        let (event_tx, event_rx) = crossbeam_channel::unbounded::<()>();
        let watched = control_file.clone();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    if event.paths.iter().any(|p| p == &watched) {
                        let _ = event_tx.send(());
                    }
                }
            })
            .context("create filesystem watcher")?;

        // Watch the parent directory: editors replace files by rename, which
        // would detach a watch on the file itself.
        let watch_dir = control_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", watch_dir.display()))?;

        let mut current = initial.to_string();
        let handle = std::thread::Builder::new()
            .name("switcher".into())
            .spawn(move || {
                // Keep the watcher alive for the thread's lifetime.
                let _watcher = watcher;
                while !stop.load(Ordering::SeqCst) {
                    match event_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(()) => {}
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    // Debounce: swallow the rest of the event burst.
                    std::thread::sleep(DEBOUNCE);
                    while event_rx.try_recv().is_ok() {}

                    let name = match fs::read_to_string(&control_file) {
                        Ok(contents) => contents.trim().to_string(),
                        Err(err) => {
                            warn!(
                                "Failed to read control file {}: {err}",
                                control_file.display()
                            );
                            continue;
                        }
                    };
                    if name.is_empty() || name == current {
                        continue;
                    }
                    let script = animation_dir.join(&name);
                    match ScriptHost::load(&script, coords.clone()) {
                        Ok(animation) => {
                            info!("Switching animation to {name}");
                            slot.install(Arc::new(animation));
                            current = name;
                        }
                        Err(err) => {
                            error!("Failed to load animation {name}: {err}; keeping {current}");
                        }
                    }
                }
            })
            .context("spawn switcher thread")?;

        Ok(Self { handle })
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}
