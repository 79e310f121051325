pub mod engine;

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use crate::serial::{protocol, SerialWriter};

/// Host-side session state. The render loop emits frames only in
/// `Rendering`; the takeover server parks it in `PausedByTakeover` while a
/// remote client owns the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Rendering,
    PausedByTakeover,
}

struct ControlInner {
    state: Mutex<SessionState>,
    writer: SerialWriter,
}

/// Shared pause/resume handle. The render tick holds the state lock for the
/// whole render-and-emit step, so `pause` and `resume` are serialized with
/// respect to tick start: `pause()` returns only once any in-flight tick has
/// finished emitting.
#[derive(Clone)]
pub struct RenderControl {
    inner: Arc<ControlInner>,
}

impl RenderControl {
    pub fn new(writer: SerialWriter) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(SessionState::Idle),
                writer,
            }),
        }
    }

    pub fn begin_rendering(&self) {
        let mut state = self.lock_state();
        if *state == SessionState::Idle {
            *state = SessionState::Rendering;
        }
    }

    /// Pause local rendering for a takeover. Emits a single clear-all on the
    /// transition so the display goes dark before any client bytes follow;
    /// calling `pause` while already paused emits nothing.
    pub fn pause(&self) {
        let mut state = self.lock_state();
        if *state != SessionState::PausedByTakeover {
            *state = SessionState::PausedByTakeover;
            let _ = self
                .inner
                .writer
                .send_blocking(protocol::clear_all_packet());
            info!("Render engine paused by takeover");
        }
    }

    pub fn resume(&self) {
        let mut state = self.lock_state();
        if *state == SessionState::PausedByTakeover {
            *state = SessionState::Rendering;
            info!("Render engine resumed");
        }
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().expect("lock session state")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::protocol::CMD_CLEAR_ALL;

    #[test]
    fn pause_emits_exactly_one_clear_all() {
        let (writer, rx) = SerialWriter::detached(8);
        let control = RenderControl::new(writer);
        control.begin_rendering();

        control.pause();
        control.pause();
        assert_eq!(rx.try_recv().unwrap(), vec![CMD_CLEAR_ALL]);
        assert!(rx.try_recv().is_err(), "second pause must not emit");

        control.resume();
        assert_eq!(control.state(), SessionState::Rendering);
        control.pause();
        assert_eq!(rx.try_recv().unwrap(), vec![CMD_CLEAR_ALL]);
    }

    #[test]
    fn resume_without_pause_is_inert() {
        let (writer, rx) = SerialWriter::detached(8);
        let control = RenderControl::new(writer);
        control.begin_rendering();
        control.resume();
        assert_eq!(control.state(), SessionState::Rendering);
        assert!(rx.try_recv().is_err());
    }
}
