pub mod host;
pub mod params;
pub mod switcher;

use std::sync::{Arc, Mutex};

pub use host::{Animation, ScriptError, ScriptHost};

/// The currently installed animation. The switcher replaces the inner `Arc`
/// under the lock; the render engine samples it exactly once per tick, so a
/// swap takes effect at the next tick boundary and never mid-tick.
#[derive(Clone)]
pub struct AnimationSlot(Arc<Mutex<Arc<Animation>>>);

impl AnimationSlot {
    pub fn new(animation: Arc<Animation>) -> Self {
        Self(Arc::new(Mutex::new(animation)))
    }

    pub fn current(&self) -> Arc<Animation> {
        self.0.lock().expect("lock animation slot").clone()
    }

    pub fn install(&self, animation: Arc<Animation>) {
        *self.0.lock().expect("lock animation slot") = animation;
    }
}
