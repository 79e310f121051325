pub mod protocol;
pub mod session;
pub mod telemetry;

pub use session::{SerialSession, SerialWriter, WriteError};
pub use telemetry::{TelemetryHub, TelemetryRecord};
