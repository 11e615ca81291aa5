pub mod classifier;
pub mod dispatcher;
pub mod intent;
pub mod supervisor;
pub mod telemetry;
pub mod video;

#[cfg(test)]
mod tests;

pub use classifier::{ControlKey, InputClassifier, KeyState};
pub use dispatcher::CommandDispatcher;
pub use intent::{IntentCell, VelocityIntent};
pub use supervisor::{FlightState, FlightSupervisor, HazardRejection, ManeuverError};
pub use telemetry::{TelemetryAcquirer, TelemetrySnapshot};
pub use video::{StreamState, VideoAcquirer};
