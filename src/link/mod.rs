pub mod error;
pub mod udp;
pub mod vehicle;

pub use error::{CommandError, LinkError, ReadError};
pub use vehicle::{Maneuver, RawFrame, TelemetryField, VehicleLink};
