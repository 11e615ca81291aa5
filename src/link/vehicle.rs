use super::error::{CommandError, LinkError, ReadError};
use async_trait::async_trait;
use image::RgbImage;
use strum_macros::{Display, EnumIter};

/// Flip-style maneuvers. Hazardous by definition, the supervisor gates
/// these behind flight state and battery checks before they reach the link.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Maneuver {
    FlipForward,
    FlipBack,
    FlipLeft,
    FlipRight,
}

/// The telemetry fields the vehicle reports. Each read is independently
/// fallible.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum TelemetryField {
    Battery,
    Temperature,
    Height,
    Barometer,
    FlightTime,
}

/// One decoded video frame as it came off the link, before any display
/// correction is applied.
#[derive(Debug, Clone)]
pub struct RawFrame(pub RgbImage);

impl RawFrame {
    pub fn width(&self) -> u32 { self.0.width() }

    pub fn height(&self) -> u32 { self.0.height() }

    /// Horizontal mirror to match the display's expected orientation.
    pub fn into_mirrored(mut self) -> Self {
        image::imageops::flip_horizontal_in_place(&mut self.0);
        self
    }
}

/// The capability surface the control core consumes, abstracted from the
/// concrete wire protocol. All velocity components are in [-100, 100].
///
/// Implementations must tolerate concurrent callers for `set_velocity`,
/// `read_frame` and `read_telemetry_field`; lifecycle calls (connect,
/// takeoff, land, stream toggles, disconnect) are serialized by the
/// supervisor and never issued concurrently.
#[async_trait]
pub trait VehicleLink: Send + Sync {
    async fn connect(&self) -> Result<(), LinkError>;
    async fn takeoff(&self) -> Result<(), CommandError>;
    async fn land(&self) -> Result<(), CommandError>;
    async fn set_velocity(&self, x: i8, y: i8, z: i8, yaw: i8) -> Result<(), CommandError>;
    async fn execute_maneuver(&self, kind: Maneuver) -> Result<(), CommandError>;
    async fn start_video(&self) -> Result<(), LinkError>;
    async fn stop_video(&self) -> Result<(), LinkError>;
    /// Latest decoded frame, or `None` if no new frame has arrived. A
    /// `None` is not an error and must not clear previously seen frames.
    async fn read_frame(&self) -> Option<RawFrame>;
    async fn read_telemetry_field(&self, field: TelemetryField) -> Result<i64, ReadError>;
    async fn disconnect(&self);
}
