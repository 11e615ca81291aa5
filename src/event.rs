use crate::control::ControlKey;
use crate::link::Maneuver;

/// Control-surface events the core reacts to, abstracted from any concrete
/// input backend. The host input layer produces these; the core never polls
/// devices itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    KeyDown(ControlKey),
    KeyUp(ControlKey),
    TakeoffRequested,
    LandRequested,
    Maneuver(Maneuver),
    ToggleVideo,
    ToggleHud,
    ToggleControlsOverlay,
    Quit,
}
