use super::intent::VelocityIntent;
use std::collections::{HashMap, HashSet};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

/// Fixed per-axis command magnitude. Tunable, not a physical limit.
pub const CONTROL_MAGNITUDE: i8 = 100;

/// Logical control keys, decoupled from any concrete input backend.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ControlKey {
    Forward,
    Backward,
    Left,
    Right,
    YawLeft,
    YawRight,
    Ascend,
    Descend,
}

/// Held/released status per control key, maintained in lockstep with the
/// classified intent so the HUD never shows a key state the intent was not
/// derived from. Read-only for consumers.
pub type KeyState = HashMap<ControlKey, bool>;

/// Maps the set of currently-held keys into one [`VelocityIntent`] per
/// sample. Resolution per axis: both opposing keys cancel to 0, exactly one
/// gives the full magnitude, neither gives 0. Axes never interact.
pub struct InputClassifier {
    held: HashSet<ControlKey>,
    key_state: KeyState,
}

impl Default for InputClassifier {
    fn default() -> Self { Self::new() }
}

impl InputClassifier {
    pub fn new() -> Self {
        let key_state = ControlKey::iter().map(|k| (k, false)).collect();
        Self { held: HashSet::new(), key_state }
    }

    pub fn key_down(&mut self, key: ControlKey) { self.held.insert(key); }

    pub fn key_up(&mut self, key: ControlKey) { self.held.remove(&key); }

    pub fn is_held(&self, key: ControlKey) -> bool { self.held.contains(&key) }

    pub fn key_state(&self) -> &KeyState { &self.key_state }

    /// Classifies the current hold set into an intent and refreshes the
    /// display key state in the same step.
    pub fn classify(&mut self) -> VelocityIntent {
        for key in ControlKey::iter() {
            self.key_state.insert(key, self.held.contains(&key));
        }
        VelocityIntent {
            x: self.resolve_axis(ControlKey::Right, ControlKey::Left),
            y: self.resolve_axis(ControlKey::Forward, ControlKey::Backward),
            z: self.resolve_axis(ControlKey::Ascend, ControlKey::Descend),
            yaw: self.resolve_axis(ControlKey::YawRight, ControlKey::YawLeft),
        }
    }

    fn resolve_axis(&self, positive: ControlKey, negative: ControlKey) -> i8 {
        match (self.held.contains(&positive), self.held.contains(&negative)) {
            (true, true) | (false, false) => 0,
            (true, false) => CONTROL_MAGNITUDE,
            (false, true) => -CONTROL_MAGNITUDE,
        }
    }
}
