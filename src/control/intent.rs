use std::sync::atomic::{AtomicI8, Ordering};

/// Discrete velocity intent for all four axes, each in [-100, 100].
/// Overwritten in place every sample, no history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VelocityIntent {
    /// Lateral, right positive.
    pub x: i8,
    /// Longitudinal, forward positive.
    pub y: i8,
    /// Vertical, up positive.
    pub z: i8,
    /// Rotation, clockwise positive.
    pub yaw: i8,
}

impl VelocityIntent {
    pub const ZERO: VelocityIntent = VelocityIntent { x: 0, y: 0, z: 0, yaw: 0 };

    pub fn is_zero(self) -> bool { self == Self::ZERO }
}

/// Latest-value slot between the input classifier (single writer) and the
/// command dispatcher (single reader). Axes are logically independent, so
/// relaxed per-axis atomics are enough: a read mixing old and new axes is
/// corrected within one control period.
#[derive(Debug, Default)]
pub struct IntentCell {
    x: AtomicI8,
    y: AtomicI8,
    z: AtomicI8,
    yaw: AtomicI8,
}

impl IntentCell {
    pub fn store(&self, intent: VelocityIntent) {
        self.x.store(intent.x, Ordering::Relaxed);
        self.y.store(intent.y, Ordering::Relaxed);
        self.z.store(intent.z, Ordering::Relaxed);
        self.yaw.store(intent.yaw, Ordering::Relaxed);
    }

    pub fn load(&self) -> VelocityIntent {
        VelocityIntent {
            x: self.x.load(Ordering::Relaxed),
            y: self.y.load(Ordering::Relaxed),
            z: self.z.load(Ordering::Relaxed),
            yaw: self.yaw.load(Ordering::Relaxed),
        }
    }
}
