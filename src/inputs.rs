//! Raw input collection and smoothing for the runtime context.
//!
//! [`InputRig`] sits between the event loop and the per-frame
//! [`RuntimeContext`](crate::RuntimeContext): the runner feeds it raw
//! pointer events, optional sensor sources fill in gyro and audio, and
//! once per admitted frame the Director asks it to step the damped state
//! forward. Nothing here is snapped directly — pointer and press approach
//! their targets exponentially, which removes event jitter without
//! perceptible lag.

use glam::{Vec2, Vec3};

use crate::context::{AudioBands, Viewport, damp, damp_vec2, sanitize};

/// Default damping rate for pointer and press smoothing.
const DEFAULT_LAMBDA: f32 = 8.0;

/// Maximum normalized pointer travel between press and release for the
/// release to count as a tap.
const TAP_TRAVEL_LIMIT: f32 = 0.04;

/// An audio envelope provider (an analyser owned by the host).
///
/// The runtime only consumes the bands; permission handling and device
/// selection belong to the collaborator implementing this.
pub trait AudioSource {
    fn sample(&mut self) -> AudioBands;
}

/// A device-orientation provider.
///
/// `None` means orientation is unavailable this frame; the rig then
/// reports a zero vector with `gyro_active == false`, which chapters must
/// treat as neutral.
pub trait GyroSource {
    fn sample(&mut self) -> Option<Vec3>;
}

/// Tracks and smooths heterogeneous input state between frames.
pub struct InputRig {
    lambda: f32,
    pointer_target: Vec2,
    pointer: Vec2,
    pointer_velocity: Vec2,
    press_target: f32,
    press: f32,
    tap: f32,
    press_origin: Option<Vec2>,
    gyro: Vec3,
    gyro_active: bool,
    audio: AudioBands,
}

impl Default for InputRig {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_LAMBDA,
            pointer_target: Vec2::ZERO,
            pointer: Vec2::ZERO,
            pointer_velocity: Vec2::ZERO,
            press_target: 0.0,
            press: 0.0,
            tap: 0.0,
            press_origin: None,
            gyro: Vec3::ZERO,
            gyro_active: false,
            audio: AudioBands::silence(),
        }
    }
}

impl InputRig {
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: if lambda > 0.0 { lambda } else { DEFAULT_LAMBDA },
            ..Self::default()
        }
    }

    /// Record a pointer move in window coordinates (origin top-left).
    ///
    /// The position is normalized to `[-1, 1]` per axis with `+y` up and
    /// becomes the new damping target; the smoothed value catches up over
    /// the following frames.
    pub fn pointer_moved(&mut self, x: f32, y: f32, viewport: &Viewport) {
        let w = viewport.width.max(1.0);
        let h = viewport.height.max(1.0);
        let nx = (sanitize(x, 0.0) / w) * 2.0 - 1.0;
        let ny = -((sanitize(y, 0.0) / h) * 2.0 - 1.0);
        self.pointer_target = Vec2::new(nx.clamp(-1.0, 1.0), ny.clamp(-1.0, 1.0));
    }

    /// Record the primary pointer going down.
    pub fn pointer_pressed(&mut self) {
        self.press_target = 1.0;
        self.press_origin = Some(self.pointer_target);
    }

    /// Record the primary pointer going up.
    ///
    /// A release close to where the press started counts as a discrete
    /// tap and raises the one-frame pulse.
    pub fn pointer_released(&mut self) {
        self.press_target = 0.0;
        if let Some(origin) = self.press_origin.take() {
            if origin.distance(self.pointer_target) <= TAP_TRAVEL_LIMIT {
                self.tap = 1.0;
            }
        }
    }

    /// Feed the latest orientation sample, or `None` when unavailable.
    pub fn set_gyro(&mut self, sample: Option<Vec3>) {
        match sample {
            Some(v) if v.is_finite() => {
                self.gyro = v;
                self.gyro_active = true;
            }
            _ => {
                self.gyro = Vec3::ZERO;
                self.gyro_active = false;
            }
        }
    }

    /// Feed the latest audio envelope sample.
    pub fn set_audio(&mut self, bands: AudioBands) {
        self.audio = bands.sanitized();
    }

    /// Advance the damped state by `dt` seconds.
    pub fn step(&mut self, dt: f32) {
        let previous = self.pointer;
        self.pointer = damp_vec2(self.pointer, self.pointer_target, self.lambda, dt);
        self.pointer = Vec2::new(
            self.pointer.x.clamp(-1.0, 1.0),
            self.pointer.y.clamp(-1.0, 1.0),
        );
        self.pointer_velocity = if dt > f32::EPSILON {
            let v = (self.pointer - previous) / dt;
            Vec2::new(sanitize(v.x, 0.0), sanitize(v.y, 0.0))
        } else {
            Vec2::ZERO
        };
        self.press = damp(self.press, self.press_target, self.lambda, dt).clamp(0.0, 1.0);
    }

    /// Decay the tap pulse. The Director calls this at the end of every
    /// frame so a consumer observes the pulse exactly once.
    pub fn decay_tap(&mut self) {
        self.tap = 0.0;
    }

    pub fn pointer(&self) -> Vec2 {
        self.pointer
    }

    pub fn pointer_velocity(&self) -> Vec2 {
        self.pointer_velocity
    }

    pub fn press(&self) -> f32 {
        self.press
    }

    pub fn tap(&self) -> f32 {
        self.tap
    }

    pub fn gyro(&self) -> Vec3 {
        self.gyro
    }

    pub fn gyro_active(&self) -> bool {
        self.gyro_active
    }

    pub fn audio(&self) -> AudioBands {
        self.audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport::new(1000.0, 500.0, 1.0)
    }

    #[test]
    fn pointer_normalizes_to_centered_axes() {
        let mut rig = InputRig::default();
        rig.pointer_moved(500.0, 250.0, &viewport());
        // Center of the window is the origin.
        assert_eq!(rig.pointer_target, Vec2::ZERO);

        rig.pointer_moved(1000.0, 0.0, &viewport());
        // Top-right corner is (+1, +1): window y points down, ours up.
        assert_eq!(rig.pointer_target, Vec2::new(1.0, 1.0));
    }

    #[test]
    fn pointer_damps_toward_target() {
        let mut rig = InputRig::default();
        rig.pointer_moved(1000.0, 250.0, &viewport());
        let mut last = 0.0;
        for _ in 0..200 {
            rig.step(1.0 / 60.0);
            assert!(rig.pointer().x >= last, "approach must be monotonic");
            assert!(rig.pointer().x <= 1.0, "approach must not overshoot");
            last = rig.pointer().x;
        }
        assert!((rig.pointer().x - 1.0).abs() < 1e-3);
    }

    #[test]
    fn offscreen_coordinates_clamp_into_range() {
        let mut rig = InputRig::default();
        rig.pointer_moved(5000.0, -300.0, &viewport());
        rig.step(10.0);
        assert!(rig.pointer().x.abs() <= 1.0);
        assert!(rig.pointer().y.abs() <= 1.0);
    }

    #[test]
    fn press_ramps_and_releases() {
        let mut rig = InputRig::default();
        rig.pointer_pressed();
        for _ in 0..120 {
            rig.step(1.0 / 60.0);
        }
        assert!(rig.press() > 0.95);

        rig.pointer_released();
        for _ in 0..120 {
            rig.step(1.0 / 60.0);
        }
        assert!(rig.press() < 0.05);
    }

    #[test]
    fn still_release_is_a_tap_dragged_release_is_not() {
        let mut rig = InputRig::default();
        rig.pointer_moved(500.0, 250.0, &viewport());
        rig.pointer_pressed();
        rig.pointer_released();
        assert_eq!(rig.tap(), 1.0);
        rig.decay_tap();
        assert_eq!(rig.tap(), 0.0);

        rig.pointer_pressed();
        rig.pointer_moved(900.0, 250.0, &viewport());
        rig.pointer_released();
        assert_eq!(rig.tap(), 0.0, "a drag must not register as a tap");
    }

    #[test]
    fn absent_gyro_reads_neutral() {
        let mut rig = InputRig::default();
        rig.set_gyro(Some(Vec3::new(0.2, -0.1, 0.4)));
        assert!(rig.gyro_active());

        rig.set_gyro(None);
        assert_eq!(rig.gyro(), Vec3::ZERO);
        assert!(!rig.gyro_active());

        rig.set_gyro(Some(Vec3::new(f32::NAN, 0.0, 0.0)));
        assert_eq!(rig.gyro(), Vec3::ZERO);
        assert!(!rig.gyro_active());
    }
}
