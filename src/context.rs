//! The per-frame runtime context handed to chapters.
//!
//! Every admitted frame, the [`Director`](crate::Director) assembles one
//! [`RuntimeContext`] from heterogeneous inputs (clock, viewport, damped
//! pointer, gestures, gyroscope, audio envelope) and the frozen
//! [`CapabilityProfile`](crate::CapabilityProfile). Chapters read it during
//! `update`/`render` and must not keep it around — the borrow on the
//! capability profile ties its lifetime to the frame.

use glam::{Vec2, Vec3};

use crate::capability::CapabilityProfile;

/// Smallest dimension a viewport axis is treated as having.
///
/// Guards aspect-ratio math against zero-sized layouts mid-resize.
const MIN_AXIS: f32 = 1.0;

/// Exponentially approach `target` from `current` at rate `lambda`.
///
/// This is the critically-damped smoothing used for pointer and press
/// values: `current + (target - current) * (1 - e^(-lambda * dt))`. The
/// step factor stays in `[0, 1)`, so the result never overshoots the
/// target and is deterministic for a given `(lambda, dt)`.
pub fn damp(current: f32, target: f32, lambda: f32, dt: f32) -> f32 {
    current + (target - current) * (1.0 - (-lambda * dt.max(0.0)).exp())
}

/// Component-wise [`damp`] for 2D values.
pub fn damp_vec2(current: Vec2, target: Vec2, lambda: f32, dt: f32) -> Vec2 {
    Vec2::new(
        damp(current.x, target.x, lambda, dt),
        damp(current.y, target.y, lambda, dt),
    )
}

/// Replace non-finite values with a fallback.
///
/// Raw device input can produce NaN/inf (sensor glitches, malformed
/// events). Every field that ends up in a [`RuntimeContext`] passes
/// through here first.
pub fn sanitize(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

/// Viewport metrics for the current frame.
///
/// `width`/`height` are logical pixels; `pixel_ratio` is the render scale
/// applied on top (bounded by the capability profile's ceiling and lowered
/// by eco mode).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub pixel_ratio: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32, pixel_ratio: f32) -> Self {
        Self {
            width: sanitize(width, MIN_AXIS).max(0.0),
            height: sanitize(height, MIN_AXIS).max(0.0),
            pixel_ratio: sanitize(pixel_ratio, 1.0).max(0.125),
        }
    }

    /// Aspect ratio, safe against degenerate (near-zero) dimensions.
    pub fn aspect(&self) -> f32 {
        self.width.max(MIN_AXIS) / self.height.max(MIN_AXIS)
    }

    /// Physical render-target width in device pixels, never zero.
    pub fn physical_width(&self) -> u32 {
        (self.width * self.pixel_ratio).round().max(1.0) as u32
    }

    /// Physical render-target height in device pixels, never zero.
    pub fn physical_height(&self) -> u32 {
        (self.height * self.pixel_ratio).round().max(1.0) as u32
    }
}

/// A smoothed audio envelope split into rough frequency bands.
///
/// Produced by an [`AudioSource`](crate::AudioSource) collaborator; all
/// values are normalized to `[0, 1]` and sanitized before chapters see
/// them. Silence (all zeros) is the neutral state when no source is
/// attached.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AudioBands {
    /// Overall envelope level.
    pub level: f32,
    /// Low-frequency band (bass).
    pub low: f32,
    /// Mid-frequency band.
    pub mid: f32,
    /// High-frequency band (treble).
    pub high: f32,
}

impl AudioBands {
    pub fn silence() -> Self {
        Self::default()
    }

    /// Clamp every band to `[0, 1]` and zero out non-finite values.
    pub fn sanitized(self) -> Self {
        let clean = |v: f32| sanitize(v, 0.0).clamp(0.0, 1.0);
        Self {
            level: clean(self.level),
            low: clean(self.low),
            mid: clean(self.mid),
            high: clean(self.high),
        }
    }
}

/// The immutable per-frame input bundle.
///
/// Rebuilt by the Director every admitted frame and dropped at the end of
/// it. Invariants the builder maintains:
///
/// - every numeric field is finite,
/// - `dt >= 0`, clamped against tab-resume spikes,
/// - `pointer` components are in `[-1, 1]` per axis,
/// - `tap` is `1.0` for exactly the frame the tap landed in, `0.0` after,
/// - `gyro` is the zero vector (with `gyro_active == false`) when no
///   orientation source exists — chapters treat that as neutral.
#[derive(Clone, Copy, Debug)]
pub struct RuntimeContext<'a> {
    /// Clamped seconds since the previous admitted frame.
    pub dt: f32,
    /// Monotonic accumulated animation time; pauses with the loop.
    pub time: f32,
    pub viewport: Viewport,
    /// Damped pointer position, `[-1, 1]` per axis, `+y` up.
    pub pointer: Vec2,
    /// Velocity of the damped pointer in normalized units per second.
    pub pointer_velocity: Vec2,
    /// Damped press intensity in `[0, 1]` (pointer/touch held down).
    pub press: f32,
    /// One-frame tap pulse; reset by the Director after the frame.
    pub tap: f32,
    /// Device orientation vector; zero when inactive.
    pub gyro: Vec3,
    pub gyro_active: bool,
    pub audio: AudioBands,
    /// The frozen device profile, shared by reference for the page's life.
    pub capabilities: &'a CapabilityProfile,
}

impl RuntimeContext<'_> {
    /// Debug-only invariant check used by the Director.
    pub(crate) fn assert_invariants(&self) {
        debug_assert!(self.dt.is_finite() && self.dt >= 0.0);
        debug_assert!(self.time.is_finite());
        debug_assert!(self.pointer.x.abs() <= 1.0 && self.pointer.y.abs() <= 1.0);
        debug_assert!(self.pointer_velocity.is_finite());
        debug_assert!((0.0..=1.0).contains(&self.press));
        debug_assert!((0.0..=1.0).contains(&self.tap));
        debug_assert!(self.gyro.is_finite());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn damp_converges_without_overshoot() {
        let lambda = 8.0;
        let dt = 1.0 / 120.0; // lambda * dt well under 1
        let target = 1.0;
        let mut value = 0.0f32;
        let mut previous_gap = (target - value).abs();

        for _ in 0..600 {
            value = damp(value, target, lambda, dt);
            let gap = (target - value).abs();
            assert!(value <= target, "damped value overshot the target");
            assert!(gap <= previous_gap, "gap must shrink monotonically");
            previous_gap = gap;
        }

        assert!(previous_gap < 1e-3);
    }

    #[test]
    fn damp_is_deterministic() {
        let a = damp(0.25, 0.75, 6.0, 0.016);
        let b = damp(0.25, 0.75, 6.0, 0.016);
        assert_eq!(a, b);
    }

    #[test]
    fn damp_negative_dt_is_inert() {
        assert_eq!(damp(0.4, 1.0, 6.0, -0.5), 0.4);
    }

    #[test]
    fn viewport_aspect_survives_degenerate_sizes() {
        let squashed = Viewport::new(1920.0, 0.0, 2.0);
        assert!(squashed.aspect().is_finite());
        assert!(squashed.aspect() > 0.0);
        assert!(squashed.physical_height() >= 1);

        let garbage = Viewport::new(f32::NAN, 1080.0, f32::INFINITY);
        assert!(garbage.aspect().is_finite());
        assert!(garbage.pixel_ratio.is_finite());
    }

    #[test]
    fn audio_bands_sanitize_garbage() {
        let bands = AudioBands {
            level: f32::NAN,
            low: -2.0,
            mid: 7.5,
            high: 0.5,
        }
        .sanitized();
        assert_eq!(bands.level, 0.0);
        assert_eq!(bands.low, 0.0);
        assert_eq!(bands.mid, 1.0);
        assert_eq!(bands.high, 0.5);
    }
}
