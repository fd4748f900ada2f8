//! A simple perspective camera owned by each chapter.

use glam::{Mat4, Vec3};

/// Bounds applied to the aspect ratio before building a projection.
///
/// A container collapsed to near-zero width or height must not produce a
/// degenerate or non-finite matrix; clamping keeps the frustum sane until
/// layout settles.
const ASPECT_RANGE: (f32, f32) = (0.05, 20.0);

/// Position, orientation, and projection parameters for a chapter's view.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    /// View direction, normalized.
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn looking_at(mut self, target: Vec3) -> Self {
        self.forward = (target - self.position).normalize_or(Vec3::NEG_Z);
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(
            self.position,
            self.forward.normalize_or(Vec3::NEG_Z),
            self.up.normalize_or(Vec3::Y),
        )
    }

    /// Perspective projection for the given aspect ratio.
    ///
    /// Both the aspect and the field of view are clamped so a degenerate
    /// viewport yields a finite, renderable matrix.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() {
            aspect.clamp(ASPECT_RANGE.0, ASPECT_RANGE.1)
        } else {
            1.0
        };
        let fov = self.fov.clamp(0.01, std::f32::consts::PI - 0.01);
        Mat4::perspective_rh(
            fov,
            aspect,
            self.near.max(1e-3),
            self.far.max(self.near + 1.0),
        )
    }
}
