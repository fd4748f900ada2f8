//! Mesh data and spatial transforms.
//!
//! Geometry in diorama is built CPU-side as [`MeshData`] — chapters create
//! and mutate it freely during `init`/`update` without touching the GPU.
//! The [`StageRenderer`](crate::StageRenderer) uploads vertex/index
//! buffers lazily on first draw, which keeps chapter lifecycle code fully
//! headless-testable.
//!
//! # Vertex Layout
//!
//! [`Vertex3d`] is 32 bytes: position (Float32x3, offset 0), normal
//! (Float32x3, offset 12), uv (Float32x2, offset 24). The layout constant
//! [`Vertex3d::LAYOUT`] is used by the stage pipeline and by any custom
//! render pass a chapter builds.

use glam::{Mat4, Quat, Vec3};

/// A vertex with position, normal, and texture coordinates.
///
/// `#[repr(C)]` plus [`bytemuck::Pod`] makes the struct castable to a byte
/// slice for GPU upload.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    /// Surface normal, normalized for correct lighting.
    pub normal: [f32; 3],
    /// Texture coordinates, typically in `[0, 1]`.
    pub uv: [f32; 2],
}

impl Vertex3d {
    /// Vertex buffer layout for pipelines that consume [`Vertex3d`].
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 24,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// CPU-side triangle mesh: vertices plus `u32` triangle indices.
///
/// Counter-clockwise winding for front faces, matching the stage
/// pipeline's backface culling.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Unit cube centered at the origin, four vertices per face so each
    /// face gets a flat normal and a full `[0,1]` UV range.
    pub fn cube() -> Self {
        // (normal, u axis, v axis) per face; vertices derived from those.
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u_axis, v_axis) in FACES {
            let n = Vec3::from(normal);
            let u = Vec3::from(u_axis);
            let v = Vec3::from(v_axis);
            let base = vertices.len() as u32;
            for (du, dv, uv) in [
                (-0.5, -0.5, [0.0, 0.0]),
                (0.5, -0.5, [1.0, 0.0]),
                (0.5, 0.5, [1.0, 1.0]),
                (-0.5, 0.5, [0.0, 1.0]),
            ] {
                let p = n * 0.5 + u * du + v * dv;
                vertices.push(Vertex3d::new(p.into(), normal, uv));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }

        Self { vertices, indices }
    }

    /// UV sphere of radius 0.5 with latitude/longitude subdivision.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::new();
        let mut indices = Vec::new();

        for ring in 0..=rings {
            let v = ring as f32 / rings as f32;
            let theta = v * std::f32::consts::PI;
            for segment in 0..=segments {
                let u = segment as f32 / segments as f32;
                let phi = u * std::f32::consts::TAU;
                let dir = Vec3::new(
                    theta.sin() * phi.sin(),
                    theta.cos(),
                    theta.sin() * phi.cos(),
                );
                vertices.push(Vertex3d::new((dir * 0.5).into(), dir.into(), [u, v]));
            }
        }

        let stride = segments + 1;
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }

        Self { vertices, indices }
    }

    /// Flat `size`×`size` plane on the XZ axes, normal pointing up.
    pub fn plane(size: f32) -> Self {
        let half = size * 0.5;
        let vertices = vec![
            Vertex3d::new([-half, 0.0, half], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex3d::new([half, 0.0, half], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex3d::new([half, 0.0, -half], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex3d::new([-half, 0.0, -half], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];
        let indices = vec![0, 1, 2, 2, 3, 0];
        Self { vertices, indices }
    }

    /// Axis-aligned bounding box as `(min, max)` corners.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for v in &self.vertices {
            let p = Vec3::from(v.position);
            min = min.min(p);
            max = max.max(p);
        }
        (min, max)
    }

    /// Translate every vertex so the bounding-box center lands on the
    /// origin.
    pub fn recenter(&mut self) {
        let (min, max) = self.bounds();
        let center = (min + max) * 0.5;
        for v in &mut self.vertices {
            v.position[0] -= center.x;
            v.position[1] -= center.y;
            v.position[2] -= center.z;
        }
    }

    /// Scale uniformly so the largest bounding-box dimension becomes 1.
    pub fn normalize(&mut self) {
        let (min, max) = self.bounds();
        let size = max - min;
        let largest = size.x.max(size.y).max(size.z);
        if largest > 0.0 {
            let factor = 1.0 / largest;
            for v in &mut self.vertices {
                v.position[0] *= factor;
                v.position[1] *= factor;
                v.position[2] *= factor;
            }
        }
    }
}

/// Position, rotation, and scale for placing a node in 3D space.
///
/// Converted to a matrix in SRT order (scale, rotate, translate).
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_expected_topology() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        let (min, max) = cube.bounds();
        assert_eq!(min, Vec3::splat(-0.5));
        assert_eq!(max, Vec3::splat(0.5));
    }

    #[test]
    fn sphere_vertices_sit_on_the_radius() {
        let sphere = MeshData::sphere(16, 8);
        for v in &sphere.vertices {
            let r = Vec3::from(v.position).length();
            assert!((r - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn recenter_and_normalize_fit_unit_box() {
        let mut mesh = MeshData::plane(8.0);
        for v in &mut mesh.vertices {
            v.position[0] += 10.0;
        }
        mesh.recenter();
        mesh.normalize();
        let (min, max) = mesh.bounds();
        let size = max - min;
        assert!((size.x.max(size.y).max(size.z) - 1.0).abs() < 1e-4);
        assert!((min + max).length() < 1e-4);
    }

    #[test]
    fn transform_matrix_applies_srt_order() {
        let t = Transform::new()
            .position(Vec3::new(1.0, 0.0, 0.0))
            .uniform_scale(2.0);
        let p = t.matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(p, Vec3::new(3.0, 0.0, 0.0));
    }
}
