//! # Diorama
//!
//! **A chapter-based scene runtime for full-screen animated 3D visuals.**
//!
//! Diorama turns interchangeable scene implementations — "chapters" —
//! into live, performant, resource-safe animation behind host content.
//! One capability profile per device, one lifecycle contract per
//! chapter, one immutable input context per frame, and deterministic
//! teardown when chapters swap.
//!
//! ## Quick Start
//!
//! ```no_run
//! use diorama::*;
//! use glam::Vec3;
//!
//! struct Spinner {
//!     cube: Option<NodeId>,
//! }
//!
//! impl Chapter for Spinner {
//!     fn id(&self) -> &str {
//!         "spinner"
//!     }
//!
//!     fn init(&mut self, stage: &mut Stage, camera: &mut Camera, _ctx: &RuntimeContext) {
//!         *camera = Camera::new().at(Vec3::new(0.0, 1.0, 4.0)).looking_at(Vec3::ZERO);
//!         let node = stage.add_node(stage.root(), "cube");
//!         let geometry = stage.add_geometry(MeshData::cube());
//!         let material = stage.add_material(Material::new([0.9, 0.4, 0.2, 1.0]));
//!         stage.node_mut(node).geometry = Some(geometry);
//!         stage.node_mut(node).materials = MaterialSlot::Single(material);
//!         self.cube = Some(node);
//!     }
//!
//!     fn resize(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {}
//!
//!     fn update(&mut self, stage: &mut Stage, _camera: &mut Camera, ctx: &RuntimeContext) {
//!         if let Some(cube) = self.cube {
//!             stage.node_mut(cube).transform =
//!                 Transform::new().rotation(glam::Quat::from_rotation_y(ctx.time));
//!         }
//!     }
//! }
//!
//! fn main() -> Result<(), RuntimeError> {
//!     let mut registry = ChapterRegistry::new();
//!     registry.register("spinner", || Box::new(Spinner { cube: None }));
//!     run(registry, "spinner", RunnerConfig::new().title("Spinner"))
//! }
//! ```
//!
//! ## Philosophy
//!
//! - **One contract, many chapters** — chapters implement a narrow trait
//!   and never outlive their disposal; a registry picks which one mounts.
//! - **Headless core** — lifecycle, input damping, suspension, quality,
//!   and disposal all run and test without a window or GPU.
//! - **The frame never blocks** — asset loads run in the background and
//!   stale results are discarded by generation, not awaited.
//! - **Escape hatches everywhere** — custom `render` implementations get
//!   the raw encoder and the full wgpu API.

mod camera;
mod capability;
mod chapter;
mod context;
mod director;
mod dispose;
mod gpu;
mod inputs;
mod loader;
mod mesh;
mod quality;
mod renderer;
mod run;
mod stage;

pub use camera::Camera;
pub use capability::{CapabilityProfile, HostProbe, PerformanceTier};
pub use chapter::{Chapter, ChapterRegistry, Lifecycle, MountedChapter};
pub use context::{AudioBands, RuntimeContext, Viewport, damp, damp_vec2};
pub use director::{Director, DirectorConfig, FrameOutcome};
pub use dispose::Disposer;
pub use gpu::{GpuContext, RuntimeError};
pub use inputs::{AudioSource, GyroSource, InputRig};
pub use loader::{GenerationGate, LoadError, ModelLoader, load_stl_bytes};
pub use mesh::{MeshData, Transform, Vertex3d};
pub use quality::{QualityChange, QualityConfig, QualityController, QualityPreset};
pub use renderer::{CameraUniforms, ModelUniforms, RenderFrame, StageRenderer};
pub use run::{RunnerConfig, run};
pub use stage::{
    Geometry, GeometryId, Material, MaterialId, MaterialSlot, MaterialVariant, Node, NodeId,
    ResourceId, Stage, Texture, TextureData, TextureId,
};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
