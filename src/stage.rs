//! The retained renderable graph a chapter owns.
//!
//! A [`Stage`] is a node arena plus shared resource stores for geometry,
//! materials, and textures. Chapters build into it during `init`, mutate
//! it during `update`, and the Director's renderer draws it; on chapter
//! swap the [`Disposer`](crate::Disposer) traverses it and releases every
//! GPU-backed resource exactly once. Resources are stored CPU-side and
//! uploaded lazily, so a stage is fully usable without a GPU device.
//!
//! Nodes reference resources by handle ([`GeometryId`], [`MaterialId`],
//! [`TextureId`] — the same newtype-index pattern as the node ids), so
//! several nodes can share one geometry or material without ownership
//! gymnastics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Mat4;

use crate::mesh::{MeshData, Transform};

/// Process-unique identity of a GPU-backed resource.
///
/// Handles ([`GeometryId`] etc.) are per-stage indices; `ResourceId` is
/// what the disposer's already-released set is keyed by, so a resource
/// shared between nodes — or between a base material and its cached
/// variants — frees exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

fn next_resource_id() -> ResourceId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    ResourceId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// Handle to a node within a [`Stage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Handle to a geometry in the stage's resource store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryId(pub(crate) usize);

/// Handle to a material in the stage's resource store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(pub(crate) usize);

/// Handle to a texture in the stage's resource store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) usize);

/// Uploaded vertex/index buffers for a geometry.
pub(crate) struct GpuGeometry {
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) index_buffer: wgpu::Buffer,
    pub(crate) index_count: u32,
}

/// Geometry resource: CPU mesh data plus lazily created GPU buffers.
pub struct Geometry {
    resource: ResourceId,
    pub data: MeshData,
    pub(crate) gpu: Option<GpuGeometry>,
    /// CPU data changed since the last upload.
    pub(crate) dirty: bool,
    releases: u32,
}

impl Geometry {
    fn new(data: MeshData) -> Self {
        Self {
            resource: next_resource_id(),
            data,
            gpu: None,
            dirty: true,
            releases: 0,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource
    }

    pub fn is_released(&self) -> bool {
        self.releases > 0
    }

    /// How many times this resource has been released. The disposer's
    /// identity set keeps this at most 1; tests assert on it.
    pub fn release_count(&self) -> u32 {
        self.releases
    }

    pub(crate) fn release(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            gpu.vertex_buffer.destroy();
            gpu.index_buffer.destroy();
        }
        self.data.vertices.clear();
        self.data.indices.clear();
        self.releases += 1;
    }
}

/// Raw RGBA pixels for a texture, decoded CPU-side.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TextureData {
    /// A 1x1 solid-color texture, the placeholder of choice while a real
    /// asset loads (or after it failed to).
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            rgba: rgba.to_vec(),
            width: 1,
            height: 1,
        }
    }

    /// Decode an embedded image (PNG, JPEG, ...) into RGBA pixels.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            rgba: img.into_raw(),
            width,
            height,
        })
    }
}

pub(crate) struct GpuTexture {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) sampler: wgpu::Sampler,
}

/// Texture resource: CPU pixels plus a lazily created GPU texture.
pub struct Texture {
    resource: ResourceId,
    pub data: TextureData,
    pub(crate) gpu: Option<GpuTexture>,
    releases: u32,
}

impl Texture {
    fn new(data: TextureData) -> Self {
        Self {
            resource: next_resource_id(),
            data,
            gpu: None,
            releases: 0,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource
    }

    pub fn is_released(&self) -> bool {
        self.releases > 0
    }

    pub fn release_count(&self) -> u32 {
        self.releases
    }

    pub(crate) fn release(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            gpu.texture.destroy();
        }
        self.data.rgba.clear();
        self.releases += 1;
    }
}

/// Surface description for a node: color, opacity, and known texture
/// slots. Materials have no GPU object of their own (uniforms are written
/// per draw), but they own their place in the disposal order: referenced
/// textures are released before the material itself.
#[derive(Clone, Debug)]
pub struct Material {
    resource: ResourceId,
    /// RGBA base color, multiplied with the texture when one is bound.
    pub color: [f32; 4],
    /// Base color texture slot.
    pub map: Option<TextureId>,
    /// Emissive texture slot.
    pub emissive_map: Option<TextureId>,
    /// Render as lines instead of filled triangles (when supported).
    pub wireframe: bool,
    releases: u32,
}

impl Material {
    pub fn new(color: [f32; 4]) -> Self {
        Self {
            resource: next_resource_id(),
            color,
            map: None,
            emissive_map: None,
            wireframe: false,
            releases: 0,
        }
    }

    pub fn with_map(mut self, map: TextureId) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_emissive_map(mut self, map: TextureId) -> Self {
        self.emissive_map = Some(map);
        self
    }

    pub fn wireframe(mut self) -> Self {
        self.wireframe = true;
        self
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource
    }

    /// The known texture slots, in release order.
    pub fn texture_slots(&self) -> impl Iterator<Item = TextureId> + '_ {
        self.map.into_iter().chain(self.emissive_map)
    }

    pub fn is_released(&self) -> bool {
        self.releases > 0
    }

    pub fn release_count(&self) -> u32 {
        self.releases
    }

    pub(crate) fn release(&mut self) {
        self.releases += 1;
    }

    /// A copy of this material with a fresh resource identity.
    fn derive(&self) -> Self {
        Self {
            resource: next_resource_id(),
            releases: 0,
            ..self.clone()
        }
    }
}

/// What a node renders with: nothing, one material, or an array slot
/// (one draw per entry, over the same geometry).
#[derive(Clone, Debug, Default)]
pub enum MaterialSlot {
    #[default]
    Empty,
    Single(MaterialId),
    Multi(Vec<MaterialId>),
}

impl MaterialSlot {
    pub fn as_slice(&self) -> &[MaterialId] {
        match self {
            MaterialSlot::Empty => &[],
            MaterialSlot::Single(id) => std::slice::from_ref(id),
            MaterialSlot::Multi(ids) => ids,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = MaterialId> + '_ {
        self.as_slice().iter().copied()
    }

    pub fn first(&self) -> Option<MaterialId> {
        self.as_slice().first().copied()
    }
}

/// Shader/material look applied to a node, cached per `(node, variant)`.
///
/// Variants are built lazily from the node's base material the first time
/// they are requested and kept until chapter disposal; they are never
/// shared across chapters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MaterialVariant {
    Base,
    Wrap,
    Wireframe,
    Glass,
}

/// One element of the renderable tree.
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub visible: bool,
    pub geometry: Option<GeometryId>,
    pub materials: MaterialSlot,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            transform: Transform::new(),
            visible: true,
            geometry: None,
            materials: MaterialSlot::Empty,
            parent,
            children: Vec::new(),
        }
    }
}

/// The renderable graph owned by one chapter.
pub struct Stage {
    nodes: Vec<Node>,
    root: NodeId,
    pub(crate) geometries: Vec<Geometry>,
    pub(crate) materials: Vec<Material>,
    pub(crate) textures: Vec<Texture>,
    pub(crate) variants: HashMap<(NodeId, MaterialVariant), MaterialId>,
    /// Clear color for the default render pass.
    pub background: [f64; 4],
}

impl Stage {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new("root".into(), None)],
            root: NodeId(0),
            geometries: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            variants: HashMap::new(),
            background: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn add_node(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name.into(), Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn add_geometry(&mut self, data: MeshData) -> GeometryId {
        let id = GeometryId(self.geometries.len());
        self.geometries.push(Geometry::new(data));
        id
    }

    pub fn geometry(&self, id: GeometryId) -> &Geometry {
        &self.geometries[id.0]
    }

    /// Mutable access to geometry data; marks it for re-upload.
    pub fn geometry_mut(&mut self, id: GeometryId) -> &mut MeshData {
        let geometry = &mut self.geometries[id.0];
        geometry.dirty = true;
        &mut geometry.data
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len());
        self.materials.push(material);
        id
    }

    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    pub fn material_mut(&mut self, id: MaterialId) -> &mut Material {
        &mut self.materials[id.0]
    }

    pub fn add_texture(&mut self, data: TextureData) -> TextureId {
        let id = TextureId(self.textures.len());
        self.textures.push(Texture::new(data));
        id
    }

    pub fn texture(&self, id: TextureId) -> &Texture {
        &self.textures[id.0]
    }

    /// Every node reachable from `start`, depth-first, including `start`.
    pub fn descendants(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending = vec![start];
        while let Some(id) = pending.pop() {
            out.push(id);
            for &child in self.nodes[id.0].children.iter().rev() {
                pending.push(child);
            }
        }
        out
    }

    /// World matrix of a node (product of ancestor transforms).
    pub fn world_transform(&self, id: NodeId) -> Mat4 {
        let node = &self.nodes[id.0];
        let local = node.transform.matrix();
        match node.parent {
            Some(parent) => self.world_transform(parent) * local,
            None => local,
        }
    }

    /// Best-effort node lookup by name substring, case-insensitive.
    ///
    /// This is a heuristic: model files name meshes inconsistently, so
    /// callers must treat an empty result as "feature disabled", never as
    /// an error. False positives are possible with loose patterns —
    /// prefer specific ones ("wheel_fl") over generic ("l").
    pub fn find_nodes(&self, patterns: &[&str]) -> Vec<NodeId> {
        let lowered: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
        self.descendants(self.root)
            .into_iter()
            .filter(|id| {
                let name = self.nodes[id.0].name.to_lowercase();
                lowered.iter().any(|p| !p.is_empty() && name.contains(p))
            })
            .collect()
    }

    /// Switch a node to a material variant, building it lazily.
    ///
    /// The node's original material is cached under [`MaterialVariant::Base`]
    /// on first use so it can be restored. Returns `None` for nodes with
    /// an empty material slot.
    pub fn apply_variant(&mut self, node: NodeId, variant: MaterialVariant) -> Option<MaterialId> {
        let base = match self.variants.get(&(node, MaterialVariant::Base)) {
            Some(&id) => id,
            None => {
                let current = self.nodes[node.0].materials.first()?;
                self.variants.insert((node, MaterialVariant::Base), current);
                current
            }
        };

        let id = match self.variants.get(&(node, variant)) {
            Some(&id) => id,
            None => {
                let built = match variant {
                    MaterialVariant::Base => base,
                    MaterialVariant::Wrap => {
                        let mut m = self.materials[base.0].derive();
                        m.color = [1.0, 1.0, 1.0, 1.0];
                        m.wireframe = false;
                        self.add_material(m)
                    }
                    MaterialVariant::Wireframe => {
                        let mut m = self.materials[base.0].derive();
                        m.map = None;
                        m.emissive_map = None;
                        m.wireframe = true;
                        self.add_material(m)
                    }
                    MaterialVariant::Glass => {
                        let mut m = self.materials[base.0].derive();
                        m.map = None;
                        m.color = [0.85, 0.92, 1.0, 0.35];
                        m.wireframe = false;
                        self.add_material(m)
                    }
                };
                self.variants.insert((node, variant), built);
                built
            }
        };

        self.nodes[node.0].materials = MaterialSlot::Single(id);
        Some(id)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}
