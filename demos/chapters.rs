//! Chapter gallery demo: three chapters behind one registry.
//!
//! Controls:
//! - LEFT / RIGHT: cycle chapters (drift field, plasma, showroom)
//! - Click/tap in the showroom: cycle material variants
//! - Hold the mouse button: press gesture (slows the turntable)
//! - 1 / 2 / 0: quality preset full / reduced / automatic

use diorama::{
    Camera, Chapter, ChapterRegistry, Material, MaterialSlot, MaterialVariant, MeshData, NodeId,
    RenderFrame, RunnerConfig, RuntimeContext, Stage, Transform, run,
};
use glam::{Quat, Vec3};

/// Deterministic pseudo-random in [0, 1) from an index.
fn hash01(i: u32) -> f32 {
    let x = (i as f32 * 12.9898).sin() * 43758.547;
    x - x.floor()
}

// ============================================================
// Chapter 1: a drifting particle field with pointer parallax
// ============================================================

struct DriftField {
    nodes: Vec<NodeId>,
}

impl DriftField {
    fn new() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl Chapter for DriftField {
    fn id(&self) -> &str {
        "drift"
    }

    fn init(&mut self, stage: &mut Stage, camera: &mut Camera, _ctx: &RuntimeContext) {
        *camera = Camera::new().at(Vec3::new(0.0, 0.0, 9.0)).looking_at(Vec3::ZERO);
        stage.background = [0.01, 0.012, 0.03, 1.0];

        let mote = stage.add_geometry(MeshData::sphere(10, 6));
        let palette = [
            stage.add_material(Material::new([0.55, 0.75, 1.0, 1.0])),
            stage.add_material(Material::new([0.95, 0.55, 0.75, 1.0])),
            stage.add_material(Material::new([0.8, 0.85, 0.95, 1.0])),
        ];

        for i in 0..140u32 {
            let node = stage.add_node(stage.root(), format!("mote_{i}"));
            stage.node_mut(node).geometry = Some(mote);
            stage.node_mut(node).materials =
                MaterialSlot::Single(palette[(i % palette.len() as u32) as usize]);
            self.nodes.push(node);
        }
    }

    fn resize(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {}

    fn update(&mut self, stage: &mut Stage, camera: &mut Camera, ctx: &RuntimeContext) {
        // The camera drifts with the damped pointer; the gyro adds tilt
        // on devices that have one (zero vector is simply no tilt).
        let sway = ctx.pointer * 0.9 + ctx.gyro.truncate() * 0.4;
        *camera = Camera::new()
            .at(Vec3::new(sway.x, sway.y * 0.6, 9.0))
            .looking_at(Vec3::ZERO);

        let swell = 1.0 + ctx.audio.level * 1.5 + ctx.press * 0.6;
        for (i, &node) in self.nodes.iter().enumerate() {
            let seed = hash01(i as u32);
            let orbit = 2.0 + seed * 4.5;
            let speed = 0.08 + seed * 0.25;
            let phase = seed * std::f32::consts::TAU + ctx.time * speed;
            let y = (seed - 0.5) * 6.0 + (ctx.time * 0.3 + seed * 7.0).sin() * 0.4;
            stage.node_mut(node).transform = Transform::new()
                .position(Vec3::new(phase.cos() * orbit, y, phase.sin() * orbit))
                .uniform_scale((0.04 + seed * 0.08) * swell);
        }
    }
}

// ============================================================
// Chapter 2: procedural plasma via a custom fullscreen pass
// ============================================================

const PLASMA_SHADER: &str = r#"
struct PlasmaUniforms {
    time: f32,
    press: f32,
    pointer: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: PlasmaUniforms;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    // Fullscreen triangle.
    let x = f32(i32(index & 1u) * 4 - 1);
    let y = f32(i32(index >> 1u) * 4 - 1);
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
    let p = pos.xy * 0.004;
    let t = u.time * 0.4;
    var v = sin(p.x * 3.0 + t) + sin(p.y * 2.4 - t * 1.3);
    v = v + sin(length(p - u.pointer * 0.5) * 6.0 - t * 2.0);
    let glow = 0.5 + 0.5 * sin(v * 3.14159);
    let base = vec3<f32>(0.1, 0.05, 0.2) + glow * vec3<f32>(0.5, 0.3, 0.7);
    return vec4<f32>(base * (1.0 + u.press * 0.5), 1.0);
}
"#;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PlasmaUniforms {
    time: f32,
    press: f32,
    pointer: [f32; 2],
}

struct Plasma {
    pipeline: Option<wgpu::RenderPipeline>,
    uniforms: Option<(wgpu::Buffer, wgpu::BindGroup)>,
}

impl Plasma {
    fn new() -> Self {
        Self {
            pipeline: None,
            uniforms: None,
        }
    }

    fn ensure_pipeline(&mut self, frame: &RenderFrame) {
        if self.pipeline.is_some() {
            return;
        }
        let device = &frame.gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Plasma Shader"),
            source: wgpu::ShaderSource::Wgsl(PLASMA_SHADER.into()),
        });
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Plasma Uniforms"),
            size: std::mem::size_of::<PlasmaUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Plasma Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Plasma Bind Group"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Plasma Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Plasma Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: frame.gpu.config.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        self.pipeline = Some(pipeline);
        self.uniforms = Some((buffer, bind_group));
    }
}

impl Chapter for Plasma {
    fn id(&self) -> &str {
        "plasma"
    }

    fn init(&mut self, stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {
        stage.background = [0.0, 0.0, 0.0, 1.0];
    }

    fn resize(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {}

    fn update(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {}

    fn render(
        &mut self,
        _stage: &mut Stage,
        _camera: &Camera,
        ctx: &RuntimeContext,
        frame: &mut RenderFrame,
    ) -> bool {
        self.ensure_pipeline(frame);
        let (Some(pipeline), Some((buffer, bind_group))) =
            (self.pipeline.as_ref(), self.uniforms.as_ref())
        else {
            return false;
        };

        frame.gpu.queue.write_buffer(
            buffer,
            0,
            bytemuck::cast_slice(&[PlasmaUniforms {
                time: ctx.time,
                press: ctx.press,
                pointer: ctx.pointer.to_array(),
            }]),
        );

        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Plasma Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: frame.target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
        true
    }
}

// ============================================================
// Chapter 3: a showroom with an async model and variant looks
// ============================================================

const VARIANT_CYCLE: [MaterialVariant; 4] = [
    MaterialVariant::Base,
    MaterialVariant::Wrap,
    MaterialVariant::Wireframe,
    MaterialVariant::Glass,
];

struct Showroom {
    loader: diorama::ModelLoader,
    turntable: Option<NodeId>,
    shell: Option<NodeId>,
    wheels: Vec<NodeId>,
    wheel_roll: f32,
    variant_index: usize,
    loading: bool,
}

impl Showroom {
    fn new() -> Self {
        Self {
            loader: diorama::ModelLoader::new(),
            turntable: None,
            shell: None,
            wheels: Vec::new(),
            wheel_roll: 0.0,
            variant_index: 0,
            loading: false,
        }
    }
}

impl Chapter for Showroom {
    fn id(&self) -> &str {
        "showroom"
    }

    fn init(&mut self, stage: &mut Stage, camera: &mut Camera, _ctx: &RuntimeContext) {
        *camera = Camera::new()
            .at(Vec3::new(0.0, 1.6, 5.5))
            .looking_at(Vec3::new(0.0, 0.4, 0.0));
        stage.background = [0.02, 0.02, 0.025, 1.0];

        let floor = stage.add_node(stage.root(), "floor");
        let floor_geometry = stage.add_geometry(MeshData::plane(16.0));
        let floor_material = stage.add_material(Material::new([0.08, 0.08, 0.09, 1.0]));
        stage.node_mut(floor).geometry = Some(floor_geometry);
        stage.node_mut(floor).materials = MaterialSlot::Single(floor_material);

        let turntable = stage.add_node(stage.root(), "turntable");
        self.turntable = Some(turntable);

        // Placeholder car, kept if no model ever arrives.
        let cube = stage.add_geometry(MeshData::cube());
        let wheel_geometry = stage.add_geometry(MeshData::sphere(14, 10));
        let paint = stage.add_material(Material::new([0.65, 0.08, 0.1, 1.0]));
        let rubber = stage.add_material(Material::new([0.06, 0.06, 0.06, 1.0]));

        let shell = stage.add_node(turntable, "body_shell");
        stage.node_mut(shell).geometry = Some(cube);
        stage.node_mut(shell).materials = MaterialSlot::Single(paint);
        stage.node_mut(shell).transform = Transform::new()
            .position(Vec3::new(0.0, 0.55, 0.0))
            .scale(Vec3::new(2.6, 0.5, 1.2));
        self.shell = Some(shell);

        for (name, x, z) in [
            ("wheel_fl", -0.9, 0.62),
            ("wheel_fr", -0.9, -0.62),
            ("wheel_rl", 0.9, 0.62),
            ("wheel_rr", 0.9, -0.62),
        ] {
            let wheel = stage.add_node(turntable, name);
            stage.node_mut(wheel).geometry = Some(wheel_geometry);
            stage.node_mut(wheel).materials = MaterialSlot::Single(rubber);
            stage.node_mut(wheel).transform = Transform::new()
                .position(Vec3::new(x, 0.3, z))
                .scale(Vec3::new(0.6, 0.6, 0.25));
        }

        // Heuristic wheel lookup: on a loaded model the names may not
        // match, in which case wheel spin is simply disabled.
        self.wheels = stage.find_nodes(&["wheel"]);

        if let Ok(path) = std::env::var("DIORAMA_SHOWROOM_MODEL") {
            self.loader.request(path);
            self.loading = true;
        }
    }

    fn resize(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {}

    fn update(&mut self, stage: &mut Stage, camera: &mut Camera, ctx: &RuntimeContext) {
        // Apply a finished model load, unless it was superseded or failed
        // (in which case the placeholder stays).
        if self.loading {
            if let Some(result) = self.loader.poll() {
                self.loading = false;
                if let (Ok(mut mesh), Some(shell)) = (result, self.shell) {
                    mesh.recenter();
                    mesh.normalize();
                    let geometry = stage.add_geometry(mesh);
                    stage.node_mut(shell).geometry = Some(geometry);
                    stage.node_mut(shell).transform = Transform::new()
                        .position(Vec3::new(0.0, 0.8, 0.0))
                        .uniform_scale(3.0);
                    self.wheels = stage.find_nodes(&["wheel"]);
                }
            }
        }

        // Tap cycles the paint variant on the shell.
        if ctx.tap > 0.5 {
            self.variant_index = (self.variant_index + 1) % VARIANT_CYCLE.len();
            if let Some(shell) = self.shell {
                stage.apply_variant(shell, VARIANT_CYCLE[self.variant_index]);
            }
        }

        // Press slows the turntable for a closer look.
        let spin = 0.4 * (1.0 - ctx.press * 0.85);
        if let Some(turntable) = self.turntable {
            let node = stage.node_mut(turntable);
            node.transform = node
                .transform
                .rotation(node.transform.rotation * Quat::from_rotation_y(spin * ctx.dt));
        }

        self.wheel_roll += ctx.dt * spin * 6.0;
        for &wheel in &self.wheels {
            let node = stage.node_mut(wheel);
            let position = node.transform.position;
            let scale = node.transform.scale;
            node.transform = Transform::new()
                .position(position)
                .rotation(Quat::from_rotation_z(self.wheel_roll))
                .scale(scale);
        }

        // Orbit gently with the pointer.
        let angle = ctx.pointer.x * 0.8;
        let height = 1.6 + ctx.pointer.y * 0.8;
        *camera = Camera::new()
            .at(Vec3::new(angle.sin() * 5.5, height, angle.cos() * 5.5))
            .looking_at(Vec3::new(0.0, 0.4, 0.0));
    }
}

fn main() {
    let mut registry = ChapterRegistry::new();
    registry.register("drift", || Box::new(DriftField::new()));
    registry.register("plasma", || Box::new(Plasma::new()));
    registry.register("showroom", || Box::new(Showroom::new()));

    if let Err(e) = run(
        registry,
        "drift",
        RunnerConfig::new().title("Diorama Chapters").size(1280, 720),
    ) {
        eprintln!("[demo] {e}");
    }
}
