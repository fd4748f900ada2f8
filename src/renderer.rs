//! The default render path: clear, then draw the stage against the
//! chapter camera.
//!
//! [`StageRenderer`] owns the pipeline, uniform buffers, and depth
//! texture for the default pass. CPU-side stage resources are uploaded
//! here, lazily: a geometry gets vertex/index buffers the first frame it
//! is drawn (and re-uploads when a chapter mutates it), a texture gets
//! its GPU copy on first bind. Released resources are skipped entirely.
//!
//! Model uniforms use one dynamically-offset buffer written up front each
//! frame, so every draw reads its own transform.
//!
//! Chapters that need multi-pass compositing implement
//! [`Chapter::render`](crate::Chapter::render) and receive a
//! [`RenderFrame`] — the encoder, target view, and this renderer — as
//! their escape hatch into raw wgpu.

use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::camera::Camera;
use crate::context::Viewport;
use crate::gpu::GpuContext;
use crate::mesh::Vertex3d;
use crate::stage::{GeometryId, GpuGeometry, GpuTexture, MaterialId, Stage};

/// Alignment stride for dynamically-offset uniform slots.
const MODEL_STRIDE: u64 = 256;

/// Camera uniforms, uploaded once per pass.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub time: f32,
}

/// Per-draw model uniforms, one 256-byte slot each.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniforms {
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of the model matrix, for non-uniform scaling.
    pub normal_matrix: [[f32; 4]; 4],
    pub color: [f32; 4],
}

struct DrawItem {
    model: Mat4,
    geometry: GeometryId,
    material: Option<MaterialId>,
}

/// Everything a custom `render` implementation gets to work with.
pub struct RenderFrame<'a> {
    pub gpu: &'a GpuContext,
    pub encoder: &'a mut wgpu::CommandEncoder,
    /// The swapchain view for this frame.
    pub target: &'a wgpu::TextureView,
    pub renderer: &'a mut StageRenderer,
}

/// Depth-tested forward pass over a [`Stage`].
pub struct StageRenderer {
    pipeline: wgpu::RenderPipeline,
    wire_pipeline: Option<wgpu::RenderPipeline>,
    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    model_buffer: wgpu::Buffer,
    model_bind_group: wgpu::BindGroup,
    model_bind_group_layout: wgpu::BindGroupLayout,
    model_capacity: u64,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    default_texture_bind_group: wgpu::BindGroup,
    depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    depth_size: (u32, u32),
}

impl StageRenderer {
    pub fn new(gpu: &GpuContext) -> Self {
        let device = &gpu.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Stage Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/stage.wgsl").into()),
        });

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Stage Camera Uniforms"),
            size: std::mem::size_of::<CameraUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Stage Camera Layout"),
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

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stage Camera Bind Group"),
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });

        let model_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Stage Model Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<ModelUniforms>() as u64,
                        ),
                    },
                    count: None,
                }],
            });

        let model_capacity = 64;
        let (model_buffer, model_bind_group) =
            Self::create_model_buffer(device, &model_bind_group_layout, model_capacity);

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Stage Texture Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ],
            });

        // 1x1 white fallback for untextured materials.
        let default_texture = Self::upload_texture(gpu, &[255, 255, 255, 255], 1, 1, "Stage White");
        let default_texture_bind_group =
            Self::texture_bind_group(device, &texture_bind_group_layout, &default_texture);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Stage Pipeline Layout"),
            bind_group_layouts: &[
                &camera_bind_group_layout,
                &model_bind_group_layout,
                &texture_bind_group_layout,
            ],
            push_constant_ranges: &[],
        });

        let make_pipeline = |polygon_mode: wgpu::PolygonMode, label: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[Vertex3d::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: gpu.config.format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: Some(wgpu::Face::Back),
                    front_face: wgpu::FrontFace::Ccw,
                    polygon_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let pipeline = make_pipeline(wgpu::PolygonMode::Fill, "Stage Pipeline");
        let wire_pipeline = gpu
            .supports_wireframe
            .then(|| make_pipeline(wgpu::PolygonMode::Line, "Stage Wire Pipeline"));

        let (depth_texture, depth_view) = Self::create_depth_texture(gpu);

        Self {
            pipeline,
            wire_pipeline,
            camera_buffer,
            camera_bind_group,
            model_buffer,
            model_bind_group,
            model_bind_group_layout,
            model_capacity,
            texture_bind_group_layout,
            default_texture_bind_group,
            depth_texture,
            depth_view,
            depth_size: (gpu.width(), gpu.height()),
        }
    }

    fn create_model_buffer(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        capacity: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Stage Model Uniforms"),
            size: capacity * MODEL_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stage Model Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<ModelUniforms>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    fn upload_texture(
        gpu: &GpuContext,
        rgba: &[u8],
        width: u32,
        height: u32,
        label: &str,
    ) -> GpuTexture {
        let texture = gpu.device.create_texture_with_data(
            &gpu.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            rgba,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        GpuTexture {
            texture,
            view,
            sampler,
        }
    }

    fn texture_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        texture: &GpuTexture,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Stage Texture Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&texture.sampler),
                },
            ],
        })
    }

    fn create_depth_texture(gpu: &GpuContext) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Stage Depth Texture"),
            size: wgpu::Extent3d {
                width: gpu.width().max(1),
                height: gpu.height().max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    /// Recreate the depth buffer if the surface changed size.
    pub fn ensure_depth_size(&mut self, gpu: &GpuContext) {
        if self.depth_size != (gpu.width(), gpu.height()) {
            let (texture, view) = Self::create_depth_texture(gpu);
            self.depth_texture = texture;
            self.depth_view = view;
            self.depth_size = (gpu.width(), gpu.height());
        }
    }

    /// Upload any stage resource that is new or was mutated CPU-side.
    fn upload_stage(&self, gpu: &GpuContext, stage: &mut Stage) {
        for geometry in &mut stage.geometries {
            if geometry.is_released() || geometry.data.indices.is_empty() {
                continue;
            }
            if geometry.gpu.is_none() || geometry.dirty {
                let vertex_buffer =
                    gpu.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("Stage Vertex Buffer"),
                            contents: bytemuck::cast_slice(&geometry.data.vertices),
                            usage: wgpu::BufferUsages::VERTEX,
                        });
                let index_buffer =
                    gpu.device
                        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("Stage Index Buffer"),
                            contents: bytemuck::cast_slice(&geometry.data.indices),
                            usage: wgpu::BufferUsages::INDEX,
                        });
                if let Some(old) = geometry.gpu.take() {
                    old.vertex_buffer.destroy();
                    old.index_buffer.destroy();
                }
                geometry.gpu = Some(GpuGeometry {
                    vertex_buffer,
                    index_buffer,
                    index_count: geometry.data.index_count(),
                });
                geometry.dirty = false;
            }
        }

        for texture in &mut stage.textures {
            if texture.is_released() || texture.gpu.is_some() || texture.data.rgba.is_empty() {
                continue;
            }
            texture.gpu = Some(Self::upload_texture(
                gpu,
                &texture.data.rgba,
                texture.data.width,
                texture.data.height,
                "Stage Texture",
            ));
        }
    }

    fn collect(stage: &Stage) -> Vec<DrawItem> {
        let mut items = Vec::new();
        let mut pending = vec![(stage.root(), Mat4::IDENTITY)];
        while let Some((id, parent)) = pending.pop() {
            let node = stage.node(id);
            if !node.visible {
                continue;
            }
            let world = parent * node.transform.matrix();
            if let Some(geometry) = node.geometry {
                if !stage.geometry(geometry).is_released() {
                    let materials = node.materials.as_slice();
                    if materials.is_empty() {
                        items.push(DrawItem {
                            model: world,
                            geometry,
                            material: None,
                        });
                    } else {
                        for &material in materials {
                            if !stage.material(material).is_released() {
                                items.push(DrawItem {
                                    model: world,
                                    geometry,
                                    material: Some(material),
                                });
                            }
                        }
                    }
                }
            }
            for &child in &node.children {
                pending.push((child, world));
            }
        }
        items
    }

    /// Clear the target and draw every visible stage node.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        stage: &mut Stage,
        camera: &Camera,
        viewport: Viewport,
        time: f32,
    ) {
        self.ensure_depth_size(gpu);
        self.upload_stage(gpu, stage);
        let items = Self::collect(stage);

        // Grow the dynamic-offset buffer before writing this frame's
        // uniforms.
        if items.len() as u64 > self.model_capacity {
            self.model_capacity = (items.len() as u64).next_power_of_two();
            let (buffer, bind_group) = Self::create_model_buffer(
                &gpu.device,
                &self.model_bind_group_layout,
                self.model_capacity,
            );
            self.model_buffer = buffer;
            self.model_bind_group = bind_group;
        }

        let view = camera.view_matrix();
        let proj = camera.projection_matrix(viewport.aspect());
        let camera_uniforms = CameraUniforms {
            view_proj: (proj * view).to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            camera_pos: camera.position.to_array(),
            time,
        };
        gpu.queue.write_buffer(
            &self.camera_buffer,
            0,
            bytemuck::cast_slice(&[camera_uniforms]),
        );

        for (i, item) in items.iter().enumerate() {
            let color = item
                .material
                .map(|m| stage.material(m).color)
                .unwrap_or([1.0, 1.0, 1.0, 1.0]);
            let uniforms = ModelUniforms {
                model: item.model.to_cols_array_2d(),
                normal_matrix: item.model.inverse().transpose().to_cols_array_2d(),
                color,
            };
            gpu.queue.write_buffer(
                &self.model_buffer,
                i as u64 * MODEL_STRIDE,
                bytemuck::cast_slice(&[uniforms]),
            );
        }

        let [r, g, b, a] = stage.background;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Stage Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_bind_group(0, &self.camera_bind_group, &[]);

        for (i, item) in items.iter().enumerate() {
            let material = item.material.map(|m| stage.material(m));
            let wireframe = material.map(|m| m.wireframe).unwrap_or(false);
            match (&self.wire_pipeline, wireframe) {
                (Some(wire), true) => pass.set_pipeline(wire),
                _ => pass.set_pipeline(&self.pipeline),
            }

            pass.set_bind_group(1, &self.model_bind_group, &[(i as u32) * MODEL_STRIDE as u32]);

            // Bind the material's base color texture, falling back to white.
            let texture_bind_group = material
                .and_then(|m| m.map)
                .and_then(|t| stage.texture(t).gpu.as_ref())
                .map(|gpu_texture| {
                    Self::texture_bind_group(
                        &gpu.device,
                        &self.texture_bind_group_layout,
                        gpu_texture,
                    )
                });
            match &texture_bind_group {
                Some(bind_group) => pass.set_bind_group(2, bind_group, &[]),
                None => pass.set_bind_group(2, &self.default_texture_bind_group, &[]),
            }

            let geometry = stage.geometry(item.geometry);
            if let Some(gpu_geometry) = geometry.gpu.as_ref() {
                pass.set_vertex_buffer(0, gpu_geometry.vertex_buffer.slice(..));
                pass.set_index_buffer(
                    gpu_geometry.index_buffer.slice(..),
                    wgpu::IndexFormat::Uint32,
                );
                pass.draw_indexed(0..gpu_geometry.index_count, 0, 0..1);
            }
        }
    }
}
