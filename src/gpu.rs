//! GPU context and device acquisition.
//!
//! [`GpuContext`] owns the wgpu surface, device, queue, and surface
//! configuration, and is passed by reference to the renderer and to
//! custom chapter passes. Unlike a toy setup, acquisition is fallible:
//! a host without a usable adapter gets a [`RuntimeError`] back and the
//! runner signals "unsupported" instead of entering the render loop —
//! the canvas simply never animates, it does not crash.

use std::sync::Arc;

use winit::window::Window;

use crate::context::Viewport;

/// Environment errors that keep the runtime from starting.
#[derive(Debug)]
pub enum RuntimeError {
    /// The window surface could not be created.
    Surface(String),
    /// No compatible GPU adapter was found.
    Adapter(String),
    /// The logical device could not be created.
    Device(String),
    /// The event loop could not be driven.
    EventLoop(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Surface(msg) => write!(f, "surface creation failed: {}", msg),
            RuntimeError::Adapter(msg) => write!(f, "no compatible GPU adapter: {}", msg),
            RuntimeError::Device(msg) => write!(f, "device creation failed: {}", msg),
            RuntimeError::EventLoop(msg) => write!(f, "event loop failure: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Core GPU context holding wgpu resources.
///
/// Fields are public so chapters with custom render passes can reach the
/// full wgpu API.
pub struct GpuContext {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    /// Description of the adapter actually in use; feeds capability
    /// detection.
    pub adapter_info: wgpu::AdapterInfo,
    /// Line polygon mode is an optional wgpu feature; wireframe
    /// materials fall back to filled rendering without it.
    pub supports_wireframe: bool,
}

impl GpuContext {
    /// Create a GPU context for a window, or report why the environment
    /// cannot support one.
    pub fn new(window: Arc<Window>) -> Result<Self, RuntimeError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| RuntimeError::Surface(e.to_string()))?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| RuntimeError::Adapter(e.to_string()))?;

        let adapter_info = adapter.get_info();
        let optional_features = adapter.features() & wgpu::Features::POLYGON_MODE_LINE;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Diorama Device"),
            required_features: optional_features,
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| RuntimeError::Device(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            adapter_info,
            supports_wireframe: optional_features.contains(wgpu::Features::POLYGON_MODE_LINE),
        })
    }

    /// Reconfigure the surface to a viewport's physical resolution.
    ///
    /// Called on window resize and whenever the adaptive quality
    /// controller changes the pixel ratio. No-ops when nothing changed.
    pub fn apply_viewport(&mut self, viewport: &Viewport) {
        let width = viewport.physical_width();
        let height = viewport.physical_height();
        if width == self.config.width && height == self.config.height {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }

    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }
}
