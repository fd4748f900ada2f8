//! The windowed shell around the [`Director`].
//!
//! This is the only module that talks to winit. It creates the window,
//! acquires the GPU (failing soft into an "unsupported" exit if the
//! environment has none — the loop is never entered in that case),
//! freezes the capability profile, and then translates window events
//! into Director calls: pointer input, visibility, resizes, quality
//! override keys, and chapter cycling through the registry.
//!
//! Per redraw: `tick` → default or custom render → `end_frame` →
//! request the next redraw. One frame's work runs to completion before
//! the next is scheduled; nothing here is threaded.

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton, TouchPhase, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::capability::{CapabilityProfile, HostProbe};
use crate::chapter::ChapterRegistry;
use crate::director::{Director, DirectorConfig, FrameOutcome};
use crate::gpu::{GpuContext, RuntimeError};
use crate::inputs::{AudioSource, GyroSource};
use crate::quality::QualityPreset;
use crate::renderer::{RenderFrame, StageRenderer};

/// Window and runtime configuration for [`run`].
pub struct RunnerConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Treat the primary pointer as coarse (hosts embedding on touch
    /// hardware set this; there is no reliable desktop probe).
    pub coarse_pointer: bool,
    /// Force reduced motion. The `DIORAMA_REDUCED_MOTION` environment
    /// variable does the same without a rebuild.
    pub reduced_motion: bool,
    /// Host-owned audio analyser feeding the context's envelope.
    pub audio_source: Option<Box<dyn AudioSource>>,
    /// Host-owned orientation provider feeding the context's gyro.
    pub gyro_source: Option<Box<dyn GyroSource>>,
    pub director: DirectorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            title: "Diorama".to_string(),
            width: 1280,
            height: 720,
            coarse_pointer: false,
            reduced_motion: false,
            audio_source: None,
            gyro_source: None,
            director: DirectorConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn audio_source(mut self, source: Box<dyn AudioSource>) -> Self {
        self.audio_source = Some(source);
        self
    }

    pub fn gyro_source(mut self, source: Box<dyn GyroSource>) -> Self {
        self.gyro_source = Some(source);
        self
    }

    pub fn director(mut self, director: DirectorConfig) -> Self {
        self.director = director;
        self
    }
}

/// Run chapters from a registry in a window until closed.
///
/// `initial` selects the first chapter to mount; arrow keys cycle
/// through the registry (standing in for the host's router), digit keys
/// exercise the quality override channel (1 full, 2 reduced, 0 auto).
///
/// Returns an error only for unsupported environments or event-loop
/// failures; a missing initial chapter logs a warning and falls back to
/// the first registered one.
pub fn run(
    registry: ChapterRegistry,
    initial: &str,
    config: RunnerConfig,
) -> Result<(), RuntimeError> {
    let event_loop = EventLoop::new().map_err(|e| RuntimeError::EventLoop(e.to_string()))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = RunnerApp::Pending {
        config,
        registry: Some(registry),
        initial: initial.to_string(),
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| RuntimeError::EventLoop(e.to_string()))?;

    match app {
        RunnerApp::Unsupported(error) => Err(error),
        _ => Ok(()),
    }
}

enum RunnerApp {
    Pending {
        config: RunnerConfig,
        registry: Option<ChapterRegistry>,
        initial: String,
    },
    Running {
        window: Arc<Window>,
        gpu: GpuContext,
        renderer: StageRenderer,
        director: Director,
        registry: ChapterRegistry,
    },
    Unsupported(RuntimeError),
}

fn reduced_motion_requested(config: &RunnerConfig) -> bool {
    config.reduced_motion
        || std::env::var_os("DIORAMA_REDUCED_MOTION").is_some_and(|v| v != "0")
}

impl ApplicationHandler for RunnerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let RunnerApp::Pending {
            config,
            registry,
            initial,
        } = self
        else {
            return;
        };

        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                *self = RunnerApp::Unsupported(RuntimeError::Surface(e.to_string()));
                event_loop.exit();
                return;
            }
        };

        // Unsupported environment: signal and never enter the loop.
        let gpu = match GpuContext::new(window.clone()) {
            Ok(gpu) => gpu,
            Err(error) => {
                warn!("[run] unsupported environment: {error}");
                *self = RunnerApp::Unsupported(error);
                event_loop.exit();
                return;
            }
        };

        // Capability detection happens exactly once, here.
        let probe = HostProbe {
            adapter: Some(gpu.adapter_info.clone()),
            scale_factor: window.scale_factor(),
            touch_primary: config.coarse_pointer,
            reduced_motion: reduced_motion_requested(config),
        };
        let profile = CapabilityProfile::detect(&probe);
        info!(
            "[run] profile: tier={:?} gpu={} ratio ceiling={}",
            profile.tier, profile.has_gpu, profile.pixel_ratio_ceiling
        );

        let scale = window.scale_factor();
        let size = window.inner_size().to_logical::<f64>(scale);
        let mut director = Director::new(
            profile,
            config.director.clone(),
            size.width as f32,
            size.height as f32,
        );

        if let Some(source) = config.audio_source.take() {
            director.set_audio_source(source);
        }
        if let Some(source) = config.gyro_source.take() {
            director.set_gyro_source(source);
        }

        let registry = registry.take().unwrap_or_default();
        match registry
            .create(initial)
            .or_else(|| registry.ids().next().and_then(|id| registry.create(id)))
        {
            Some(chapter) => director.mount(chapter),
            None => warn!("[run] registry is empty; nothing to mount"),
        }

        let mut gpu = gpu;
        gpu.apply_viewport(&director.viewport());
        let renderer = StageRenderer::new(&gpu);

        window.request_redraw();
        *self = RunnerApp::Running {
            window,
            gpu,
            renderer,
            director,
            registry,
        };
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let RunnerApp::Running {
            window,
            gpu,
            renderer,
            director,
            registry,
        } = self
        else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                // Listener detach before disposal, then leave.
                director.teardown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                let logical = size.to_logical::<f64>(window.scale_factor());
                director.resize(logical.width as f32, logical.height as f32);
                gpu.apply_viewport(&director.viewport());
            }
            WindowEvent::Occluded(occluded) => {
                director.set_hidden(occluded);
            }
            WindowEvent::CursorMoved { position, .. } => {
                let logical = position.to_logical::<f64>(window.scale_factor());
                director.pointer_moved(logical.x as f32, logical.y as f32);
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => director.pointer_pressed(),
                ElementState::Released => director.pointer_released(),
            },
            WindowEvent::Touch(touch) => {
                let logical = touch.location.to_logical::<f64>(window.scale_factor());
                match touch.phase {
                    TouchPhase::Started => {
                        director.pointer_moved(logical.x as f32, logical.y as f32);
                        director.pointer_pressed();
                    }
                    TouchPhase::Moved => {
                        director.pointer_moved(logical.x as f32, logical.y as f32);
                    }
                    TouchPhase::Ended | TouchPhase::Cancelled => director.pointer_released(),
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                if let PhysicalKey::Code(code) = event.physical_key {
                    match code {
                        // The router stand-in: cycle registered chapters.
                        KeyCode::ArrowRight | KeyCode::ArrowLeft => {
                            let step = if code == KeyCode::ArrowRight { 1 } else { -1 };
                            let next = director
                                .mounted_id()
                                .and_then(|id| registry.neighbor(id, step))
                                .map(str::to_string);
                            if let Some(next) = next {
                                if let Some(chapter) = registry.create(&next) {
                                    director.mount(chapter);
                                }
                            }
                        }
                        // Quality override channel.
                        KeyCode::Digit1 => {
                            director.set_quality_preset(Some(QualityPreset::Full))
                        }
                        KeyCode::Digit2 => {
                            director.set_quality_preset(Some(QualityPreset::Reduced))
                        }
                        KeyCode::Digit0 => director.set_quality_preset(None),
                        _ => {}
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if director.tick(Instant::now()) == FrameOutcome::Updated {
                    // Quality decisions land in the viewport; apply them
                    // to the surface before acquiring it.
                    gpu.apply_viewport(&director.viewport());

                    match gpu.surface.get_current_texture() {
                        Ok(output) => {
                            let view = output
                                .texture
                                .create_view(&wgpu::TextureViewDescriptor::default());
                            let mut encoder = gpu.device.create_command_encoder(
                                &wgpu::CommandEncoderDescriptor {
                                    label: Some("Frame Encoder"),
                                },
                            );

                            let rendered = {
                                let mut frame = RenderFrame {
                                    gpu,
                                    encoder: &mut encoder,
                                    target: &view,
                                    renderer,
                                };
                                director.render_chapter(&mut frame)
                            };
                            if !rendered {
                                let time = director.time();
                                let viewport = director.viewport();
                                if let Some(mounted) = director.mounted_mut() {
                                    let (stage, camera) = mounted.stage_and_camera();
                                    renderer.draw(
                                        gpu, &mut encoder, &view, stage, camera, viewport, time,
                                    );
                                }
                            }

                            gpu.queue.submit(std::iter::once(encoder.finish()));
                            output.present();
                        }
                        // Keep showing whatever last rendered correctly.
                        Err(e) => warn!("[run] surface unavailable this frame: {e}"),
                    }
                }

                director.end_frame();
                window.request_redraw();
            }
            _ => {}
        }
    }
}
