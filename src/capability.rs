//! One-time capability detection for the host device.
//!
//! The Director runs detection exactly once at startup and freezes the
//! result into a [`CapabilityProfile`] that every chapter reads by
//! reference for the lifetime of the mount. Detection itself is a pure
//! function over a [`HostProbe`] — the ambient reads (adapter info,
//! monitor scale, input coarseness, reduced-motion preference) happen in
//! the windowed runner, which keeps this module headless-testable.

/// Rough rendering-power classification of the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PerformanceTier {
    Low,
    Medium,
    High,
}

impl PerformanceTier {
    fn downgraded(self) -> Self {
        match self {
            PerformanceTier::High => PerformanceTier::Medium,
            _ => PerformanceTier::Low,
        }
    }
}

/// Ambient device state sampled once before detection.
///
/// The windowed runner fills this from the wgpu adapter and the winit
/// window; tests construct it directly. Missing information degrades to a
/// safe default rather than failing — there is no error path here.
#[derive(Clone, Debug, Default)]
pub struct HostProbe {
    /// Adapter description, when a GPU was acquired at all.
    pub adapter: Option<wgpu::AdapterInfo>,
    /// Monitor scale factor; `0.0` or negative means "unknown".
    pub scale_factor: f64,
    /// Whether the primary pointing device is coarse (touch).
    pub touch_primary: bool,
    /// Whether the host asked for reduced motion.
    pub reduced_motion: bool,
}

/// The frozen, one-time assessment of the host device.
///
/// Constructed at Director startup and never mutated afterwards; one
/// instance is shared by reference across all chapters.
#[derive(Clone, Debug, PartialEq)]
pub struct CapabilityProfile {
    /// A usable GPU adapter was found.
    pub has_gpu: bool,
    /// Primary pointer is coarse (touch rather than mouse).
    pub coarse_pointer: bool,
    /// Host prefers reduced motion; the loop renders one static frame.
    pub reduced_motion: bool,
    /// Upper bound on the render pixel ratio, in `[1, 2]`.
    pub pixel_ratio_ceiling: f32,
    pub tier: PerformanceTier,
}

impl CapabilityProfile {
    /// Classify the host from a one-time probe.
    ///
    /// Tier mapping: discrete GPU is `High`, integrated is `Medium`,
    /// software rasterizers are `Low`; a GL backend costs one tier since
    /// it usually indicates a fallback path. No adapter at all means
    /// `Low` with `has_gpu == false`.
    pub fn detect(probe: &HostProbe) -> Self {
        let tier = match &probe.adapter {
            None => PerformanceTier::Low,
            Some(info) => {
                let base = match info.device_type {
                    wgpu::DeviceType::DiscreteGpu => PerformanceTier::High,
                    wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Other => {
                        PerformanceTier::Medium
                    }
                    wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Cpu => PerformanceTier::Low,
                };
                if info.backend == wgpu::Backend::Gl {
                    base.downgraded()
                } else {
                    base
                }
            }
        };

        let scale = if probe.scale_factor > 0.0 {
            probe.scale_factor as f32
        } else {
            1.0
        };
        // High-DPI phones report 3x+; rendering past 2x is wasted work.
        let mut ceiling = scale.clamp(1.0, 2.0);
        if tier == PerformanceTier::Low {
            ceiling = 1.0;
        }

        Self {
            has_gpu: probe.adapter.is_some(),
            coarse_pointer: probe.touch_primary,
            reduced_motion: probe.reduced_motion,
            pixel_ratio_ceiling: ceiling,
            tier,
        }
    }

    /// Whether the adaptive quality controller may trade resolution for
    /// frame rate on this device.
    pub fn is_constrained(&self) -> bool {
        self.coarse_pointer && self.tier < PerformanceTier::High
    }
}

impl Default for CapabilityProfile {
    /// The safe floor: no GPU, fine pointer, full motion, 1x rendering.
    fn default() -> Self {
        Self {
            has_gpu: false,
            coarse_pointer: false,
            reduced_motion: false,
            pixel_ratio_ceiling: 1.0,
            tier: PerformanceTier::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(device_type: wgpu::DeviceType, backend: wgpu::Backend) -> wgpu::AdapterInfo {
        wgpu::AdapterInfo {
            name: "test adapter".into(),
            vendor: 0,
            device: 0,
            device_type,
            driver: String::new(),
            driver_info: String::new(),
            backend,
        }
    }

    #[test]
    fn missing_everything_degrades_to_safe_defaults() {
        let profile = CapabilityProfile::detect(&HostProbe::default());
        assert!(!profile.has_gpu);
        assert_eq!(profile.tier, PerformanceTier::Low);
        assert_eq!(profile.pixel_ratio_ceiling, 1.0);
    }

    #[test]
    fn discrete_gpu_is_high_tier() {
        let probe = HostProbe {
            adapter: Some(adapter(wgpu::DeviceType::DiscreteGpu, wgpu::Backend::Vulkan)),
            scale_factor: 2.0,
            ..Default::default()
        };
        let profile = CapabilityProfile::detect(&probe);
        assert!(profile.has_gpu);
        assert_eq!(profile.tier, PerformanceTier::High);
        assert_eq!(profile.pixel_ratio_ceiling, 2.0);
    }

    #[test]
    fn gl_backend_downgrades_one_tier() {
        let probe = HostProbe {
            adapter: Some(adapter(wgpu::DeviceType::DiscreteGpu, wgpu::Backend::Gl)),
            scale_factor: 1.0,
            ..Default::default()
        };
        assert_eq!(
            CapabilityProfile::detect(&probe).tier,
            PerformanceTier::Medium
        );
    }

    #[test]
    fn pixel_ratio_ceiling_is_capped() {
        let probe = HostProbe {
            adapter: Some(adapter(wgpu::DeviceType::IntegratedGpu, wgpu::Backend::Metal)),
            scale_factor: 3.5,
            touch_primary: true,
            ..Default::default()
        };
        let profile = CapabilityProfile::detect(&probe);
        assert_eq!(profile.pixel_ratio_ceiling, 2.0);
        assert!(profile.is_constrained());
    }

    #[test]
    fn high_tier_mouse_device_is_not_constrained() {
        let probe = HostProbe {
            adapter: Some(adapter(wgpu::DeviceType::DiscreteGpu, wgpu::Backend::Vulkan)),
            scale_factor: 1.0,
            ..Default::default()
        };
        assert!(!CapabilityProfile::detect(&probe).is_constrained());
    }
}
