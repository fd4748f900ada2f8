//! Adaptive quality: trade render resolution for frame rate.
//!
//! The controller keeps a rolling one-second sample of admitted frames.
//! At each window boundary — and only there, so quality never flickers —
//! it may flip eco mode: on when a constrained device sustains a frame
//! rate below the low-water mark, off again once the rate recovers. Eco
//! mode lowers the render pixel ratio toward the floor (never below 1x);
//! leaving it restores the ratio that was active before.
//!
//! Manual presets from the host UI are authoritative: while one is set,
//! automatic decisions are suspended, and setting one resets the sample
//! window. The thresholds are deliberately configuration, not constants —
//! they were tuned empirically and hosts may re-tune them.

use std::time::{Duration, Instant};

use log::info;

use crate::capability::CapabilityProfile;

/// Tunables for the adaptive controller.
#[derive(Clone, Copy, Debug)]
pub struct QualityConfig {
    /// Sustained fps below this (for one full window) enters eco mode.
    pub low_water_fps: f32,
    /// Sustained fps at or above this (for one full window) leaves it.
    pub recover_fps: f32,
    /// Sampling window length.
    pub window: Duration,
    /// Pixel ratio used in eco mode; never below 1.0.
    pub floor_ratio: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            low_water_fps: 45.0,
            recover_fps: 54.0,
            window: Duration::from_secs(1),
            floor_ratio: 1.0,
        }
    }
}

/// A host-imposed quality override, authoritative over eco heuristics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityPreset {
    /// Render at the capability ceiling.
    Full,
    /// Render at the floor ratio regardless of measured fps.
    Reduced,
}

/// A state change decided at a window boundary, for the Director to
/// apply to the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityChange {
    pub eco: bool,
    pub pixel_ratio: f32,
}

/// Samples achieved frame rate and owns the pixel-ratio decision.
pub struct QualityController {
    config: QualityConfig,
    ceiling: f32,
    pixel_ratio: f32,
    restore_ratio: f32,
    eco: bool,
    preset: Option<QualityPreset>,
    eco_opt_out: bool,
    window_start: Option<Instant>,
    frames: u32,
}

impl QualityController {
    pub fn new(config: QualityConfig, profile: &CapabilityProfile) -> Self {
        let ceiling = profile.pixel_ratio_ceiling.max(1.0);
        Self {
            config,
            ceiling,
            pixel_ratio: ceiling,
            restore_ratio: ceiling,
            eco: false,
            preset: None,
            eco_opt_out: false,
            window_start: None,
            frames: 0,
        }
    }

    /// Current render pixel ratio; the Director applies this to the
    /// surface configuration.
    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    pub fn eco(&self) -> bool {
        self.eco
    }

    /// Record one admitted frame. Returns a state change at most once per
    /// sampling window.
    pub fn frame(&mut self, now: Instant, profile: &CapabilityProfile) -> Option<QualityChange> {
        let start = match self.window_start {
            None => {
                self.window_start = Some(now);
                self.frames = 0;
                return None;
            }
            Some(start) => start,
        };

        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.config.window {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32().max(1e-3);
        self.window_start = Some(now);
        self.frames = 0;
        self.evaluate(fps, profile)
    }

    fn evaluate(&mut self, fps: f32, profile: &CapabilityProfile) -> Option<QualityChange> {
        if self.preset.is_some() {
            return None;
        }

        if !self.eco
            && fps < self.config.low_water_fps
            && profile.is_constrained()
            && !self.eco_opt_out
            && self.pixel_ratio > self.floor()
        {
            self.restore_ratio = self.pixel_ratio;
            self.pixel_ratio = self.floor();
            self.eco = true;
            info!("[quality] eco on ({fps:.0} fps), pixel ratio {}", self.pixel_ratio);
            return Some(self.change());
        }

        if self.eco && fps >= self.config.recover_fps {
            self.pixel_ratio = self.restore_ratio;
            self.eco = false;
            info!("[quality] eco off ({fps:.0} fps), pixel ratio {}", self.pixel_ratio);
            return Some(self.change());
        }

        None
    }

    /// Apply or clear a host preset. Presets win over eco heuristics and
    /// reset the rolling sample.
    pub fn set_preset(&mut self, preset: Option<QualityPreset>) -> QualityChange {
        self.preset = preset;
        self.eco = false;
        self.pixel_ratio = match preset {
            Some(QualityPreset::Full) | None => self.ceiling,
            Some(QualityPreset::Reduced) => self.floor(),
        };
        self.restore_ratio = self.pixel_ratio;
        self.reset_window();
        self.change()
    }

    /// Let the host veto automatic eco mode entirely.
    pub fn set_eco_opt_out(&mut self, opt_out: bool) -> Option<QualityChange> {
        self.eco_opt_out = opt_out;
        self.reset_window();
        if opt_out && self.eco {
            self.pixel_ratio = self.restore_ratio;
            self.eco = false;
            return Some(self.change());
        }
        None
    }

    /// Forget the current window, e.g. after a suspension — frames
    /// before a pause say nothing about frames after it.
    pub fn reset_window(&mut self) {
        self.window_start = None;
        self.frames = 0;
    }

    fn floor(&self) -> f32 {
        self.config.floor_ratio.max(1.0)
    }

    fn change(&self) -> QualityChange {
        QualityChange {
            eco: self.eco,
            pixel_ratio: self.pixel_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn constrained_profile() -> CapabilityProfile {
        CapabilityProfile {
            has_gpu: true,
            coarse_pointer: true,
            reduced_motion: false,
            pixel_ratio_ceiling: 2.0,
            tier: crate::capability::PerformanceTier::Medium,
        }
    }

    fn fast_profile() -> CapabilityProfile {
        CapabilityProfile {
            coarse_pointer: false,
            tier: crate::capability::PerformanceTier::High,
            ..constrained_profile()
        }
    }

    /// Feed `frames` evenly spaced frames spanning `span` and collect any
    /// state changes.
    fn run_window(
        controller: &mut QualityController,
        profile: &CapabilityProfile,
        start: Instant,
        frames: u32,
        span: Duration,
    ) -> Vec<QualityChange> {
        let mut changes = Vec::new();
        for i in 0..=frames {
            let t = start + span.mul_f64(i as f64 / frames as f64);
            if let Some(change) = controller.frame(t, profile) {
                changes.push(change);
            }
        }
        changes
    }

    #[test]
    fn eco_flips_once_per_direction_with_hysteresis() {
        let profile = constrained_profile();
        let mut controller = QualityController::new(QualityConfig::default(), &profile);
        let t0 = Instant::now();

        // ~30 fps for two seconds: exactly one flip into eco.
        let changes = run_window(&mut controller, &profile, t0, 60, Duration::from_secs(2));
        assert_eq!(changes.len(), 1);
        assert!(changes[0].eco);
        assert_eq!(changes[0].pixel_ratio, 1.0);
        assert!(controller.eco());

        // ~60 fps for two seconds: exactly one flip back, ratio restored.
        let t1 = t0 + Duration::from_secs(2);
        let changes = run_window(&mut controller, &profile, t1, 120, Duration::from_secs(2));
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].eco);
        assert_eq!(changes[0].pixel_ratio, 2.0);
        assert!(!controller.eco());
    }

    #[test]
    fn noisy_samples_cannot_flip_mid_window() {
        let profile = constrained_profile();
        let mut controller = QualityController::new(QualityConfig::default(), &profile);
        let t0 = Instant::now();

        // Irregular frame spacing inside a single window: no decision yet.
        let mut changes = 0;
        for ms in [1u64, 3, 40, 42, 90, 300, 700, 950] {
            if controller
                .frame(t0 + Duration::from_millis(ms), &profile)
                .is_some()
            {
                changes += 1;
            }
        }
        assert_eq!(changes, 0, "decisions only happen at window boundaries");
    }

    #[test]
    fn unconstrained_devices_never_enter_eco() {
        let profile = fast_profile();
        let mut controller = QualityController::new(QualityConfig::default(), &profile);
        let t0 = Instant::now();
        let changes = run_window(&mut controller, &profile, t0, 30, Duration::from_secs(2));
        assert!(changes.is_empty());
        assert!(!controller.eco());
    }

    #[test]
    fn manual_preset_beats_the_heuristic() {
        let profile = constrained_profile();
        let mut controller = QualityController::new(QualityConfig::default(), &profile);

        let change = controller.set_preset(Some(QualityPreset::Reduced));
        assert_eq!(change.pixel_ratio, 1.0);

        // Even a starved frame rate cannot touch state while a preset holds.
        let t0 = Instant::now();
        let changes = run_window(&mut controller, &profile, t0, 30, Duration::from_secs(3));
        assert!(changes.is_empty());

        let restored = controller.set_preset(None);
        assert_eq!(restored.pixel_ratio, 2.0);
    }

    #[test]
    fn eco_opt_out_restores_and_blocks() {
        let profile = constrained_profile();
        let mut controller = QualityController::new(QualityConfig::default(), &profile);
        let t0 = Instant::now();
        run_window(&mut controller, &profile, t0, 60, Duration::from_secs(2));
        assert!(controller.eco());

        let change = controller.set_eco_opt_out(true).expect("leaves eco");
        assert!(!change.eco);
        assert_eq!(change.pixel_ratio, 2.0);

        // With the opt-out in place, low fps no longer bites.
        let t1 = t0 + Duration::from_secs(10);
        let changes = run_window(&mut controller, &profile, t1, 60, Duration::from_secs(2));
        assert!(changes.is_empty());
    }

    #[test]
    fn pixel_ratio_never_drops_below_one() {
        let profile = CapabilityProfile {
            pixel_ratio_ceiling: 1.0,
            ..constrained_profile()
        };
        let config = QualityConfig {
            floor_ratio: 0.25, // hostile configuration
            ..Default::default()
        };
        let mut controller = QualityController::new(config, &profile);
        let t0 = Instant::now();
        // Already at the floor: no flip, and the ratio holds at 1.0.
        let changes = run_window(&mut controller, &profile, t0, 30, Duration::from_secs(2));
        assert!(changes.is_empty());
        assert_eq!(controller.pixel_ratio(), 1.0);
    }
}
