//! The Director: frame admission, context assembly, and chapter driving.
//!
//! The Director owns everything that outlives a single chapter — the
//! frozen capability profile, the clock, the input rig, the adaptive
//! quality controller, and the disposer — and runs the mount point's
//! state machine: `Idle → Active → Suspended → Active → … → Torn down`.
//!
//! It is deliberately headless: the windowed shell in [`run`](crate::run)
//! feeds it events and instants, and everything here (mount ordering,
//! suspension, tap decay, teardown) is exercised by plain unit tests with
//! no GPU in sight.
//!
//! Per admitted frame the pipeline is strictly sequential: step the clock
//! → sample sensor sources → damp inputs → build one [`RuntimeContext`]
//! → chapter `update` → record the frame for quality sampling. Rendering
//! happens after `tick` in the same host callback; there is no
//! preemption and no second chapter in flight.

use std::time::Instant;

use log::{debug, info};

use crate::capability::CapabilityProfile;
use crate::chapter::{Chapter, MountedChapter};
use crate::context::{RuntimeContext, Viewport, sanitize};
use crate::dispose::Disposer;
use crate::inputs::{AudioSource, GyroSource, InputRig};
use crate::quality::{QualityConfig, QualityController, QualityPreset};
use crate::renderer::RenderFrame;

/// Explicit Director tunables.
///
/// Threaded through construction instead of living in module-level
/// mutable state, so two mounts on one page cannot fight over globals.
#[derive(Clone, Debug)]
pub struct DirectorConfig {
    /// Ceiling on per-frame delta time, in seconds. Keeps a resumed or
    /// stalled loop from integrating one giant step.
    pub dt_clamp: f32,
    /// Damping rate for pointer and press smoothing.
    pub damping_lambda: f32,
    /// Minimum visible fraction of the mount below which the loop
    /// suspends.
    pub visibility_threshold: f32,
    pub quality: QualityConfig,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            dt_clamp: 0.05,
            damping_lambda: 8.0,
            visibility_threshold: 0.01,
            quality: QualityConfig::default(),
        }
    }
}

/// What `tick` did with the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was admitted and the chapter updated; render next.
    Updated,
    /// The loop is suspended (hidden, offscreen, halted, or empty).
    Suspended,
}

fn build_context<'a>(
    profile: &'a CapabilityProfile,
    rig: &InputRig,
    viewport: Viewport,
    dt: f32,
    time: f32,
) -> RuntimeContext<'a> {
    RuntimeContext {
        dt,
        time,
        viewport,
        pointer: rig.pointer(),
        pointer_velocity: rig.pointer_velocity(),
        press: rig.press(),
        tap: rig.tap(),
        gyro: rig.gyro(),
        gyro_active: rig.gyro_active(),
        audio: rig.audio(),
        capabilities: profile,
    }
}

/// Drives one mounted chapter through the cooperative frame loop.
pub struct Director {
    profile: CapabilityProfile,
    config: DirectorConfig,
    viewport: Viewport,
    rig: InputRig,
    quality: QualityController,
    disposer: Disposer,
    mounted: Option<MountedChapter>,
    audio_source: Option<Box<dyn AudioSource>>,
    gyro_source: Option<Box<dyn GyroSource>>,
    last_instant: Option<Instant>,
    time: f32,
    last_dt: f32,
    hidden: bool,
    visible_fraction: f32,
    static_frame_rendered: bool,
    torn_down: bool,
}

impl Director {
    pub fn new(profile: CapabilityProfile, config: DirectorConfig, width: f32, height: f32) -> Self {
        let quality = QualityController::new(config.quality, &profile);
        let viewport = Viewport::new(width, height, quality.pixel_ratio());
        Self {
            rig: InputRig::new(config.damping_lambda),
            profile,
            config,
            viewport,
            quality,
            disposer: Disposer::new(),
            mounted: None,
            audio_source: None,
            gyro_source: None,
            last_instant: None,
            time: 0.0,
            last_dt: 0.0,
            hidden: false,
            visible_fraction: 1.0,
            static_frame_rendered: false,
            torn_down: false,
        }
    }

    pub fn profile(&self) -> &CapabilityProfile {
        &self.profile
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Accumulated animation time, in seconds.
    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn mounted(&self) -> Option<&MountedChapter> {
        self.mounted.as_ref()
    }

    pub fn mounted_mut(&mut self) -> Option<&mut MountedChapter> {
        self.mounted.as_mut()
    }

    pub fn mounted_id(&self) -> Option<&str> {
        self.mounted.as_ref().map(|m| m.id())
    }

    /// Attach an audio envelope provider.
    pub fn set_audio_source(&mut self, source: Box<dyn AudioSource>) {
        self.audio_source = Some(source);
    }

    /// Attach a device-orientation provider.
    pub fn set_gyro_source(&mut self, source: Box<dyn GyroSource>) {
        self.gyro_source = Some(source);
    }

    /// Mount a chapter, disposing the previous one first.
    ///
    /// Protocol: dispose old → construct → `init` → `resize` twice (the
    /// second call corrects layout-dependent metrics that only settle
    /// after the first pass touches the host) → loop.
    pub fn mount(&mut self, chapter: Box<dyn Chapter>) {
        if self.torn_down {
            panic!("[director] mount after teardown");
        }
        if let Some(mut previous) = self.mounted.take() {
            previous.dispose(&mut self.disposer);
            info!("[director] disposed chapter '{}'", previous.id());
        }

        let mut mounted = MountedChapter::new(chapter);
        info!("[director] mounting chapter '{}'", mounted.id());
        {
            let ctx = build_context(&self.profile, &self.rig, self.viewport, 0.0, self.time);
            mounted.init(&ctx);
            mounted.resize(&ctx);
            mounted.resize(&ctx);
        }
        self.mounted = Some(mounted);
        self.last_instant = None;
        self.static_frame_rendered = false;
        self.quality.reset_window();
    }

    /// Viewport change from the host. Non-finite dimensions are a
    /// contract violation, not something to paper over.
    pub fn resize(&mut self, width: f32, height: f32) {
        if !(width.is_finite() && height.is_finite()) {
            panic!("[director] resize with non-finite dimensions ({width}, {height})");
        }
        self.viewport = Viewport::new(width, height, self.quality.pixel_ratio());
        let ctx = build_context(&self.profile, &self.rig, self.viewport, 0.0, self.time);
        if let Some(mounted) = self.mounted.as_mut() {
            mounted.resize(&ctx);
        }
    }

    /// Page/tab visibility: `hidden == true` suspends the loop.
    pub fn set_hidden(&mut self, hidden: bool) {
        if self.hidden != hidden {
            debug!("[director] visibility: hidden={hidden}");
            self.hidden = hidden;
            self.on_suspension_change();
        }
    }

    /// Intersection gating: how much of the mount is on screen.
    pub fn set_visible_fraction(&mut self, fraction: f32) {
        let fraction = sanitize(fraction, 1.0).clamp(0.0, 1.0);
        let was = self.offscreen();
        self.visible_fraction = fraction;
        if was != self.offscreen() {
            self.on_suspension_change();
        }
    }

    fn offscreen(&self) -> bool {
        self.visible_fraction < self.config.visibility_threshold
    }

    fn on_suspension_change(&mut self) {
        // Whatever direction the change went, the clock baseline is stale:
        // the next admitted dt starts from zero, not from the gap.
        self.last_instant = None;
        self.quality.reset_window();
    }

    pub fn is_suspended(&self) -> bool {
        self.torn_down
            || self.mounted.is_none()
            || self.hidden
            || self.offscreen()
            || (self.profile.reduced_motion && self.static_frame_rendered)
    }

    /// Admit and run one frame of the cooperative loop.
    pub fn tick(&mut self, now: Instant) -> FrameOutcome {
        if self.is_suspended() {
            self.last_instant = None;
            return FrameOutcome::Suspended;
        }

        // Reduced motion renders exactly one static frame and halts.
        if self.profile.reduced_motion {
            self.static_frame_rendered = true;
            self.last_dt = 0.0;
            let ctx = build_context(&self.profile, &self.rig, self.viewport, 0.0, self.time);
            ctx.assert_invariants();
            if let Some(mounted) = self.mounted.as_mut() {
                mounted.update(&ctx);
            }
            return FrameOutcome::Updated;
        }

        let dt = match self.last_instant {
            None => 0.0,
            Some(previous) => now
                .saturating_duration_since(previous)
                .as_secs_f32()
                .min(self.config.dt_clamp),
        };
        self.last_instant = Some(now);
        self.time += dt;
        self.last_dt = dt;

        if let Some(source) = self.gyro_source.as_mut() {
            let sample = source.sample();
            self.rig.set_gyro(sample);
        }
        if let Some(source) = self.audio_source.as_mut() {
            let bands = source.sample();
            self.rig.set_audio(bands);
        }
        self.rig.step(dt);

        let ctx = build_context(&self.profile, &self.rig, self.viewport, dt, self.time);
        ctx.assert_invariants();
        if let Some(mounted) = self.mounted.as_mut() {
            mounted.update(&ctx);
        }

        if let Some(change) = self.quality.frame(now, &self.profile) {
            self.viewport.pixel_ratio = change.pixel_ratio;
        }

        FrameOutcome::Updated
    }

    /// Give the mounted chapter its custom-render opportunity.
    ///
    /// Returns `true` if the chapter rendered itself; otherwise the host
    /// performs the default clear-and-draw pass.
    pub fn render_chapter(&mut self, frame: &mut RenderFrame) -> bool {
        let ctx = build_context(
            &self.profile,
            &self.rig,
            self.viewport,
            self.last_dt,
            self.time,
        );
        match self.mounted.as_mut() {
            Some(mounted) => mounted.render(&ctx, frame),
            None => false,
        }
    }

    /// Close out the frame: the tap pulse dies here, so any chapter that
    /// saw it this frame will not see it again.
    pub fn end_frame(&mut self) {
        self.rig.decay_tap();
    }

    /// Pointer moved, in window coordinates.
    pub fn pointer_moved(&mut self, x: f32, y: f32) {
        if self.torn_down {
            return;
        }
        self.rig.pointer_moved(x, y, &self.viewport);
    }

    pub fn pointer_pressed(&mut self) {
        if self.torn_down {
            return;
        }
        self.rig.pointer_pressed();
    }

    pub fn pointer_released(&mut self) {
        if self.torn_down {
            return;
        }
        self.rig.pointer_released();
    }

    /// Host-authoritative quality preset (see [`QualityController`]).
    pub fn set_quality_preset(&mut self, preset: Option<QualityPreset>) {
        let change = self.quality.set_preset(preset);
        self.viewport.pixel_ratio = change.pixel_ratio;
    }

    /// Host veto on automatic eco mode.
    pub fn set_eco_opt_out(&mut self, opt_out: bool) {
        if let Some(change) = self.quality.set_eco_opt_out(opt_out) {
            self.viewport.pixel_ratio = change.pixel_ratio;
        }
    }

    pub fn eco(&self) -> bool {
        self.quality.eco()
    }

    /// Tear down the mount: detach input handling, then dispose the
    /// chapter. Detach comes first so no event can reach a chapter that
    /// is mid-teardown. Terminal and idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.audio_source = None;
        self.gyro_source = None;
        if let Some(mut mounted) = self.mounted.take() {
            mounted.dispose(&mut self.disposer);
            info!("[director] torn down; disposed chapter '{}'", mounted.id());
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::testing::RecordingChapter;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    /// Captures the context values each update saw.
    struct SnapshotChapter {
        snaps: Rc<RefCell<Vec<(f32, f32, f32)>>>, // (dt, time, tap)
    }

    impl Chapter for SnapshotChapter {
        fn id(&self) -> &str {
            "snapshot"
        }

        fn init(
            &mut self,
            _stage: &mut crate::stage::Stage,
            _camera: &mut crate::camera::Camera,
            _ctx: &RuntimeContext,
        ) {
        }

        fn resize(
            &mut self,
            _stage: &mut crate::stage::Stage,
            _camera: &mut crate::camera::Camera,
            _ctx: &RuntimeContext,
        ) {
        }

        fn update(
            &mut self,
            _stage: &mut crate::stage::Stage,
            _camera: &mut crate::camera::Camera,
            ctx: &RuntimeContext,
        ) {
            self.snaps.borrow_mut().push((ctx.dt, ctx.time, ctx.tap));
        }
    }

    fn director(profile: CapabilityProfile) -> Director {
        Director::new(profile, DirectorConfig::default(), 800.0, 600.0)
    }

    fn recording_director() -> (Director, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut d = director(CapabilityProfile::default());
        d.mount(Box::new(RecordingChapter::new("a", Rc::clone(&log))));
        (d, log)
    }

    fn snapshot_director(profile: CapabilityProfile) -> (Director, Rc<RefCell<Vec<(f32, f32, f32)>>>) {
        let snaps = Rc::new(RefCell::new(Vec::new()));
        let mut d = director(profile);
        d.mount(Box::new(SnapshotChapter {
            snaps: Rc::clone(&snaps),
        }));
        (d, snaps)
    }

    #[test]
    fn mount_runs_init_then_two_resizes_before_update() {
        let (mut d, log) = recording_director();
        let t0 = Instant::now();
        d.tick(t0);
        assert_eq!(
            *log.borrow(),
            vec!["a:init", "a:resize", "a:resize", "a:update"]
        );
    }

    #[test]
    fn swap_disposes_old_before_new_sees_anything() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut d = director(CapabilityProfile::default());
        d.mount(Box::new(RecordingChapter::new("a", Rc::clone(&log))));
        d.tick(Instant::now());
        d.mount(Box::new(RecordingChapter::new("b", Rc::clone(&log))));

        let entries = log.borrow();
        let a_dispose = entries.iter().position(|e| e == "a:dispose").unwrap();
        let b_first = entries.iter().position(|e| e.starts_with("b:")).unwrap();
        assert!(
            a_dispose < b_first,
            "chapter A must fully dispose before B runs: {entries:?}"
        );
        assert_eq!(entries.iter().filter(|e| *e == "a:dispose").count(), 1);
    }

    #[test]
    fn teardown_disposes_once_and_detaches_listeners() {
        let (mut d, log) = recording_director();
        d.tick(Instant::now());
        d.teardown();
        d.teardown(); // idempotent

        assert_eq!(log.borrow().iter().filter(|e| *e == "a:dispose").count(), 1);

        // Events after teardown must be inert.
        let before = log.borrow().len();
        d.pointer_moved(100.0, 100.0);
        d.pointer_pressed();
        d.pointer_released();
        assert_eq!(d.tick(Instant::now()), FrameOutcome::Suspended);
        assert_eq!(log.borrow().len(), before);
    }

    #[test]
    #[should_panic(expected = "mount after teardown")]
    fn mount_after_teardown_panics() {
        let (mut d, _log) = recording_director();
        d.teardown();
        d.mount(Box::new(RecordingChapter::new(
            "late",
            Rc::new(RefCell::new(Vec::new())),
        )));
    }

    #[test]
    fn dt_is_clamped_and_time_accumulates() {
        let (mut d, snaps) = snapshot_director(CapabilityProfile::default());
        let t0 = Instant::now();
        d.tick(t0);
        d.tick(t0 + Duration::from_millis(16));
        d.tick(t0 + Duration::from_secs(10)); // a stall, not a pause

        let snaps = snaps.borrow();
        assert_eq!(snaps[0].0, 0.0);
        assert!((snaps[1].0 - 0.016).abs() < 2e-3);
        assert_eq!(snaps[2].0, DirectorConfig::default().dt_clamp);
        assert!(snaps[2].1 < 0.1, "time must not absorb the whole stall");
    }

    #[test]
    fn resume_from_hidden_rebases_the_clock() {
        let (mut d, snaps) = snapshot_director(CapabilityProfile::default());
        let t0 = Instant::now();
        d.tick(t0);
        d.tick(t0 + Duration::from_millis(16));

        d.set_hidden(true);
        assert_eq!(d.tick(t0 + Duration::from_secs(60)), FrameOutcome::Suspended);
        d.set_hidden(false);
        assert_eq!(d.tick(t0 + Duration::from_secs(61)), FrameOutcome::Updated);

        let snaps = snaps.borrow();
        let resumed = snaps.last().unwrap();
        // First post-resume dt is rebased, not the 60 s gap — and under
        // the clamp in any case.
        assert_eq!(resumed.0, 0.0);
    }

    #[test]
    fn offscreen_fraction_gates_the_loop() {
        let (mut d, snaps) = snapshot_director(CapabilityProfile::default());
        let t0 = Instant::now();
        d.tick(t0);

        d.set_visible_fraction(0.0);
        assert_eq!(
            d.tick(t0 + Duration::from_millis(16)),
            FrameOutcome::Suspended
        );
        d.set_visible_fraction(0.5);
        assert_eq!(
            d.tick(t0 + Duration::from_millis(32)),
            FrameOutcome::Updated
        );
        assert_eq!(snaps.borrow().len(), 2);
    }

    #[test]
    fn tap_pulse_lasts_exactly_one_frame() {
        let (mut d, snaps) = snapshot_director(CapabilityProfile::default());
        let t0 = Instant::now();
        d.tick(t0);
        d.end_frame();

        d.pointer_pressed();
        d.pointer_released();
        d.tick(t0 + Duration::from_millis(16));
        d.end_frame();
        d.tick(t0 + Duration::from_millis(32));
        d.end_frame();

        let snaps = snaps.borrow();
        assert_eq!(snaps[1].2, 1.0, "tap visible in the frame it landed");
        assert_eq!(snaps[2].2, 0.0, "and gone the very next frame");
    }

    #[test]
    fn reduced_motion_renders_exactly_one_frame() {
        let profile = CapabilityProfile {
            reduced_motion: true,
            ..CapabilityProfile::default()
        };
        let (mut d, snaps) = snapshot_director(profile);
        let t0 = Instant::now();

        assert_eq!(d.tick(t0), FrameOutcome::Updated);
        assert_eq!(d.tick(t0 + Duration::from_millis(16)), FrameOutcome::Suspended);
        assert_eq!(d.tick(t0 + Duration::from_secs(5)), FrameOutcome::Suspended);

        let snaps = snaps.borrow();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].1, 0.0, "time never advances");
    }

    #[test]
    fn full_mount_swap_teardown_scenario() {
        let profile = CapabilityProfile {
            has_gpu: true,
            tier: crate::capability::PerformanceTier::High,
            ..CapabilityProfile::default()
        };
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut d = director(profile);

        // Mount A: init, then two resizes, before the first update.
        d.mount(Box::new(RecordingChapter::new("a", Rc::clone(&log))));
        let t0 = Instant::now();
        d.tick(t0);
        d.end_frame();
        assert_eq!(
            *log.borrow(),
            vec!["a:init", "a:resize", "a:resize", "a:update"]
        );

        // Swap to B mid-loop: exactly one dispose of A, strictly before
        // any lifecycle call on B.
        d.mount(Box::new(RecordingChapter::new("b", Rc::clone(&log))));
        d.tick(t0 + Duration::from_millis(16));
        d.end_frame();
        {
            let entries = log.borrow();
            assert_eq!(entries.iter().filter(|e| *e == "a:dispose").count(), 1);
            let a_dispose = entries.iter().position(|e| e == "a:dispose").unwrap();
            let b_first = entries.iter().position(|e| e.starts_with("b:")).unwrap();
            assert!(a_dispose < b_first);
        }

        // Destroy the mount: one dispose of B, then total silence.
        d.teardown();
        let settled = log.borrow().clone();
        assert_eq!(settled.iter().filter(|e| *e == "b:dispose").count(), 1);

        d.pointer_moved(10.0, 10.0);
        d.pointer_pressed();
        d.tick(t0 + Duration::from_millis(32));
        d.end_frame();
        assert_eq!(*log.borrow(), settled, "no listener reaches a dead mount");
    }

    #[test]
    fn quality_changes_land_in_the_viewport() {
        let profile = CapabilityProfile {
            has_gpu: true,
            coarse_pointer: true,
            reduced_motion: false,
            pixel_ratio_ceiling: 2.0,
            tier: crate::capability::PerformanceTier::Medium,
        };
        let mut d = Director::new(profile, DirectorConfig::default(), 800.0, 600.0);
        let snaps = Rc::new(RefCell::new(Vec::new()));
        d.mount(Box::new(SnapshotChapter {
            snaps: Rc::clone(&snaps),
        }));
        assert_eq!(d.viewport().pixel_ratio, 2.0);

        // ~25 fps for over a second of frames.
        let t0 = Instant::now();
        for i in 0..40 {
            d.tick(t0 + Duration::from_millis(40 * i));
            d.end_frame();
        }
        assert_eq!(d.viewport().pixel_ratio, 1.0);
        assert!(d.eco());

        // A manual preset overrides and restores immediately.
        d.set_quality_preset(Some(QualityPreset::Full));
        assert_eq!(d.viewport().pixel_ratio, 2.0);
        assert!(!d.eco());
    }
}
