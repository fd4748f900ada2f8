//! The contract every chapter implements, and its lifecycle enforcement.
//!
//! A chapter is one self-contained animated visual. The Director drives
//! it through a fixed lifecycle:
//!
//! ```text
//! Uninitialized --init--> Initialized --(resize | update)*--> Initialized
//!                                     --dispose--> Disposed (terminal)
//! ```
//!
//! [`MountedChapter`] wraps a boxed chapter together with the [`Stage`]
//! and [`Camera`] it owns and enforces the transitions: any lifecycle
//! call on a disposed chapter panics, because a teardown bug that keeps
//! feeding a dead chapter should fail loudly in tests rather than corrupt
//! freed state. Disposal itself is idempotent and safe on a chapter that
//! never initialized.
//!
//! Chapters are instantiated through a [`ChapterRegistry`] — independent
//! implementations behind one narrow trait, selected by id, instead of an
//! inheritance hierarchy.

use crate::camera::Camera;
use crate::context::RuntimeContext;
use crate::dispose::Disposer;
use crate::renderer::RenderFrame;
use crate::stage::Stage;

/// One self-contained animated visual.
///
/// Implementations own no GPU handles directly: they build CPU-side
/// resources into the [`Stage`] and the renderer uploads them lazily.
/// That keeps every lifecycle method headless-testable.
pub trait Chapter {
    /// Stable identifier, used by the registry and logs.
    fn id(&self) -> &str;

    /// Called exactly once, before any other lifecycle call.
    fn init(&mut self, stage: &mut Stage, camera: &mut Camera, ctx: &RuntimeContext);

    /// Called after `init` on mount (twice, see the Director) and on
    /// every viewport change. Must tolerate repeated calls and degenerate
    /// aspect ratios.
    fn resize(&mut self, stage: &mut Stage, camera: &mut Camera, ctx: &RuntimeContext);

    /// Called every admitted frame.
    fn update(&mut self, stage: &mut Stage, camera: &mut Camera, ctx: &RuntimeContext);

    /// Optional multi-pass rendering. Return `true` to take over the
    /// frame; the default `false` lets the Director clear and draw the
    /// stage against the camera.
    fn render(
        &mut self,
        stage: &mut Stage,
        camera: &Camera,
        ctx: &RuntimeContext,
        frame: &mut RenderFrame,
    ) -> bool {
        let _ = (stage, camera, ctx, frame);
        false
    }

    /// Release side state the stage traversal cannot see (running loads,
    /// host handles). Stage resources are released by the Director's
    /// disposer before this hook runs.
    fn dispose(&mut self) {}
}

/// Lifecycle states of a mounted chapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initialized,
    Disposed,
}

/// A chapter bound to the stage and camera it owns, with lifecycle
/// transitions enforced.
pub struct MountedChapter {
    chapter: Box<dyn Chapter>,
    stage: Stage,
    camera: Camera,
    state: Lifecycle,
}

impl MountedChapter {
    pub fn new(chapter: Box<dyn Chapter>) -> Self {
        Self {
            chapter,
            stage: Stage::new(),
            camera: Camera::new(),
            state: Lifecycle::Uninitialized,
        }
    }

    pub fn id(&self) -> &str {
        self.chapter.id()
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut Stage {
        &mut self.stage
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Split borrows for the default render pass, which mutates the
    /// stage (lazy uploads) while reading the camera.
    pub fn stage_and_camera(&mut self) -> (&mut Stage, &Camera) {
        (&mut self.stage, &self.camera)
    }

    pub fn init(&mut self, ctx: &RuntimeContext) {
        match self.state {
            Lifecycle::Uninitialized => {
                self.chapter.init(&mut self.stage, &mut self.camera, ctx);
                self.state = Lifecycle::Initialized;
            }
            Lifecycle::Initialized => {
                panic!("[chapter] init called twice on '{}'", self.chapter.id())
            }
            Lifecycle::Disposed => {
                panic!("[chapter] init after dispose on '{}'", self.chapter.id())
            }
        }
    }

    pub fn resize(&mut self, ctx: &RuntimeContext) {
        match self.state {
            Lifecycle::Initialized => self.chapter.resize(&mut self.stage, &mut self.camera, ctx),
            Lifecycle::Uninitialized => {
                panic!("[chapter] resize before init on '{}'", self.chapter.id())
            }
            Lifecycle::Disposed => {
                panic!("[chapter] resize after dispose on '{}'", self.chapter.id())
            }
        }
    }

    pub fn update(&mut self, ctx: &RuntimeContext) {
        match self.state {
            Lifecycle::Initialized => self.chapter.update(&mut self.stage, &mut self.camera, ctx),
            Lifecycle::Uninitialized => {
                panic!("[chapter] update before init on '{}'", self.chapter.id())
            }
            Lifecycle::Disposed => {
                panic!("[chapter] update after dispose on '{}'", self.chapter.id())
            }
        }
    }

    /// Returns `true` if the chapter rendered itself.
    pub fn render(&mut self, ctx: &RuntimeContext, frame: &mut RenderFrame) -> bool {
        match self.state {
            Lifecycle::Initialized => {
                self.chapter
                    .render(&mut self.stage, &self.camera, ctx, frame)
            }
            Lifecycle::Uninitialized => {
                panic!("[chapter] render before init on '{}'", self.chapter.id())
            }
            Lifecycle::Disposed => {
                panic!("[chapter] render after dispose on '{}'", self.chapter.id())
            }
        }
    }

    /// Release the chapter's resources and mark it terminal.
    ///
    /// Idempotent: a second call is a no-op. Disposing a chapter that
    /// never initialized releases nothing and is fine.
    pub fn dispose(&mut self, disposer: &mut Disposer) {
        if self.state == Lifecycle::Disposed {
            return;
        }
        disposer.dispose_stage(&mut self.stage);
        self.chapter.dispose();
        self.state = Lifecycle::Disposed;
    }
}

type ChapterFactory = Box<dyn Fn() -> Box<dyn Chapter>>;

/// Id-keyed factory table for chapter implementations.
///
/// The host decides *which* chapter mounts (routing is out of scope
/// here); the registry is the seam where that decision turns into an
/// instance.
#[derive(Default)]
pub struct ChapterRegistry {
    entries: Vec<(String, ChapterFactory)>,
}

impl ChapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under an id. Later registrations with the same
    /// id win, which lets hosts override built-ins.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Chapter> + 'static,
    {
        let id = id.into();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.push((id, Box::new(factory)));
    }

    pub fn create(&self, id: &str) -> Option<Box<dyn Chapter>> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == id)
            .map(|(_, factory)| factory())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The id `step` positions after `id` in registration order, wrapping
    /// around. Used by hosts that cycle chapters.
    pub fn neighbor(&self, id: &str, step: isize) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let position = self.entries.iter().position(|(entry, _)| entry == id)? as isize;
        let len = self.entries.len() as isize;
        let target = (position + step).rem_euclid(len) as usize;
        Some(self.entries[target].0.as_str())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every lifecycle call for assertions on ordering.
    pub(crate) struct RecordingChapter {
        id: String,
        pub(crate) log: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingChapter {
        pub(crate) fn new(id: &str, log: Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                id: id.to_string(),
                log,
            }
        }

        fn record(&self, event: &str) {
            self.log.borrow_mut().push(format!("{}:{}", self.id, event));
        }
    }

    impl Chapter for RecordingChapter {
        fn id(&self) -> &str {
            &self.id
        }

        fn init(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {
            self.record("init");
        }

        fn resize(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {
            self.record("resize");
        }

        fn update(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {
            self.record("update");
        }

        fn dispose(&mut self) {
            self.record("dispose");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingChapter;
    use super::*;
    use crate::capability::CapabilityProfile;
    use crate::context::{AudioBands, Viewport};
    use glam::{Vec2, Vec3};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ctx(profile: &CapabilityProfile) -> RuntimeContext<'_> {
        RuntimeContext {
            dt: 1.0 / 60.0,
            time: 0.0,
            viewport: Viewport::new(800.0, 600.0, 1.0),
            pointer: Vec2::ZERO,
            pointer_velocity: Vec2::ZERO,
            press: 0.0,
            tap: 0.0,
            gyro: Vec3::ZERO,
            gyro_active: false,
            audio: AudioBands::silence(),
            capabilities: profile,
        }
    }

    fn mounted(log: &Rc<RefCell<Vec<String>>>) -> MountedChapter {
        MountedChapter::new(Box::new(RecordingChapter::new("probe", Rc::clone(log))))
    }

    #[test]
    fn normal_lifecycle_flows_in_order() {
        let profile = CapabilityProfile::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chapter = mounted(&log);

        chapter.init(&ctx(&profile));
        chapter.resize(&ctx(&profile));
        chapter.update(&ctx(&profile));
        chapter.dispose(&mut Disposer::new());

        assert_eq!(
            *log.borrow(),
            vec![
                "probe:init",
                "probe:resize",
                "probe:update",
                "probe:dispose"
            ]
        );
        assert_eq!(chapter.state(), Lifecycle::Disposed);
    }

    #[test]
    fn dispose_is_idempotent_and_safe_without_init() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chapter = mounted(&log);
        let mut disposer = Disposer::new();

        chapter.dispose(&mut disposer);
        chapter.dispose(&mut disposer);

        // The chapter hook ran once; nothing was double-released.
        assert_eq!(*log.borrow(), vec!["probe:dispose"]);
        assert_eq!(disposer.released_count(), 0);
    }

    #[test]
    #[should_panic(expected = "update after dispose")]
    fn update_after_dispose_panics() {
        let profile = CapabilityProfile::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chapter = mounted(&log);
        chapter.init(&ctx(&profile));
        chapter.dispose(&mut Disposer::new());
        chapter.update(&ctx(&profile));
    }

    #[test]
    #[should_panic(expected = "resize after dispose")]
    fn resize_after_dispose_panics() {
        let profile = CapabilityProfile::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chapter = mounted(&log);
        chapter.init(&ctx(&profile));
        chapter.dispose(&mut Disposer::new());
        chapter.resize(&ctx(&profile));
    }

    #[test]
    #[should_panic(expected = "update before init")]
    fn update_before_init_panics() {
        let profile = CapabilityProfile::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut chapter = mounted(&log);
        chapter.update(&ctx(&profile));
    }

    #[test]
    fn registry_creates_by_id_and_cycles() {
        let mut registry = ChapterRegistry::new();
        for id in ["drift", "plasma", "showroom"] {
            let id_owned = id.to_string();
            registry.register(id, move || {
                Box::new(RecordingChapter::new(
                    &id_owned,
                    Rc::new(RefCell::new(Vec::new())),
                ))
            });
        }

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.create("plasma").unwrap().id(), "plasma");
        assert!(registry.create("missing").is_none());

        assert_eq!(registry.neighbor("drift", 1), Some("plasma"));
        assert_eq!(registry.neighbor("drift", -1), Some("showroom"));
        assert_eq!(registry.neighbor("showroom", 1), Some("drift"));
    }
}
