//! Headless tour of the runtime core: no window, no GPU.
//!
//! Mounts a chapter, runs a few frames, suspends and resumes, swaps
//! chapters, and tears down — printing what the Director does at each
//! step. Useful as a smoke test on machines without a display.

use std::time::{Duration, Instant};

use diorama::{
    Camera, CapabilityProfile, Chapter, Director, DirectorConfig, FrameOutcome, RuntimeContext,
    Stage,
};

struct Narrator {
    name: &'static str,
    frames: u32,
}

impl Chapter for Narrator {
    fn id(&self) -> &str {
        self.name
    }

    fn init(&mut self, _stage: &mut Stage, _camera: &mut Camera, _ctx: &RuntimeContext) {
        println!("[{}] init", self.name);
    }

    fn resize(&mut self, _stage: &mut Stage, _camera: &mut Camera, ctx: &RuntimeContext) {
        println!(
            "[{}] resize to {}x{}",
            self.name, ctx.viewport.width, ctx.viewport.height
        );
    }

    fn update(&mut self, _stage: &mut Stage, _camera: &mut Camera, ctx: &RuntimeContext) {
        self.frames += 1;
        if self.frames <= 3 {
            println!(
                "[{}] update #{} dt={:.4} time={:.4} pointer=({:.2}, {:.2})",
                self.name, self.frames, ctx.dt, ctx.time, ctx.pointer.x, ctx.pointer.y
            );
        }
    }

    fn dispose(&mut self) {
        println!("[{}] dispose after {} frames", self.name, self.frames);
    }
}

fn main() {
    let profile = CapabilityProfile::default();
    let mut director = Director::new(profile, DirectorConfig::default(), 1280.0, 720.0);

    director.mount(Box::new(Narrator {
        name: "alpha",
        frames: 0,
    }));

    let t0 = Instant::now();
    director.pointer_moved(960.0, 200.0);
    for i in 0..5u64 {
        director.tick(t0 + Duration::from_millis(16 * i));
        director.end_frame();
    }

    println!("-- hiding the window for a minute --");
    director.set_hidden(true);
    assert_eq!(
        director.tick(t0 + Duration::from_secs(60)),
        FrameOutcome::Suspended
    );
    director.set_hidden(false);
    director.tick(t0 + Duration::from_secs(61));
    director.end_frame();
    println!("time after resume: {:.3}s (the pause was not integrated)", director.time());

    println!("-- swapping chapters --");
    director.mount(Box::new(Narrator {
        name: "beta",
        frames: 0,
    }));
    for i in 0..3u64 {
        director.tick(t0 + Duration::from_secs(62) + Duration::from_millis(16 * i));
        director.end_frame();
    }

    println!("-- tearing down --");
    director.teardown();
    assert_eq!(director.tick(t0 + Duration::from_secs(63)), FrameOutcome::Suspended);
    println!("done");
}
