mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{Harness, SlowWindow, WAIT, is_uniform, wait_until};
use dpi::PhysicalSize;
use dual_gl_engine::{
    AssetSpec, DecodedImage, EngineConfig, Fault, GpuObjectKind, ResourceError, ResourceId, Rgba,
    SceneState, ShaderStage, SoftwareWindow, StaticAssets, SurfaceEvent, WorkerKind, WorkerState,
};

fn config() -> EngineConfig {
    EngineConfig {
        offscreen_size: PhysicalSize::new(32, 24),
        ..EngineConfig::default()
    }
}

#[test]
fn blue_scene_is_published_exactly_once() {
    let mut harness = Harness::new(config());
    harness.start().unwrap();

    assert!(wait_until(WAIT, || {
        let status = harness.engine.status();
        status.surface.map(|s| s.state) == Some(WorkerState::Ready)
            && status.capture.map(|s| s.state) == Some(WorkerState::Ready)
    }));
    assert_eq!(harness.sink.count(), 0);

    harness
        .engine
        .update_scene(SceneState::default().with_clear_color(Rgba::BLUE));
    harness.engine.request_render();

    let frame = harness.sink.wait_for(1).expect("capture frame");
    assert_eq!(frame.size(), PhysicalSize::new(32, 24));
    assert!(is_uniform(&frame, [0, 0, 255, 255]));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.sink.count(), 1);

    harness.shutdown();
    assert_eq!(harness.sink.clears(), 1);
}

#[test]
fn surface_presents_on_start_and_on_content_change() {
    let mut harness = Harness::new(config());
    harness.start().unwrap();
    assert!(wait_until(WAIT, || harness.window.presented_frames() == 1));

    harness
        .engine
        .update_scene(SceneState::default().with_clear_color(Rgba::RED));
    harness.engine.on_surface_event(SurfaceEvent::ContentChanged);
    assert!(wait_until(WAIT, || harness.window.presented_frames() == 2));
    let shown = harness.window.last_presented().unwrap();
    assert_eq!(shown.size(), PhysicalSize::new(16, 12));
    assert!(is_uniform(&shown, [255, 0, 0, 255]));
    harness.shutdown();
}

#[test]
fn host_resize_recreates_the_window_target() {
    let mut harness = Harness::new(config());
    harness.start().unwrap();
    assert!(wait_until(WAIT, || harness.window.presented_frames() == 1));

    harness.window.set_size(PhysicalSize::new(20, 10));
    harness
        .engine
        .on_surface_event(SurfaceEvent::Resized(PhysicalSize::new(20, 10)));
    assert!(wait_until(WAIT, || harness.window.presented_frames() == 2));
    assert_eq!(
        harness.window.last_presented().map(|frame| frame.size()),
        Some(PhysicalSize::new(20, 10))
    );
    assert_eq!(harness.backend.stats().window_surfaces_created, 2);
    assert_eq!(harness.window.attached_surfaces(), 1);
    assert_eq!(harness.sink.count(), 0);
    harness.shutdown();
}

#[test]
fn stop_is_idempotent_and_leaves_nothing_behind() {
    let mut harness = Harness::new(config());
    harness.start().unwrap();
    harness.engine.request_render();
    assert!(harness.sink.wait_for(1).is_some());

    harness.engine.stop();
    harness.engine.stop();
    harness.engine.on_surface_event(SurfaceEvent::Destroyed);
    harness.engine.await_stopped(WAIT).unwrap();
    harness.engine.stop();
    harness.shutdown();
    assert_eq!(harness.sink.clears(), 1);

    let status = harness.engine.status();
    assert!(!status.is_running());
    assert_eq!(status.surface.map(|s| s.state), Some(WorkerState::Stopped));
    assert_eq!(harness.backend.stats().contexts_created, 2);
}

#[test]
fn engine_can_be_started_again_after_stopping() {
    let mut harness = Harness::new(config());
    harness.start().unwrap();
    harness.shutdown();

    harness
        .engine
        .update_scene(SceneState::default().with_clear_color(Rgba::WHITE));
    harness.start().unwrap();
    harness.engine.request_render();
    let frame = harness.sink.wait_for(1).unwrap();
    assert!(is_uniform(&frame, [255, 255, 255, 255]));
    assert_eq!(frame.seq(), 1);
    harness.shutdown();
    assert_eq!(harness.backend.stats().contexts_created, 4);
}

#[test]
fn late_shared_context_fails_start_with_share_timeout() {
    let mut harness = Harness::new(EngineConfig {
        share_timeout: Duration::from_millis(50),
        ..config()
    });
    let provider = SlowWindow {
        window: harness.window.clone(),
        delay: Duration::from_millis(300),
    };
    let err = harness.engine.start(Arc::new(provider)).unwrap_err();
    assert_eq!(err, ResourceError::ShareTimeout(Duration::from_millis(50)));

    let status = harness.engine.status();
    assert!(status.capture.is_none());
    assert_eq!(status.surface.map(|s| s.state), Some(WorkerState::Stopped));
    assert_eq!(harness.backend.stats().shared_contexts_created, 0);
    harness.shutdown();
}

#[test]
fn surface_init_failure_is_returned_by_start() {
    let mut harness = Harness::new(config());
    harness.backend.inject(Fault::ShaderCompile(ShaderStage::Vertex));
    let err = harness.start().unwrap_err();
    assert!(matches!(
        err,
        ResourceError::ShaderCompileFailed {
            stage: ShaderStage::Vertex,
            ..
        }
    ));
    let status = harness.engine.status();
    assert_eq!(status.surface.and_then(|s| s.last_error), Some(err));
    assert!(status.capture.is_none());
    harness.shutdown();
}

#[test]
fn program_link_failure_is_returned_by_start() {
    let mut harness = Harness::new(config());
    harness.backend.inject(Fault::ProgramLink);
    assert!(matches!(
        harness.start(),
        Err(ResourceError::ProgramLinkFailed(_))
    ));
    harness.shutdown();
}

#[test]
fn missing_asset_aborts_readiness() {
    let mut harness = Harness::new(EngineConfig {
        assets: vec![AssetSpec::new(ResourceId(1), "missing.png")],
        ..config()
    });
    let err = harness.start().unwrap_err();
    assert!(matches!(
        err,
        ResourceError::AssetLoadFailed { ref path, .. } if path == "missing.png"
    ));
    assert_eq!(harness.backend.stats().shared_contexts_created, 0);
    harness.shutdown();
}

#[test]
fn capture_failure_leaves_the_surface_running() {
    let mut harness = Harness::new(config());
    harness.backend.inject(Fault::ContextCreation { shared: true });
    harness.start().unwrap();

    let status = harness.engine.status();
    let capture = status.capture.unwrap();
    assert_eq!(capture.state, WorkerState::Stopped);
    assert!(matches!(
        capture.last_error,
        Some(ResourceError::ContextCreationFailed(_))
    ));
    assert!(status.surface.is_some_and(|s| s.state.is_running()));

    harness.engine.request_render();
    assert!(wait_until(WAIT, || harness.window.presented_frames() >= 2));
    assert_eq!(harness.sink.count(), 0);
    harness.shutdown();
}

#[test]
fn incomplete_capture_framebuffer_is_unwound() {
    let mut harness = Harness::new(config());
    harness.backend.inject(Fault::FramebufferIncomplete);
    harness.start().unwrap();

    let capture = harness.engine.status().capture.unwrap();
    assert_eq!(capture.last_error, Some(ResourceError::FramebufferIncomplete(0x8CD6)));
    assert_eq!(capture.state, WorkerState::Stopped);
    assert_eq!(harness.backend.live_objects().get(GpuObjectKind::Framebuffer), 0);
    harness.shutdown();
}

#[test]
fn second_start_while_running_is_refused() {
    let mut harness = Harness::new(config());
    harness.start().unwrap();
    assert_eq!(harness.start(), Err(ResourceError::AlreadyStarted));
    harness.shutdown();
}

#[test]
fn dropping_a_running_engine_tears_everything_down() {
    let harness = Harness::with_assets(
        EngineConfig {
            assets: vec![AssetSpec::new(ResourceId(4), "tile.png")],
            ..config()
        },
        StaticAssets::new().with(
            "tile.png",
            DecodedImage::solid(PhysicalSize::new(2, 2), [9, 9, 9, 255]),
        ),
    );
    let Harness {
        backend,
        window,
        engine,
        ..
    } = harness;
    let mut engine = engine;
    engine.start(Arc::new(window.clone())).unwrap();
    assert!(backend.live_objects().get(GpuObjectKind::Texture) >= 1);
    drop(engine);

    assert!(backend.live_objects().is_empty());
    assert!(backend.violations().is_empty());
    assert_eq!(window.attached_surfaces(), 0);
}

#[test]
fn unavailable_host_surface_fails_start() {
    let mut harness = Harness::new(config());
    let window = SoftwareWindow::new(PhysicalSize::new(8, 8));
    window.set_available(false);
    assert!(matches!(
        harness.engine.start(Arc::new(window)),
        Err(ResourceError::SurfaceCreationFailed(_))
    ));
    harness.shutdown();
}

#[test]
fn surface_outlives_a_capture_worker_that_misses_the_stop_deadline() {
    let mut harness = Harness::new(EngineConfig {
        stop_timeout: Duration::from_millis(50),
        ..config()
    });
    harness.start().unwrap();
    assert!(wait_until(WAIT, || harness.window.presented_frames() == 1));
    assert!(wait_until(WAIT, || harness
        .engine
        .status()
        .surface
        .is_some_and(|surface| surface.state == WorkerState::Ready)));

    let hold = harness.backend.hold_renders();
    harness.engine.resize_capture(PhysicalSize::new(8, 8));
    assert!(hold.wait_entered(1, WAIT));

    harness.engine.stop();
    let status = harness.engine.status();
    assert_eq!(status.capture.map(|s| s.state), Some(WorkerState::Stopping));
    assert_eq!(status.surface.map(|s| s.state), Some(WorkerState::Ready));
    assert_eq!(harness.sink.clears(), 0);

    assert!(matches!(
        harness.engine.await_stopped(Duration::from_millis(20)),
        Err(ResourceError::StopTimeout {
            worker: WorkerKind::Capture,
            ..
        })
    ));
    assert!(
        harness
            .engine
            .status()
            .surface
            .is_some_and(|surface| surface.state.is_running())
    );
    assert!(harness.backend.violations().is_empty());

    drop(hold);
    harness.engine.await_stopped(WAIT).unwrap();
    let status = harness.engine.status();
    assert_eq!(status.surface.map(|s| s.state), Some(WorkerState::Stopped));
    assert_eq!(harness.sink.clears(), 1);
    harness.shutdown();
}
