#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use dpi::PhysicalSize;
use dual_gl_engine::{
    AssetProvider, EngineConfig, FrameBuffer, FrameSink, HostSurface, HostSurfaceProvider,
    RenderEngine, SoftwareBackend, SoftwareWindow, StaticAssets,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `done` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

/// Keeps every published frame so tests can count deliveries.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<FrameBuffer>>,
    clears: AtomicUsize,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<FrameBuffer> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn last(&self) -> Option<FrameBuffer> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    pub fn wait_for(&self, count: usize) -> Option<FrameBuffer> {
        if wait_until(WAIT, || self.count() >= count) {
            self.last()
        } else {
            None
        }
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::Acquire)
    }
}

impl FrameSink for RecordingSink {
    fn publish(&self, frame: FrameBuffer) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::AcqRel);
    }
}

/// Host window that only hands out its surface after `delay`.
pub struct SlowWindow {
    pub window: SoftwareWindow,
    pub delay: Duration,
}

impl HostSurfaceProvider<SoftwareWindow> for SlowWindow {
    fn acquire(&self) -> Option<HostSurface<SoftwareWindow>> {
        thread::sleep(self.delay);
        self.window.acquire()
    }
}

pub struct Harness {
    pub backend: SoftwareBackend,
    pub window: SoftwareWindow,
    pub sink: Arc<RecordingSink>,
    pub engine: RenderEngine<SoftwareBackend>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_assets(config, StaticAssets::new())
    }

    pub fn with_assets(config: EngineConfig, assets: impl AssetProvider + 'static) -> Self {
        init_logging();
        let backend = SoftwareBackend::new();
        let sink = Arc::new(RecordingSink::default());
        let engine = RenderEngine::new(backend.clone(), config, Arc::new(assets), sink.clone())
            .expect("valid config");
        Self {
            backend,
            window: SoftwareWindow::new(PhysicalSize::new(16, 12)),
            sink,
            engine,
        }
    }

    pub fn start(&mut self) -> dual_gl_engine::Result<()> {
        self.engine.start(Arc::new(self.window.clone()))
    }

    /// Stops the engine and checks nothing leaked and no GPU rule was broken.
    pub fn shutdown(&mut self) {
        self.engine.stop();
        self.engine.await_stopped(WAIT).expect("workers stop in time");
        assert!(self.engine.outstanding().is_empty());
        assert!(self.backend.live_objects().is_empty(), "{}", self.backend.live_objects());
        assert!(self.backend.leaked_objects().is_empty());
        assert_eq!(self.backend.violations(), Vec::<String>::new());
        assert_eq!(self.window.attached_surfaces(), 0);
    }
}

/// `true` when every pixel equals `rgba` within one step.
pub fn is_uniform(frame: &FrameBuffer, rgba: [u8; 4]) -> bool {
    frame.pixels().chunks_exact(4).all(|pixel| {
        pixel
            .iter()
            .zip(rgba)
            .all(|(&got, want)| got.abs_diff(want) <= 1)
    })
}
