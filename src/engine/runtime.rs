//! ### English
//! Engine facade: starts the surface worker, waits for its shared context, then starts the
//! capture worker in the same share group; stops them in the reverse order.
//!
//! ### 中文
//! 引擎门面：先启动 surface worker，等待其共享上下文，再在同一共享组中启动 capture worker；
//! 停止时按相反顺序进行。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dpi::PhysicalSize;
use log::{debug, error, info, warn};

use super::config::EngineConfig;
use super::coordinator::ShareCoordinator;
use super::error::{ResourceError, Result};
use super::frame::FrameSink;
use super::gpu::GpuBackend;
use super::host::{AssetProvider, HostSurfaceProvider, SurfaceEvent};
use super::ledger::ResourceCounts;
use super::scene::{ResourceId, SceneState};
use super::worker::{CaptureSetup, RenderWorker, SurfaceSetup, WorkerState, WorkerStatus};

/// ### English
/// Per-worker status. `None` for a worker that was never created in this engine generation.
///
/// ### 中文
/// 每个 worker 的状态；本代引擎中从未创建的 worker 为 `None`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStatus {
    pub surface: Option<WorkerStatus>,
    pub capture: Option<WorkerStatus>,
}

impl EngineStatus {
    /// ### English
    /// `true` while any worker still holds GPU state.
    ///
    /// ### 中文
    /// 只要任一 worker 仍持有 GPU 状态即为 `true`。
    pub fn is_running(&self) -> bool {
        [&self.surface, &self.capture]
            .into_iter()
            .flatten()
            .any(|status| status.state.is_running())
    }
}

/// ### English
/// Two render workers driven from one host.
///
/// All methods are called from the host thread. `request_render`, `update_scene` and
/// `switch_resource` never block on the workers.
///
/// ### 中文
/// 由同一宿主驱动的两个渲染 worker。
///
/// 所有方法都在宿主线程上调用；`request_render`、`update_scene` 与 `switch_resource` 从不阻塞在 worker 上。
pub struct RenderEngine<B: GpuBackend> {
    backend: Arc<B>,
    config: EngineConfig,
    assets: Arc<dyn AssetProvider>,
    sink: Arc<dyn FrameSink>,
    scene: Mutex<SceneState>,
    surface: Option<RenderWorker<B>>,
    capture: Option<RenderWorker<B>>,
    /// ### English
    /// `stop()` was called; the surface worker is stopped once the capture worker is joined.
    ///
    /// ### 中文
    /// 已调用 `stop()`；capture worker 被 join 之后才会停止 surface worker。
    stopping: bool,
}

impl<B: GpuBackend> RenderEngine<B> {
    pub fn new(
        backend: B,
        config: EngineConfig,
        assets: Arc<dyn AssetProvider>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self> {
        config.validate()?;
        let scene = config.initial_scene;
        Ok(Self {
            backend: Arc::new(backend),
            config,
            assets,
            sink,
            scene: Mutex::new(scene),
            surface: None,
            capture: None,
            stopping: false,
        })
    }

    fn lock_scene(&self) -> MutexGuard<'_, SceneState> {
        self.scene.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workers(&self) -> impl Iterator<Item = &RenderWorker<B>> {
        self.surface.iter().chain(self.capture.iter())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// ### English
    /// Starts a fresh worker generation.
    ///
    /// Blocks until the surface worker published its shared context (`share_timeout`) and the
    /// capture worker reported its init outcome (`init_timeout`). A surface failure is returned and
    /// leaves nothing running; a capture failure is logged, kept in `status()`, and the surface
    /// worker keeps running.
    ///
    /// ### 中文
    /// 启动新一代 worker。
    ///
    /// 阻塞直到 surface worker 发布共享上下文（`share_timeout`），且 capture worker 报告初始化结果
    /// （`init_timeout`）。surface 失败会被返回且不留下任何运行中的 worker；capture 失败只记录日志并保留在
    /// `status()` 中，surface worker 继续运行。
    pub fn start(
        &mut self,
        provider: Arc<dyn HostSurfaceProvider<B::NativeSurface>>,
    ) -> Result<()> {
        if self.workers().any(|worker| worker.state() != WorkerState::Stopped) {
            return Err(ResourceError::AlreadyStarted);
        }
        self.surface = None;
        self.capture = None;
        self.stopping = false;

        let scene = *self.lock_scene();
        let coordinator = Arc::new(ShareCoordinator::new());
        let mut surface = RenderWorker::surface(
            self.backend.clone(),
            SurfaceSetup {
                provider,
                assets: self.assets.clone(),
                asset_specs: self.config.assets.clone(),
                coordinator: coordinator.clone(),
            },
            scene,
        );
        surface.start()?;

        let published = coordinator
            .await_shared_context(self.config.share_timeout)
            .and_then(|shared| {
                surface.await_ready(self.config.init_timeout)?;
                Ok(shared)
            });
        let shared = match published {
            Ok(shared) => shared,
            Err(err) => {
                error!("engine failed to start: {err}");
                surface.stop();
                let _ = surface.join_timeout(self.config.stop_timeout);
                self.surface = Some(surface);
                return Err(err);
            }
        };
        self.surface = Some(surface);

        if self.config.capture_enabled {
            let mut capture = RenderWorker::capture(
                self.backend.clone(),
                CaptureSetup {
                    shared,
                    size: self.config.offscreen_size,
                    sink: self.sink.clone(),
                },
                scene,
            );
            match capture
                .start()
                .and_then(|()| capture.await_ready(self.config.init_timeout))
            {
                Ok(()) => {}
                Err(ResourceError::InitTimeout(timeout)) => {
                    warn!("capture worker not ready after {timeout:?}, continuing");
                }
                Err(err) => {
                    error!("capture worker failed to initialize: {err}");
                    let _ = capture.join_timeout(self.config.stop_timeout);
                }
            }
            self.capture = Some(capture);
        }
        if let Some(surface) = &self.surface {
            surface.request_render();
        }

        info!(
            "engine started on {} backend (capture {})",
            self.backend.name(),
            if self.capture.is_some() { "on" } else { "off" }
        );
        Ok(())
    }

    /// ### English
    /// Requests one render from every running worker.
    ///
    /// ### 中文
    /// 向每个运行中的 worker 请求一次渲染。
    pub fn request_render(&self) {
        for worker in self.workers() {
            worker.request_render();
        }
    }

    /// ### English
    /// Replaces the scene of both workers. Does not request a render.
    ///
    /// ### 中文
    /// 替换两个 worker 的场景；不会触发渲染请求。
    pub fn update_scene(&self, scene: SceneState) {
        *self.lock_scene() = scene;
        for worker in self.workers() {
            worker.update_scene(scene);
        }
    }

    pub fn scene(&self) -> SceneState {
        *self.lock_scene()
    }

    /// ### English
    /// Makes `id` the active resource and requests a render.
    ///
    /// An id with no configured asset returns `AssetLoadFailed` and changes nothing.
    ///
    /// ### 中文
    /// 把 `id` 设为活动资源并请求渲染。
    ///
    /// 未配置资源的 id 返回 `AssetLoadFailed`，且不做任何改动。
    pub fn switch_resource(&self, id: ResourceId) -> Result<()> {
        let Some(asset) = self.config.asset(id) else {
            warn!("switch to unknown resource {}", id.0);
            return Err(ResourceError::AssetLoadFailed {
                path: format!("resource {}", id.0),
                reason: "no asset is configured with this id".to_string(),
            });
        };
        debug!("switching to resource {} (`{}`)", id.0, asset.path);
        let scene = self.lock_scene().with_resource(Some(id));
        self.update_scene(scene);
        self.request_render();
        Ok(())
    }

    /// ### English
    /// Recreates the capture FBO at `size` on its next render and requests that render.
    ///
    /// ### 中文
    /// 在下一次渲染时以 `size` 重建 capture FBO，并请求该次渲染。
    pub fn resize_capture(&self, size: PhysicalSize<u32>) {
        if let Some(capture) = &self.capture {
            capture.resize(size);
        }
    }

    pub fn on_surface_event(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::Resized(size) => {
                if let Some(surface) = &self.surface {
                    surface.resize(size);
                }
                if self.config.capture_follows_surface {
                    self.resize_capture(size);
                }
            }
            SurfaceEvent::ContentChanged => self.request_render(),
            SurfaceEvent::Destroyed => self.stop(),
        }
    }

    /// ### English
    /// Stops and joins the capture worker (bounded by `stop_timeout`), then clears the sink and
    /// asks the surface worker to stop. Idempotent; pair with `await_stopped`.
    ///
    /// While the capture worker has not been joined the surface worker keeps running, since its
    /// context is the share-group origin. `await_stopped` retries the join and finishes the stop.
    ///
    /// ### 中文
    /// 停止并 join capture worker（上限为 `stop_timeout`），然后清空 sink 并请求 surface worker 停止。
    /// 幂等；需配合 `await_stopped` 使用。
    ///
    /// capture worker 尚未被 join 时 surface worker 继续运行，因为它的上下文是共享组源。
    /// `await_stopped` 会重试 join 并完成停止流程。
    pub fn stop(&mut self) {
        if !self.status().is_running() {
            return;
        }
        if !self.stopping {
            info!("engine stopping");
            self.stopping = true;
        }
        if let Err(err) = self.join_capture(self.config.stop_timeout) {
            error!("surface worker kept alive as share-group origin: {err}");
            return;
        }
        self.stop_surface();
    }

    fn join_capture(&mut self, timeout: Duration) -> Result<()> {
        match self.capture.as_mut() {
            Some(capture) => {
                capture.stop();
                capture.join_timeout(timeout)
            }
            None => Ok(()),
        }
    }

    fn stop_surface(&self) {
        self.sink.clear();
        if let Some(surface) = &self.surface {
            surface.stop();
        }
    }

    /// ### English
    /// Waits for both workers to reach `STOPPED`, sharing one `timeout` between them: the capture
    /// worker first, then the surface worker, whose stop is issued here if `stop()` had to defer it.
    ///
    /// ### 中文
    /// 等待两个 worker 都进入 `STOPPED`，两者共用同一个 `timeout`：先等 capture worker，再等 surface
    /// worker；若 `stop()` 推迟了 surface 的停止，则在此处发出。
    pub fn await_stopped(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        if let Some(capture) = self.capture.as_mut() {
            capture.join_timeout(timeout)?;
        }
        if self.stopping
            && self
                .surface
                .as_ref()
                .is_some_and(|surface| surface.state().is_running())
        {
            self.stop_surface();
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.join_timeout(deadline.saturating_duration_since(Instant::now()))?;
        }
        info!("engine stopped");
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            surface: self.surface.as_ref().map(RenderWorker::status),
            capture: self.capture.as_ref().map(RenderWorker::status),
        }
    }

    /// ### English
    /// Engine-created GPU objects still owned by either worker.
    ///
    /// ### 中文
    /// 两个 worker 仍持有的引擎创建 GPU 对象。
    pub fn outstanding(&self) -> ResourceCounts {
        self.workers()
            .map(RenderWorker::outstanding)
            .fold(ResourceCounts::default(), |total, counts| total + counts)
    }
}

impl<B: GpuBackend> Drop for RenderEngine<B> {
    fn drop(&mut self) {
        self.stop();
        if self.await_stopped(self.config.stop_timeout).is_ok() {
            return;
        }
        if self
            .capture
            .as_ref()
            .is_some_and(|capture| capture.state() != WorkerState::Stopped)
        {
            error!("capture worker leaked, leaking the surface worker to keep its origin alive");
            std::mem::forget(self.surface.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::config::AssetSpec;
    use crate::engine::frame::LatestFrameSlot;
    use crate::engine::gpu::software::{SoftwareBackend, SoftwareWindow};
    use crate::engine::host::{DecodedImage, StaticAssets};
    use crate::engine::scene::Rgba;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine(config: EngineConfig) -> (RenderEngine<SoftwareBackend>, SoftwareBackend) {
        let backend = SoftwareBackend::new();
        let assets = StaticAssets::new().with(
            "logo.png",
            DecodedImage::solid(PhysicalSize::new(2, 2), [255, 255, 0, 255]),
        );
        let engine = RenderEngine::new(
            backend.clone(),
            config,
            Arc::new(assets),
            Arc::new(LatestFrameSlot::new()),
        )
        .unwrap();
        (engine, backend)
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = EngineConfig {
            offscreen_size: PhysicalSize::new(0, 0),
            ..EngineConfig::default()
        };
        assert!(matches!(
            RenderEngine::new(
                SoftwareBackend::new(),
                config,
                Arc::new(StaticAssets::new()),
                Arc::new(LatestFrameSlot::new()),
            ),
            Err(ResourceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn second_start_while_running_is_refused() {
        let (mut engine, backend) = engine(EngineConfig::default());
        let window = SoftwareWindow::new(PhysicalSize::new(8, 8));
        engine.start(Arc::new(window.clone())).unwrap();
        assert_eq!(
            engine.start(Arc::new(window)),
            Err(ResourceError::AlreadyStarted)
        );
        engine.stop();
        engine.await_stopped(WAIT).unwrap();
        assert!(engine.outstanding().is_empty());
        assert!(backend.live_objects().is_empty());
    }

    #[test]
    fn surface_only_engine_when_capture_is_disabled() {
        let (mut engine, backend) = engine(EngineConfig {
            capture_enabled: false,
            ..EngineConfig::default()
        });
        engine.start(Arc::new(SoftwareWindow::new(PhysicalSize::new(4, 4)))).unwrap();
        let status = engine.status();
        assert!(status.capture.is_none());
        assert!(status.surface.is_some_and(|s| s.state.is_running()));
        engine.stop();
        engine.await_stopped(WAIT).unwrap();
        assert_eq!(backend.stats().shared_contexts_created, 0);
    }

    #[test]
    fn unknown_resource_is_refused_without_touching_the_scene() {
        let (mut engine, _backend) = engine(EngineConfig {
            assets: vec![AssetSpec::new(ResourceId(7), "logo.png")],
            initial_scene: SceneState::default().with_clear_color(Rgba::BLACK),
            ..EngineConfig::default()
        });
        engine.start(Arc::new(SoftwareWindow::new(PhysicalSize::new(4, 4)))).unwrap();

        assert!(matches!(
            engine.switch_resource(ResourceId(3)),
            Err(ResourceError::AssetLoadFailed { .. })
        ));
        assert_eq!(engine.scene().active_resource, None);

        engine.switch_resource(ResourceId(7)).unwrap();
        assert_eq!(engine.scene().active_resource, Some(ResourceId(7)));
        assert_eq!(engine.scene().clear_color, Rgba::BLACK);
        engine.stop();
        engine.await_stopped(WAIT).unwrap();
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let (mut engine, _backend) = engine(EngineConfig::default());
        engine.stop();
        engine.stop();
        assert!(engine.await_stopped(Duration::from_millis(10)).is_ok());
        assert_eq!(
            engine.status(),
            EngineStatus {
                surface: None,
                capture: None
            }
        );
    }
}
