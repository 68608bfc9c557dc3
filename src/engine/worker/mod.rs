//! ### English
//! Render workers: one OS thread, one context, one target each.
//!
//! The surface worker owns the share-group origin and presents to a host window; the capture
//! worker joins that share group, draws into an FBO and reads the pixels back. Both run the same
//! render-on-demand loop (`run`), only their role hooks differ.
//!
//! ### 中文
//! 渲染 worker：每个 worker 独占一个 OS 线程、一个上下文和一个目标。
//!
//! surface worker 持有共享组源上下文并 present 到宿主窗口；capture worker 加入该共享组，
//! 绘制到 FBO 并回读像素。两者运行同一个按需渲染循环（`run`），只有角色钩子不同。

mod capture;
mod request;
mod role;
mod run;
mod state;
mod surface;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use dpi::PhysicalSize;
use log::{debug, error, info, warn};

use super::config::AssetSpec;
use super::coordinator::{ShareCoordinator, SharedScene};
use super::error::{ResourceError, Result};
use super::frame::FrameSink;
use super::gpu::GpuBackend;
use super::host::{AssetProvider, HostSurfaceProvider};
use super::ledger::{ResourceCounts, ResourceLedger};
use super::lockfree::{CoalescedBox, CoalescedResize};
use super::scene::SceneState;

use capture::CaptureRole;
use request::RenderRequest;
use role::WorkerRole;
use state::StateCell;
use surface::SurfaceRole;

pub use state::WorkerState;

const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Surface,
    Capture,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Surface => "surface",
            Self::Capture => "capture",
        })
    }
}

/// ### English
/// What the surface worker needs to initialize.
///
/// ### 中文
/// surface worker 初始化所需的内容。
pub struct SurfaceSetup<B: GpuBackend> {
    pub provider: Arc<dyn HostSurfaceProvider<B::NativeSurface>>,
    pub assets: Arc<dyn AssetProvider>,
    pub asset_specs: Vec<AssetSpec>,
    /// ### English
    /// Receives the origin context handle and shared objects once they all exist.
    ///
    /// ### 中文
    /// 在源上下文句柄与共享对象全部就绪后接收它们。
    pub coordinator: Arc<ShareCoordinator>,
}

/// ### English
/// What the capture worker needs to initialize. `shared` must come from a published origin.
///
/// ### 中文
/// capture worker 初始化所需的内容；`shared` 必须来自已发布的源上下文。
pub struct CaptureSetup {
    pub shared: SharedScene,
    pub size: PhysicalSize<u32>,
    pub sink: Arc<dyn FrameSink>,
}

/// ### English
/// Point-in-time view of a worker, for diagnostics.
///
/// ### 中文
/// worker 的时间点快照，用于诊断。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerStatus {
    pub kind: WorkerKind,
    pub state: WorkerState,
    pub last_error: Option<ResourceError>,
    pub render_count: u64,
}

/// ### English
/// State shared between the owning handle and the worker thread.
///
/// ### 中文
/// 所属句柄与 worker 线程之间共享的状态。
pub(crate) struct WorkerShared {
    kind: WorkerKind,
    state: StateCell,
    request: RenderRequest,
    scene: CoalescedBox<SceneState>,
    resize: CoalescedResize,
    ledger: ResourceLedger,
    last_error: Mutex<Option<ResourceError>>,
    renders: AtomicU64,
    /// ### English
    /// Request generation of the last completed render iteration.
    ///
    /// ### 中文
    /// 最近一次完成的渲染迭代所对应的请求代数。
    generation: AtomicU64,
}

impl WorkerShared {
    fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            state: StateCell::default(),
            request: RenderRequest::default(),
            scene: CoalescedBox::default(),
            resize: CoalescedResize::default(),
            ledger: ResourceLedger::default(),
            last_error: Mutex::new(None),
            renders: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    fn record_error(&self, err: ResourceError) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(err);
    }
}

/// ### English
/// Forces the lifecycle to `Stopped` when the worker thread exits, including by unwinding.
///
/// ### 中文
/// 在 worker 线程退出（包括 unwind）时强制把生命周期推进到 `Stopped`。
struct ExitGuard(Arc<WorkerShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let state = &self.0.state;
        if state.get() != WorkerState::Stopped {
            if thread::panicking() {
                error!("{} worker thread panicked", self.0.kind);
            }
            state.advance(WorkerState::Stopping);
            state.advance(WorkerState::Stopped);
        }
    }
}

/// ### English
/// Handle to one render worker.
///
/// A handle runs at most one worker generation: after `stop` it cannot be started again, create a
/// new handle instead.
///
/// ### 中文
/// 单个渲染 worker 的句柄。
///
/// 一个句柄最多运行一代 worker：`stop` 之后不能再次启动，需要创建新的句柄。
pub struct RenderWorker<B: GpuBackend> {
    shared: Arc<WorkerShared>,
    backend: Arc<B>,
    role: Option<Box<dyn WorkerRole<B>>>,
    thread: Option<JoinHandle<()>>,
    init_rx: Option<Receiver<Result<()>>>,
    init_outcome: Mutex<Option<Result<()>>>,
}

impl<B: GpuBackend> RenderWorker<B> {
    fn with_role(backend: Arc<B>, role: Box<dyn WorkerRole<B>>, scene: SceneState) -> Self {
        let shared = Arc::new(WorkerShared::new(role.kind()));
        shared.scene.store(scene);
        Self {
            shared,
            backend,
            role: Some(role),
            thread: None,
            init_rx: None,
            init_outcome: Mutex::new(None),
        }
    }

    pub fn surface(backend: Arc<B>, setup: SurfaceSetup<B>, scene: SceneState) -> Self {
        Self::with_role(backend, Box::new(SurfaceRole::new(setup)), scene)
    }

    pub fn capture(backend: Arc<B>, setup: CaptureSetup, scene: SceneState) -> Self {
        Self::with_role(backend, Box::new(CaptureRole::new(setup)), scene)
    }

    /// ### English
    /// Spawns the worker thread and returns immediately; use `await_ready` for the init outcome.
    ///
    /// ### 中文
    /// 启动 worker 线程并立即返回；通过 `await_ready` 获取初始化结果。
    pub fn start(&mut self) -> Result<()> {
        let kind = self.shared.kind;
        if matches!(
            self.shared.state.get(),
            WorkerState::Stopping | WorkerState::Stopped
        ) {
            return Err(ResourceError::WorkerStopped);
        }
        let Some(role) = self.role.take() else {
            return Err(ResourceError::AlreadyStarted);
        };
        if !self.shared.state.advance(WorkerState::Initializing) {
            return Err(ResourceError::WorkerStopped);
        }

        let (init_tx, init_rx) = crossbeam_channel::bounded(1);
        let shared = self.shared.clone();
        let backend = self.backend.clone();
        let spawned = thread::Builder::new()
            .name(format!("{kind}-render"))
            .spawn(move || {
                let _guard = ExitGuard(shared.clone());
                run::worker_main(shared, backend, role, init_tx);
            });

        match spawned {
            Ok(handle) => {
                info!("{kind} worker started");
                self.thread = Some(handle);
                self.init_rx = Some(init_rx);
                Ok(())
            }
            Err(err) => {
                let err = ResourceError::WorkerSpawnFailed(err.to_string());
                error!("{kind} worker: {err}");
                self.shared.record_error(err.clone());
                self.shared.state.advance(WorkerState::Stopping);
                self.shared.state.advance(WorkerState::Stopped);
                Err(err)
            }
        }
    }

    /// ### English
    /// Asks for one render. Never blocks; coalesces with a pending request.
    ///
    /// ### 中文
    /// 请求一次渲染；从不阻塞，会与待处理请求合并。
    pub fn request_render(&self) {
        self.shared.request.request();
    }

    /// ### English
    /// Replaces the scene drawn by the next render. Does not request a render.
    ///
    /// ### 中文
    /// 替换下一次渲染所绘制的场景；不会触发渲染请求。
    pub fn update_scene(&self, scene: SceneState) {
        if !self.shared.scene.store(scene) {
            debug!("{} worker scene update replaced a pending one", self.shared.kind);
        }
    }

    /// ### English
    /// Records a new target size and requests a render; the target is recreated at the top of
    /// that render. Zero sizes are ignored.
    ///
    /// ### 中文
    /// 记录新的目标尺寸并请求渲染；目标会在该次渲染开始时重建。零尺寸会被忽略。
    pub fn resize(&self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            warn!(
                "{} worker ignoring resize to {}x{}",
                self.shared.kind, size.width, size.height
            );
            return;
        }
        self.shared.resize.set(size);
        self.shared.request.request();
    }

    /// ### English
    /// Idempotent. Wakes a parked worker; a worker still initializing tears down right after.
    ///
    /// ### 中文
    /// 幂等。唤醒阻塞中的 worker；仍在初始化的 worker 会在初始化结束后立即 teardown。
    pub fn stop(&self) {
        let kind = self.shared.kind;
        self.shared.request.stop();
        let state = &self.shared.state;
        match state.get() {
            WorkerState::Unstarted => {
                if state.advance(WorkerState::Stopped) {
                    info!("{kind} worker stopped before start");
                }
            }
            WorkerState::Initializing | WorkerState::Ready | WorkerState::Rendering => {
                if state.advance(WorkerState::Stopping) {
                    debug!("{kind} worker stopping");
                }
            }
            WorkerState::Stopping | WorkerState::Stopped => {}
        }
    }

    /// ### English
    /// Blocks until the worker thread exited. Does not request a stop.
    ///
    /// ### 中文
    /// 阻塞直到 worker 线程退出；不会主动请求停止。
    pub fn join(&mut self) {
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            error!("{} worker thread panicked", self.shared.kind);
        }
    }

    /// ### English
    /// Waits at most `timeout` for `Stopped`. On timeout the worker is reported as leaked and the
    /// thread is left running; a later call may still join it.
    ///
    /// ### 中文
    /// 最多等待 `timeout` 直到 `Stopped`。超时则报告 worker 泄漏并任由线程继续运行；之后的调用仍可 join。
    pub fn join_timeout(&mut self, timeout: Duration) -> Result<()> {
        let kind = self.shared.kind;
        let reached = self
            .shared
            .state
            .wait_until(timeout, |state| state == WorkerState::Stopped);
        if reached != WorkerState::Stopped {
            error!("{kind} worker still {reached} after {timeout:?}, worker leaked");
            return Err(ResourceError::StopTimeout {
                worker: kind,
                timeout,
            });
        }
        self.join();
        Ok(())
    }

    /// ### English
    /// Waits for the init outcome: `Ok` once `READY`, the init error otherwise.
    ///
    /// ### 中文
    /// 等待初始化结果：进入 `READY` 时返回 `Ok`，否则返回初始化错误。
    pub fn await_ready(&self, timeout: Duration) -> Result<()> {
        let mut outcome = self
            .init_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = outcome.as_ref() {
            return outcome.clone();
        }
        let Some(init_rx) = self.init_rx.as_ref() else {
            return Err(self.last_error().unwrap_or(ResourceError::WorkerStopped));
        };
        let result = match init_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => return Err(ResourceError::InitTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(self.last_error().unwrap_or(ResourceError::WorkerStopped))
            }
        };
        *outcome = Some(result.clone());
        result
    }

    pub fn kind(&self) -> WorkerKind {
        self.shared.kind
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state.get()
    }

    pub fn last_error(&self) -> Option<ResourceError> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// ### English
    /// Successfully completed renders.
    ///
    /// ### 中文
    /// 成功完成的渲染次数。
    pub fn render_count(&self) -> u64 {
        self.shared.renders.load(Ordering::Acquire)
    }

    /// ### English
    /// Request generation served by the last render iteration (`0` before the first).
    ///
    /// ### 中文
    /// 最近一次渲染迭代所服务的请求代数（首次渲染前为 `0`）。
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::Acquire)
    }

    /// ### English
    /// Engine-created objects this worker still owns, its context included.
    ///
    /// ### 中文
    /// 该 worker 仍持有的引擎创建对象（包括其上下文）。
    pub fn outstanding(&self) -> ResourceCounts {
        self.shared.ledger.snapshot()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            kind: self.shared.kind,
            state: self.state(),
            last_error: self.last_error(),
            render_count: self.render_count(),
        }
    }
}

impl<B: GpuBackend> Drop for RenderWorker<B> {
    fn drop(&mut self) {
        self.stop();
        if self.thread.is_some() {
            let _ = self.join_timeout(DROP_JOIN_TIMEOUT);
        }
    }
}
