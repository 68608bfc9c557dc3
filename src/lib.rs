/// ### English
/// `dual_gl_engine` crate root.
/// Two render workers (on-screen surface + off-screen capture) share one GPU context group;
/// the implementation lives under `engine`.
///
/// ### 中文
/// `dual_gl_engine` 的 crate 根。
/// 两个渲染 worker（屏幕 surface + 离屏 capture）共享同一个 GPU 上下文共享组；
/// 实现位于 `engine` 模块。
pub mod engine;

pub use engine::{
    AssetProvider, AssetSpec, CaptureSetup, DecodedImage, EngineConfig, EngineStatus, Fault,
    FrameBuffer, FrameSink, GpuBackend, GpuContext, GpuContextHandle, GpuObjectKind, HostSurface,
    HostSurfaceProvider, LatestFrameSlot, PixelFormat, QuadRect, RenderEngine, RenderHold,
    RenderWorker, ResourceCounts, ResourceError, ResourceId, Result, Rgba, RowOrigin, SceneState,
    ShaderStage, ShareCoordinator, SharedScene, SoftwareBackend, SoftwareStats, SoftwareWindow,
    StaticAssets, SurfaceEvent, SurfaceSetup, WorkerKind, WorkerState, WorkerStatus,
};

#[cfg(feature = "gl")]
pub use engine::{GlBackend, GlWindow};
