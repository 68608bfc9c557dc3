/// ### English
/// Engine internal modules (render workers, GPU backends, share coordination, frame delivery).
///
/// ### 中文
/// 引擎内部模块（渲染 worker、GPU 后端、共享协调、帧交付）。
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod host;
pub mod ledger;
pub(crate) mod lockfree;
pub mod rendering;
pub mod runtime;
pub mod scene;
pub mod worker;

pub use config::{AssetSpec, EngineConfig};
pub use coordinator::{OriginLock, ShareCoordinator, SharedObjects, SharedScene};
pub use error::{ResourceError, Result};
pub use frame::{FrameBuffer, FrameSink, LatestFrameSlot, PixelFormat, RowOrigin};
#[cfg(feature = "gl")]
pub use gpu::gl::{GlBackend, GlContext, GlWindow};
pub use gpu::software::{
    Fault, RenderHold, SoftwareBackend, SoftwareContext, SoftwareStats, SoftwareWindow,
};
pub use gpu::{GpuBackend, GpuContext, GpuContextHandle, ShaderStage};
pub use host::{
    AssetProvider, DecodedImage, HostSurface, HostSurfaceProvider, StaticAssets, SurfaceEvent,
};
pub use ledger::{GpuObjectKind, ResourceCounts, ResourceLedger};
pub use rendering::{SurfaceTarget, TargetKind};
pub use runtime::{EngineStatus, RenderEngine};
pub use scene::{QuadRect, ResourceId, Rgba, SceneState};
pub use worker::{
    CaptureSetup, RenderWorker, SurfaceSetup, WorkerKind, WorkerState, WorkerStatus,
};
