//! ### English
//! Error kinds shared by both render workers, the share coordinator and the engine facade.
//!
//! ### 中文
//! 两个渲染 worker、共享协调器与引擎门面共用的错误类型。

use std::time::Duration;

use thiserror::Error;

use super::gpu::ShaderStage;
use super::worker::WorkerKind;

/// ### English
/// Every failure the engine can report.
///
/// Initialization errors are terminal for the owning worker only; per-frame errors
/// (`ReadbackFailed`, `PresentFailed`) are recorded and the render loop keeps running.
///
/// ### 中文
/// 引擎可能报告的所有错误。
///
/// 初始化错误只终止所属 worker；逐帧错误（`ReadbackFailed`、`PresentFailed`）仅被记录，渲染循环继续运行。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("failed to create GPU context: {0}")]
    ContextCreationFailed(String),

    #[error("failed to make GPU context current: {0}")]
    MakeCurrentFailed(String),

    #[error("failed to create surface: {0}")]
    SurfaceCreationFailed(String),

    #[error("{stage} shader failed to compile: {log}")]
    ShaderCompileFailed { stage: ShaderStage, log: String },

    #[error("program failed to link: {0}")]
    ProgramLinkFailed(String),

    #[error("framebuffer incomplete (status 0x{0:04X})")]
    FramebufferIncomplete(u32),

    #[error("pixel readback failed: {0}")]
    ReadbackFailed(String),

    #[error("present failed: {0}")]
    PresentFailed(String),

    #[error("failed to load asset `{path}`: {reason}")]
    AssetLoadFailed { path: String, reason: String },

    #[error("shared context was not published within {0:?}")]
    ShareTimeout(Duration),

    #[error("worker did not finish initializing within {0:?}")]
    InitTimeout(Duration),

    #[error("{worker} worker did not stop within {timeout:?}")]
    StopTimeout { worker: WorkerKind, timeout: Duration },

    #[error("worker stopped before becoming ready")]
    WorkerStopped,

    #[error("already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, ResourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_piece() {
        let err = ResourceError::ShaderCompileFailed {
            stage: ShaderStage::Fragment,
            log: "0:3: syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "fragment shader failed to compile: 0:3: syntax error"
        );

        let err = ResourceError::FramebufferIncomplete(0x8CD6);
        assert_eq!(err.to_string(), "framebuffer incomplete (status 0x8CD6)");

        let err = ResourceError::StopTimeout {
            worker: WorkerKind::Capture,
            timeout: Duration::from_millis(20),
        };
        assert_eq!(err.to_string(), "capture worker did not stop within 20ms");
    }
}
