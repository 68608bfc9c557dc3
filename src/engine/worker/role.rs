//! ### English
//! What differs between the surface and the capture worker. The loop around it is shared.
//!
//! ### 中文
//! surface worker 与 capture worker 之间的差异部分；外围循环是共用的。

use std::sync::Arc;

use dpi::PhysicalSize;

use crate::engine::coordinator::OriginLock;
use crate::engine::error::{ResourceError, Result};
use crate::engine::gpu::GpuBackend;
use crate::engine::ledger::ResourceLedger;
use crate::engine::scene::SceneState;

use super::WorkerKind;

/// ### English
/// Role hooks, all called on the worker thread.
///
/// `init` records every object it creates before it can fail, so `teardown` always sees the exact
/// subset that exists and releases it in order. `init`, `resize`, `render` and `teardown` run with
/// the worker's context current.
///
/// ### 中文
/// 角色钩子，全部在 worker 线程上调用。
///
/// `init` 会在可能失败之前记录它创建的每个对象，使 `teardown` 总能看到实际存在的那部分对象并按顺序释放。
/// `init`、`resize`、`render` 与 `teardown` 执行时 worker 的上下文均为 current。
pub(crate) trait WorkerRole<B: GpuBackend>: Send {
    fn kind(&self) -> WorkerKind;

    fn create_context(&mut self, backend: &B) -> Result<B::Context>;

    fn init(&mut self, context: &mut B::Context, ledger: &ResourceLedger) -> Result<()>;

    /// ### English
    /// Recreates the target at `size` (no-op when unchanged).
    ///
    /// ### 中文
    /// 以 `size` 重建目标（尺寸未变时不做任何事）。
    fn resize(
        &mut self,
        context: &mut B::Context,
        ledger: &ResourceLedger,
        size: PhysicalSize<u32>,
    ) -> Result<()>;

    fn render(&mut self, context: &mut B::Context, scene: &SceneState) -> Result<()>;

    fn teardown(&mut self, context: &mut B::Context, ledger: &ResourceLedger);

    /// ### English
    /// Gate to hold exclusively while this worker mutates a context other workers were created
    /// from. Only the share-group origin has one.
    ///
    /// ### 中文
    /// 当本 worker 修改一个被其它 worker 用作共享源的上下文时需独占持有的闸门；只有共享组源才有。
    fn origin(&self) -> Option<Arc<OriginLock>> {
        None
    }

    /// ### English
    /// Called once if the worker will never become ready.
    ///
    /// ### 中文
    /// 当 worker 永远不会进入 ready 时调用一次。
    fn abandon(&mut self, _reason: &ResourceError) {}
}
