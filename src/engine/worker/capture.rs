//! ### English
//! Capture worker role: a context in the origin's share group, an offscreen FBO target, and
//! readback into the frame sink.
//!
//! ### 中文
//! capture worker 角色：位于源上下文共享组中的上下文、离屏 FBO 目标，以及回读到帧接收端。

use dpi::PhysicalSize;
use log::debug;

use crate::engine::error::{ResourceError, Result};
use crate::engine::frame::FrameSink as _;
use crate::engine::gpu::GpuBackend;
use crate::engine::ledger::ResourceLedger;
use crate::engine::rendering::{SurfaceTarget, draw_scene};
use crate::engine::scene::SceneState;

use super::role::WorkerRole;
use super::{CaptureSetup, WorkerKind};

pub(crate) struct CaptureRole {
    setup: CaptureSetup,
    target: Option<SurfaceTarget>,
    /// ### English
    /// Sequence number of the last delivered frame (`0` = none yet).
    ///
    /// ### 中文
    /// 最近一次交付帧的序号（`0` 表示尚未交付）。
    last_seq: u64,
}

impl CaptureRole {
    pub(crate) fn new(setup: CaptureSetup) -> Self {
        Self {
            setup,
            target: None,
            last_seq: 0,
        }
    }
}

impl<B: GpuBackend> WorkerRole<B> for CaptureRole {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Capture
    }

    fn create_context(&mut self, backend: &B) -> Result<B::Context> {
        let _origin = self.setup.shared.origin.share();
        backend.create_context(Some(&self.setup.shared.handle))
    }

    fn init(&mut self, context: &mut B::Context, ledger: &ResourceLedger) -> Result<()> {
        self.target = Some(SurfaceTarget::offscreen(context, ledger, self.setup.size)?);
        Ok(())
    }

    fn resize(
        &mut self,
        context: &mut B::Context,
        ledger: &ResourceLedger,
        size: PhysicalSize<u32>,
    ) -> Result<()> {
        if self.target.as_ref().is_some_and(|target| target.size() == size) {
            return Ok(());
        }
        if let Some(old) = self.target.take() {
            old.destroy(context, ledger);
        }
        debug!("capture target recreated at {}x{}", size.width, size.height);
        self.setup.size = size;
        self.target = Some(SurfaceTarget::offscreen(context, ledger, size)?);
        Ok(())
    }

    fn render(&mut self, context: &mut B::Context, scene: &SceneState) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Err(ResourceError::SurfaceCreationFailed(
                "offscreen target is missing".to_string(),
            ));
        };
        target.bind(context)?;
        draw_scene(context, scene, &self.setup.shared.objects);
        let frame = target.read_back(context, self.last_seq + 1)?;
        self.last_seq = frame.seq();
        self.setup.sink.publish(frame);
        Ok(())
    }

    fn teardown(&mut self, context: &mut B::Context, ledger: &ResourceLedger) {
        if let Some(target) = self.target.take() {
            target.destroy(context, ledger);
        }
    }
}
