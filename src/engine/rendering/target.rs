//! ### English
//! Drawable destinations of a worker: a window surface or an offscreen FBO.
//!
//! ### 中文
//! worker 的绘制目标：窗口 surface 或离屏 FBO。

use dpi::PhysicalSize;
use log::{debug, error};

use crate::engine::error::{ResourceError, Result};
use crate::engine::frame::{FrameBuffer, byte_len};
use crate::engine::gpu::{
    FramebufferId, FramebufferStatus, GpuContext, RenderbufferId, TextureFilter, TextureId,
    WindowSurfaceId,
};
use crate::engine::ledger::{GpuObjectKind, ResourceLedger};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Window,
    Offscreen,
}

#[derive(Clone, Copy, Debug)]
enum Drawable {
    Window(WindowSurfaceId),
    Offscreen {
        framebuffer: FramebufferId,
        color: TextureId,
        depth: RenderbufferId,
    },
}

/// ### English
/// One worker's render target. Never resized in place: a new size means a new target.
///
/// ### 中文
/// 单个 worker 的渲染目标；不做原地 resize：尺寸变化意味着创建新的目标。
#[derive(Debug)]
pub struct SurfaceTarget {
    size: PhysicalSize<u32>,
    drawable: Drawable,
}

fn ensure_non_zero(size: PhysicalSize<u32>) -> Result<()> {
    if size.width == 0 || size.height == 0 {
        return Err(ResourceError::SurfaceCreationFailed(format!(
            "target size must be non-zero, got {}x{}",
            size.width, size.height
        )));
    }
    Ok(())
}

impl SurfaceTarget {
    /// ### English
    /// Creates a window surface for `native`.
    ///
    /// ### 中文
    /// 为 `native` 创建窗口 surface。
    pub fn window<C: GpuContext>(
        context: &mut C,
        ledger: &ResourceLedger,
        native: &C::NativeSurface,
        size: PhysicalSize<u32>,
    ) -> Result<Self> {
        ensure_non_zero(size)?;
        let surface = context.create_window_surface(native, size)?;
        ledger.track(GpuObjectKind::WindowSurface);
        debug!("window target created ({}x{})", size.width, size.height);
        Ok(Self {
            size,
            drawable: Drawable::Window(surface),
        })
    }

    /// ### English
    /// Creates framebuffer, color texture (linear, no mipmaps) and depth renderbuffer, attaches
    /// them and checks completeness.
    ///
    /// An incomplete framebuffer destroys all three in reverse creation order and reports
    /// `FramebufferIncomplete`.
    ///
    /// ### 中文
    /// 创建 framebuffer、颜色纹理（线性过滤、无 mipmap）与深度 renderbuffer，完成附着并检查完整性。
    ///
    /// 若 framebuffer 不完整，则按创建的逆序销毁三者并返回 `FramebufferIncomplete`。
    pub fn offscreen<C: GpuContext>(
        context: &mut C,
        ledger: &ResourceLedger,
        size: PhysicalSize<u32>,
    ) -> Result<Self> {
        ensure_non_zero(size)?;

        let framebuffer = context.create_framebuffer();
        ledger.track(GpuObjectKind::Framebuffer);
        let color = context.create_texture(size, None, TextureFilter::Linear);
        ledger.track(GpuObjectKind::Texture);
        let depth = context.create_depth_renderbuffer(size);
        ledger.track(GpuObjectKind::Renderbuffer);

        context.attach_framebuffer(framebuffer, color, depth);
        if let FramebufferStatus::Incomplete(status) = context.framebuffer_status(framebuffer) {
            error!("offscreen framebuffer incomplete (status 0x{status:04X})");
            context.delete_renderbuffer(depth);
            ledger.release(GpuObjectKind::Renderbuffer);
            context.delete_texture(color);
            ledger.release(GpuObjectKind::Texture);
            context.delete_framebuffer(framebuffer);
            ledger.release(GpuObjectKind::Framebuffer);
            return Err(ResourceError::FramebufferIncomplete(status));
        }

        debug!("offscreen target created ({}x{})", size.width, size.height);
        Ok(Self {
            size,
            drawable: Drawable::Offscreen {
                framebuffer,
                color,
                depth,
            },
        })
    }

    pub fn kind(&self) -> TargetKind {
        match self.drawable {
            Drawable::Window(_) => TargetKind::Window,
            Drawable::Offscreen { .. } => TargetKind::Offscreen,
        }
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        match self.drawable {
            Drawable::Offscreen { framebuffer, .. } => Some(framebuffer),
            Drawable::Window(_) => None,
        }
    }

    pub fn color_texture(&self) -> Option<TextureId> {
        match self.drawable {
            Drawable::Offscreen { color, .. } => Some(color),
            Drawable::Window(_) => None,
        }
    }

    pub fn depth_buffer(&self) -> Option<RenderbufferId> {
        match self.drawable {
            Drawable::Offscreen { depth, .. } => Some(depth),
            Drawable::Window(_) => None,
        }
    }

    /// ### English
    /// Binds the target for drawing and sets the viewport to its full size.
    ///
    /// ### 中文
    /// 绑定目标用于绘制，并把 viewport 设为其完整尺寸。
    pub fn bind<C: GpuContext>(&self, context: &mut C) -> Result<()> {
        match self.drawable {
            Drawable::Window(surface) => context.bind_window_surface(surface)?,
            Drawable::Offscreen { framebuffer, .. } => context.bind_framebuffer(framebuffer),
        }
        context.viewport(self.size);
        Ok(())
    }

    /// ### English
    /// Swaps a window target. Offscreen targets have nothing to present.
    ///
    /// ### 中文
    /// 对窗口目标执行交换；离屏目标无需 present。
    pub fn present<C: GpuContext>(&self, context: &mut C) -> Result<()> {
        match self.drawable {
            Drawable::Window(surface) => context.present(surface),
            Drawable::Offscreen { .. } => Ok(()),
        }
    }

    /// ### English
    /// Drains the pipeline, reads the color attachment as RGBA8 and mirrors it to top-left origin.
    ///
    /// A GPU error raised during the readback fails the whole frame.
    ///
    /// ### 中文
    /// 排空管线，以 RGBA8 读取颜色附件，并镜像为左上角原点。
    ///
    /// 回读期间出现任何 GPU 错误都会使整帧失败。
    pub fn read_back<C: GpuContext>(&self, context: &mut C, seq: u64) -> Result<FrameBuffer> {
        let Drawable::Offscreen { framebuffer, .. } = self.drawable else {
            return Err(ResourceError::ReadbackFailed(
                "window targets are presented, not read back".to_string(),
            ));
        };
        context.drain()?;
        context.bind_framebuffer(framebuffer);
        let mut pixels = vec![0u8; byte_len(self.size)];
        context.read_pixels(self.size, &mut pixels)?;
        Ok(FrameBuffer::from_bottom_up(self.size, pixels, seq))
    }

    /// ### English
    /// Deletes the drawable. The owning context must be current on the calling thread.
    ///
    /// ### 中文
    /// 删除可绘制对象；所属上下文必须在调用线程上为 current。
    pub fn destroy<C: GpuContext>(self, context: &mut C, ledger: &ResourceLedger) {
        match self.drawable {
            Drawable::Window(surface) => {
                context.destroy_window_surface(surface);
                ledger.release(GpuObjectKind::WindowSurface);
            }
            Drawable::Offscreen {
                framebuffer,
                color,
                depth,
            } => {
                context.delete_renderbuffer(depth);
                ledger.release(GpuObjectKind::Renderbuffer);
                context.delete_texture(color);
                ledger.release(GpuObjectKind::Texture);
                context.delete_framebuffer(framebuffer);
                ledger.release(GpuObjectKind::Framebuffer);
            }
        }
        debug!(
            "{:?} target destroyed ({}x{})",
            self.kind(),
            self.size.width,
            self.size.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu::software::{Fault, SoftwareBackend, SoftwareWindow};
    use crate::engine::gpu::GpuBackend;
    use crate::engine::host::HostSurfaceProvider;
    use crate::engine::scene::Rgba;

    #[test]
    fn offscreen_round_trip_then_clean_teardown() {
        let backend = SoftwareBackend::new();
        let ledger = ResourceLedger::default();
        let mut context = backend.create_context(None).unwrap();
        context.make_current().unwrap();

        let size = PhysicalSize::new(4, 3);
        let target = SurfaceTarget::offscreen(&mut context, &ledger, size).unwrap();
        assert_eq!(target.kind(), TargetKind::Offscreen);
        assert!(target.framebuffer().is_some());
        assert_eq!(ledger.snapshot().total(), 3);

        target.bind(&mut context).unwrap();
        context.clear(Rgba::RED);
        let frame = target.read_back(&mut context, 1).unwrap();
        assert_eq!(frame.size(), size);
        assert!(frame.pixels().chunks_exact(4).all(|p| p == [255, 0, 0, 255]));

        target.destroy(&mut context, &ledger);
        assert!(ledger.snapshot().is_empty());
        context.release_current();
        context.destroy();
        assert!(backend.live_objects().is_empty());
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn incomplete_framebuffer_is_unwound() {
        let backend = SoftwareBackend::new();
        backend.inject(Fault::FramebufferIncomplete);
        let ledger = ResourceLedger::default();
        let mut context = backend.create_context(None).unwrap();
        context.make_current().unwrap();

        let err =
            SurfaceTarget::offscreen(&mut context, &ledger, PhysicalSize::new(8, 8)).unwrap_err();
        assert_eq!(err, ResourceError::FramebufferIncomplete(0x8CD6));
        assert!(ledger.snapshot().is_empty());
        assert_eq!(backend.live_objects().get(GpuObjectKind::Framebuffer), 0);
        assert_eq!(backend.live_objects().get(GpuObjectKind::Texture), 0);
        context.release_current();
    }

    #[test]
    fn zero_sizes_are_refused() {
        let backend = SoftwareBackend::new();
        let ledger = ResourceLedger::default();
        let mut context = backend.create_context(None).unwrap();
        context.make_current().unwrap();
        assert!(matches!(
            SurfaceTarget::offscreen(&mut context, &ledger, PhysicalSize::new(0, 8)),
            Err(ResourceError::SurfaceCreationFailed(_))
        ));
        context.release_current();
    }

    #[test]
    fn window_targets_present_instead_of_reading_back() {
        let backend = SoftwareBackend::new();
        let ledger = ResourceLedger::default();
        let window = SoftwareWindow::new(PhysicalSize::new(2, 2));
        let surface = window.acquire().unwrap();
        let mut context = backend.create_context(None).unwrap();
        context.make_current().unwrap();

        let target =
            SurfaceTarget::window(&mut context, &ledger, &surface.native, surface.size).unwrap();
        assert_eq!(target.kind(), TargetKind::Window);
        assert!(target.color_texture().is_none());
        target.bind(&mut context).unwrap();
        context.clear(Rgba::WHITE);
        target.present(&mut context).unwrap();
        assert_eq!(window.presented_frames(), 1);
        assert!(matches!(
            target.read_back(&mut context, 1),
            Err(ResourceError::ReadbackFailed(_))
        ));

        target.destroy(&mut context, &ledger);
        assert!(ledger.snapshot().is_empty());
        context.release_current();
    }
}
