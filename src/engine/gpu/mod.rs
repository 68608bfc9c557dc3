//! ### English
//! GPU backend seam.
//!
//! A `GpuBackend` is a thread-safe factory; the `GpuContext` it creates is thread-affine and is
//! owned, used and destroyed by exactly one worker thread. Contexts created with `share_with`
//! join the share group of an existing context: textures, renderbuffers, shaders, programs and
//! buffers become visible to both, framebuffers stay per context.
//!
//! ### 中文
//! GPU 后端接口。
//!
//! `GpuBackend` 是线程安全的工厂；它创建的 `GpuContext` 与线程绑定，只由一个 worker 线程持有、使用并销毁。
//! 通过 `share_with` 创建的上下文会加入已有上下文的共享组：纹理、renderbuffer、着色器、program 与 buffer
//! 对双方可见，framebuffer 仍属于各自的上下文。

use std::fmt;

use dpi::PhysicalSize;

use super::error::Result;
use super::scene::{QuadRect, Rgba};

#[cfg(feature = "gl")]
pub mod gl;
pub mod software;

/// ### English
/// `GL_FRAMEBUFFER_COMPLETE`.
///
/// ### 中文
/// `GL_FRAMEBUFFER_COMPLETE`。
pub const FRAMEBUFFER_COMPLETE: u32 = 0x8CD5;

/// ### English
/// Identity of a GPU context and of the share group it belongs to.
///
/// Plain data: it can be sent to another thread to create a context in the same share group,
/// but it never lets that thread make the origin context current.
///
/// ### 中文
/// GPU 上下文及其所属共享组的身份信息。
///
/// 纯数据：可以发送到其它线程用于在同一共享组中创建上下文，但不允许那个线程把源上下文设为 current。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpuContextHandle {
    pub context_id: u64,
    pub share_group_id: u64,
    pub display_connection: u64,
    pub client_version: (u8, u8),
    /// ### English
    /// Backend-specific native context address (`0` when the backend does not need one).
    ///
    /// ### 中文
    /// 后端相关的原生上下文地址（后端不需要时为 `0`）。
    native: usize,
}

impl GpuContextHandle {
    pub(crate) fn new(
        context_id: u64,
        share_group_id: u64,
        display_connection: u64,
        client_version: (u8, u8),
        native: usize,
    ) -> Self {
        Self {
            context_id,
            share_group_id,
            display_connection,
            client_version,
            native,
        }
    }

    #[cfg_attr(not(feature = "gl"), allow(dead_code))]
    pub(crate) fn native(&self) -> usize {
        self.native
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct WindowSurfaceId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderbufferId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

/// ### English
/// Result of a framebuffer completeness query.
///
/// ### 中文
/// framebuffer 完整性查询结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(u32),
}

impl FramebufferStatus {
    pub fn from_gl(status: u32) -> Self {
        if status == FRAMEBUFFER_COMPLETE {
            Self::Complete
        } else {
            Self::Incomplete(status)
        }
    }
}

/// ### English
/// One textured quad draw.
///
/// ### 中文
/// 一次纹理四边形绘制。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadDraw {
    pub program: ProgramId,
    pub vertices: BufferId,
    pub texture: TextureId,
    pub tint: Rgba,
    pub rect: QuadRect,
}

/// ### English
/// Thread-safe factory for thread-affine contexts.
///
/// ### 中文
/// 创建线程绑定上下文的线程安全工厂。
pub trait GpuBackend: Send + Sync + 'static {
    /// ### English
    /// Host drawable handed to `GpuContext::create_window_surface`.
    ///
    /// ### 中文
    /// 传给 `GpuContext::create_window_surface` 的宿主可绘制对象。
    type NativeSurface: Send + 'static;
    type Context: GpuContext<NativeSurface = Self::NativeSurface>;

    fn name(&self) -> &'static str;

    /// ### English
    /// Creates a context on the calling thread. The context is not current on return.
    ///
    /// With `share_with`, the new context joins that context's share group; the origin must be
    /// alive for the duration of this call.
    ///
    /// ### 中文
    /// 在调用线程创建上下文；返回时该上下文不是 current。
    ///
    /// 指定 `share_with` 时新上下文加入其共享组；调用期间源上下文必须存活。
    fn create_context(&self, share_with: Option<&GpuContextHandle>) -> Result<Self::Context>;
}

/// ### English
/// GL-shaped API of one context. Every call other than `handle` and `make_current` requires the
/// context to be current on the calling thread.
///
/// Object creation mirrors `glGen*`: it does not fail, errors surface through readback.
///
/// ### 中文
/// 单个上下文的类 GL API。除 `handle` 与 `make_current` 外，所有调用都要求该上下文在调用线程上为 current。
///
/// 对象创建与 `glGen*` 一致：不会失败，错误通过回读暴露。
pub trait GpuContext {
    type NativeSurface;

    fn handle(&self) -> GpuContextHandle;

    fn make_current(&mut self) -> Result<()>;
    fn release_current(&mut self);

    fn create_window_surface(
        &mut self,
        native: &Self::NativeSurface,
        size: PhysicalSize<u32>,
    ) -> Result<WindowSurfaceId>;
    fn bind_window_surface(&mut self, surface: WindowSurfaceId) -> Result<()>;
    fn present(&mut self, surface: WindowSurfaceId) -> Result<()>;
    fn destroy_window_surface(&mut self, surface: WindowSurfaceId);

    /// ### English
    /// `pixels`, when given, are RGBA8 rows with the first row at texture coordinate `t = 0`.
    ///
    /// ### 中文
    /// 若提供 `pixels`，其为 RGBA8 行数据，首行对应纹理坐标 `t = 0`。
    fn create_texture(
        &mut self,
        size: PhysicalSize<u32>,
        pixels: Option<&[u8]>,
        filter: TextureFilter,
    ) -> TextureId;
    fn delete_texture(&mut self, texture: TextureId);

    fn create_depth_renderbuffer(&mut self, size: PhysicalSize<u32>) -> RenderbufferId;
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn attach_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        color: TextureId,
        depth: RenderbufferId,
    );
    fn framebuffer_status(&mut self, framebuffer: FramebufferId) -> FramebufferStatus;
    fn bind_framebuffer(&mut self, framebuffer: FramebufferId);
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    /// ### English
    /// On failure the shader object is already deleted.
    ///
    /// ### 中文
    /// 失败时 shader 对象已被删除。
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId>;
    fn delete_shader(&mut self, shader: ShaderId);

    /// ### English
    /// On failure the program object is already deleted; the shaders are left to the caller.
    ///
    /// ### 中文
    /// 失败时 program 对象已被删除；shader 仍由调用方处理。
    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId>;
    fn delete_program(&mut self, program: ProgramId);

    fn create_vertex_buffer(&mut self, data: &[f32]) -> BufferId;
    fn delete_buffer(&mut self, buffer: BufferId);

    fn viewport(&mut self, size: PhysicalSize<u32>);
    fn clear(&mut self, color: Rgba);
    fn draw_quad(&mut self, draw: &QuadDraw);

    /// ### English
    /// Blocks until every submitted command has executed (pipeline drain).
    ///
    /// ### 中文
    /// 阻塞直到所有已提交命令执行完毕（管线排空）。
    fn drain(&mut self) -> Result<()>;

    /// ### English
    /// Reads the bound framebuffer as tightly packed RGBA8, GPU row order (row 0 = bottom), and
    /// fails if any GPU error is pending.
    ///
    /// ### 中文
    /// 以紧密排列的 RGBA8、GPU 行序（第 0 行 = 底部）读取当前绑定的 framebuffer；若存在未处理的 GPU 错误则失败。
    fn read_pixels(&mut self, size: PhysicalSize<u32>, out: &mut [u8]) -> Result<()>;

    /// ### English
    /// Destroys the context. Callers release current-ness first.
    ///
    /// ### 中文
    /// 销毁上下文；调用方需先解除 current。
    fn destroy(self);
}
