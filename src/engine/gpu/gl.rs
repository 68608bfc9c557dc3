//! ### English
//! surfman/gleam backend (feature `gl`).
//!
//! Every worker thread opens its own surfman device on the backend's display connection. Object
//! calls go through gleam; the pipeline drain uses a glow fence and falls back to `glFinish` when
//! sync objects are unavailable.
//!
//! ### 中文
//! surfman/gleam 后端（feature `gl`）。
//!
//! 每个 worker 线程都在后端的显示连接上打开自己的 surfman 设备。对象操作通过 gleam 完成；管线排空使用
//! glow fence，在不支持同步对象时回退到 `glFinish`。

use std::collections::HashMap;
use std::ffi::c_void;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use dpi::PhysicalSize;
use euclid::default::Size2D;
use gleam::gl::{self, Gl};
use glow::HasContext as _;
use log::{debug, error, warn};
use raw_window_handle::{DisplayHandle, RawWindowHandle, WindowHandle};
use surfman::{
    Connection, Context, ContextAttributeFlags, ContextAttributes, Device, GLApi, GLVersion,
    SurfaceAccess, SurfaceType,
};

use super::{
    BufferId, FramebufferId, FramebufferStatus, GpuBackend, GpuContext, GpuContextHandle,
    ProgramId, QuadDraw, RenderbufferId, ShaderId, ShaderStage, TextureFilter, TextureId,
    WindowSurfaceId,
};
use crate::engine::error::{ResourceError, Result};
use crate::engine::scene::Rgba;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// ### English
/// Per-wait bound for the drain fence, in nanoseconds.
///
/// ### 中文
/// 排空 fence 单次等待的上限（纳秒）。
const DRAIN_WAIT_NS: i32 = 100_000_000;
const DRAIN_MAX_WAITS: u32 = 20;

const GLES_HEADER: &str = "#version 300 es";
const DESKTOP_HEADER: &str = "#version 330 core";

fn creation_failed(err: impl std::fmt::Debug) -> ResourceError {
    ResourceError::ContextCreationFailed(format!("{err:?}"))
}

/// ### English
/// Host window handed to the surface worker.
///
/// ### 中文
/// 交给 surface worker 的宿主窗口。
#[derive(Clone, Copy, Debug)]
pub struct GlWindow {
    raw: RawWindowHandle,
}

/// ### English
/// The raw handle is only dereferenced by surfman on the surface worker thread while the host
/// keeps the window alive.
///
/// ### 中文
/// 原始句柄只会在宿主保持窗口存活期间，由 surfman 在 surface worker 线程上解引用。
unsafe impl Send for GlWindow {}

impl GlWindow {
    /// ### English
    /// # Safety
    /// The window must outlive every engine started with it.
    ///
    /// ### 中文
    /// # Safety
    /// 窗口的生命周期必须长于使用它启动的所有引擎。
    pub unsafe fn new(raw: RawWindowHandle) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> RawWindowHandle {
        self.raw
    }
}

/// ### English
/// surfman-backed `GpuBackend` bound to one display connection.
///
/// ### 中文
/// 基于 surfman、绑定到单个显示连接的 `GpuBackend`。
pub struct GlBackend {
    connection: Connection,
    connection_id: u64,
}

/// ### English
/// The connection is only cloned and used to open per-thread devices.
///
/// ### 中文
/// 该连接只会被 clone 并用于在各线程上打开设备。
unsafe impl Send for GlBackend {}
unsafe impl Sync for GlBackend {}

impl GlBackend {
    pub fn new() -> Result<Self> {
        let connection = Connection::new().map_err(creation_failed)?;
        Ok(Self::with_connection(connection))
    }

    pub fn from_display_handle(display: DisplayHandle<'_>) -> Result<Self> {
        let connection = Connection::from_display_handle(display).map_err(creation_failed)?;
        Ok(Self::with_connection(connection))
    }

    fn with_connection(connection: Connection) -> Self {
        Self {
            connection,
            connection_id: NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl GpuBackend for GlBackend {
    type NativeSurface = GlWindow;
    type Context = GlContext;

    fn name(&self) -> &'static str {
        "surfman"
    }

    fn create_context(&self, share_with: Option<&GpuContextHandle>) -> Result<GlContext> {
        if let Some(origin) = share_with
            && origin.display_connection != self.connection_id
        {
            return Err(ResourceError::ContextCreationFailed(format!(
                "share origin belongs to display connection {}, not {}",
                origin.display_connection, self.connection_id
            )));
        }

        let connection = self.connection.clone();
        let adapter = connection.create_adapter().map_err(creation_failed)?;
        let mut device = connection.create_device(&adapter).map_err(creation_failed)?;
        let gl_api = device.gl_api();
        let version = match gl_api {
            GLApi::GLES => GLVersion::new(3, 0),
            GLApi::GL => GLVersion::new(3, 3),
        };
        let descriptor = device
            .create_context_descriptor(&ContextAttributes {
                version,
                flags: ContextAttributeFlags::ALPHA | ContextAttributeFlags::DEPTH,
            })
            .map_err(creation_failed)?;

        // SAFETY: the handle was published by the origin worker, which keeps its boxed context
        // alive until every dependent worker has been joined.
        let origin = share_with.map(|handle| unsafe { &*(handle.native() as *const Context) });
        let mut context = device
            .create_context(&descriptor, origin)
            .map_err(creation_failed)?;

        if let Err(err) = device.make_context_current(&context) {
            let _ = device.destroy_context(&mut context);
            return Err(creation_failed(err));
        }
        let loader = |name: &str| device.get_proc_address(&context, name) as *const c_void;
        let gl: Rc<dyn Gl> = match gl_api {
            GLApi::GLES => unsafe { gl::GlesFns::load_with(loader) },
            GLApi::GL => unsafe { gl::GlFns::load_with(loader) },
        };
        let glow = unsafe {
            glow::Context::from_loader_function(|name| {
                device.get_proc_address(&context, name) as *const _
            })
        };
        let _ = device.make_no_context_current();

        let attributes = device.context_descriptor_attributes(&descriptor);
        let context = Box::new(context);
        let context_id = device.context_id(&context).0;
        let handle = GpuContextHandle::new(
            context_id,
            share_with.map_or(context_id, |origin| origin.share_group_id),
            self.connection_id,
            (attributes.version.major, attributes.version.minor),
            &*context as *const Context as usize,
        );
        debug!(
            "surfman context {context_id} created (GL {}.{}, share group {})",
            attributes.version.major, attributes.version.minor, handle.share_group_id
        );

        Ok(GlContext {
            connection,
            device,
            context: Some(context),
            gl,
            glow,
            handle,
            shader_header: match gl_api {
                GLApi::GLES => GLES_HEADER,
                GLApi::GL => DESKTOP_HEADER,
            },
            vao: 0,
            uniforms: HashMap::new(),
            window: None,
            next_window: 0,
        })
    }
}

#[derive(Clone, Copy)]
struct QuadUniforms {
    rect: i32,
    tint: i32,
    texture: i32,
}

impl QuadUniforms {
    fn locate(gl: &dyn Gl, program: gl::GLuint) -> Self {
        Self {
            rect: gl.get_uniform_location(program, "u_rect"),
            tint: gl.get_uniform_location(program, "u_tint"),
            texture: gl.get_uniform_location(program, "u_texture"),
        }
    }
}

#[derive(Clone, Copy)]
struct BoundWindow {
    id: WindowSurfaceId,
}

/// ### English
/// One surfman context plus the GL loaders for it. Lives and dies on its worker thread.
///
/// ### 中文
/// 一个 surfman 上下文及其 GL 加载器；在所属 worker 线程上创建与销毁。
pub struct GlContext {
    connection: Connection,
    device: Device,
    context: Option<Box<Context>>,
    gl: Rc<dyn Gl>,
    glow: glow::Context,
    handle: GpuContextHandle,
    shader_header: &'static str,
    /// ### English
    /// Vertex array objects are never shared, so each context keeps its own (`0` until first draw).
    ///
    /// ### 中文
    /// 顶点数组对象不会被共享，因此每个上下文各自持有一个（首次绘制前为 `0`）。
    vao: gl::GLuint,
    uniforms: HashMap<ProgramId, QuadUniforms>,
    window: Option<BoundWindow>,
    next_window: u32,
}

impl GlContext {
    fn check_window(&self, surface: WindowSurfaceId) -> Result<()> {
        match self.window {
            Some(bound) if bound.id == surface => Ok(()),
            _ => Err(ResourceError::SurfaceCreationFailed(format!(
                "window surface {} is not bound to context {}",
                surface.0, self.handle.context_id
            ))),
        }
    }

    fn drain_errors(&self) {
        for _ in 0..8 {
            if self.gl.get_error() == gl::NO_ERROR {
                break;
            }
        }
    }

    fn destroy_context(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };
        if self.window.take().is_some()
            && let Ok(Some(mut surface)) = self.device.unbind_surface_from_context(&mut context)
        {
            warn!(
                "context {} destroyed with a bound window surface",
                self.handle.context_id
            );
            let _ = self.device.destroy_surface(&mut context, &mut surface);
        }
        if self.vao != 0 && self.device.make_context_current(&context).is_ok() {
            self.gl.delete_vertex_arrays(&[self.vao]);
            self.vao = 0;
        }
        let _ = self.device.make_no_context_current();
        if let Err(err) = self.device.destroy_context(&mut context) {
            error!(
                "failed to destroy surfman context {}: {err:?}",
                self.handle.context_id
            );
        }
    }
}

impl GpuContext for GlContext {
    type NativeSurface = GlWindow;

    fn handle(&self) -> GpuContextHandle {
        self.handle
    }

    fn make_current(&mut self) -> Result<()> {
        let Some(context) = self.context.as_deref() else {
            return Err(ResourceError::MakeCurrentFailed(format!(
                "context {} was destroyed",
                self.handle.context_id
            )));
        };
        self.device
            .make_context_current(context)
            .map_err(|err| ResourceError::MakeCurrentFailed(format!("{err:?}")))
    }

    fn release_current(&mut self) {
        let _ = self.device.make_no_context_current();
    }

    fn create_window_surface(
        &mut self,
        native: &GlWindow,
        size: PhysicalSize<u32>,
    ) -> Result<WindowSurfaceId> {
        let surface_failed = |err: surfman::Error| {
            ResourceError::SurfaceCreationFailed(format!("{err:?}"))
        };
        if self.window.is_some() {
            return Err(ResourceError::SurfaceCreationFailed(
                "context already has a window surface".to_string(),
            ));
        }
        let Some(context) = self.context.as_deref_mut() else {
            return Err(ResourceError::SurfaceCreationFailed(
                "context was destroyed".to_string(),
            ));
        };
        // SAFETY: `GlWindow::new` requires the host window to outlive the engine.
        let window = unsafe { WindowHandle::borrow_raw(native.raw) };
        let native_widget = self
            .connection
            .create_native_widget_from_window_handle(
                window,
                Size2D::new(size.width as i32, size.height as i32),
            )
            .map_err(surface_failed)?;
        let surface = self
            .device
            .create_surface(context, SurfaceAccess::GPUOnly, SurfaceType::Widget { native_widget })
            .map_err(surface_failed)?;
        if let Err((err, mut surface)) = self.device.bind_surface_to_context(context, surface) {
            let _ = self.device.destroy_surface(context, &mut surface);
            return Err(surface_failed(err));
        }

        self.next_window += 1;
        let id = WindowSurfaceId(self.next_window);
        self.window = Some(BoundWindow { id });
        Ok(id)
    }

    fn bind_window_surface(&mut self, surface: WindowSurfaceId) -> Result<()> {
        self.check_window(surface)?;
        let Some(context) = self.context.as_deref() else {
            return Err(ResourceError::SurfaceCreationFailed(
                "context was destroyed".to_string(),
            ));
        };
        let info = self
            .device
            .context_surface_info(context)
            .map_err(|err| ResourceError::SurfaceCreationFailed(format!("{err:?}")))?;
        let framebuffer = info
            .and_then(|info| info.framebuffer_object)
            .map_or(0, |fbo| fbo.0.get());
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer);
        Ok(())
    }

    fn present(&mut self, surface: WindowSurfaceId) -> Result<()> {
        let present_failed = |err: surfman::Error| ResourceError::PresentFailed(format!("{err:?}"));
        self.check_window(surface)?;
        let Some(context) = self.context.as_deref_mut() else {
            return Err(ResourceError::PresentFailed("context was destroyed".to_string()));
        };
        let Some(mut bound) = self
            .device
            .unbind_surface_from_context(context)
            .map_err(present_failed)?
        else {
            return Err(ResourceError::PresentFailed(
                "no surface bound to the context".to_string(),
            ));
        };
        let presented = self.device.present_surface(context, &mut bound);
        if let Err((err, mut bound)) = self.device.bind_surface_to_context(context, bound) {
            let _ = self.device.destroy_surface(context, &mut bound);
            self.window = None;
            return Err(present_failed(err));
        }
        presented.map_err(present_failed)
    }

    fn destroy_window_surface(&mut self, surface: WindowSurfaceId) {
        if self.check_window(surface).is_err() {
            warn!("destroying unknown window surface {}", surface.0);
            return;
        }
        self.window = None;
        let Some(context) = self.context.as_deref_mut() else {
            return;
        };
        match self.device.unbind_surface_from_context(context) {
            Ok(Some(mut bound)) => {
                if let Err(err) = self.device.destroy_surface(context, &mut bound) {
                    error!("failed to destroy window surface {}: {err:?}", surface.0);
                }
            }
            Ok(None) => {}
            Err(err) => error!("failed to unbind window surface {}: {err:?}", surface.0),
        }
    }

    fn create_texture(
        &mut self,
        size: PhysicalSize<u32>,
        pixels: Option<&[u8]>,
        filter: TextureFilter,
    ) -> TextureId {
        let filter = match filter {
            TextureFilter::Nearest => gl::NEAREST,
            TextureFilter::Linear => gl::LINEAR,
        } as gl::GLint;
        let texture = self.gl.gen_textures(1)[0];
        self.gl.bind_texture(gl::TEXTURE_2D, texture);
        self.gl.pixel_store_i(gl::UNPACK_ALIGNMENT, 1);
        self.gl.tex_image_2d(
            gl::TEXTURE_2D,
            0,
            gl::RGBA as gl::GLint,
            size.width as gl::GLsizei,
            size.height as gl::GLsizei,
            0,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            pixels,
        );
        self.gl
            .tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, filter);
        self.gl
            .tex_parameter_i(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, filter);
        self.gl.tex_parameter_i(
            gl::TEXTURE_2D,
            gl::TEXTURE_WRAP_S,
            gl::CLAMP_TO_EDGE as gl::GLint,
        );
        self.gl.tex_parameter_i(
            gl::TEXTURE_2D,
            gl::TEXTURE_WRAP_T,
            gl::CLAMP_TO_EDGE as gl::GLint,
        );
        self.gl.bind_texture(gl::TEXTURE_2D, 0);
        TextureId(texture)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.gl.delete_textures(&[texture.0]);
    }

    fn create_depth_renderbuffer(&mut self, size: PhysicalSize<u32>) -> RenderbufferId {
        let renderbuffer = self.gl.gen_renderbuffers(1)[0];
        self.gl.bind_renderbuffer(gl::RENDERBUFFER, renderbuffer);
        self.gl.renderbuffer_storage(
            gl::RENDERBUFFER,
            gl::DEPTH_COMPONENT16,
            size.width as gl::GLsizei,
            size.height as gl::GLsizei,
        );
        self.gl.bind_renderbuffer(gl::RENDERBUFFER, 0);
        RenderbufferId(renderbuffer)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.gl.delete_renderbuffers(&[renderbuffer.0]);
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        FramebufferId(self.gl.gen_framebuffers(1)[0])
    }

    fn attach_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        color: TextureId,
        depth: RenderbufferId,
    ) {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer.0);
        self.gl.framebuffer_texture_2d(
            gl::FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            color.0,
            0,
        );
        self.gl.framebuffer_renderbuffer(
            gl::FRAMEBUFFER,
            gl::DEPTH_ATTACHMENT,
            gl::RENDERBUFFER,
            depth.0,
        );
    }

    fn framebuffer_status(&mut self, framebuffer: FramebufferId) -> FramebufferStatus {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer.0);
        FramebufferStatus::from_gl(self.gl.check_frame_buffer_status(gl::FRAMEBUFFER))
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, framebuffer.0);
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, 0);
        self.gl.delete_framebuffers(&[framebuffer.0]);
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId> {
        let source = match source.strip_prefix(GLES_HEADER) {
            Some(body) if self.shader_header != GLES_HEADER => {
                format!("{}{body}", self.shader_header)
            }
            _ => source.to_string(),
        };
        let kind = match stage {
            ShaderStage::Vertex => gl::VERTEX_SHADER,
            ShaderStage::Fragment => gl::FRAGMENT_SHADER,
        };
        let shader = self.gl.create_shader(kind);
        self.gl.shader_source(shader, &[source.as_bytes()]);
        self.gl.compile_shader(shader);
        let mut status = [0];
        unsafe {
            self.gl
                .get_shader_iv(shader, gl::COMPILE_STATUS, &mut status);
        }
        if status[0] == 0 {
            let log = self.gl.get_shader_info_log(shader);
            self.gl.delete_shader(shader);
            return Err(ResourceError::ShaderCompileFailed { stage, log });
        }
        Ok(ShaderId(shader))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.gl.delete_shader(shader.0);
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId> {
        let program = self.gl.create_program();
        self.gl.attach_shader(program, vertex.0);
        self.gl.attach_shader(program, fragment.0);
        self.gl.bind_attrib_location(program, 0, "a_unit");
        self.gl.link_program(program);
        let mut status = [0];
        unsafe {
            self.gl
                .get_program_iv(program, gl::LINK_STATUS, &mut status);
        }
        if status[0] == 0 {
            let log = self.gl.get_program_info_log(program);
            self.gl.delete_program(program);
            return Err(ResourceError::ProgramLinkFailed(log));
        }
        self.gl.detach_shader(program, vertex.0);
        self.gl.detach_shader(program, fragment.0);
        Ok(ProgramId(program))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.uniforms.remove(&program);
        self.gl.delete_program(program.0);
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> BufferId {
        let buffer = self.gl.gen_buffers(1)[0];
        self.gl.bind_buffer(gl::ARRAY_BUFFER, buffer);
        gl::buffer_data(&*self.gl, gl::ARRAY_BUFFER, data, gl::STATIC_DRAW);
        self.gl.bind_buffer(gl::ARRAY_BUFFER, 0);
        BufferId(buffer)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.gl.delete_buffers(&[buffer.0]);
    }

    fn viewport(&mut self, size: PhysicalSize<u32>) {
        self.gl
            .viewport(0, 0, size.width as gl::GLsizei, size.height as gl::GLsizei);
    }

    fn clear(&mut self, color: Rgba) {
        self.gl.clear_color(color.r, color.g, color.b, color.a);
        self.gl.clear(gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT);
    }

    fn draw_quad(&mut self, draw: &QuadDraw) {
        let gl = self.gl.clone();
        if self.vao == 0 {
            self.vao = gl.gen_vertex_arrays(1)[0];
        }
        let uniforms = *self
            .uniforms
            .entry(draw.program)
            .or_insert_with(|| QuadUniforms::locate(&*gl, draw.program.0));

        gl.use_program(draw.program.0);
        gl.bind_vertex_array(self.vao);
        gl.bind_buffer(gl::ARRAY_BUFFER, draw.vertices.0);
        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer(0, 2, gl::FLOAT, false, 0, 0);
        gl.active_texture(gl::TEXTURE0);
        gl.bind_texture(gl::TEXTURE_2D, draw.texture.0);
        gl.uniform_1i(uniforms.texture, 0);
        gl.uniform_4f(
            uniforms.rect,
            draw.rect.left,
            draw.rect.bottom,
            draw.rect.right,
            draw.rect.top,
        );
        gl.uniform_4f(
            uniforms.tint,
            draw.tint.r,
            draw.tint.g,
            draw.tint.b,
            draw.tint.a,
        );
        gl.draw_arrays(gl::TRIANGLE_STRIP, 0, 4);

        gl.bind_texture(gl::TEXTURE_2D, 0);
        gl.bind_buffer(gl::ARRAY_BUFFER, 0);
        gl.bind_vertex_array(0);
        gl.use_program(0);
    }

    fn drain(&mut self) -> Result<()> {
        let fence = match unsafe { self.glow.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) } {
            Ok(fence) => fence,
            Err(err) => {
                debug!("fence_sync unavailable ({err}), draining with glFinish");
                self.gl.finish();
                return Ok(());
            }
        };
        let mut signaled = false;
        for _ in 0..DRAIN_MAX_WAITS {
            let status = unsafe {
                self.glow
                    .client_wait_sync(fence, glow::SYNC_FLUSH_COMMANDS_BIT, DRAIN_WAIT_NS)
            };
            match status {
                glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => {
                    signaled = true;
                    break;
                }
                glow::TIMEOUT_EXPIRED => continue,
                _ => break,
            }
        }
        unsafe {
            self.glow.delete_sync(fence);
        }
        if !signaled {
            warn!(
                "drain fence on context {} did not signal, falling back to glFinish",
                self.handle.context_id
            );
            self.gl.finish();
        }
        Ok(())
    }

    fn read_pixels(&mut self, size: PhysicalSize<u32>, out: &mut [u8]) -> Result<()> {
        self.drain_errors();
        self.gl.pixel_store_i(gl::PACK_ALIGNMENT, 1);
        self.gl.read_pixels_into_buffer(
            0,
            0,
            size.width as gl::GLsizei,
            size.height as gl::GLsizei,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            out,
        );
        match self.gl.get_error() {
            gl::NO_ERROR => Ok(()),
            code => Err(ResourceError::ReadbackFailed(format!(
                "GL error 0x{code:04X} during readback"
            ))),
        }
    }

    fn destroy(mut self) {
        self.destroy_context();
    }
}

impl Drop for GlContext {
    fn drop(&mut self) {
        self.destroy_context();
    }
}
