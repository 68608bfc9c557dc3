//! ### English
//! Deterministic CPU implementation of the GPU seam.
//!
//! It models what the engine relies on from a real driver: share groups, per-thread
//! current-ness, bottom-left framebuffer origin, sticky GL error codes and framebuffer
//! completeness. It also records what a real driver would not tell you: live objects per kind,
//! objects freed only because their share group died, and misuse (calls on a non-current context,
//! destroying a share-group origin before its dependents, reading back without a drain).
//!
//! Textures are always sampled nearest, regardless of the requested filter.
//!
//! ### 中文
//! GPU 接口的确定性 CPU 实现。
//!
//! 它模拟引擎依赖的真实驱动行为：共享组、按线程的 current 状态、左下角原点的 framebuffer、
//! 粘滞的 GL 错误码以及 framebuffer 完整性。同时记录真实驱动不会告诉你的信息：各类存活对象数、
//! 仅因共享组销毁才被释放的对象，以及误用（在非 current 上下文上调用、先于依赖方销毁共享组源上下文、
//! 未排空管线就回读）。
//!
//! 无论请求何种过滤方式，纹理始终按最近点采样。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use dpi::PhysicalSize;
use log::{debug, error, warn};

use super::{
    BufferId, FRAMEBUFFER_COMPLETE, FramebufferId, FramebufferStatus, GpuBackend, GpuContext,
    GpuContextHandle, ProgramId, QuadDraw, RenderbufferId, ShaderId, ShaderStage, TextureFilter,
    TextureId, WindowSurfaceId,
};
use crate::engine::error::{ResourceError, Result};
use crate::engine::frame::{FrameBuffer, byte_len};
use crate::engine::host::{HostSurface, HostSurfaceProvider};
use crate::engine::ledger::{GpuObjectKind, ResourceCounts, ResourceLedger};
use crate::engine::scene::{QuadRect, Rgba};

const INVALID_VALUE: u32 = 0x0501;
const INVALID_OPERATION: u32 = 0x0502;
const INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;
const FRAMEBUFFER_INCOMPLETE_ATTACHMENT: u32 = 0x8CD6;
const FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT: u32 = 0x8CD7;
const FRAMEBUFFER_INCOMPLETE_DIMENSIONS: u32 = 0x8CD9;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// ### English
/// One-shot failure injected into the next matching backend call.
///
/// ### 中文
/// 注入到下一次匹配的后端调用中的一次性故障。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// ### English
    /// Next context creation; `shared` selects creations that join an existing share group.
    ///
    /// ### 中文
    /// 下一次上下文创建；`shared` 用于选择加入已有共享组的那类创建。
    ContextCreation { shared: bool },
    WindowSurface,
    ShaderCompile(ShaderStage),
    ProgramLink,
    FramebufferIncomplete,
    Readback,
    Present,
}

/// ### English
/// Call counters of one backend instance.
///
/// ### 中文
/// 单个后端实例的调用计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub contexts_created: u64,
    pub shared_contexts_created: u64,
    pub window_surfaces_created: u64,
    pub framebuffers_created: u64,
    pub textures_created: u64,
    pub clears: u64,
    pub draws: u64,
    pub drains: u64,
    pub readbacks: u64,
    pub presents: u64,
}

#[derive(Clone)]
struct Image {
    size: PhysicalSize<u32>,
    /// ### English
    /// RGBA8 rows; row 0 is `t = 0` for textures and the bottom row for render targets.
    ///
    /// ### 中文
    /// RGBA8 行数据；对纹理而言第 0 行是 `t = 0`，对渲染目标而言是最底行。
    pixels: Vec<u8>,
}

impl Image {
    fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            size,
            pixels: vec![0; byte_len(size)],
        }
    }

    fn fill(&mut self, rgba: [u8; 4]) {
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.size.width as usize + x as usize) * 4
    }

    fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let at = self.offset(x, y);
        [
            self.pixels[at],
            self.pixels[at + 1],
            self.pixels[at + 2],
            self.pixels[at + 3],
        ]
    }

    fn put(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let at = self.offset(x, y);
        self.pixels[at..at + 4].copy_from_slice(&rgba);
    }
}

struct ShareGroup {
    origin: u64,
    members: HashSet<u64>,
    textures: HashMap<u32, Image>,
    renderbuffers: HashMap<u32, PhysicalSize<u32>>,
    shaders: HashMap<u32, ShaderStage>,
    programs: HashSet<u32>,
    buffers: HashMap<u32, usize>,
}

impl ShareGroup {
    fn new(origin: u64) -> Self {
        Self {
            origin,
            members: HashSet::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashSet::new(),
            buffers: HashMap::new(),
        }
    }

    fn remaining(&self) -> [(GpuObjectKind, usize); 5] {
        [
            (GpuObjectKind::Texture, self.textures.len()),
            (GpuObjectKind::Renderbuffer, self.renderbuffers.len()),
            (GpuObjectKind::Shader, self.shaders.len()),
            (GpuObjectKind::Program, self.programs.len()),
            (GpuObjectKind::Buffer, self.buffers.len()),
        ]
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Bound {
    Nothing,
    Window(u32),
    Framebuffer(u32),
}

#[derive(Default)]
struct FramebufferRecord {
    color: Option<u32>,
    depth: Option<u32>,
}

struct WindowRecord {
    native: SoftwareWindow,
    back: Image,
}

struct ContextRecord {
    group: u64,
    current_on: Option<ThreadId>,
    error: u32,
    bound: Bound,
    viewport: PhysicalSize<u32>,
    /// ### English
    /// Commands submitted since the last drain.
    ///
    /// ### 中文
    /// 自上次排空以来提交的命令数。
    undrained: u32,
    framebuffers: HashMap<u32, FramebufferRecord>,
    windows: HashMap<u32, WindowRecord>,
}

struct DeviceState {
    next_name: u32,
    next_context: u64,
    next_group: u64,
    contexts: HashMap<u64, ContextRecord>,
    groups: HashMap<u64, ShareGroup>,
    current: HashMap<ThreadId, u64>,
    faults: Vec<Fault>,
    violations: Vec<String>,
    stats: SoftwareStats,
}

impl DeviceState {
    fn next_name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }

    fn violation(&mut self, message: String) {
        error!("GPU misuse: {message}");
        self.violations.push(message);
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }

    fn set_error(&mut self, context: u64, code: u32) {
        if let Some(record) = self.contexts.get_mut(&context)
            && record.error == 0
        {
            record.error = code;
        }
    }

    /// ### English
    /// `true` when `context` is current on the calling thread; otherwise raises
    /// `GL_INVALID_OPERATION` and records the misuse.
    ///
    /// ### 中文
    /// 若 `context` 在调用线程上为 current 则返回 `true`；否则设置 `GL_INVALID_OPERATION` 并记录误用。
    fn check_current(&mut self, context: u64, call: &str) -> bool {
        let me = thread::current().id();
        match self.contexts.get_mut(&context) {
            Some(record) if record.current_on == Some(me) => true,
            Some(record) => {
                if record.error == 0 {
                    record.error = INVALID_OPERATION;
                }
                self.violation(format!(
                    "{call} on context {context} which is not current on this thread"
                ));
                false
            }
            None => {
                self.violation(format!("{call} on destroyed context {context}"));
                false
            }
        }
    }
}

struct GateState {
    held: bool,
    entered: usize,
}

struct SoftwareDevice {
    connection: u64,
    state: Mutex<DeviceState>,
    live: ResourceLedger,
    leaked: ResourceLedger,
    gate: Mutex<GateState>,
    gate_changed: Condvar,
}

impl SoftwareDevice {
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_gate(&self) -> MutexGuard<'_, GateState> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ### English
    /// Blocks the calling render while a `RenderHold` is alive.
    ///
    /// ### 中文
    /// 当 `RenderHold` 存活时阻塞当前渲染。
    fn pass_gate(&self) {
        let mut gate = self.lock_gate();
        gate.entered += 1;
        self.gate_changed.notify_all();
        while gate.held {
            gate = self
                .gate_changed
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn move_to_leaked(&self, kind: GpuObjectKind, count: usize) {
        for _ in 0..count {
            self.live.release(kind);
            self.leaked.track(kind);
        }
    }
}

/// ### English
/// CPU GPU backend. Cloning shares the same device (same display connection and share groups).
///
/// ### 中文
/// CPU 实现的 GPU 后端。clone 后共享同一设备（同一显示连接与共享组）。
#[derive(Clone)]
pub struct SoftwareBackend {
    device: Arc<SoftwareDevice>,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            device: Arc::new(SoftwareDevice {
                connection: NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(DeviceState {
                    next_name: 0,
                    next_context: 0,
                    next_group: 0,
                    contexts: HashMap::new(),
                    groups: HashMap::new(),
                    current: HashMap::new(),
                    faults: Vec::new(),
                    violations: Vec::new(),
                    stats: SoftwareStats::default(),
                }),
                live: ResourceLedger::default(),
                leaked: ResourceLedger::default(),
                gate: Mutex::new(GateState {
                    held: false,
                    entered: 0,
                }),
                gate_changed: Condvar::new(),
            }),
        }
    }

    /// ### English
    /// Arms a one-shot failure for the next matching call.
    ///
    /// ### 中文
    /// 为下一次匹配的调用设置一次性故障。
    pub fn inject(&self, fault: Fault) {
        self.device.lock().faults.push(fault);
    }

    /// ### English
    /// Objects currently alive on the device, contexts included.
    ///
    /// ### 中文
    /// 设备上当前存活的对象（包括上下文）。
    pub fn live_objects(&self) -> ResourceCounts {
        self.device.live.snapshot()
    }

    /// ### English
    /// Objects that were never deleted and only went away with their context or share group.
    ///
    /// ### 中文
    /// 从未被显式删除、只是随其上下文或共享组一起消失的对象。
    pub fn leaked_objects(&self) -> ResourceCounts {
        self.device.leaked.snapshot()
    }

    pub fn violations(&self) -> Vec<String> {
        self.device.lock().violations.clone()
    }

    pub fn stats(&self) -> SoftwareStats {
        self.device.lock().stats
    }

    /// ### English
    /// Parks every render at its first `clear` until the returned guard is dropped.
    ///
    /// ### 中文
    /// 让每次渲染在第一次 `clear` 处停住，直到返回的守卫被 drop。
    pub fn hold_renders(&self) -> RenderHold {
        let mut gate = self.device.lock_gate();
        gate.held = true;
        gate.entered = 0;
        RenderHold {
            device: self.device.clone(),
        }
    }
}

/// ### English
/// Guard returned by `SoftwareBackend::hold_renders`; dropping it lets held renders continue.
///
/// ### 中文
/// `SoftwareBackend::hold_renders` 返回的守卫；drop 后被阻塞的渲染继续执行。
pub struct RenderHold {
    device: Arc<SoftwareDevice>,
}

impl RenderHold {
    /// ### English
    /// Number of renders that reached the gate since the hold was taken.
    ///
    /// ### 中文
    /// 自持有以来到达闸门的渲染次数。
    pub fn entered(&self) -> usize {
        self.device.lock_gate().entered
    }

    /// ### English
    /// Waits until at least `count` renders reached the gate. Returns `false` on timeout.
    ///
    /// ### 中文
    /// 等待至少 `count` 次渲染到达闸门；超时返回 `false`。
    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.device.lock_gate();
        while gate.entered < count {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            gate = self
                .device
                .gate_changed
                .wait_timeout(gate, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn release(self) {}
}

impl Drop for RenderHold {
    fn drop(&mut self) {
        self.device.lock_gate().held = false;
        self.device.gate_changed.notify_all();
    }
}

impl GpuBackend for SoftwareBackend {
    type NativeSurface = SoftwareWindow;
    type Context = SoftwareContext;

    fn name(&self) -> &'static str {
        "software"
    }

    fn create_context(&self, share_with: Option<&GpuContextHandle>) -> Result<SoftwareContext> {
        let mut state = self.device.lock();
        let shared = share_with.is_some();
        if state.take_fault(Fault::ContextCreation { shared }) {
            return Err(ResourceError::ContextCreationFailed(
                "injected context creation failure".to_string(),
            ));
        }

        state.next_context += 1;
        let id = state.next_context;
        let group = match share_with {
            Some(origin) => {
                if origin.display_connection != self.device.connection {
                    return Err(ResourceError::ContextCreationFailed(format!(
                        "share origin belongs to display connection {}, not {}",
                        origin.display_connection, self.device.connection
                    )));
                }
                let origin_alive = state
                    .contexts
                    .get(&origin.context_id)
                    .is_some_and(|record| record.group == origin.share_group_id);
                if !origin_alive {
                    return Err(ResourceError::ContextCreationFailed(format!(
                        "share origin context {} is not alive",
                        origin.context_id
                    )));
                }
                origin.share_group_id
            }
            None => {
                state.next_group += 1;
                let group = state.next_group;
                state.groups.insert(group, ShareGroup::new(id));
                group
            }
        };
        if let Some(share_group) = state.groups.get_mut(&group) {
            share_group.members.insert(id);
        }
        state.contexts.insert(
            id,
            ContextRecord {
                group,
                current_on: None,
                error: 0,
                bound: Bound::Nothing,
                viewport: PhysicalSize::new(0, 0),
                undrained: 0,
                framebuffers: HashMap::new(),
                windows: HashMap::new(),
            },
        );
        state.stats.contexts_created += 1;
        if shared {
            state.stats.shared_contexts_created += 1;
        }
        self.device.live.track(GpuObjectKind::Context);
        debug!("software context {id} created in share group {group}");

        Ok(SoftwareContext {
            device: self.device.clone(),
            id,
            group,
            destroyed: false,
        })
    }
}

/// ### English
/// Context of the software backend.
///
/// ### 中文
/// 软件后端的上下文。
pub struct SoftwareContext {
    device: Arc<SoftwareDevice>,
    id: u64,
    group: u64,
    destroyed: bool,
}

impl SoftwareContext {
    fn destroy_context(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let mut state = self.device.lock();
        let Some(record) = state.contexts.remove(&self.id) else {
            return;
        };
        if let Some(thread) = record.current_on {
            state.violation(format!("context {} destroyed while still current", self.id));
            if state.current.get(&thread) == Some(&self.id) {
                state.current.remove(&thread);
            }
        }
        if !record.framebuffers.is_empty() || !record.windows.is_empty() {
            warn!(
                "context {} destroyed with {} framebuffer(s) and {} window surface(s) alive",
                self.id,
                record.framebuffers.len(),
                record.windows.len()
            );
        }
        self.device
            .move_to_leaked(GpuObjectKind::Framebuffer, record.framebuffers.len());
        self.device
            .move_to_leaked(GpuObjectKind::WindowSurface, record.windows.len());
        for window in record.windows.values() {
            window.native.detach();
        }

        let (dependents, was_origin) = match state.groups.get_mut(&self.group) {
            Some(group) => {
                group.members.remove(&self.id);
                (group.members.len(), group.origin == self.id)
            }
            None => (0, false),
        };
        if was_origin && dependents > 0 {
            state.violation(format!(
                "share group origin {} destroyed while {dependents} dependent context(s) alive",
                self.id
            ));
        }
        let orphaned = if dependents == 0 {
            state.groups.remove(&self.group)
        } else {
            None
        };
        if let Some(group) = orphaned {
            for (kind, count) in group.remaining() {
                if count > 0 {
                    warn!("share group {} freed with {count} {kind}(s) alive", self.group);
                }
                self.device.move_to_leaked(kind, count);
            }
        }
        self.device.live.release(GpuObjectKind::Context);
        debug!("software context {} destroyed", self.id);
    }

    fn delete_shared(
        &mut self,
        kind: GpuObjectKind,
        name: u32,
        remove: fn(&mut ShareGroup, u32) -> bool,
    ) {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "delete") {
            return;
        }
        let removed = state
            .groups
            .get_mut(&self.group)
            .is_some_and(|group| remove(group, name));
        if removed {
            self.device.live.release(kind);
        } else {
            state.violation(format!("deleting unknown {kind} {name} on context {}", self.id));
        }
    }
}

/// ### English
/// Target image of the currently bound window surface or framebuffer.
///
/// ### 中文
/// 当前绑定的窗口 surface 或 framebuffer 的目标图像。
fn bound_target<'a>(
    context: &'a mut ContextRecord,
    group: &'a mut ShareGroup,
) -> Option<&'a mut Image> {
    match context.bound {
        Bound::Nothing => None,
        Bound::Window(id) => context.windows.get_mut(&id).map(|window| &mut window.back),
        Bound::Framebuffer(id) => {
            let color = context.framebuffers.get(&id)?.color?;
            group.textures.get_mut(&color)
        }
    }
}

/// ### English
/// Fills the part of `target` covered by `rect` (NDC inside `viewport`), sampling `source` so that
/// its first row lands at the top of the quad.
///
/// ### 中文
/// 填充 `target` 中被 `rect`（`viewport` 内的 NDC）覆盖的部分，对 `source` 采样时使其首行位于四边形顶部。
fn rasterize_quad(
    target: &mut Image,
    viewport: PhysicalSize<u32>,
    source: &Image,
    tint: Rgba,
    rect: QuadRect,
) {
    let span_x = rect.right - rect.left;
    let span_y = rect.top - rect.bottom;
    if viewport.width == 0
        || viewport.height == 0
        || source.size.width == 0
        || source.size.height == 0
        || span_x <= 0.0
        || span_y <= 0.0
    {
        return;
    }

    let width = viewport.width.min(target.size.width);
    let height = viewport.height.min(target.size.height);
    for y in 0..height {
        let ndc_y = (y as f32 + 0.5) / viewport.height as f32 * 2.0 - 1.0;
        if ndc_y < rect.bottom || ndc_y >= rect.top {
            continue;
        }
        let v = (ndc_y - rect.bottom) / span_y;
        let texel_y = (((1.0 - v) * source.size.height as f32) as u32).min(source.size.height - 1);
        for x in 0..width {
            let ndc_x = (x as f32 + 0.5) / viewport.width as f32 * 2.0 - 1.0;
            if ndc_x < rect.left || ndc_x >= rect.right {
                continue;
            }
            let u = (ndc_x - rect.left) / span_x;
            let texel_x = ((u * source.size.width as f32) as u32).min(source.size.width - 1);
            let color = Rgba::from_rgba8(source.texel(texel_x, texel_y)).modulate(tint);
            target.put(x, y, color.to_rgba8());
        }
    }
}

impl GpuContext for SoftwareContext {
    type NativeSurface = SoftwareWindow;

    fn handle(&self) -> GpuContextHandle {
        GpuContextHandle::new(self.id, self.group, self.device.connection, (3, 0), 0)
    }

    fn make_current(&mut self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.device.lock();
        let current_on = match state.contexts.get(&self.id) {
            Some(record) => record.current_on,
            None => {
                state.violation(format!("make_current on destroyed context {}", self.id));
                return Err(ResourceError::MakeCurrentFailed(format!(
                    "context {} was destroyed",
                    self.id
                )));
            }
        };
        match current_on {
            Some(thread) if thread == me => return Ok(()),
            Some(_) => {
                state.violation(format!(
                    "make_current on context {} which is current on another thread",
                    self.id
                ));
                return Err(ResourceError::MakeCurrentFailed(format!(
                    "context {} is current on another thread",
                    self.id
                )));
            }
            None => {}
        }

        if let Some(previous) = state.current.insert(me, self.id)
            && let Some(record) = state.contexts.get_mut(&previous)
        {
            record.current_on = None;
        }
        if let Some(record) = state.contexts.get_mut(&self.id) {
            record.current_on = Some(me);
        }
        Ok(())
    }

    fn release_current(&mut self) {
        let me = thread::current().id();
        let mut state = self.device.lock();
        if let Some(record) = state.contexts.get_mut(&self.id)
            && record.current_on == Some(me)
        {
            record.current_on = None;
            state.current.remove(&me);
        }
    }

    fn create_window_surface(
        &mut self,
        native: &SoftwareWindow,
        size: PhysicalSize<u32>,
    ) -> Result<WindowSurfaceId> {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "create_window_surface") {
            return Err(ResourceError::SurfaceCreationFailed(format!(
                "context {} is not current",
                self.id
            )));
        }
        if state.take_fault(Fault::WindowSurface) {
            return Err(ResourceError::SurfaceCreationFailed(
                "injected window surface failure".to_string(),
            ));
        }
        if size.width == 0 || size.height == 0 {
            return Err(ResourceError::SurfaceCreationFailed(format!(
                "zero-sized window surface {}x{}",
                size.width, size.height
            )));
        }
        if !native.attach() {
            return Err(ResourceError::SurfaceCreationFailed(
                "native window already has a surface".to_string(),
            ));
        }

        let name = state.next_name();
        if let Some(record) = state.contexts.get_mut(&self.id) {
            record.windows.insert(
                name,
                WindowRecord {
                    native: native.clone(),
                    back: Image::new(size),
                },
            );
        }
        state.stats.window_surfaces_created += 1;
        self.device.live.track(GpuObjectKind::WindowSurface);
        Ok(WindowSurfaceId(name))
    }

    fn bind_window_surface(&mut self, surface: WindowSurfaceId) -> Result<()> {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "bind_window_surface") {
            return Err(ResourceError::MakeCurrentFailed(format!(
                "context {} is not current",
                self.id
            )));
        }
        match state.contexts.get_mut(&self.id) {
            Some(record) if record.windows.contains_key(&surface.0) => {
                record.bound = Bound::Window(surface.0);
                Ok(())
            }
            _ => Err(ResourceError::MakeCurrentFailed(format!(
                "unknown window surface {}",
                surface.0
            ))),
        }
    }

    fn present(&mut self, surface: WindowSurfaceId) -> Result<()> {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "present") {
            return Err(ResourceError::PresentFailed(format!(
                "context {} is not current",
                self.id
            )));
        }
        if state.take_fault(Fault::Present) {
            return Err(ResourceError::PresentFailed(
                "injected present failure".to_string(),
            ));
        }
        let Some(window) = state
            .contexts
            .get_mut(&self.id)
            .and_then(|record| record.windows.get_mut(&surface.0))
        else {
            return Err(ResourceError::PresentFailed(format!(
                "unknown window surface {}",
                surface.0
            )));
        };
        window.native.deliver(window.back.size, window.back.pixels.clone());
        if let Some(record) = state.contexts.get_mut(&self.id) {
            record.undrained = 0;
        }
        state.stats.presents += 1;
        Ok(())
    }

    fn destroy_window_surface(&mut self, surface: WindowSurfaceId) {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "destroy_window_surface") {
            return;
        }
        let removed = state.contexts.get_mut(&self.id).and_then(|record| {
            if record.bound == Bound::Window(surface.0) {
                record.bound = Bound::Nothing;
            }
            record.windows.remove(&surface.0)
        });
        match removed {
            Some(window) => {
                window.native.detach();
                self.device.live.release(GpuObjectKind::WindowSurface);
            }
            None => state.violation(format!("destroying unknown window surface {}", surface.0)),
        }
    }

    fn create_texture(
        &mut self,
        size: PhysicalSize<u32>,
        pixels: Option<&[u8]>,
        _filter: TextureFilter,
    ) -> TextureId {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "create_texture") {
            return TextureId(0);
        }
        let mut image = Image::new(size);
        match pixels {
            Some(data) if data.len() == image.pixels.len() => image.pixels.copy_from_slice(data),
            Some(_) => state.set_error(self.id, INVALID_VALUE),
            None => {}
        }
        let name = state.next_name();
        if let Some(group) = state.groups.get_mut(&self.group) {
            group.textures.insert(name, image);
        }
        state.stats.textures_created += 1;
        self.device.live.track(GpuObjectKind::Texture);
        TextureId(name)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.delete_shared(GpuObjectKind::Texture, texture.0, |group, name| {
            group.textures.remove(&name).is_some()
        });
        let mut state = self.device.lock();
        if let Some(record) = state.contexts.get_mut(&self.id) {
            for framebuffer in record.framebuffers.values_mut() {
                if framebuffer.color == Some(texture.0) {
                    framebuffer.color = None;
                }
            }
        }
    }

    fn create_depth_renderbuffer(&mut self, size: PhysicalSize<u32>) -> RenderbufferId {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "create_depth_renderbuffer") {
            return RenderbufferId(0);
        }
        let name = state.next_name();
        if let Some(group) = state.groups.get_mut(&self.group) {
            group.renderbuffers.insert(name, size);
        }
        self.device.live.track(GpuObjectKind::Renderbuffer);
        RenderbufferId(name)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.delete_shared(
            GpuObjectKind::Renderbuffer,
            renderbuffer.0,
            |group, name| group.renderbuffers.remove(&name).is_some(),
        );
        let mut state = self.device.lock();
        if let Some(record) = state.contexts.get_mut(&self.id) {
            for framebuffer in record.framebuffers.values_mut() {
                if framebuffer.depth == Some(renderbuffer.0) {
                    framebuffer.depth = None;
                }
            }
        }
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "create_framebuffer") {
            return FramebufferId(0);
        }
        let name = state.next_name();
        if let Some(record) = state.contexts.get_mut(&self.id) {
            record
                .framebuffers
                .insert(name, FramebufferRecord::default());
        }
        state.stats.framebuffers_created += 1;
        self.device.live.track(GpuObjectKind::Framebuffer);
        FramebufferId(name)
    }

    fn attach_framebuffer(
        &mut self,
        framebuffer: FramebufferId,
        color: TextureId,
        depth: RenderbufferId,
    ) {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "attach_framebuffer") {
            return;
        }
        let (has_color, has_depth) = match state.groups.get(&self.group) {
            Some(group) => (
                group.textures.contains_key(&color.0),
                group.renderbuffers.contains_key(&depth.0),
            ),
            None => (false, false),
        };
        let attached = match state
            .contexts
            .get_mut(&self.id)
            .and_then(|record| record.framebuffers.get_mut(&framebuffer.0))
        {
            Some(record) => {
                record.color = has_color.then_some(color.0);
                record.depth = has_depth.then_some(depth.0);
                has_color && has_depth
            }
            None => false,
        };
        if !attached {
            state.set_error(self.id, INVALID_OPERATION);
        }
    }

    fn framebuffer_status(&mut self, framebuffer: FramebufferId) -> FramebufferStatus {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "framebuffer_status") {
            return FramebufferStatus::Incomplete(0);
        }
        if state.take_fault(Fault::FramebufferIncomplete) {
            return FramebufferStatus::Incomplete(FRAMEBUFFER_INCOMPLETE_ATTACHMENT);
        }
        let Some(record) = state
            .contexts
            .get(&self.id)
            .and_then(|record| record.framebuffers.get(&framebuffer.0))
        else {
            state.set_error(self.id, INVALID_OPERATION);
            return FramebufferStatus::Incomplete(0);
        };
        let (color, depth) = (record.color, record.depth);
        let Some(group) = state.groups.get(&self.group) else {
            return FramebufferStatus::Incomplete(0);
        };
        let color_size = color.and_then(|name| group.textures.get(&name)).map(|image| image.size);
        let depth_size = depth.and_then(|name| group.renderbuffers.get(&name)).copied();
        let status = match (color_size, depth_size) {
            (None, _) => FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT,
            (Some(color), Some(depth)) if color != depth => FRAMEBUFFER_INCOMPLETE_DIMENSIONS,
            _ => FRAMEBUFFER_COMPLETE,
        };
        FramebufferStatus::from_gl(status)
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "bind_framebuffer") {
            return;
        }
        let bound = state.contexts.get_mut(&self.id).is_some_and(|record| {
            let known = record.framebuffers.contains_key(&framebuffer.0);
            if known {
                record.bound = Bound::Framebuffer(framebuffer.0);
            }
            known
        });
        if !bound {
            state.set_error(self.id, INVALID_OPERATION);
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "delete_framebuffer") {
            return;
        }
        let removed = state.contexts.get_mut(&self.id).and_then(|record| {
            if record.bound == Bound::Framebuffer(framebuffer.0) {
                record.bound = Bound::Nothing;
            }
            record.framebuffers.remove(&framebuffer.0)
        });
        match removed {
            Some(record) => {
                self.device.live.release(GpuObjectKind::Framebuffer);
                if record.color.is_some() || record.depth.is_some() {
                    state.violation(format!(
                        "framebuffer {} deleted before its attachments",
                        framebuffer.0
                    ));
                }
            }
            None => state.violation(format!("deleting unknown framebuffer {}", framebuffer.0)),
        }
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId> {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "compile_shader") {
            return Err(ResourceError::ShaderCompileFailed {
                stage,
                log: "context not current".to_string(),
            });
        }
        if state.take_fault(Fault::ShaderCompile(stage)) {
            return Err(ResourceError::ShaderCompileFailed {
                stage,
                log: "injected compile failure".to_string(),
            });
        }
        if !source.contains("void main") {
            return Err(ResourceError::ShaderCompileFailed {
                stage,
                log: "0:1: 'main' : function not found".to_string(),
            });
        }
        let name = state.next_name();
        if let Some(group) = state.groups.get_mut(&self.group) {
            group.shaders.insert(name, stage);
        }
        self.device.live.track(GpuObjectKind::Shader);
        Ok(ShaderId(name))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.delete_shared(GpuObjectKind::Shader, shader.0, |group, name| {
            group.shaders.remove(&name).is_some()
        });
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId> {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "link_program") {
            return Err(ResourceError::ProgramLinkFailed(
                "context not current".to_string(),
            ));
        }
        if state.take_fault(Fault::ProgramLink) {
            return Err(ResourceError::ProgramLinkFailed(
                "injected link failure".to_string(),
            ));
        }
        let stages = state.groups.get(&self.group).map(|group| {
            (
                group.shaders.get(&vertex.0).copied(),
                group.shaders.get(&fragment.0).copied(),
            )
        });
        if stages != Some((Some(ShaderStage::Vertex), Some(ShaderStage::Fragment))) {
            return Err(ResourceError::ProgramLinkFailed(
                "program needs one vertex and one fragment shader".to_string(),
            ));
        }
        let name = state.next_name();
        if let Some(group) = state.groups.get_mut(&self.group) {
            group.programs.insert(name);
        }
        self.device.live.track(GpuObjectKind::Program);
        Ok(ProgramId(name))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.delete_shared(GpuObjectKind::Program, program.0, |group, name| {
            group.programs.remove(&name)
        });
    }

    fn create_vertex_buffer(&mut self, data: &[f32]) -> BufferId {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "create_vertex_buffer") {
            return BufferId(0);
        }
        let name = state.next_name();
        if let Some(group) = state.groups.get_mut(&self.group) {
            group.buffers.insert(name, data.len());
        }
        self.device.live.track(GpuObjectKind::Buffer);
        BufferId(name)
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.delete_shared(GpuObjectKind::Buffer, buffer.0, |group, name| {
            group.buffers.remove(&name).is_some()
        });
    }

    fn viewport(&mut self, size: PhysicalSize<u32>) {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "viewport") {
            return;
        }
        if let Some(record) = state.contexts.get_mut(&self.id) {
            record.viewport = size;
        }
    }

    fn clear(&mut self, color: Rgba) {
        self.device.pass_gate();

        let mut state = self.device.lock();
        if !state.check_current(self.id, "clear") {
            return;
        }
        let DeviceState {
            contexts, groups, ..
        } = &mut *state;
        let (Some(record), Some(group)) = (contexts.get_mut(&self.id), groups.get_mut(&self.group))
        else {
            return;
        };
        record.undrained += 1;
        match bound_target(record, group) {
            Some(target) => target.fill(color.to_rgba8()),
            None => {
                if record.error == 0 {
                    record.error = INVALID_FRAMEBUFFER_OPERATION;
                }
            }
        }
        state.stats.clears += 1;
    }

    fn draw_quad(&mut self, draw: &QuadDraw) {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "draw_quad") {
            return;
        }
        let DeviceState {
            contexts, groups, ..
        } = &mut *state;
        let (Some(record), Some(group)) = (contexts.get_mut(&self.id), groups.get_mut(&self.group))
        else {
            return;
        };
        record.undrained += 1;

        let pipeline_ok = group.programs.contains(&draw.program.0)
            && group.buffers.contains_key(&draw.vertices.0);
        let feedback = match record.bound {
            Bound::Framebuffer(id) => record
                .framebuffers
                .get(&id)
                .is_some_and(|fb| fb.color == Some(draw.texture.0)),
            _ => false,
        };
        let source = group.textures.get(&draw.texture.0).cloned();
        let code = match source {
            _ if !pipeline_ok || feedback => INVALID_OPERATION,
            None => INVALID_VALUE,
            Some(source) => {
                let viewport = record.viewport;
                match bound_target(record, group) {
                    Some(target) => {
                        rasterize_quad(target, viewport, &source, draw.tint, draw.rect);
                        0
                    }
                    None => INVALID_FRAMEBUFFER_OPERATION,
                }
            }
        };
        if code != 0 && record.error == 0 {
            record.error = code;
        }
        state.stats.draws += 1;
    }

    fn drain(&mut self) -> Result<()> {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "drain") {
            return Err(ResourceError::ReadbackFailed(format!(
                "context {} is not current",
                self.id
            )));
        }
        if let Some(record) = state.contexts.get_mut(&self.id) {
            record.undrained = 0;
        }
        state.stats.drains += 1;
        Ok(())
    }

    fn read_pixels(&mut self, size: PhysicalSize<u32>, out: &mut [u8]) -> Result<()> {
        let mut state = self.device.lock();
        if !state.check_current(self.id, "read_pixels") {
            return Err(ResourceError::ReadbackFailed(format!(
                "context {} is not current",
                self.id
            )));
        }
        let injected = state.take_fault(Fault::Readback);
        let undrained = state
            .contexts
            .get(&self.id)
            .map_or(0, |record| record.undrained);
        if undrained > 0 {
            state.violation(format!(
                "read back context {} with {undrained} undrained command(s)",
                self.id
            ));
        }

        let DeviceState {
            contexts, groups, ..
        } = &mut *state;
        let (Some(record), Some(group)) = (contexts.get_mut(&self.id), groups.get_mut(&self.group))
        else {
            return Err(ResourceError::ReadbackFailed("context lost".to_string()));
        };
        if injected && record.error == 0 {
            record.error = INVALID_OPERATION;
        }
        let code = match bound_target(record, group) {
            None => INVALID_FRAMEBUFFER_OPERATION,
            Some(target)
                if size.width > target.size.width
                    || size.height > target.size.height
                    || out.len() != byte_len(size) =>
            {
                INVALID_VALUE
            }
            Some(target) => {
                let stride = size.width as usize * 4;
                let target_stride = target.size.width as usize * 4;
                for (y, row) in out.chunks_exact_mut(stride).enumerate() {
                    let start = y * target_stride;
                    row.copy_from_slice(&target.pixels[start..start + stride]);
                }
                0
            }
        };
        if code != 0 && record.error == 0 {
            record.error = code;
        }
        let error = std::mem::take(&mut record.error);
        if error != 0 {
            return Err(ResourceError::ReadbackFailed(format!(
                "GL error 0x{error:04X} during readback"
            )));
        }
        state.stats.readbacks += 1;
        Ok(())
    }

    fn destroy(mut self) {
        self.destroy_context();
    }
}

impl Drop for SoftwareContext {
    fn drop(&mut self) {
        self.destroy_context();
    }
}

struct WindowState {
    size: PhysicalSize<u32>,
    available: bool,
    attached: u32,
    presented: u64,
    last: Option<FrameBuffer>,
}

/// ### English
/// Host drawable for the software backend. Clones refer to the same window.
///
/// ### 中文
/// 软件后端的宿主可绘制对象；clone 指向同一个窗口。
#[derive(Clone)]
pub struct SoftwareWindow {
    inner: Arc<Mutex<WindowState>>,
}

impl SoftwareWindow {
    pub fn new(size: PhysicalSize<u32>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(WindowState {
                size,
                available: true,
                attached: 0,
                presented: 0,
                last: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.lock().size
    }

    /// ### English
    /// Changes the size reported by `acquire`. The engine still needs a `SurfaceEvent::Resized`.
    ///
    /// ### 中文
    /// 修改 `acquire` 报告的尺寸；引擎仍需要收到 `SurfaceEvent::Resized`。
    pub fn set_size(&self, size: PhysicalSize<u32>) {
        self.lock().size = size;
    }

    /// ### English
    /// When `false`, `acquire` returns `None` as if the host had no drawable yet.
    ///
    /// ### 中文
    /// 为 `false` 时 `acquire` 返回 `None`，如同宿主尚无可绘制对象。
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    pub fn presented_frames(&self) -> u64 {
        self.lock().presented
    }

    /// ### English
    /// Last presented image, top row first.
    ///
    /// ### 中文
    /// 最近一次 present 的图像，首行为顶部。
    pub fn last_presented(&self) -> Option<FrameBuffer> {
        self.lock().last.clone()
    }

    /// ### English
    /// Number of window surfaces currently created on this window (0 or 1).
    ///
    /// ### 中文
    /// 当前在该窗口上创建的窗口 surface 数（0 或 1）。
    pub fn attached_surfaces(&self) -> u32 {
        self.lock().attached
    }

    fn attach(&self) -> bool {
        let mut state = self.lock();
        if state.attached > 0 {
            return false;
        }
        state.attached += 1;
        true
    }

    fn detach(&self) {
        let mut state = self.lock();
        state.attached = state.attached.saturating_sub(1);
    }

    fn deliver(&self, size: PhysicalSize<u32>, bottom_up: Vec<u8>) {
        let mut state = self.lock();
        state.presented += 1;
        let seq = state.presented;
        state.last = Some(FrameBuffer::from_bottom_up(size, bottom_up, seq));
    }
}

impl HostSurfaceProvider<SoftwareWindow> for SoftwareWindow {
    fn acquire(&self) -> Option<HostSurface<SoftwareWindow>> {
        let state = self.lock();
        if !state.available || state.size.width == 0 || state.size.height == 0 {
            return None;
        }
        Some(HostSurface {
            native: self.clone(),
            size: state.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "void main() { gl_Position = vec4(0.0); }";
    const FRAGMENT: &str = "void main() { }";

    fn current_context(
        backend: &SoftwareBackend,
        share_with: Option<&GpuContextHandle>,
    ) -> SoftwareContext {
        let mut context = backend.create_context(share_with).unwrap();
        context.make_current().unwrap();
        context
    }

    fn offscreen(
        context: &mut SoftwareContext,
        size: PhysicalSize<u32>,
    ) -> (FramebufferId, TextureId, RenderbufferId) {
        let color = context.create_texture(size, None, TextureFilter::Linear);
        let depth = context.create_depth_renderbuffer(size);
        let framebuffer = context.create_framebuffer();
        context.attach_framebuffer(framebuffer, color, depth);
        context.bind_framebuffer(framebuffer);
        context.viewport(size);
        (framebuffer, color, depth)
    }

    fn read(context: &mut SoftwareContext, size: PhysicalSize<u32>) -> Result<Vec<u8>> {
        let mut pixels = vec![0; byte_len(size)];
        context.drain()?;
        context.read_pixels(size, &mut pixels)?;
        Ok(pixels)
    }

    #[test]
    fn clear_and_read_back_one_color() {
        let backend = SoftwareBackend::new();
        let mut context = current_context(&backend, None);
        let size = PhysicalSize::new(3, 2);
        let (framebuffer, color, depth) = offscreen(&mut context, size);
        assert_eq!(
            context.framebuffer_status(framebuffer),
            FramebufferStatus::Complete
        );

        context.clear(Rgba::GREEN);
        let pixels = read(&mut context, size).unwrap();
        assert!(pixels.chunks_exact(4).all(|p| p == [0, 255, 0, 255]));

        context.delete_renderbuffer(depth);
        context.delete_texture(color);
        context.delete_framebuffer(framebuffer);
        context.release_current();
        context.destroy();
        assert!(backend.live_objects().is_empty());
        assert!(backend.leaked_objects().is_empty());
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn shared_objects_are_visible_across_the_group() {
        let backend = SoftwareBackend::new();
        let mut origin = current_context(&backend, None);
        let image = [255, 0, 0, 255, 0, 0, 255, 255];
        let texture =
            origin.create_texture(PhysicalSize::new(1, 2), Some(&image), TextureFilter::Nearest);
        let vs = origin.compile_shader(ShaderStage::Vertex, VERTEX).unwrap();
        let fs = origin.compile_shader(ShaderStage::Fragment, FRAGMENT).unwrap();
        let program = origin.link_program(vs, fs).unwrap();
        let vertices = origin.create_vertex_buffer(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        origin.release_current();
        let handle = origin.handle();

        let backend2 = backend.clone();
        let frame = thread::spawn(move || {
            let mut capture = current_context(&backend2, Some(&handle));
            assert_eq!(capture.handle().share_group_id, handle.share_group_id);
            let size = PhysicalSize::new(2, 2);
            let (framebuffer, color, depth) = offscreen(&mut capture, size);
            capture.clear(Rgba::BLACK);
            capture.draw_quad(&QuadDraw {
                program,
                vertices,
                texture,
                tint: Rgba::WHITE,
                rect: QuadRect::FULL,
            });
            let pixels = read(&mut capture, size).unwrap();
            capture.delete_renderbuffer(depth);
            capture.delete_texture(color);
            capture.delete_framebuffer(framebuffer);
            capture.release_current();
            capture.destroy();
            pixels
        })
        .join()
        .unwrap();

        // Image row 0 (red) is drawn at the top, which is the last row in GPU order.
        assert_eq!(&frame[0..4], &[0, 0, 255, 255]);
        assert_eq!(&frame[8..12], &[255, 0, 0, 255]);

        origin.make_current().unwrap();
        origin.delete_program(program);
        origin.delete_shader(vs);
        origin.delete_shader(fs);
        origin.delete_buffer(vertices);
        origin.delete_texture(texture);
        origin.release_current();
        origin.destroy();
        assert!(backend.live_objects().is_empty());
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn sharing_needs_a_live_origin_on_the_same_connection() {
        let backend = SoftwareBackend::new();
        let origin = backend.create_context(None).unwrap();
        let handle = origin.handle();
        origin.destroy();
        assert!(matches!(
            backend.create_context(Some(&handle)),
            Err(ResourceError::ContextCreationFailed(_))
        ));

        let other = SoftwareBackend::new();
        let foreign = other.create_context(None).unwrap();
        assert!(matches!(
            backend.create_context(Some(&foreign.handle())),
            Err(ResourceError::ContextCreationFailed(_))
        ));
    }

    #[test]
    fn a_context_is_current_on_one_thread_at_a_time() {
        let backend = SoftwareBackend::new();
        let mut context = current_context(&backend, None);
        let context = thread::spawn(move || {
            assert!(matches!(
                context.make_current(),
                Err(ResourceError::MakeCurrentFailed(_))
            ));
            context
        })
        .join()
        .unwrap();
        assert_eq!(backend.violations().len(), 1);
        drop(context);
    }

    #[test]
    fn calls_on_a_non_current_context_fail_readback() {
        let backend = SoftwareBackend::new();
        let mut context = current_context(&backend, None);
        let size = PhysicalSize::new(1, 1);
        let (framebuffer, color, depth) = offscreen(&mut context, size);
        context.release_current();
        context.clear(Rgba::RED);
        assert!(!backend.violations().is_empty());

        context.make_current().unwrap();
        assert!(matches!(
            read(&mut context, size),
            Err(ResourceError::ReadbackFailed(_))
        ));
        // The error is consumed by the failed readback.
        assert!(read(&mut context, size).is_ok());
        context.delete_renderbuffer(depth);
        context.delete_texture(color);
        context.delete_framebuffer(framebuffer);
        context.release_current();
        context.destroy();
    }

    #[test]
    fn framebuffer_must_outlive_its_attachments() {
        let backend = SoftwareBackend::new();
        let mut context = current_context(&backend, None);
        let size = PhysicalSize::new(2, 2);

        let (framebuffer, color, depth) = offscreen(&mut context, size);
        context.delete_renderbuffer(depth);
        context.delete_texture(color);
        context.delete_framebuffer(framebuffer);
        assert!(backend.violations().is_empty());

        let (framebuffer, color, depth) = offscreen(&mut context, size);
        context.delete_framebuffer(framebuffer);
        context.delete_renderbuffer(depth);
        context.delete_texture(color);
        let violations = backend.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("before its attachments"));
        assert!(backend.live_objects().is_empty());
        context.release_current();
        context.destroy();
    }

    #[test]
    fn destroying_the_origin_before_dependents_is_recorded() {
        let backend = SoftwareBackend::new();
        let origin = backend.create_context(None).unwrap();
        let dependent = backend.create_context(Some(&origin.handle())).unwrap();
        origin.destroy();
        dependent.destroy();
        let violations = backend.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("origin"));
    }

    #[test]
    fn objects_left_in_a_dead_group_are_leaks() {
        let backend = SoftwareBackend::new();
        let mut context = current_context(&backend, None);
        context.create_texture(PhysicalSize::new(1, 1), None, TextureFilter::Linear);
        context.create_framebuffer();
        context.release_current();
        context.destroy();
        let leaked = backend.leaked_objects();
        assert_eq!(leaked.get(GpuObjectKind::Texture), 1);
        assert_eq!(leaked.get(GpuObjectKind::Framebuffer), 1);
        assert!(backend.live_objects().is_empty());
    }

    #[test]
    fn faults_fire_once() {
        let backend = SoftwareBackend::new();
        backend.inject(Fault::ShaderCompile(ShaderStage::Fragment));
        backend.inject(Fault::FramebufferIncomplete);
        let mut context = current_context(&backend, None);
        assert!(context.compile_shader(ShaderStage::Vertex, VERTEX).is_ok());
        assert!(matches!(
            context.compile_shader(ShaderStage::Fragment, FRAGMENT),
            Err(ResourceError::ShaderCompileFailed {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
        assert!(context.compile_shader(ShaderStage::Fragment, FRAGMENT).is_ok());

        let (framebuffer, _, _) = offscreen(&mut context, PhysicalSize::new(1, 1));
        assert_eq!(
            context.framebuffer_status(framebuffer),
            FramebufferStatus::Incomplete(FRAMEBUFFER_INCOMPLETE_ATTACHMENT)
        );
        assert_eq!(
            context.framebuffer_status(framebuffer),
            FramebufferStatus::Complete
        );
        assert!(context.compile_shader(ShaderStage::Vertex, "junk").is_err());
        context.release_current();
    }

    #[test]
    fn window_surfaces_present_top_row_first() {
        let backend = SoftwareBackend::new();
        let window = SoftwareWindow::new(PhysicalSize::new(2, 2));
        let surface = window.acquire().unwrap();
        let mut context = current_context(&backend, None);
        let id = context
            .create_window_surface(&surface.native, surface.size)
            .unwrap();
        assert!(matches!(
            context.create_window_surface(&surface.native, surface.size),
            Err(ResourceError::SurfaceCreationFailed(_))
        ));
        context.bind_window_surface(id).unwrap();
        context.viewport(surface.size);
        context.clear(Rgba::BLUE);
        context.present(id).unwrap();
        assert_eq!(window.presented_frames(), 1);
        assert_eq!(
            window.last_presented().and_then(|f| f.pixel(1, 1)),
            Some([0, 0, 255, 255])
        );

        context.destroy_window_surface(id);
        assert_eq!(window.attached_surfaces(), 0);
        context.release_current();
        context.destroy();
        assert!(backend.live_objects().is_empty());
    }

    #[test]
    fn hold_parks_renders_until_released() {
        let backend = SoftwareBackend::new();
        let hold = backend.hold_renders();
        let backend2 = backend.clone();
        let renderer = thread::spawn(move || {
            let mut context = current_context(&backend2, None);
            let (framebuffer, color, depth) = offscreen(&mut context, PhysicalSize::new(1, 1));
            context.clear(Rgba::WHITE);
            context.delete_renderbuffer(depth);
            context.delete_texture(color);
            context.delete_framebuffer(framebuffer);
            context.release_current();
            context.destroy();
        });
        assert!(hold.wait_entered(1, Duration::from_secs(5)));
        assert_eq!(backend.stats().clears, 0);
        hold.release();
        renderer.join().unwrap();
        assert_eq!(backend.stats().clears, 1);
    }
}
