//! ### English
//! Backend-independent drawing: render targets, the quad program and the per-frame scene draw.
//!
//! ### 中文
//! 与后端无关的绘制：渲染目标、四边形 program 以及每帧的场景绘制。

pub mod shaders;
pub mod target;

pub use target::{SurfaceTarget, TargetKind};

use log::warn;

use super::coordinator::SharedObjects;
use super::gpu::{GpuContext, QuadDraw};
use super::scene::SceneState;

/// ### English
/// Clears with the scene color and draws the active resource, if it is loaded.
///
/// A resource the share group does not hold is logged and only the clear color is drawn.
///
/// ### 中文
/// 用场景颜色清屏，并在活动资源已加载时绘制它。
///
/// 若场景引用了共享组中不存在的资源，则记录日志并只绘制清屏颜色。
pub fn draw_scene<C: GpuContext>(context: &mut C, scene: &SceneState, objects: &SharedObjects) {
    context.clear(scene.clear_color);
    let Some(resource) = scene.active_resource else {
        return;
    };
    let Some(texture) = objects.texture(resource) else {
        warn!("resource {} is not loaded, drawing the clear color only", resource.0);
        return;
    };
    context.draw_quad(&QuadDraw {
        program: objects.program,
        vertices: objects.vertices,
        texture,
        tint: scene.tint,
        rect: scene.quad,
    });
}
