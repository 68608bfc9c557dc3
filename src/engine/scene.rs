//! ### English
//! Logical scene parameters drawn by both workers.
//!
//! Each worker keeps its own copy; updates are delivered latest-wins and never replayed.
//!
//! ### 中文
//! 两个 worker 共同绘制的逻辑场景参数。
//!
//! 每个 worker 持有自己的副本；更新以 latest-wins 方式投递，中间状态不会重放。

/// ### English
/// Linear RGBA color with components in `0.0..=1.0`.
///
/// ### 中文
/// 分量范围为 `0.0..=1.0` 的 RGBA 颜色。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const RED: Self = Self::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::new(0.0, 0.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// ### English
    /// Quantizes to RGBA8 the way a UNORM8 color attachment stores it (clamp, scale, round).
    ///
    /// ### 中文
    /// 按 UNORM8 颜色附件的存储方式量化为 RGBA8（截断、缩放、四舍五入）。
    pub fn to_rgba8(self) -> [u8; 4] {
        [
            unorm8(self.r),
            unorm8(self.g),
            unorm8(self.b),
            unorm8(self.a),
        ]
    }

    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self::new(
            rgba[0] as f32 / 255.0,
            rgba[1] as f32 / 255.0,
            rgba[2] as f32 / 255.0,
            rgba[3] as f32 / 255.0,
        )
    }

    pub(crate) fn modulate(self, other: Self) -> Self {
        Self::new(
            self.r * other.r,
            self.g * other.g,
            self.b * other.b,
            self.a * other.a,
        )
    }
}

#[inline]
fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// ### English
/// Identifier of a texture resource declared in the engine configuration.
///
/// ### 中文
/// 引擎配置中声明的纹理资源标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

/// ### English
/// Quad placement in normalized device coordinates (`-1..=1`, +Y up).
///
/// ### 中文
/// 以归一化设备坐标（`-1..=1`，+Y 向上）表示的四边形位置。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadRect {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl QuadRect {
    pub const FULL: Self = Self {
        left: -1.0,
        bottom: -1.0,
        right: 1.0,
        top: 1.0,
    };

    pub const fn new(left: f32, bottom: f32, right: f32, top: f32) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }
}

impl Default for QuadRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// ### English
/// Drawing parameters for one frame.
///
/// A frame is `clear_color` everywhere, then (if `active_resource` names a loaded texture) a
/// textured quad over `quad` modulated by `tint`.
///
/// ### 中文
/// 单帧的绘制参数。
///
/// 先用 `clear_color` 清屏；若 `active_resource` 指向已加载纹理，再在 `quad` 区域绘制乘以 `tint` 的纹理四边形。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneState {
    pub clear_color: Rgba,
    pub active_resource: Option<ResourceId>,
    pub tint: Rgba,
    pub quad: QuadRect,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            clear_color: Rgba::BLACK,
            active_resource: None,
            tint: Rgba::WHITE,
            quad: QuadRect::FULL,
        }
    }
}

impl SceneState {
    pub fn with_clear_color(mut self, color: Rgba) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_resource(mut self, resource: Option<ResourceId>) -> Self {
        self.active_resource = resource;
        self
    }

    pub fn with_tint(mut self, tint: Rgba) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_quad(mut self, quad: QuadRect) -> Self {
        self.quad = quad;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_rounds_to_nearest() {
        assert_eq!(Rgba::RED.to_rgba8(), [255, 0, 0, 255]);
        assert_eq!(Rgba::new(0.5, 0.25, 1.5, -1.0).to_rgba8(), [128, 64, 255, 0]);
        let round_trip = Rgba::from_rgba8([12, 200, 3, 77]).to_rgba8();
        assert_eq!(round_trip, [12, 200, 3, 77]);
    }

    #[test]
    fn builders_only_touch_their_field() {
        let scene = SceneState::default()
            .with_clear_color(Rgba::BLUE)
            .with_resource(Some(ResourceId(7)));
        assert_eq!(scene.clear_color, Rgba::BLUE);
        assert_eq!(scene.active_resource, Some(ResourceId(7)));
        assert_eq!(scene.tint, Rgba::WHITE);
        assert_eq!(scene.quad, QuadRect::FULL);
    }
}
