//! ### English
//! Boundary with the host: drawable provider, surface events and decoded assets.
//!
//! ### 中文
//! 与宿主的边界：可绘制对象提供者、surface 事件与已解码资源。

use std::collections::HashMap;

use dpi::PhysicalSize;

/// ### English
/// A native drawable and its size in pixels, as handed out by the host.
///
/// ### 中文
/// 宿主提供的原生可绘制对象及其像素尺寸。
#[derive(Clone, Debug)]
pub struct HostSurface<N> {
    pub native: N,
    pub size: PhysicalSize<u32>,
}

/// ### English
/// Supplies the on-screen drawable. Called on the surface worker thread during initialization;
/// `None` means the host has no drawable to offer.
///
/// ### 中文
/// 提供屏幕可绘制对象。在 surface worker 线程初始化期间调用；返回 `None` 表示宿主暂无可用的可绘制对象。
pub trait HostSurfaceProvider<N>: Send + Sync {
    fn acquire(&self) -> Option<HostSurface<N>>;
}

/// ### English
/// Host-side changes of the on-screen drawable.
///
/// ### 中文
/// 宿主侧屏幕可绘制对象的变化。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceEvent {
    Resized(PhysicalSize<u32>),
    ContentChanged,
    Destroyed,
}

/// ### English
/// Decoded RGBA8 image, top row first.
///
/// ### 中文
/// 已解码的 RGBA8 图像，首行为顶部。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub size: PhysicalSize<u32>,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// ### English
    /// Image of one repeated color.
    ///
    /// ### 中文
    /// 单一颜色填充的图像。
    pub fn solid(size: PhysicalSize<u32>, rgba: [u8; 4]) -> Self {
        let count = size.width as usize * size.height as usize;
        Self {
            size,
            pixels: rgba.repeat(count),
        }
    }

    /// ### English
    /// Builds an image from rows of pixels listed top to bottom.
    ///
    /// ### 中文
    /// 由自上而下排列的像素行构造图像。
    pub fn from_rows(rows: &[&[[u8; 4]]]) -> Self {
        let width = rows.first().map_or(0, |row| row.len()) as u32;
        let pixels = rows
            .iter()
            .flat_map(|row| row.iter().flatten().copied())
            .collect();
        Self {
            size: PhysicalSize::new(width, rows.len() as u32),
            pixels,
        }
    }
}

/// ### English
/// Image decoder used when the surface worker uploads configured textures.
///
/// ### 中文
/// surface worker 上传配置纹理时使用的图像解码器。
pub trait AssetProvider: Send + Sync {
    fn decode(&self, path: &str) -> Result<DecodedImage, String>;
}

/// ### English
/// In-memory `AssetProvider` keyed by path.
///
/// ### 中文
/// 以路径为键的内存 `AssetProvider`。
#[derive(Clone, Debug, Default)]
pub struct StaticAssets {
    images: HashMap<String, DecodedImage>,
}

impl StaticAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, image: DecodedImage) -> Self {
        self.insert(path, image);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, image: DecodedImage) {
        self.images.insert(path.into(), image);
    }
}

impl AssetProvider for StaticAssets {
    fn decode(&self, path: &str) -> Result<DecodedImage, String> {
        let image = self
            .images
            .get(path)
            .ok_or_else(|| "no such asset".to_string())?;
        if image.pixels.len() != image.size.width as usize * image.size.height as usize * 4 {
            return Err(format!(
                "pixel data does not match {}x{}",
                image.size.width, image.size.height
            ));
        }
        Ok(image.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_assets_decode_known_paths_only() {
        let assets = StaticAssets::new().with(
            "red.png",
            DecodedImage::solid(PhysicalSize::new(2, 2), [255, 0, 0, 255]),
        );
        let image = assets.decode("red.png").unwrap();
        assert_eq!(image.size, PhysicalSize::new(2, 2));
        assert_eq!(image.pixels.len(), 16);
        assert!(assets.decode("missing.png").is_err());
    }

    #[test]
    fn malformed_images_are_rejected() {
        let assets = StaticAssets::new().with(
            "bad.png",
            DecodedImage {
                size: PhysicalSize::new(4, 4),
                pixels: vec![0; 3],
            },
        );
        assert!(assets.decode("bad.png").is_err());
    }

    #[test]
    fn rows_are_listed_top_first() {
        let red = [255, 0, 0, 255];
        let blue = [0, 0, 255, 255];
        let image = DecodedImage::from_rows(&[&[red, red], &[blue, blue]]);
        assert_eq!(image.size, PhysicalSize::new(2, 2));
        assert_eq!(&image.pixels[0..4], &red);
        assert_eq!(&image.pixels[8..12], &blue);
    }
}
