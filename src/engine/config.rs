//! ### English
//! Engine configuration.
//!
//! ### 中文
//! 引擎配置。

use std::time::Duration;

use dpi::PhysicalSize;

use super::error::{ResourceError, Result};
use super::scene::{ResourceId, SceneState};

/// ### English
/// A texture the surface worker decodes and uploads while initializing.
///
/// ### 中文
/// surface worker 在初始化时解码并上传的纹理。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetSpec {
    pub id: ResourceId,
    pub path: String,
}

impl AssetSpec {
    pub fn new(id: ResourceId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }
}

/// ### English
/// Configuration shared by both workers.
///
/// ### 中文
/// 两个 worker 共用的配置。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// ### English
    /// Capture FBO dimensions.
    ///
    /// ### 中文
    /// capture FBO 尺寸。
    pub offscreen_size: PhysicalSize<u32>,
    /// ### English
    /// How long `start` waits for the surface worker to publish its shared context.
    ///
    /// ### 中文
    /// `start` 等待 surface worker 发布共享上下文的最长时间。
    pub share_timeout: Duration,
    /// ### English
    /// How long `start` waits for the capture worker's initialization outcome.
    ///
    /// ### 中文
    /// `start` 等待 capture worker 初始化结果的最长时间。
    pub init_timeout: Duration,
    /// ### English
    /// Bound for joining the capture worker in `stop` and for `Drop`.
    ///
    /// ### 中文
    /// `stop` 中 join capture worker 以及 `Drop` 时使用的上限。
    pub stop_timeout: Duration,
    pub capture_enabled: bool,
    /// ### English
    /// Forward host resize events to the capture worker as well.
    ///
    /// ### 中文
    /// 同时把宿主的 resize 事件转发给 capture worker。
    pub capture_follows_surface: bool,
    pub assets: Vec<AssetSpec>,
    pub initial_scene: SceneState,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offscreen_size: PhysicalSize::new(256, 256),
            share_timeout: Duration::from_secs(5),
            init_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            capture_enabled: true,
            capture_follows_surface: false,
            assets: Vec::new(),
            initial_scene: SceneState::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.offscreen_size.width == 0 || self.offscreen_size.height == 0 {
            return Err(ResourceError::InvalidConfig(format!(
                "offscreen size must be non-zero, got {}x{}",
                self.offscreen_size.width, self.offscreen_size.height
            )));
        }
        for (name, timeout) in [
            ("share_timeout", self.share_timeout),
            ("init_timeout", self.init_timeout),
            ("stop_timeout", self.stop_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ResourceError::InvalidConfig(format!(
                    "{name} must be non-zero"
                )));
            }
        }
        for (index, asset) in self.assets.iter().enumerate() {
            if self.assets[..index].iter().any(|other| other.id == asset.id) {
                return Err(ResourceError::InvalidConfig(format!(
                    "asset id {} declared twice",
                    asset.id.0
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn asset(&self, id: ResourceId) -> Option<&AssetSpec> {
        self.assets.iter().find(|asset| asset.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.offscreen_size, PhysicalSize::new(256, 256));
        assert!(config.capture_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_sizes_and_timeouts() {
        let config = EngineConfig {
            offscreen_size: PhysicalSize::new(0, 10),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ResourceError::InvalidConfig(_))
        ));

        let config = EngineConfig {
            share_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ResourceError::InvalidConfig(msg)) if msg.contains("share_timeout")
        ));
    }

    #[test]
    fn rejects_duplicate_asset_ids() {
        let config = EngineConfig {
            assets: vec![
                AssetSpec::new(ResourceId(1), "a.png"),
                AssetSpec::new(ResourceId(1), "b.png"),
            ],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(config.asset(ResourceId(1)).is_some());
        assert!(config.asset(ResourceId(2)).is_none());
    }
}
