use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{ClassifierHeadConfig, FpnConfig, MaskHeadConfig};

/// Every pyramid level halves the previous one, down to P6 at stride 64.
pub const IMAGE_STRIDE_MULTIPLE: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Including the background class.
    pub num_classes: usize,

    /// [height, width, channels] of the network input.
    pub image_shape: [usize; 3],

    // Heads
    pub pool_size: usize,
    pub mask_pool_size: usize,
    pub fc_layers_size: usize,
    pub mask_channels: usize,

    // Pyramid
    pub pyramid_channels: usize,
    /// Channel depth of C2, C3, C4, C5.
    pub backbone_channels: [usize; 4],
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_classes: 81,
            image_shape: [1024, 1024, 3],
            pool_size: 7,
            mask_pool_size: 14,
            fc_layers_size: 1024,
            mask_channels: 256,
            pyramid_channels: 256,
            backbone_channels: [256, 512, 1024, 2048],
        }
    }
}

impl ModelConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading model config {}", path.display()))?;
        let config: ModelConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing model config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)
            .with_context(|| format!("writing model config {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=1000).contains(&self.num_classes),
            "num_classes must be between 1 and 1000, got {}",
            self.num_classes
        );
        ensure!(self.pool_size >= 1, "pool_size must be at least 1");
        ensure!(self.mask_pool_size >= 1, "mask_pool_size must be at least 1");

        let [h, w, _] = self.image_shape;
        if h == 0 || w == 0 || h % IMAGE_STRIDE_MULTIPLE != 0 || w % IMAGE_STRIDE_MULTIPLE != 0 {
            bail!(
                "image size {}x{} must be a non-zero multiple of {}",
                h,
                w,
                IMAGE_STRIDE_MULTIPLE
            );
        }

        ensure!(
            self.backbone_channels.iter().all(|&c| c > 0),
            "backbone channels must be non-zero: {:?}",
            self.backbone_channels
        );
        ensure!(
            self.pyramid_channels > 0 && self.fc_layers_size > 0 && self.mask_channels > 0,
            "layer widths must be non-zero"
        );
        Ok(())
    }

    pub fn fpn(&self) -> FpnConfig {
        FpnConfig::new(self.backbone_channels).with_pyramid_channels(self.pyramid_channels)
    }

    pub fn classifier(&self) -> ClassifierHeadConfig {
        ClassifierHeadConfig::new(self.num_classes, self.image_shape)
            .with_pool_size(self.pool_size)
            .with_in_channels(self.pyramid_channels)
            .with_fc_layers_size(self.fc_layers_size)
    }

    pub fn mask(&self) -> MaskHeadConfig {
        MaskHeadConfig::new(self.num_classes, self.image_shape)
            .with_pool_size(self.mask_pool_size)
            .with_in_channels(self.pyramid_channels)
            .with_conv_channels(self.mask_channels)
    }
}
