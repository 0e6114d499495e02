use burn::nn::conv::Conv2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::*;

use crate::model::blocks::{conv2d, Padding, Upsample2d};

pub const FPN_P2: &str = "fpn_p2";
pub const FPN_P3: &str = "fpn_p3";
pub const FPN_P4: &str = "fpn_p4";
pub const FPN_P5: &str = "fpn_p5";
pub const FPN_P6: &str = "fpn_p6";

#[derive(Config, Debug)]
pub struct FpnConfig {
    /// Channels of C2, C3, C4, C5.
    pub backbone_channels: [usize; 4],
    #[config(default = 256)]
    pub pyramid_channels: usize,
}

impl FpnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FeaturePyramid<B> {
        let [c2, c3, c4, c5] = self.backbone_channels;
        let depth = self.pyramid_channels;

        FeaturePyramid {
            // Lateral 1x1 reductions
            c5p5: conv2d(device, c5, depth, 1, Padding::Valid),
            c4p4: conv2d(device, c4, depth, 1, Padding::Valid),
            c3p3: conv2d(device, c3, depth, 1, Padding::Valid),
            c2p2: conv2d(device, c2, depth, 1, Padding::Valid),

            // 3x3 smoothing after the merges
            p2: conv2d(device, depth, depth, 3, Padding::Same),
            p3: conv2d(device, depth, depth, 3, Padding::Same),
            p4: conv2d(device, depth, depth, 3, Padding::Same),
            p5: conv2d(device, depth, depth, 3, Padding::Same),

            p6: MaxPool2dConfig::new([1, 1]).with_strides([2, 2]).init(),
            pyramid_channels: depth,
        }
    }
}

/// Top-down feature pyramid over a five-stage backbone.
#[derive(Module, Debug)]
pub struct FeaturePyramid<B: Backend> {
    c5p5: Conv2d<B>,
    c4p4: Conv2d<B>,
    c3p3: Conv2d<B>,
    c2p2: Conv2d<B>,

    p2: Conv2d<B>,
    p3: Conv2d<B>,
    p4: Conv2d<B>,
    p5: Conv2d<B>,

    p6: MaxPool2d,
    pyramid_channels: usize,
}

/// Pyramid outputs, finest (P2, stride 4) to coarsest (P6, stride 64).
#[derive(Debug, Clone)]
pub struct PyramidLevels<B: Backend> {
    pub p2: Tensor<B, 4>,
    pub p3: Tensor<B, 4>,
    pub p4: Tensor<B, 4>,
    pub p5: Tensor<B, 4>,
    pub p6: Tensor<B, 4>,
}

impl<B: Backend> PyramidLevels<B> {
    /// P2..P5, the maps the region heads pool from.
    pub fn head_feature_maps(&self) -> Vec<Tensor<B, 4>> {
        vec![self.p2.clone(), self.p3.clone(), self.p4.clone(), self.p5.clone()]
    }

    /// P2..P6, one per anchor scale of a proposal stage.
    pub fn rpn_feature_maps(&self) -> Vec<Tensor<B, 4>> {
        let mut maps = self.head_feature_maps();
        maps.push(self.p6.clone());
        maps
    }

    pub fn named(&self) -> [(&'static str, &Tensor<B, 4>); 5] {
        [
            (FPN_P2, &self.p2),
            (FPN_P3, &self.p3),
            (FPN_P4, &self.p4),
            (FPN_P5, &self.p5),
            (FPN_P6, &self.p6),
        ]
    }
}

impl<B: Backend> FeaturePyramid<B> {
    pub fn pyramid_channels(&self) -> usize {
        self.pyramid_channels
    }

    /// `stages` are the backbone outputs C1..C5; C1 is not used.
    pub fn forward(&self, stages: [Tensor<B, 4>; 5]) -> PyramidLevels<B> {
        log::info!("Feature Pyramid Network (FPN) forward:");
        let [_, c2, c3, c4, c5] = stages;
        let up = Upsample2d::new(2);

        // -------- Top-down --------
        let p5 = self.c5p5.forward(c5);
        let p4 = up.forward(p5.clone()) + self.c4p4.forward(c4);
        let p3 = up.forward(p4.clone()) + self.c3p3.forward(c3);
        let p2 = up.forward(p3.clone()) + self.c2p2.forward(c2);

        // -------- Smoothing --------
        let p2 = self.p2.forward(p2);
        let p3 = self.p3.forward(p3);
        let p4 = self.p4.forward(p4);
        let p5 = self.p5.forward(p5);

        // Strided subsample, not a spatial reduction
        let p6 = self.p6.forward(p5.clone());

        let levels = PyramidLevels { p2, p3, p4, p5, p6 };
        for (name, level) in levels.named() {
            log::info!("  {} shape: {:?}", name, level.dims());
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn backbone(
        device: &<TestBackend as Backend>::Device,
        size: usize,
    ) -> [Tensor<TestBackend, 4>; 5] {
        let stage = |channels, stride: usize| {
            Tensor::<TestBackend, 4>::random(
                [2, channels, size / stride, size / stride],
                Distribution::Default,
                device,
            )
        };
        [stage(4, 2), stage(8, 4), stage(12, 8), stage(16, 16), stage(20, 32)]
    }

    #[test]
    fn test_level_shapes() {
        let device = Default::default();
        let fpn = FpnConfig::new([8, 12, 16, 20])
            .with_pyramid_channels(6)
            .init::<TestBackend>(&device);

        let levels = fpn.forward(backbone(&device, 128));

        assert_eq!(levels.p2.dims(), [2, 6, 32, 32]);
        assert_eq!(levels.p3.dims(), [2, 6, 16, 16]);
        assert_eq!(levels.p4.dims(), [2, 6, 8, 8]);
        assert_eq!(levels.p5.dims(), [2, 6, 4, 4]);
        assert_eq!(levels.p6.dims(), [2, 6, 2, 2]);
    }

    #[test]
    fn test_each_level_halves_the_previous() {
        let device = Default::default();
        let fpn = FpnConfig::new([8, 12, 16, 20])
            .with_pyramid_channels(4)
            .init::<TestBackend>(&device);

        let levels = fpn.forward(backbone(&device, 64));
        let maps = levels.rpn_feature_maps();
        assert_eq!(maps.len(), 5);
        for pair in maps.windows(2) {
            let [_, c_fine, h_fine, w_fine] = pair[0].dims();
            let [_, c_coarse, h_coarse, w_coarse] = pair[1].dims();
            assert_eq!(c_fine, fpn.pyramid_channels());
            assert_eq!(c_coarse, fpn.pyramid_channels());
            assert_eq!(h_fine, 2 * h_coarse);
            assert_eq!(w_fine, 2 * w_coarse);
        }
    }

    #[test]
    fn test_p6_is_strided_subsample_of_p5() {
        let device = Default::default();
        let fpn = FpnConfig::new([8, 12, 16, 20])
            .with_pyramid_channels(3)
            .init::<TestBackend>(&device);
        let levels = fpn.forward(backbone(&device, 128));

        // A 1x1 window with stride 2 keeps every other pixel.
        let expected = levels.p5.clone().slice([0..2, 0..3, 0..1, 0..1]);
        let got = levels.p6.clone().slice([0..2, 0..3, 0..1, 0..1]);
        let diff = (expected - got).abs().max().into_scalar().elem::<f32>();
        assert!(diff < 1e-6);

        let expected = levels.p5.slice([0..2, 0..3, 2..3, 2..3]);
        let got = levels.p6.slice([0..2, 0..3, 1..2, 1..2]);
        let diff = (expected - got).abs().max().into_scalar().elem::<f32>();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_named_outputs() {
        let device = Default::default();
        let fpn = FpnConfig::new([8, 12, 16, 20])
            .with_pyramid_channels(2)
            .init::<TestBackend>(&device);
        let levels = fpn.forward(backbone(&device, 64));

        let names: Vec<_> = levels.named().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec![FPN_P2, FPN_P3, FPN_P4, FPN_P5, FPN_P6]);
        assert_eq!(levels.head_feature_maps().len(), 4);
    }
}
