use burn::nn::conv::{Conv2d, ConvTranspose2d, ConvTranspose2dConfig};
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid};

use crate::model::blocks::{conv2d, ConvBnRelu, Padding, PyramidRoiAlign};

pub const ROI_ALIGN_MASK: &str = "roi_align_mask";
pub const MRCNN_MASK: &str = "mrcnn_mask";

const MASK_CONV_LAYERS: usize = 4;

#[derive(Config, Debug)]
pub struct MaskHeadConfig {
    pub num_classes: usize,
    /// [height, width, channels] of the network input.
    pub image_shape: [usize; 3],
    #[config(default = 14)]
    pub pool_size: usize,
    #[config(default = 256)]
    pub in_channels: usize,
    #[config(default = 256)]
    pub conv_channels: usize,
}

impl MaskHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MaskHead<B> {
        assert!(
            self.num_classes > 0 && self.num_classes <= 1000,
            "num_classes must be between 1 and 1000, got {}",
            self.num_classes
        );
        log::info!("MaskHead init:");
        log::info!("  num_classes = {}", self.num_classes);
        let mask_size = 2 * self.pool_size;
        log::info!("  pool_size   = {} -> mask {}x{}", self.pool_size, mask_size, mask_size);

        let width = self.conv_channels;
        let convs = (0..MASK_CONV_LAYERS)
            .map(|i| {
                let in_channels = if i == 0 { self.in_channels } else { width };
                ConvBnRelu::new(device, in_channels, width, 3, Padding::Same)
            })
            .collect();

        MaskHead {
            convs,
            deconv: ConvTranspose2dConfig::new([width, width], [2, 2])
                .with_stride([2, 2])
                .init(device),
            mask: conv2d(device, width, self.num_classes, 1, Padding::Valid),

            num_classes: self.num_classes,
            pool_size: self.pool_size,
            image_height: self.image_shape[0],
            image_width: self.image_shape[1],
            image_channels: self.image_shape[2],
        }
    }
}

/// Per-ROI, per-class mask predictor.
#[derive(Module, Debug)]
pub struct MaskHead<B: Backend> {
    convs: Vec<ConvBnRelu<B>>,
    deconv: ConvTranspose2d<B>,
    mask: Conv2d<B>,

    num_classes: usize,
    pool_size: usize,
    image_height: usize,
    image_width: usize,
    image_channels: usize,
}

impl<B: Backend> MaskHead<B> {
    /// Side of the predicted masks, twice the pooled size.
    pub fn mask_size(&self) -> usize {
        2 * self.pool_size
    }

    fn roi_align(&self) -> PyramidRoiAlign {
        PyramidRoiAlign::new(
            ROI_ALIGN_MASK,
            self.pool_size,
            [self.image_height, self.image_width, self.image_channels],
        )
    }

    /// rois: [B, R, (y1, x1, y2, x2)] normalized. feature_maps: [P2, P3, P4, P5].
    ///
    /// Returns [B, R, num_classes, 2*pool, 2*pool]; each class channel is an
    /// independent sigmoid, not normalized across classes.
    pub fn forward(&self, rois: Tensor<B, 3>, feature_maps: &[Tensor<B, 4>]) -> Tensor<B, 5> {
        log::info!("MaskHead forward:");
        log::info!("  rois shape: {:?}", rois.dims());
        for map in feature_maps {
            log::info!("  feature map shape: {:?}", map.dims());
        }

        let [batch, num_rois, _] = rois.dims();

        let x = self.roi_align().forward(rois, feature_maps);
        let [_, _, channels, pool, _] = x.dims();
        log::info!("  {} output: {:?}", ROI_ALIGN_MASK, x.dims());

        let mut x = x.reshape([batch * num_rois, channels, pool, pool]);
        for conv in &self.convs {
            x = conv.forward(x);
        }

        let x = relu(self.deconv.forward(x));
        let x = sigmoid(self.mask.forward(x));

        let [_, classes, height, width] = x.dims();
        let masks = x.reshape([batch, num_rois, classes, height, width]);
        log::info!("  {} shape: {:?}", MRCNN_MASK, masks.dims());
        masks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn pyramid(device: &<TestBackend as Backend>::Device) -> Vec<Tensor<TestBackend, 4>> {
        [16, 8, 4, 2]
            .into_iter()
            .map(|size| {
                Tensor::<TestBackend, 4>::random([1, 4, size, size], Distribution::Default, device)
            })
            .collect()
    }

    fn head(device: &<TestBackend as Backend>::Device, pool_size: usize) -> MaskHead<TestBackend> {
        MaskHeadConfig::new(3, [64, 64, 3])
            .with_pool_size(pool_size)
            .with_in_channels(4)
            .with_conv_channels(8)
            .init(device)
    }

    #[test]
    fn test_mask_is_twice_the_pool_size() {
        let device = Default::default();
        let rois = Tensor::<TestBackend, 3>::from_floats(
            [[[0.0, 0.0, 0.5, 0.5], [0.2, 0.3, 0.7, 0.9]]],
            &device,
        );

        for pool_size in [1, 4, 5] {
            let head = head(&device, pool_size);
            let masks = head.forward(rois.clone(), &pyramid(&device));
            assert_eq!(head.mask_size(), 2 * pool_size);
            assert_eq!(masks.dims(), [1, 2, 3, 2 * pool_size, 2 * pool_size]);
        }
    }

    #[test]
    fn test_masks_are_independent_probabilities() {
        let device = Default::default();
        let rois = Tensor::<TestBackend, 3>::from_floats(
            [[[0.1, 0.1, 0.6, 0.6], [0.0, 0.0, 1.0, 1.0], [0.5, 0.5, 0.55, 0.6]]],
            &device,
        );
        let masks = head(&device, 4).forward(rois, &pyramid(&device));

        let values: Vec<f32> = masks.clone().into_data().iter::<f32>().collect();
        assert!(values.iter().all(|&v| (0.0..=1.0).contains(&v)));

        // Sigmoid per class: class sums are free, unlike a softmax.
        let sums: Vec<f32> = masks.sum_dim(2).into_data().iter::<f32>().collect();
        assert!(sums.iter().any(|&s| (s - 1.0).abs() > 1e-3));
    }
}
