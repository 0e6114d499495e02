use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::model::blocks::{ConvBnRelu, Padding, PyramidRoiAlign};

pub const ROI_ALIGN_CLASSIFIER: &str = "roi_align_classifier";
pub const MRCNN_CLASS_LOGITS: &str = "mrcnn_class_logits";
pub const MRCNN_CLASS: &str = "mrcnn_class";
pub const MRCNN_BBOX: &str = "mrcnn_bbox";

/// Values per box delta: (dy, dx, log(dh), log(dw)).
pub const BOX_DELTA_SIZE: usize = 4;

#[derive(Config, Debug)]
pub struct ClassifierHeadConfig {
    pub num_classes: usize,
    /// [height, width, channels] of the network input.
    pub image_shape: [usize; 3],
    #[config(default = 7)]
    pub pool_size: usize,
    #[config(default = 256)]
    pub in_channels: usize,
    #[config(default = 1024)]
    pub fc_layers_size: usize,
}

impl ClassifierHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        assert!(
            self.num_classes > 0 && self.num_classes <= 1000,
            "num_classes must be between 1 and 1000, got {}",
            self.num_classes
        );
        log::info!("ClassifierHead init:");
        log::info!("  num_classes = {}", self.num_classes);
        log::info!("  pool_size   = {}", self.pool_size);

        let fc = self.fc_layers_size;
        ClassifierHead {
            // Two fully connected layers written as convs
            conv1: ConvBnRelu::new(device, self.in_channels, fc, self.pool_size, Padding::Valid),
            conv2: ConvBnRelu::new(device, fc, fc, 1, Padding::Valid),

            class_logits: LinearConfig::new(fc, self.num_classes).init(device),
            bbox_fc: LinearConfig::new(fc, self.num_classes * BOX_DELTA_SIZE).init(device),

            num_classes: self.num_classes,
            pool_size: self.pool_size,
            image_height: self.image_shape[0],
            image_width: self.image_shape[1],
            image_channels: self.image_shape[2],
        }
    }
}

/// Per-ROI classifier and class-specific box regressor.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    conv1: ConvBnRelu<B>,
    conv2: ConvBnRelu<B>,
    class_logits: Linear<B>,
    bbox_fc: Linear<B>,

    num_classes: usize,
    pool_size: usize,
    image_height: usize,
    image_width: usize,
    image_channels: usize,
}

#[derive(Debug, Clone)]
pub struct ClassifierOutput<B: Backend> {
    /// [B, R, num_classes], before softmax.
    pub logits: Tensor<B, 3>,
    /// [B, R, num_classes]
    pub probs: Tensor<B, 3>,
    /// [B, R, num_classes, (dy, dx, log(dh), log(dw))]
    pub bbox: Tensor<B, 4>,
}

impl<B: Backend> ClassifierOutput<B> {
    pub fn shapes(&self) -> [(&'static str, Vec<usize>); 3] {
        [
            (MRCNN_CLASS_LOGITS, self.logits.dims().to_vec()),
            (MRCNN_CLASS, self.probs.dims().to_vec()),
            (MRCNN_BBOX, self.bbox.dims().to_vec()),
        ]
    }
}

impl<B: Backend> ClassifierHead<B> {
    fn roi_align(&self) -> PyramidRoiAlign {
        PyramidRoiAlign::new(
            ROI_ALIGN_CLASSIFIER,
            self.pool_size,
            [self.image_height, self.image_width, self.image_channels],
        )
    }

    /// rois: [B, R, (y1, x1, y2, x2)] normalized. feature_maps: [P2, P3, P4, P5].
    pub fn forward(
        &self,
        rois: Tensor<B, 3>,
        feature_maps: &[Tensor<B, 4>],
    ) -> ClassifierOutput<B> {
        log::info!("ClassifierHead forward:");
        log::info!("  rois shape: {:?}", rois.dims());
        for map in feature_maps {
            log::info!("  feature map shape: {:?}", map.dims());
        }

        let [batch, num_rois, _] = rois.dims();

        // [B, R, C, pool, pool]
        let x = self.roi_align().forward(rois, feature_maps);
        let [_, _, channels, pool, _] = x.dims();
        log::info!("  {} output: {:?}", ROI_ALIGN_CLASSIFIER, x.dims());

        // Every ROI goes through the same layers independently.
        let x = x.reshape([batch * num_rois, channels, pool, pool]);
        let x = self.conv1.forward(x); // [N, fc, 1, 1]
        let x = self.conv2.forward(x);
        let [_, fc, _, _] = x.dims();
        let shared = x.reshape([batch, num_rois, fc]);

        let logits = self.class_logits.forward(shared.clone());
        let probs = softmax(logits.clone(), 2);

        let bbox = self
            .bbox_fc
            .forward(shared)
            .reshape([batch, num_rois, self.num_classes, BOX_DELTA_SIZE]);

        let output = ClassifierOutput { logits, probs, bbox };
        for (name, dims) in output.shapes() {
            log::info!("  {} shape: {:?}", name, dims);
        }
        output
    }
}
