use burn::prelude::*;

use super::classifier::{
    ClassifierHead, ClassifierOutput, MRCNN_BBOX, MRCNN_CLASS, MRCNN_CLASS_LOGITS,
};
use super::fpn::{FeaturePyramid, PyramidLevels};
use super::inspect::TensorSummary;
use super::mask::{MaskHead, MRCNN_MASK};
use crate::config::ModelConfig;

/// Pyramid plus both region heads, wired the way Mask R-CNN uses them.
#[derive(Module, Debug)]
pub struct MaskRcnnHeads<B: Backend> {
    pub fpn: FeaturePyramid<B>,
    pub classifier: ClassifierHead<B>,
    pub mask: MaskHead<B>,
}

#[derive(Debug, Clone)]
pub struct HeadsOutput<B: Backend> {
    pub pyramid: PyramidLevels<B>,
    pub classifier: ClassifierOutput<B>,
    /// [B, R, num_classes, mask, mask]
    pub masks: Tensor<B, 5>,
}

impl<B: Backend> HeadsOutput<B> {
    /// Every named output, pyramid first.
    pub fn summaries(&self) -> Vec<TensorSummary> {
        let mut summaries: Vec<_> = self
            .pyramid
            .named()
            .into_iter()
            .map(|(name, level)| TensorSummary::of(name, level))
            .collect();
        summaries.push(TensorSummary::of(MRCNN_CLASS_LOGITS, &self.classifier.logits));
        summaries.push(TensorSummary::of(MRCNN_CLASS, &self.classifier.probs));
        summaries.push(TensorSummary::of(MRCNN_BBOX, &self.classifier.bbox));
        summaries.push(TensorSummary::of(MRCNN_MASK, &self.masks));
        summaries
    }
}

impl<B: Backend> MaskRcnnHeads<B> {
    pub fn new(device: &B::Device, config: &ModelConfig) -> Self {
        Self {
            fpn: config.fpn().init(device),
            classifier: config.classifier().init(device),
            mask: config.mask().init(device),
        }
    }

    /// stages: backbone outputs C1..C5. rois: [B, R, (y1, x1, y2, x2)] normalized.
    pub fn forward(&self, stages: [Tensor<B, 4>; 5], rois: Tensor<B, 3>) -> HeadsOutput<B> {
        let pyramid = self.fpn.forward(stages);
        let feature_maps = pyramid.head_feature_maps();

        let classifier = self.classifier.forward(rois.clone(), &feature_maps);
        let masks = self.mask.forward(rois, &feature_maps);

        HeadsOutput {
            pyramid,
            classifier,
            masks,
        }
    }
}
