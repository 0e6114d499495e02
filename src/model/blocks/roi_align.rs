use burn::prelude::*;
use burn::tensor::{Int, TensorData};

/// Finest pyramid level ROIs are pooled from (P2).
pub const MIN_LEVEL: usize = 2;
/// Coarsest pyramid level ROIs are pooled from (P5).
pub const MAX_LEVEL: usize = 5;
pub const NUM_LEVELS: usize = MAX_LEVEL - MIN_LEVEL + 1;

/// An ROI of this many pixels (on a side) maps to `CANONICAL_LEVEL`.
const CANONICAL_SIZE: f32 = 224.0;
const CANONICAL_LEVEL: i32 = 4;

/// Pools every ROI from the pyramid level matching its size, using bilinear
/// crop-and-resize to a fixed `pool_size x pool_size` grid.
#[derive(Debug, Clone)]
pub struct PyramidRoiAlign {
    name: &'static str,
    pool_size: usize,
    image_height: usize,
    image_width: usize,
}

impl PyramidRoiAlign {
    pub fn new(name: &'static str, pool_size: usize, image_shape: [usize; 3]) -> Self {
        assert!(pool_size >= 1, "{name}: pool_size must be at least 1");
        Self {
            name,
            pool_size,
            image_height: image_shape[0],
            image_width: image_shape[1],
        }
    }

    /// Pyramid level (2..=5) for a normalized `(y1, x1, y2, x2)` box.
    pub fn level_for(&self, roi: [f32; 4]) -> usize {
        let h = roi[2] - roi[0];
        let w = roi[3] - roi[1];
        if !(h > 0.0 && w > 0.0) || !(h * w).is_finite() {
            return MIN_LEVEL;
        }
        let area = h * w;

        let image_area = (self.image_height * self.image_width) as f32;
        let scale = area.sqrt() / (CANONICAL_SIZE / image_area.sqrt());
        let level = CANONICAL_LEVEL + scale.log2().round_ties_even() as i32;
        level.clamp(MIN_LEVEL as i32, MAX_LEVEL as i32) as usize
    }

    /// rois: [B, R, (y1, x1, y2, x2)], feature_maps: [P2, P3, P4, P5]
    ///
    /// Returns [B, R, C, pool, pool] in the same ROI order as the input.
    pub fn forward<B: Backend>(
        &self,
        rois: Tensor<B, 3>,
        feature_maps: &[Tensor<B, 4>],
    ) -> Tensor<B, 5> {
        assert_eq!(
            feature_maps.len(),
            NUM_LEVELS,
            "{}: expected feature maps P2..P5",
            self.name
        );
        let [batch, num_rois, coords] = rois.dims();
        assert_eq!(coords, 4, "{}: ROIs must be (y1, x1, y2, x2)", self.name);
        assert!(batch > 0, "{}: at least one image is required", self.name);
        assert!(num_rois > 0, "{}: at least one ROI per image is required", self.name);

        let [_, channels, _, _] = feature_maps[0].dims();
        let device = rois.device();
        let boxes: Vec<f32> = rois.into_data().iter::<f32>().collect();

        let mut buckets: Vec<Vec<(usize, [f32; 4])>> = vec![Vec::new(); NUM_LEVELS];
        for (index, b) in boxes.chunks_exact(4).enumerate() {
            let roi = [b[0], b[1], b[2], b[3]];
            buckets[self.level_for(roi) - MIN_LEVEL].push((index, roi));
        }

        let mut pooled = Vec::new();
        let mut order = Vec::with_capacity(batch * num_rois);
        for (level, (bucket, features)) in buckets.iter().zip(feature_maps).enumerate() {
            if bucket.is_empty() {
                continue;
            }
            log::debug!(
                "{}: {} rois -> P{}",
                self.name,
                bucket.len(),
                level + MIN_LEVEL
            );
            pooled.push(self.crop_and_resize(features.clone(), bucket, num_rois, &device));
            order.extend(bucket.iter().map(|(index, _)| *index));
        }

        // Rows are grouped by level; put them back in input order.
        let mut position = vec![0i64; order.len()];
        for (row, &index) in order.iter().enumerate() {
            position[index] = row as i64;
        }
        let restore =
            Tensor::<B, 1, Int>::from_data(TensorData::new(position, [order.len()]), &device);

        Tensor::cat(pooled, 0).select(0, restore).reshape([
            batch,
            num_rois,
            channels,
            self.pool_size,
            self.pool_size,
        ])
    }

    /// Samples every box of one bucket from `features` ([B, C, H, W]).
    /// Returns [n, C, pool, pool].
    fn crop_and_resize<B: Backend>(
        &self,
        features: Tensor<B, 4>,
        bucket: &[(usize, [f32; 4])],
        num_rois: usize,
        device: &B::Device,
    ) -> Tensor<B, 4> {
        let [batch, channels, height, width] = features.dims();
        let pool = self.pool_size;
        let samples = bucket.len() * pool * pool;

        let mut indices: [Vec<i64>; 4] = Default::default();
        let mut weights: [Vec<f32>; 4] = Default::default();
        for &(index, [y1, x1, y2, x2]) in bucket {
            let base = (index / num_rois) * height * width;
            for py in 0..pool {
                let y = sample_coord(y1, y2, py, pool, height);
                for px in 0..pool {
                    let x = sample_coord(x1, x2, px, pool, width);
                    for (tap, (offset, weight)) in
                        bilinear_taps(y, x, height, width).into_iter().enumerate()
                    {
                        indices[tap].push((base + offset) as i64);
                        weights[tap].push(weight);
                    }
                }
            }
        }

        // One row per pixel: [B, C, H, W] -> [B*H*W, C]
        let pixels = features
            .swap_dims(1, 2)
            .swap_dims(2, 3)
            .reshape([batch * height * width, channels]);

        let mut pooled = Tensor::<B, 2>::zeros([samples, channels], device);
        for (index, weight) in indices.into_iter().zip(weights) {
            let index = Tensor::<B, 1, Int>::from_data(TensorData::new(index, [samples]), device);
            let weight = Tensor::<B, 2>::from_data(TensorData::new(weight, [samples, 1]), device);
            pooled = pooled + pixels.clone().select(0, index) * weight;
        }

        pooled
            .reshape([bucket.len(), pool, pool, channels])
            .swap_dims(2, 3)
            .swap_dims(1, 2)
    }
}

/// Pixel coordinate of sample `i` of `pool` spanning `[lo, hi]` (normalized).
fn sample_coord(lo: f32, hi: f32, i: usize, pool: usize, size: usize) -> f32 {
    let extent = (size - 1) as f32;
    if pool > 1 {
        lo * extent + i as f32 * (hi - lo) * extent / (pool - 1) as f32
    } else {
        0.5 * (lo + hi) * extent
    }
}

/// Flat offsets and weights of the four neighbours of `(y, x)`.
/// Samples outside the map get zero weight.
fn bilinear_taps(y: f32, x: f32, height: usize, width: usize) -> [(usize, f32); 4] {
    let inside = y >= 0.0 && y <= (height - 1) as f32 && x >= 0.0 && x <= (width - 1) as f32;
    if !inside {
        return [(0, 0.0); 4];
    }

    let top = y.floor() as usize;
    let bottom = (y.ceil() as usize).min(height - 1);
    let left = x.floor() as usize;
    let right = (x.ceil() as usize).min(width - 1);
    let dy = y - top as f32;
    let dx = x - left as f32;

    [
        (top * width + left, (1.0 - dy) * (1.0 - dx)),
        (top * width + right, (1.0 - dy) * dx),
        (bottom * width + left, dy * (1.0 - dx)),
        (bottom * width + right, dy * dx),
    ]
}
