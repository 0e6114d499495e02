use burn::prelude::*;

/// Nearest-neighbour upsampling of channels-first maps.
#[derive(Debug, Clone, Copy)]
pub struct Upsample2d {
    scale: usize,
}

impl Upsample2d {
    pub fn new(scale: usize) -> Self {
        assert!(scale >= 1, "upsample scale must be at least 1");
        Self { scale }
    }

    /// [B, C, H, W] -> [B, C, H*scale, W*scale]
    pub fn forward<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.scale == 1 {
            return x;
        }
        let [batch, channels, height, width] = x.dims();

        // Every source pixel becomes a scale x scale block.
        x.reshape([batch, channels, height, 1, width, 1])
            .repeat_dim(3, self.scale)
            .repeat_dim(5, self.scale)
            .reshape([batch, channels, height * self.scale, width * self.scale])
    }
}
