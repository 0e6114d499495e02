use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Output keeps the input's spatial size (odd kernels only).
    Same,
    Valid,
}

impl Padding {
    fn config(self, kernel_size: usize) -> PaddingConfig2d {
        match self {
            Padding::Same => {
                let pad = kernel_size / 2;
                PaddingConfig2d::Explicit(pad, pad)
            }
            Padding::Valid => PaddingConfig2d::Valid,
        }
    }
}

/// Square conv followed by batch norm and ReLU.
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn new(
        device: &B::Device,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: Padding,
    ) -> Self {
        Self {
            conv: conv2d(device, in_channels, out_channels, kernel_size, padding),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        activation::relu(x)
    }
}

/// Plain biased conv with stride 1, used where no normalization follows.
pub fn conv2d<B: Backend>(
    device: &B::Device,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    padding: Padding,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
        .with_padding(padding.config(kernel_size))
        .init(device)
}
