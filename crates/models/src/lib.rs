//! Burn modules for volumetric segmentation.
//!
//! This crate defines the reference network architecture:
//! - `ConvSegmenter`: a shape-preserving 3D convolutional head producing
//!   per-voxel class logits.
//!
//! These are pure Burn Modules with no awareness of the evaluation harness.
//! The `eval` crate wraps them behind its model trait for runtime use.

use burn::module::Module;
use burn::nn::conv::{Conv3d, Conv3dConfig};
use burn::nn::PaddingConfig3d;
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

#[derive(Debug, Clone)]
pub struct ConvSegmenterConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    pub hidden: usize,
    pub depth: usize,
}

impl Default for ConvSegmenterConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            num_classes: 2,
            hidden: 16,
            depth: 2,
        }
    }
}

#[derive(Debug, Module)]
pub struct ConvSegmenter<B: Backend> {
    stem: Conv3d<B>,
    blocks: Vec<Conv3d<B>>,
    head: Conv3d<B>,
}

impl<B: Backend> ConvSegmenter<B> {
    pub fn new(cfg: ConvSegmenterConfig, device: &B::Device) -> Self {
        let stem = Conv3dConfig::new([cfg.in_channels, cfg.hidden], [3, 3, 3])
            .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
            .init(device);
        let mut blocks = Vec::new();
        for _ in 0..cfg.depth {
            blocks.push(
                Conv3dConfig::new([cfg.hidden, cfg.hidden], [3, 3, 3])
                    .with_padding(PaddingConfig3d::Explicit(1, 1, 1))
                    .init(device),
            );
        }
        let head = Conv3dConfig::new([cfg.hidden, cfg.num_classes], [1, 1, 1]).init(device);
        Self { stem, blocks, head }
    }

    /// Logits with the input's spatial shape: `[n, c_in, z, y, x]` maps to
    /// `[n, num_classes, z, y, x]`.
    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut x = relu(self.stem.forward(input));
        for block in &self.blocks {
            x = relu(block.forward(x));
        }
        self.head.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn forward_preserves_spatial_shape() {
        let device = <B as Backend>::Device::default();
        let model = ConvSegmenter::<B>::new(
            ConvSegmenterConfig {
                num_classes: 3,
                ..Default::default()
            },
            &device,
        );
        let input = Tensor::<B, 5>::zeros([1, 1, 4, 5, 6], &device);
        let logits = model.forward(input);
        assert_eq!(logits.dims(), [1, 3, 4, 5, 6]);
    }
}
