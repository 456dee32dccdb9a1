//! The model seam: what the driver needs from a network under evaluation.

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::{backend::Backend, Tensor};
use models::{ConvSegmenter, ConvSegmenterConfig};
use std::path::Path;

/// A segmentation model under evaluation: maps a `[n, c_in, z, y, x]` input
/// batch to `[n, num_classes, z, y, x]` logits.
///
/// The receiver is shared and the driver runs on non-autodiff backends, so a
/// pass tracks no gradients and mutates no parameters.
pub trait SegModel<B: Backend> {
    fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5>;
}

impl<B: Backend> SegModel<B> for ConvSegmenter<B> {
    fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        ConvSegmenter::forward(self, input)
    }
}

pub fn load_segmenter_from_checkpoint<B: Backend, P: AsRef<Path>>(
    path: P,
    cfg: ConvSegmenterConfig,
    device: &B::Device,
) -> Result<ConvSegmenter<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    ConvSegmenter::<B>::new(cfg, device).load_file(path.as_ref(), &recorder, device)
}
