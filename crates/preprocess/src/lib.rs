//! Intensity normalization and label remapping for CT volumes.
//!
//! Stateless single-pass transforms, generic over the tensor backend. The
//! backend is picked by the type parameter and the device by the caller (see
//! [`Normalizer`]); there is no process-wide flag.

use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use vol_dataset::{VolDatasetError, VolDatasetResult, Volume};

/// Hounsfield-unit window used by [`hu_norm`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HuWindow {
    pub min: f32,
    pub max: f32,
    /// Replacement for not-a-number voxels before rescaling.
    pub nan: f32,
}

impl Default for HuWindow {
    fn default() -> Self {
        Self {
            min: -1000.0,
            max: 600.0,
            nan: -2000.0,
        }
    }
}

/// Rescale every voxel to `(v - min_val) / (max_val - min_val)`, then clamp
/// to [0, 1].
///
/// A degenerate window (`max_val == min_val`) divides by zero and propagates
/// NaN/inf; callers own the window bounds.
pub fn normalize<B: Backend>(image: Tensor<B, 3>, min_val: f32, max_val: f32) -> Tensor<B, 3> {
    image
        .sub_scalar(min_val)
        .div_scalar(max_val - min_val)
        .clamp(0.0, 1.0)
}

/// Window raw Hounsfield units into [0, 1] floats.
///
/// NaN voxels are replaced with `window.nan` first, then the same affine
/// rescale-and-clamp as [`normalize`] runs with the window bounds. Output is
/// floating point even when the source scan is integer-valued.
pub fn hu_norm<B: Backend>(image: Tensor<B, 3>, window: HuWindow) -> Tensor<B, 3> {
    // NaN is the only value that compares unequal to itself.
    let nan_mask = image.clone().not_equal(image.clone());
    let filled = image.mask_fill(nan_mask, window.nan);
    normalize(filled, window.min, window.max)
}

/// Rewrite label values pair by pair, in order.
///
/// Each `(from, to)` pair overwrites every voxel currently equal to `from`,
/// so later pairs observe earlier rewrites: `[(1, 2), (2, 1)]` collapses both
/// classes onto 1. Order the pairs accordingly when swapping labels.
pub fn label_remap<B: Backend>(label: Tensor<B, 3, Int>, pairs: &[(i64, i64)]) -> Tensor<B, 3, Int> {
    let mut label = label;
    for &(from, to) in pairs {
        let mask = label.clone().equal_elem(from);
        label = label.mask_fill(mask, to);
    }
    label
}

/// Normalization context bound to one device.
///
/// Construct it with an explicit device and reuse it for a whole
/// preprocessing run; it lifts CPU volumes onto the device, applies the
/// transforms above, and lowers results back.
pub struct Normalizer<B: Backend> {
    device: B::Device,
}

impl<B: Backend> Normalizer<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn lift(&self, vol: &Volume) -> Tensor<B, 3> {
        Tensor::from_data(TensorData::new(vol.data.clone(), vol.shape), &self.device)
    }

    pub fn lift_labels(&self, data: &[i64], shape: [usize; 3]) -> Tensor<B, 3, Int> {
        Tensor::from_data(TensorData::new(data.to_vec(), shape), &self.device)
    }

    pub fn lower(&self, tensor: Tensor<B, 3>) -> VolDatasetResult<Volume> {
        let shape = tensor.dims();
        let data = tensor
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| VolDatasetError::Other(format!("tensor extraction failed: {e:?}")))?;
        Volume::new(data, shape)
    }

    pub fn lower_labels(&self, tensor: Tensor<B, 3, Int>) -> VolDatasetResult<Vec<i64>> {
        tensor
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| VolDatasetError::Other(format!("tensor extraction failed: {e:?}")))
    }

    pub fn normalize(&self, vol: &Volume, min_val: f32, max_val: f32) -> Tensor<B, 3> {
        normalize(self.lift(vol), min_val, max_val)
    }

    pub fn hu_norm(&self, vol: &Volume, window: HuWindow) -> Tensor<B, 3> {
        hu_norm(self.lift(vol), window)
    }

    pub fn label_remap(&self, data: &[i64], shape: [usize; 3], pairs: &[(i64, i64)]) -> Tensor<B, 3, Int> {
        label_remap(self.lift_labels(data, shape), pairs)
    }
}
