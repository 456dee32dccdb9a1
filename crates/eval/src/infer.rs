//! One forward pass plus the inverse geometric transforms.

use crate::evaluate::{EvalError, EvalResult};
use crate::model::SegModel;
use burn::tensor::{backend::Backend, Int, Tensor};
use vol_dataset::{TransformPipeline, Volume};

/// Run inference on one transformed batch and map the logits back into the
/// label's original geometry.
///
/// The dataset's transform steps are undone channel by channel, in reverse
/// pipeline order, so the returned logits (and the argmax label map derived
/// from them) share `ori_shape` with the ground truth.
pub fn inference<B: Backend, M: SegModel<B> + ?Sized>(
    model: &M,
    image: Tensor<B, 5>,
    ori_shape: [usize; 3],
    transforms: &TransformPipeline,
) -> EvalResult<(Tensor<B, 4, Int>, Tensor<B, 5>)> {
    let device = image.device();
    let logits = model.forward(image);
    let [n, classes, d, h, w] = logits.dims();

    let logits = if transforms.is_identity() && [d, h, w] == ori_shape {
        logits
    } else {
        let raw: Vec<f32> = logits
            .into_data()
            .to_vec()
            .map_err(|e| EvalError::Tensor {
                msg: format!("{e:?}"),
            })?;
        let chan_voxels = d * h * w;
        let [od, oh, ow] = ori_shape;
        let mut restored = Vec::with_capacity(n * classes * od * oh * ow);
        for b in 0..n {
            for c in 0..classes {
                let start = (b * classes + c) * chan_voxels;
                let chan = Volume::new(raw[start..start + chan_voxels].to_vec(), [d, h, w])?;
                let inv = transforms.invert_channel(chan, ori_shape)?;
                restored.extend_from_slice(&inv.data);
            }
        }
        Tensor::<B, 1>::from_floats(restored.as_slice(), &device).reshape([n, classes, od, oh, ow])
    };

    let [n, _, od, oh, ow] = logits.dims();
    let pred = logits.clone().argmax(1).reshape([n, od, oh, ow]);
    Ok((pred, logits))
}
