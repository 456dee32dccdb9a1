//! Invertible geometric transforms applied to volumes ahead of inference.
//!
//! A pipeline maps a raw volume into the model's input geometry; its inverse
//! maps per-class output channels back to the original label shape so metrics
//! compare like with like.

use crate::types::{VolDatasetError, VolDatasetResult, Volume};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipAxis {
    Z,
    Y,
    X,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeomTransform {
    /// Center-crop or zero-pad each axis to the target shape.
    CropOrPad { target: [usize; 3] },
    /// Mirror the volume along one axis. Self-inverse.
    Flip { axis: FlipAxis },
}

impl GeomTransform {
    pub fn apply(&self, vol: &Volume) -> Volume {
        match self {
            GeomTransform::CropOrPad { target } => crop_or_pad(vol, *target),
            GeomTransform::Flip { axis } => flip(vol, *axis),
        }
    }

    pub fn output_shape(&self, shape: [usize; 3]) -> [usize; 3] {
        match self {
            GeomTransform::CropOrPad { target } => *target,
            GeomTransform::Flip { .. } => shape,
        }
    }

    /// Map one output channel back to the shape this step saw on the way in.
    ///
    /// Cropped borders come back as zeros; for logits that resolves the
    /// restored voxels to class 0 under argmax.
    pub fn invert(&self, chan: &Volume, input_shape: [usize; 3]) -> Volume {
        match self {
            GeomTransform::CropOrPad { .. } => crop_or_pad(chan, input_shape),
            GeomTransform::Flip { axis } => flip(chan, *axis),
        }
    }
}

/// An ordered list of invertible geometric steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformPipeline {
    steps: Vec<GeomTransform>,
}

impl TransformPipeline {
    pub fn new(steps: Vec<GeomTransform>) -> Self {
        Self { steps }
    }

    /// A pipeline that leaves volumes untouched.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[GeomTransform] {
        &self.steps
    }

    pub fn is_identity(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step in order.
    pub fn apply(&self, vol: &Volume) -> Volume {
        let mut out = vol.clone();
        for step in &self.steps {
            out = step.apply(&out);
        }
        out
    }

    /// Shape a volume of `shape` has after the full pipeline.
    pub fn output_shape(&self, mut shape: [usize; 3]) -> [usize; 3] {
        for step in &self.steps {
            shape = step.output_shape(shape);
        }
        shape
    }

    /// Undo the pipeline on one output channel, restoring `ori_shape`.
    ///
    /// Steps are inverted in reverse order; the channel must carry the shape
    /// the forward pipeline produces from `ori_shape`.
    pub fn invert_channel(&self, mut chan: Volume, ori_shape: [usize; 3]) -> VolDatasetResult<Volume> {
        let mut input_shapes = Vec::with_capacity(self.steps.len());
        let mut cur = ori_shape;
        for step in &self.steps {
            input_shapes.push(cur);
            cur = step.output_shape(cur);
        }
        if chan.shape != cur {
            return Err(VolDatasetError::Shape {
                msg: format!(
                    "channel shape {:?} does not match pipeline output {:?} for original {:?}",
                    chan.shape, cur, ori_shape
                ),
            });
        }
        for (step, input_shape) in self.steps.iter().zip(input_shapes.iter()).rev() {
            chan = step.invert(&chan, *input_shape);
        }
        Ok(chan)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformPipelineBuilder {
    steps: Vec<GeomTransform>,
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn crop_or_pad(mut self, target: [usize; 3]) -> Self {
        self.steps.push(GeomTransform::CropOrPad { target });
        self
    }

    pub fn flip(mut self, axis: FlipAxis) -> Self {
        self.steps.push(GeomTransform::Flip { axis });
        self
    }

    pub fn build(self) -> TransformPipeline {
        TransformPipeline::new(self.steps)
    }
}

fn crop_or_pad(vol: &Volume, target: [usize; 3]) -> Volume {
    let src = vol.shape;
    let mut out = vec![0.0f32; target[0] * target[1] * target[2]];

    // Per-axis copy window: crop from the source center, or pad around it.
    let mut in_start = [0usize; 3];
    let mut out_start = [0usize; 3];
    let mut span = [0usize; 3];
    for a in 0..3 {
        if src[a] >= target[a] {
            in_start[a] = (src[a] - target[a]) / 2;
            span[a] = target[a];
        } else {
            out_start[a] = (target[a] - src[a]) / 2;
            span[a] = src[a];
        }
    }

    for z in 0..span[0] {
        for y in 0..span[1] {
            let src_off =
                ((z + in_start[0]) * src[1] + (y + in_start[1])) * src[2] + in_start[2];
            let dst_off = ((z + out_start[0]) * target[1] + (y + out_start[1])) * target[2]
                + out_start[2];
            out[dst_off..dst_off + span[2]]
                .copy_from_slice(&vol.data[src_off..src_off + span[2]]);
        }
    }

    Volume {
        data: out,
        shape: target,
    }
}

fn flip(vol: &Volume, axis: FlipAxis) -> Volume {
    let [d, h, w] = vol.shape;
    let mut out = vec![0.0f32; vol.data.len()];
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                let (sz, sy, sx) = match axis {
                    FlipAxis::Z => (d - 1 - z, y, x),
                    FlipAxis::Y => (z, h - 1 - y, x),
                    FlipAxis::X => (z, y, w - 1 - x),
                };
                out[(z * h + y) * w + x] = vol.data[(sz * h + sy) * w + sx];
            }
        }
    }
    Volume {
        data: out,
        shape: vol.shape,
    }
}
