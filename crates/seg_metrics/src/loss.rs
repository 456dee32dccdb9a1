//! Weighted segmentation losses over logits and integer label maps.

use crate::{MetricError, MetricResult};
use burn::tensor::activation::softmax;
use burn::tensor::{backend::Backend, Int, Tensor};

const DEFAULT_SMOOTH: f32 = 1e-5;
const LOG_EPS: f32 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LossKind {
    /// Soft Dice loss, `1 - mean(per-class dice)`; `smooth` keeps empty
    /// classes from dividing by zero.
    Dice { smooth: f32 },
    /// Voxelwise negative log-likelihood of the true class.
    CrossEntropy,
}

/// Weighted combination of loss terms: `types[i]` is scaled by `coef[i]`.
#[derive(Debug, Clone)]
pub struct LossSpec {
    pub types: Vec<LossKind>,
    pub coef: Vec<f32>,
}

impl LossSpec {
    pub fn new(types: Vec<LossKind>, coef: Vec<f32>) -> Self {
        Self { types, coef }
    }

    /// Plain Dice loss with weight 1.0, the usual evaluation default.
    pub fn dice() -> Self {
        Self {
            types: vec![LossKind::Dice {
                smooth: DEFAULT_SMOOTH,
            }],
            coef: vec![1.0],
        }
    }

    pub fn validate(&self) -> MetricResult<()> {
        if self.types.is_empty() {
            return Err(MetricError::EmptySpec);
        }
        if self.types.len() != self.coef.len() {
            return Err(MetricError::CoefMismatch {
                types: self.types.len(),
                coefs: self.coef.len(),
            });
        }
        Ok(())
    }

    /// Combine per-type losses into the scalar the driver accumulates.
    pub fn weighted_sum(&self, losses: &[f32]) -> f32 {
        self.coef
            .iter()
            .zip(losses.iter())
            .map(|(c, l)| c * l)
            .sum()
    }

    fn smooth(&self) -> f32 {
        self.types
            .iter()
            .find_map(|kind| match kind {
                LossKind::Dice { smooth } => Some(*smooth),
                LossKind::CrossEntropy => None,
            })
            .unwrap_or(DEFAULT_SMOOTH)
    }
}

/// Evaluate a loss spec against one batch of logits and labels.
///
/// `logits` is `[n, classes, z, y, x]`, `label` is `[n, z, y, x]` with class
/// ids. Returns the unweighted per-type losses and the per-class soft Dice
/// vector (always computed, whatever the spec holds, since the driver
/// aggregates Dice regardless).
pub fn loss_computation<B: Backend>(
    logits: Tensor<B, 5>,
    label: Tensor<B, 4, Int>,
    spec: &LossSpec,
) -> MetricResult<(Vec<f32>, Vec<f32>)> {
    spec.validate()?;

    let [n, classes, d, h, w] = logits.dims();
    let label_dims = label.dims();
    if label_dims != [n, d, h, w] {
        return Err(MetricError::Shape {
            msg: format!(
                "logits {:?} do not line up with label {:?}",
                [n, classes, d, h, w],
                label_dims
            ),
        });
    }

    let probs: Vec<f32> = softmax(logits, 1)
        .into_data()
        .to_vec()
        .map_err(|e| MetricError::Tensor {
            msg: format!("{e:?}"),
        })?;
    let label: Vec<i64> = label
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| MetricError::Tensor {
            msg: format!("{e:?}"),
        })?;

    if let Some(bad) = label.iter().find(|v| **v < 0 || **v >= classes as i64) {
        return Err(MetricError::Shape {
            msg: format!("label value {bad} outside [0, {classes})"),
        });
    }

    let voxels = d * h * w;
    let per_class_dice = soft_dice(&probs, &label, n, classes, voxels, spec.smooth());

    let mut losses = Vec::with_capacity(spec.types.len());
    for kind in &spec.types {
        let loss = match kind {
            LossKind::Dice { smooth } => {
                let dice = if *smooth == spec.smooth() {
                    per_class_dice.clone()
                } else {
                    soft_dice(&probs, &label, n, classes, voxels, *smooth)
                };
                1.0 - dice.iter().sum::<f32>() / dice.len() as f32
            }
            LossKind::CrossEntropy => cross_entropy(&probs, &label, n, classes, voxels),
        };
        losses.push(loss);
    }

    Ok((losses, per_class_dice))
}

/// Per-class soft Dice: `(2 * sum(p*y) + s) / (sum(p) + sum(y) + s)` over the
/// whole batch.
fn soft_dice(
    probs: &[f32],
    label: &[i64],
    n: usize,
    classes: usize,
    voxels: usize,
    smooth: f32,
) -> Vec<f32> {
    let mut inter = vec![0.0f64; classes];
    let mut prob_sum = vec![0.0f64; classes];
    let mut truth_sum = vec![0.0f64; classes];

    for b in 0..n {
        for c in 0..classes {
            let base = (b * classes + c) * voxels;
            let mut p_sum = 0.0f64;
            let mut i_sum = 0.0f64;
            for v in 0..voxels {
                let p = probs[base + v] as f64;
                p_sum += p;
                if label[b * voxels + v] == c as i64 {
                    i_sum += p;
                }
            }
            prob_sum[c] += p_sum;
            inter[c] += i_sum;
        }
        for v in 0..voxels {
            truth_sum[label[b * voxels + v] as usize] += 1.0;
        }
    }

    (0..classes)
        .map(|c| {
            ((2.0 * inter[c] + smooth as f64) / (prob_sum[c] + truth_sum[c] + smooth as f64)) as f32
        })
        .collect()
}

fn cross_entropy(probs: &[f32], label: &[i64], n: usize, classes: usize, voxels: usize) -> f32 {
    let mut total = 0.0f64;
    for b in 0..n {
        for v in 0..voxels {
            let c = label[b * voxels + v] as usize;
            let p = probs[(b * classes + c) * voxels + v].max(LOG_EPS);
            total -= (p as f64).ln();
        }
    }
    (total / (n * voxels) as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn device() -> <B as Backend>::Device {
        <B as Backend>::Device::default()
    }

    /// Logits saturated hard enough that softmax is numerically one-hot.
    fn saturated_logits(label: &[i64], classes: usize, shape: [usize; 3]) -> Tensor<B, 5> {
        let voxels = shape[0] * shape[1] * shape[2];
        let mut raw = vec![0.0f32; classes * voxels];
        for (v, l) in label.iter().enumerate() {
            raw[*l as usize * voxels + v] = 1000.0;
        }
        Tensor::from_data(
            TensorData::new(raw, [1, classes, shape[0], shape[1], shape[2]]),
            &device(),
        )
    }

    fn label_tensor(label: &[i64], shape: [usize; 3]) -> Tensor<B, 4, Int> {
        Tensor::from_data(
            TensorData::new(label.to_vec(), [1, shape[0], shape[1], shape[2]]),
            &device(),
        )
    }

    #[test]
    fn perfect_prediction_has_unit_dice_and_zero_loss() {
        let label = vec![0i64, 1, 1, 0, 1, 0, 0, 1];
        let logits = saturated_logits(&label, 2, [2, 2, 2]);
        let (losses, dice) =
            loss_computation(logits, label_tensor(&label, [2, 2, 2]), &LossSpec::dice()).unwrap();
        assert_eq!(dice.len(), 2);
        for d in &dice {
            assert!((d - 1.0).abs() < 1e-3, "dice {d}");
        }
        assert!(losses[0].abs() < 1e-3);
    }

    #[test]
    fn all_background_prediction_misses_the_foreground() {
        let label = vec![1i64; 8];
        let pred = vec![0i64; 8];
        let logits = saturated_logits(&pred, 2, [2, 2, 2]);
        let (_, dice) =
            loss_computation(logits, label_tensor(&label, [2, 2, 2]), &LossSpec::dice()).unwrap();
        assert!(dice[0] < 1e-3);
        assert!(dice[1] < 1e-3);
    }

    #[test]
    fn cross_entropy_is_near_zero_when_confident_and_right() {
        let label = vec![0i64, 1, 0, 1];
        let logits = saturated_logits(&label, 2, [1, 2, 2]);
        let spec = LossSpec::new(vec![LossKind::CrossEntropy], vec![1.0]);
        let (losses, _) =
            loss_computation(logits, label_tensor(&label, [1, 2, 2]), &spec).unwrap();
        assert!(losses[0] < 1e-3);
    }

    #[test]
    fn weighted_sum_applies_coefficients() {
        let spec = LossSpec::new(
            vec![LossKind::Dice { smooth: 1e-5 }, LossKind::CrossEntropy],
            vec![0.5, 2.0],
        );
        assert!((spec.weighted_sum(&[0.4, 0.1]) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn empty_spec_is_rejected() {
        let spec = LossSpec::new(Vec::new(), Vec::new());
        assert!(matches!(spec.validate(), Err(MetricError::EmptySpec)));
    }

    #[test]
    fn coefficient_mismatch_is_rejected() {
        let spec = LossSpec::new(vec![LossKind::CrossEntropy], vec![1.0, 2.0]);
        assert!(matches!(
            spec.validate(),
            Err(MetricError::CoefMismatch { types: 1, coefs: 2 })
        ));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let label = vec![0i64; 8];
        let logits = saturated_logits(&label, 2, [2, 2, 2]);
        let bad_label = label_tensor(&[0i64; 4], [1, 2, 2]);
        assert!(matches!(
            loss_computation(logits, bad_label, &LossSpec::dice()),
            Err(MetricError::Shape { .. })
        ));
    }

    #[test]
    fn out_of_range_label_is_an_error() {
        let label = vec![0i64, 1, 2, 0];
        let logits = saturated_logits(&[0, 1, 0, 0], 2, [1, 2, 2]);
        assert!(matches!(
            loss_computation(logits, label_tensor(&label, [1, 2, 2]), &LossSpec::dice()),
            Err(MetricError::Shape { .. })
        ));
    }
}
