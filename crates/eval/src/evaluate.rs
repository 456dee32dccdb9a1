//! The evaluation driver: one ordered pass over a validation dataset.

use crate::infer::inference;
use crate::model::SegModel;
use crate::timer::TimeAverager;
use burn::tensor::activation::softmax;
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use seg_metrics::{auc_roc, loss_computation, LossSpec, MetricError};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use vol_dataset::{
    volfile, EvalDataset, EvalLoader, ShardContext, ShardedSampler, VolDatasetError, Volume,
};

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    /// Finalization divides by the iteration count; an empty shard is an
    /// explicit error, never a silent NaN.
    #[error("dataset shard is empty (rank {rank} of {world_size})")]
    EmptyDataset { rank: usize, world_size: usize },
    #[error("shape mismatch: {msg}")]
    ShapeMismatch { msg: String },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Dataset(#[from] VolDatasetError),
    #[error(transparent)]
    Loss(#[from] MetricError),
    #[error("tensor extraction failed: {msg}")]
    Tensor { msg: String },
}

#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Prefetch depth for the sample loader (0 loads synchronously).
    pub num_workers: usize,
    /// Print progress and the final summary (reporting rank only).
    pub verbose: bool,
    /// Accumulate softmax probabilities across the pass and report AUC-ROC.
    pub auc_roc: bool,
    /// When set, write `{iter}_pred.vsf`, `{iter}_label.vsf` and
    /// `{iter}_img.vsf` into this directory every iteration.
    pub save_dir: Option<PathBuf>,
    /// Shard of the dataset this process evaluates.
    pub shard: ShardContext,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            num_workers: 0,
            verbose: true,
            auc_roc: false,
            save_dir: None,
            shard: ShardContext::single(),
        }
    }
}

/// Aggregate results of one evaluation pass over one shard.
#[derive(Debug, Clone)]
pub struct EvalReport {
    /// Mean over samples of the per-class Dice mean.
    pub mdice: f32,
    /// Mean combined weighted loss.
    pub loss: f32,
    /// Per-class Dice, averaged over samples.
    pub class_dice: Vec<f32>,
    pub auc_roc: Option<f32>,
}

/// Evaluate `model` over every sample of this process's shard, in dataset
/// order, exactly once.
///
/// Accumulators are created fresh per call; nothing persists across calls.
/// Any dataset, inference, metric, or disk failure aborts the pass. With a
/// multi-rank shard context the report covers only the local shard (no
/// cross-rank reduction) and progress printing is left to rank 0.
pub fn evaluate<B, M, D>(
    model: &M,
    dataset: &D,
    losses: &LossSpec,
    opts: &EvalOptions,
    device: &B::Device,
) -> EvalResult<EvalReport>
where
    B: Backend,
    M: SegModel<B>,
    D: EvalDataset + Sync,
{
    losses.validate()?;

    let sampler = ShardedSampler::new(dataset.len(), opts.shard);
    let total_iters = sampler.len();
    if total_iters == 0 {
        return Err(EvalError::EmptyDataset {
            rank: opts.shard.rank,
            world_size: opts.shard.world_size,
        });
    }
    if let Some(dir) = &opts.save_dir {
        std::fs::create_dir_all(dir).map_err(|e| EvalError::Io {
            path: dir.clone(),
            source: e,
        })?;
    }

    let verbose = opts.verbose && opts.shard.is_reporting();
    if verbose {
        println!(
            "[eval] start: total_samples={}, total_iters={}",
            dataset.len(),
            total_iters
        );
    }

    let mut loader = EvalLoader::new(dataset, &sampler, opts.num_workers);
    let mut reader_cost = TimeAverager::new();
    let mut batch_cost = TimeAverager::new();
    let mut batch_start = Instant::now();

    let mut mdice_sum = 0.0f64;
    let mut loss_sum = 0.0f64;
    let mut class_dice_sum: Vec<f64> = Vec::new();
    let mut probs_all: Vec<f32> = Vec::new();
    let mut labels_all: Vec<i64> = Vec::new();

    let mut iter = 0usize;
    while let Some((_, sample)) = loader.next_sample() {
        let sample = sample?;
        reader_cost.record(batch_start.elapsed());

        let ori_shape = sample.label.shape;
        let [od, oh, ow] = ori_shape;
        // Labels are compared as 64-bit integers throughout the metrics.
        let label_data: Vec<i64> = sample.label.data.iter().map(|v| *v as i64).collect();
        let label =
            Tensor::<B, 4, Int>::from_data(TensorData::new(label_data.clone(), [1, od, oh, ow]), device);

        let [d, h, w] = sample.image.shape;
        let image = Tensor::<B, 1>::from_floats(sample.image.data.as_slice(), device)
            .reshape([1, 1, d, h, w]);

        let (pred, logits) = inference(model, image, ori_shape, dataset.transforms())?;
        let classes = logits.dims()[1];
        if classes != dataset.num_classes() {
            return Err(EvalError::ShapeMismatch {
                msg: format!(
                    "model produced {classes} classes, dataset declares {}",
                    dataset.num_classes()
                ),
            });
        }

        if let Some(dir) = &opts.save_dir {
            save_iteration(dir, iter, &pred, &label_data, ori_shape, &sample.image)?;
            println!("[eval] saved iter {iter} pred/label/img");
        }

        let (type_losses, per_class_dice) = loss_computation(logits.clone(), label, losses)?;
        let loss = losses.weighted_sum(&type_losses);

        if opts.auc_roc {
            accumulate_probs(logits, &mut probs_all)?;
            labels_all.extend_from_slice(&label_data);
        }

        loss_sum += loss as f64;
        let mean_dice = per_class_dice.iter().sum::<f32>() / per_class_dice.len() as f32;
        mdice_sum += mean_dice as f64;
        if class_dice_sum.is_empty() {
            class_dice_sum = per_class_dice.iter().map(|v| *v as f64).collect();
        } else if class_dice_sum.len() != per_class_dice.len() {
            return Err(EvalError::ShapeMismatch {
                msg: format!(
                    "per-class dice length changed from {} to {}",
                    class_dice_sum.len(),
                    per_class_dice.len()
                ),
            });
        } else {
            for (acc, v) in class_dice_sum.iter_mut().zip(per_class_dice.iter()) {
                *acc += *v as f64;
            }
        }

        batch_cost.record_samples(batch_start.elapsed(), 1);
        if verbose {
            println!(
                "[eval] iter={}/{} batch_cost={:.4}s reader_cost={:.4}s",
                iter + 1,
                total_iters,
                batch_cost.average().as_secs_f64(),
                reader_cost.average().as_secs_f64()
            );
        }
        reader_cost.reset();
        batch_cost.reset();
        batch_start = Instant::now();
        iter += 1;
    }

    let denom = iter as f64;
    let mdice = (mdice_sum / denom) as f32;
    let loss = (loss_sum / denom) as f32;
    let class_dice: Vec<f32> = class_dice_sum.iter().map(|v| (*v / denom) as f32).collect();

    let auc = if opts.auc_roc {
        Some(auc_roc(&probs_all, &labels_all, dataset.num_classes())?)
    } else {
        None
    };

    if verbose {
        let mut line = format!(
            "[eval] images={total_iters} dice={mdice:.4} loss={loss:.6}"
        );
        if let Some(a) = auc {
            line.push_str(&format!(" auc_roc={a:.4}"));
        }
        println!("{line}");
        let rounded: Vec<f32> = class_dice
            .iter()
            .map(|v| (v * 10_000.0).round() / 10_000.0)
            .collect();
        println!("[eval] class dice: {rounded:?}");
    }

    Ok(EvalReport {
        mdice,
        loss,
        class_dice,
        auc_roc: auc,
    })
}

/// Append this sample's softmax probabilities in voxel-major order, so
/// samples of different spatial shapes concatenate cleanly for AUC-ROC.
fn accumulate_probs<B: Backend>(logits: Tensor<B, 5>, probs_all: &mut Vec<f32>) -> EvalResult<()> {
    let [n, classes, d, h, w] = logits.dims();
    let flat: Vec<f32> = softmax(logits, 1)
        .into_data()
        .to_vec()
        .map_err(|e| EvalError::Tensor {
            msg: format!("{e:?}"),
        })?;
    let voxels = d * h * w;
    probs_all.reserve(n * voxels * classes);
    for b in 0..n {
        for v in 0..voxels {
            for c in 0..classes {
                probs_all.push(flat[(b * classes + c) * voxels + v]);
            }
        }
    }
    Ok(())
}

/// Persist one iteration's prediction, label, and input image as `.vsf`
/// files. Uncompressed writes, so a reload reproduces the arrays bit for bit.
fn save_iteration<B: Backend>(
    dir: &Path,
    iter: usize,
    pred: &Tensor<B, 4, Int>,
    label: &[i64],
    ori_shape: [usize; 3],
    image: &Volume,
) -> EvalResult<()> {
    let [od, oh, ow] = ori_shape;
    let pred_data: Vec<i64> = pred
        .clone()
        .into_data()
        .convert::<i64>()
        .to_vec()
        .map_err(|e| EvalError::Tensor {
            msg: format!("{e:?}"),
        })?;
    let spatial = vec![1u64, od as u64, oh as u64, ow as u64];

    volfile::save(
        &dir.join(format!("{iter}_pred.vsf")),
        &volfile::VolArray::from_i64(spatial.clone(), pred_data)?,
    )?;
    volfile::save(
        &dir.join(format!("{iter}_label.vsf")),
        &volfile::VolArray::from_i64(spatial, label.to_vec())?,
    )?;
    let [d, h, w] = image.shape;
    volfile::save(
        &dir.join(format!("{iter}_img.vsf")),
        &volfile::VolArray::from_f32(
            vec![1, 1, d as u64, h as u64, w as u64],
            image.data.clone(),
        )?,
    )?;
    Ok(())
}
