//! End-to-end driver tests against stub models and synthetic catalogs.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use eval::{evaluate, EvalBackend, EvalOptions, SegModel};
use seg_metrics::LossSpec;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use vol_dataset::volfile::{self, VolArray};
use vol_dataset::{
    CaseDataset, CatalogConfig, EvalDataset, ShardContext, TransformPipeline,
    TransformPipelineBuilder, Volume,
};

type B = EvalBackend;

fn device() -> <B as Backend>::Device {
    <B as Backend>::Device::default()
}

/// Predicts the class a voxel's rounded intensity names, with saturated
/// logits, and counts forward calls.
struct OracleModel {
    classes: usize,
    calls: AtomicUsize,
}

impl OracleModel {
    fn new(classes: usize) -> Self {
        Self {
            classes,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegModel<B> for OracleModel {
    fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let dev = input.device();
        let [n, _c, d, h, w] = input.dims();
        let raw: Vec<f32> = input.into_data().to_vec().unwrap();
        let voxels = d * h * w;
        let mut logits = vec![0.0f32; n * self.classes * voxels];
        for b in 0..n {
            for v in 0..voxels {
                let cls = (raw[b * voxels + v].round() as usize).min(self.classes - 1);
                logits[(b * self.classes + cls) * voxels + v] = 1000.0;
            }
        }
        Tensor::<B, 1>::from_floats(logits.as_slice(), &dev).reshape([n, self.classes, d, h, w])
    }
}

/// Predicts one fixed class everywhere, with saturated logits.
struct ConstantModel {
    classes: usize,
    class: usize,
}

impl SegModel<B> for ConstantModel {
    fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let dev = input.device();
        let [n, _c, d, h, w] = input.dims();
        let voxels = d * h * w;
        let mut logits = vec![0.0f32; n * self.classes * voxels];
        for b in 0..n {
            for v in 0..voxels {
                logits[(b * self.classes + self.class) * voxels + v] = 1000.0;
            }
        }
        Tensor::<B, 1>::from_floats(logits.as_slice(), &dev).reshape([n, self.classes, d, h, w])
    }
}

fn write_case(root: &Path, stem: &str, label: &[i64], shape: [usize; 3]) -> anyhow::Result<()> {
    let images = root.join("images");
    let labels = root.join("labels");
    std::fs::create_dir_all(&images)?;
    std::fs::create_dir_all(&labels)?;
    let image = Volume::new(label.iter().map(|v| *v as f32).collect(), shape)?;
    volfile::save_volume(&images.join(format!("{stem}.vsf")), &image)?;
    let dims = shape.iter().map(|d| *d as u64).collect();
    volfile::save(
        &labels.join(format!("{stem}.vsf")),
        &VolArray::from_i64(dims, label.to_vec())?,
    )?;
    Ok(())
}

fn open_dataset(
    root: &Path,
    num_classes: usize,
    transforms: TransformPipeline,
) -> anyhow::Result<CaseDataset> {
    let cfg = CatalogConfig {
        root: root.to_path_buf(),
        images_subdir: "images".to_string(),
        labels_subdir: "labels".to_string(),
    };
    Ok(CaseDataset::open(&cfg, num_classes, transforms)?)
}

fn quiet_opts() -> EvalOptions {
    EvalOptions {
        verbose: false,
        ..Default::default()
    }
}

#[test]
fn oracle_model_scores_perfect_dice() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    for (k, label) in [
        vec![0i64, 1, 1, 0, 1, 0, 0, 1],
        vec![1i64, 1, 0, 0, 0, 0, 1, 1],
        vec![0i64, 0, 1, 0, 1, 1, 0, 0],
    ]
    .iter()
    .enumerate()
    {
        write_case(tmp.path(), &format!("case_{k}"), label, [2, 2, 2])?;
    }
    let dataset = open_dataset(tmp.path(), 2, TransformPipeline::identity())?;
    let model = OracleModel::new(2);

    let report = evaluate(&model, &dataset, &LossSpec::dice(), &quiet_opts(), &device())?;

    assert_eq!(model.calls(), 3);
    assert!((report.mdice - 1.0).abs() < 1e-3, "mdice {}", report.mdice);
    assert!(report.loss.abs() < 1e-3);
    assert_eq!(report.class_dice.len(), 2);
    for d in &report.class_dice {
        assert!((d - 1.0).abs() < 1e-3);
    }
    Ok(())
}

#[test]
fn mdice_is_the_mean_over_samples() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    // Two samples with different foreground fractions.
    let labels = [vec![1i64, 1, 1, 1, 0, 0, 0, 0], vec![1i64, 0, 0, 0, 0, 0, 0, 0]];
    for (k, label) in labels.iter().enumerate() {
        write_case(tmp.path(), &format!("case_{k}"), label, [2, 2, 2])?;
    }
    let dataset = open_dataset(tmp.path(), 2, TransformPipeline::identity())?;
    let model = ConstantModel { classes: 2, class: 1 };

    let report = evaluate(&model, &dataset, &LossSpec::dice(), &quiet_opts(), &device())?;

    // Per sample: the predictor puts probability one on class 1 everywhere.
    let smooth = 1e-5f64;
    let expected: f64 = labels
        .iter()
        .map(|label| {
            let total = label.len() as f64;
            let n1 = label.iter().filter(|v| **v == 1).count() as f64;
            let n0 = total - n1;
            let dice0 = smooth / (n0 + smooth);
            let dice1 = (2.0 * n1 + smooth) / (total + n1 + smooth);
            (dice0 + dice1) / 2.0
        })
        .sum::<f64>()
        / labels.len() as f64;
    assert!(
        (report.mdice as f64 - expected).abs() < 1e-4,
        "mdice {} vs expected {expected}",
        report.mdice
    );
    Ok(())
}

#[test]
fn empty_dataset_is_an_explicit_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    std::fs::create_dir_all(tmp.path().join("images"))?;
    std::fs::create_dir_all(tmp.path().join("labels"))?;
    let dataset = open_dataset(tmp.path(), 2, TransformPipeline::identity())?;
    let model = OracleModel::new(2);

    let err = evaluate(&model, &dataset, &LossSpec::dice(), &quiet_opts(), &device());
    assert!(matches!(err, Err(eval::EvalError::EmptyDataset { .. })));
    assert_eq!(model.calls(), 0);
    Ok(())
}

#[test]
fn single_sample_pass_divides_by_one() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_case(tmp.path(), "only", &[0, 1, 1, 0, 0, 1, 0, 0], [2, 2, 2])?;
    let dataset = open_dataset(tmp.path(), 2, TransformPipeline::identity())?;
    let model = OracleModel::new(2);

    let report = evaluate(&model, &dataset, &LossSpec::dice(), &quiet_opts(), &device())?;
    assert_eq!(model.calls(), 1);
    assert!(report.mdice.is_finite());
    assert!((report.mdice - 1.0).abs() < 1e-3);
    Ok(())
}

#[test]
fn saved_arrays_round_trip_through_the_inverse_transform() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    // Foreground block in the center; crop-to-patch then invert must put the
    // prediction back where the label has it.
    let mut label = vec![0i64; 64];
    for z in 1..3 {
        for y in 1..3 {
            for x in 1..3 {
                label[(z * 4 + y) * 4 + x] = 1;
            }
        }
    }
    write_case(tmp.path(), "case", &label, [4, 4, 4])?;
    let transforms = TransformPipelineBuilder::new().crop_or_pad([2, 2, 2]).build();
    let dataset = open_dataset(tmp.path(), 2, transforms)?;
    let model = OracleModel::new(2);

    let save_dir = tmp.path().join("dump");
    let opts = EvalOptions {
        verbose: false,
        save_dir: Some(save_dir.clone()),
        ..Default::default()
    };
    evaluate(&model, &dataset, &LossSpec::dice(), &opts, &device())?;

    let pred = volfile::load(&save_dir.join("0_pred.vsf"))?;
    assert_eq!(pred.dims, vec![1, 4, 4, 4]);
    assert_eq!(pred.as_i64().expect("i64 payload"), label.as_slice());

    let saved_label = volfile::load(&save_dir.join("0_label.vsf"))?;
    assert_eq!(saved_label.as_i64().expect("i64 payload"), label.as_slice());

    // The dumped image is the model input: cropped shape, bit-exact voxels.
    let img = volfile::load(&save_dir.join("0_img.vsf"))?;
    assert_eq!(img.dims, vec![1, 1, 2, 2, 2]);
    let img = img.as_f32().expect("f32 payload");
    let expected_img = dataset.sample(0)?.image;
    for (a, b) in img.iter().zip(expected_img.data.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    Ok(())
}

#[test]
fn sharded_run_visits_only_its_shard() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    for k in 0..3 {
        write_case(
            tmp.path(),
            &format!("case_{k}"),
            &[0, 1, 0, 1, 0, 1, 0, 1],
            [2, 2, 2],
        )?;
    }
    let dataset = open_dataset(tmp.path(), 2, TransformPipeline::identity())?;
    let model = OracleModel::new(2);

    let opts = EvalOptions {
        verbose: false,
        shard: ShardContext::new(1, 2)?,
        ..Default::default()
    };
    evaluate(&model, &dataset, &LossSpec::dice(), &opts, &device())?;
    assert_eq!(model.calls(), 1);
    Ok(())
}

#[test]
fn auc_roc_is_reported_when_requested() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_case(tmp.path(), "a", &[0, 1, 1, 0, 0, 1, 0, 0], [2, 2, 2])?;
    write_case(tmp.path(), "b", &[1, 1, 0, 0, 1, 0, 0, 0], [2, 2, 2])?;
    let dataset = open_dataset(tmp.path(), 2, TransformPipeline::identity())?;
    let model = OracleModel::new(2);

    let opts = EvalOptions {
        verbose: false,
        auc_roc: true,
        ..Default::default()
    };
    let report = evaluate(&model, &dataset, &LossSpec::dice(), &opts, &device())?;
    let auc = report.auc_roc.expect("auc requested");
    assert!((auc - 1.0).abs() < 1e-4, "auc {auc}");
    Ok(())
}

#[test]
fn class_count_disagreement_is_an_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    write_case(tmp.path(), "case", &[0, 1, 0, 1, 0, 1, 0, 1], [2, 2, 2])?;
    // Dataset declares three classes; the model only produces two.
    let dataset = open_dataset(tmp.path(), 3, TransformPipeline::identity())?;
    let model = OracleModel::new(2);

    let err = evaluate(&model, &dataset, &LossSpec::dice(), &quiet_opts(), &device());
    assert!(matches!(err, Err(eval::EvalError::ShapeMismatch { .. })));
    Ok(())
}
