use clap::Parser;
use eval::{
    evaluate, load_segmenter_from_checkpoint, validate_backend_choice, BackendKind, EvalBackend,
    EvalOptions,
};
use models::{ConvSegmenter, ConvSegmenterConfig};
use seg_metrics::LossSpec;
use std::path::PathBuf;
use vol_dataset::{
    CaseDataset, CatalogConfig, ShardContext, TransformPipeline, TransformPipelineBuilder,
};

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a segmentation checkpoint on a validation set (Dice/loss, optional AUC-ROC)"
)]
struct Args {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Dataset root containing images/ and labels/ volume files.
    #[arg(long, default_value = "data/val")]
    dataset_root: PathBuf,
    /// Catalog JSON overriding the dataset root/subdir arguments.
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Images subdirectory relative to dataset root.
    #[arg(long, default_value = "images")]
    images_subdir: String,
    /// Labels subdirectory relative to dataset root.
    #[arg(long, default_value = "labels")]
    labels_subdir: String,
    /// Number of segmentation classes, background included.
    #[arg(long, default_value_t = 2)]
    num_classes: usize,
    /// Crop or pad inputs to this cubic edge before the forward pass.
    #[arg(long)]
    patch_size: Option<usize>,
    /// Checkpoint path to load.
    #[arg(long)]
    checkpoint: Option<String>,
    /// Directory for per-iteration pred/label/img dumps.
    #[arg(long)]
    save_dir: Option<PathBuf>,
    /// Report AUC-ROC over the whole pass.
    #[arg(long, default_value_t = false)]
    auc_roc: bool,
    /// Loader prefetch depth (0 loads synchronously).
    #[arg(long, default_value_t = 0)]
    num_workers: usize,
    /// Rank of this process in a data-parallel run.
    #[arg(long, default_value_t = 0)]
    rank: usize,
    /// Total number of data-parallel processes.
    #[arg(long, default_value_t = 1)]
    world_size: usize,
    /// Suppress progress output.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    validate_backend_choice(args.backend)?;

    let transforms = match args.patch_size {
        Some(edge) => TransformPipelineBuilder::new()
            .crop_or_pad([edge, edge, edge])
            .build(),
        None => TransformPipeline::identity(),
    };
    let cfg = match &args.catalog {
        Some(path) => CatalogConfig::load(path)?,
        None => CatalogConfig {
            root: args.dataset_root.clone(),
            images_subdir: args.images_subdir,
            labels_subdir: args.labels_subdir,
        },
    };
    let dataset = CaseDataset::open(&cfg, args.num_classes, transforms)?;
    if dataset.pairs().is_empty() {
        println!("No samples found under {}", cfg.root.display());
        return Ok(());
    }

    let device = <EvalBackend as burn::tensor::backend::Backend>::Device::default();
    let model_cfg = ConvSegmenterConfig {
        num_classes: args.num_classes,
        ..Default::default()
    };
    let model = match &args.checkpoint {
        Some(p) => load_segmenter_from_checkpoint::<EvalBackend, _>(p, model_cfg.clone(), &device)
            .unwrap_or_else(|e| {
                println!("Failed to load checkpoint {p}; using fresh model ({e})");
                ConvSegmenter::<EvalBackend>::new(model_cfg.clone(), &device)
            }),
        None => {
            println!("No checkpoint provided; using fresh model");
            ConvSegmenter::<EvalBackend>::new(model_cfg, &device)
        }
    };

    let opts = EvalOptions {
        num_workers: args.num_workers,
        verbose: !args.quiet,
        auc_roc: args.auc_roc,
        save_dir: args.save_dir,
        shard: ShardContext::new(args.rank, args.world_size)?,
    };
    let report = evaluate(&model, &dataset, &LossSpec::dice(), &opts, &device)?;

    let auc = report
        .auc_roc
        .map(|a| format!(", auc_roc={a:.4}"))
        .unwrap_or_default();
    println!(
        "Eval complete: mdice={:.4}, loss={:.6}{auc}",
        report.mdice, report.loss
    );
    Ok(())
}
