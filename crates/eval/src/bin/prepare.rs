use clap::Parser;
use eval::{validate_backend_choice, BackendKind, EvalBackend};
use preprocess::{HuWindow, Normalizer};
use std::path::PathBuf;
use vol_dataset::volfile::{self, VolArray, VolData};
use vol_dataset::CatalogConfig;

#[derive(Parser, Debug)]
#[command(
    name = "prepare",
    about = "Normalize raw CT volumes (HU windowing + label remapping) into an evaluation catalog"
)]
struct Args {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    backend: BackendKind,
    /// Raw dataset root containing images/ and labels/.
    #[arg(long)]
    input_root: PathBuf,
    /// Output dataset root.
    #[arg(long)]
    output_root: PathBuf,
    /// Images subdirectory relative to both roots.
    #[arg(long, default_value = "images")]
    images_subdir: String,
    /// Labels subdirectory relative to both roots.
    #[arg(long, default_value = "labels")]
    labels_subdir: String,
    /// HU window minimum.
    #[arg(long, default_value_t = -1000.0, allow_hyphen_values = true)]
    hu_min: f32,
    /// HU window maximum.
    #[arg(long, default_value_t = 600.0, allow_hyphen_values = true)]
    hu_max: f32,
    /// Replacement for NaN voxels before windowing.
    #[arg(long, default_value_t = -2000.0, allow_hyphen_values = true)]
    hu_nan: f32,
    /// JSON file holding an ordered list of [from, to] label pairs.
    #[arg(long)]
    label_map: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    validate_backend_choice(args.backend)?;

    let window = HuWindow {
        min: args.hu_min,
        max: args.hu_max,
        nan: args.hu_nan,
    };
    let remap: Vec<(i64, i64)> = match &args.label_map {
        Some(path) => {
            let raw = std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("failed to read label map {}: {e}", path.display()))?;
            serde_json::from_slice(&raw)
                .map_err(|e| anyhow::anyhow!("invalid label map {}: {e}", path.display()))?
        }
        None => Vec::new(),
    };

    let cfg = CatalogConfig {
        root: args.input_root.clone(),
        images_subdir: args.images_subdir.clone(),
        labels_subdir: args.labels_subdir.clone(),
    };
    let pairs = cfg.index()?;
    if pairs.is_empty() {
        println!("No cases found under {}", cfg.root.display());
        return Ok(());
    }

    let out_images = args.output_root.join(&args.images_subdir);
    let out_labels = args.output_root.join(&args.labels_subdir);
    std::fs::create_dir_all(&out_images)?;
    std::fs::create_dir_all(&out_labels)?;

    let device = <EvalBackend as burn::tensor::backend::Backend>::Device::default();
    let norm = Normalizer::<EvalBackend>::new(device);

    for pair in &pairs {
        let raw = volfile::load_volume(&pair.image)?;
        let windowed = norm.lower(norm.hu_norm(&raw, window))?;
        volfile::save_volume(&out_images.join(format!("{}.vsf", pair.stem)), &windowed)?;

        let label = volfile::load(&pair.label)?;
        if label.dims.len() != 3 {
            anyhow::bail!(
                "label {} has rank {}, expected 3",
                pair.label.display(),
                label.dims.len()
            );
        }
        let shape = [
            label.dims[0] as usize,
            label.dims[1] as usize,
            label.dims[2] as usize,
        ];
        let values: Vec<i64> = match label.data {
            VolData::I64(v) => v,
            VolData::F32(v) => v.into_iter().map(|x| x as i64).collect(),
        };
        let remapped = if remap.is_empty() {
            values
        } else {
            norm.lower_labels(norm.label_remap(&values, shape, &remap))?
        };
        let dims = shape.iter().map(|d| *d as u64).collect();
        volfile::save(
            &out_labels.join(format!("{}.vsf", pair.stem)),
            &VolArray::from_i64(dims, remapped)?,
        )?;
        println!("[prepare] {} -> windowed image + label", pair.stem);
    }

    println!(
        "[prepare] wrote {} cases to {}",
        pairs.len(),
        args.output_root.display()
    );
    Ok(())
}
