//! Indexing image/label volume pairs into an evaluation dataset.

use crate::transform::TransformPipeline;
use crate::types::{EvalSample, VolDatasetError, VolDatasetResult};
use crate::volfile;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub root: PathBuf,
    pub images_subdir: String,
    pub labels_subdir: String,
}

impl CatalogConfig {
    /// Read a catalog description from a JSON file.
    pub fn load(path: &Path) -> VolDatasetResult<Self> {
        let raw = fs::read(path).map_err(|e| VolDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| VolDatasetError::Json {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CasePair {
    pub stem: String,
    pub image: PathBuf,
    pub label: PathBuf,
}

impl CatalogConfig {
    /// Pair every `images/<stem>.vsf` with `labels/<stem>.vsf`, sorted by stem
    /// so the dataset order is deterministic across runs and hosts.
    pub fn index(&self) -> VolDatasetResult<Vec<CasePair>> {
        let images_dir = self.root.join(&self.images_subdir);
        let labels_dir = self.root.join(&self.labels_subdir);
        let mut pairs = Vec::new();
        let entries = fs::read_dir(&images_dir).map_err(|e| VolDatasetError::Io {
            path: images_dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| VolDatasetError::Io {
                path: images_dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("vsf") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let label = labels_dir.join(format!("{stem}.vsf"));
            if !label.exists() {
                return Err(VolDatasetError::MissingLabel { path });
            }
            pairs.push(CasePair {
                stem,
                image: path,
                label,
            });
        }
        pairs.sort_by(|a, b| a.stem.cmp(&b.stem));
        Ok(pairs)
    }
}

/// A validation dataset: a finite, restartable sequence of (image, label)
/// volume pairs with a known class count and transform geometry.
pub trait EvalDataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn num_classes(&self) -> usize;

    fn transforms(&self) -> &TransformPipeline;

    /// Load one sample. The transform pipeline is applied to the image only;
    /// the label keeps its original geometry.
    fn sample(&self, idx: usize) -> VolDatasetResult<EvalSample>;
}

/// Directory-backed dataset over a catalog of `.vsf` pairs.
pub struct CaseDataset {
    pairs: Vec<CasePair>,
    num_classes: usize,
    transforms: TransformPipeline,
}

impl CaseDataset {
    pub fn open(
        cfg: &CatalogConfig,
        num_classes: usize,
        transforms: TransformPipeline,
    ) -> VolDatasetResult<Self> {
        Ok(Self {
            pairs: cfg.index()?,
            num_classes,
            transforms,
        })
    }

    pub fn pairs(&self) -> &[CasePair] {
        &self.pairs
    }
}

impl EvalDataset for CaseDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn transforms(&self) -> &TransformPipeline {
        &self.transforms
    }

    fn sample(&self, idx: usize) -> VolDatasetResult<EvalSample> {
        let pair = self.pairs.get(idx).ok_or_else(|| {
            VolDatasetError::Other(format!(
                "sample index {idx} out of range ({} cases)",
                self.pairs.len()
            ))
        })?;
        let raw = volfile::load_volume(&pair.image)?;
        let label = volfile::load_volume(&pair.label)?;
        let image = self.transforms.apply(&raw);
        Ok(EvalSample { image, label })
    }
}
