//! Core types and error definitions for vol_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type VolDatasetResult<T> = Result<T, VolDatasetError>;

#[derive(Debug, Error)]
pub enum VolDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("bad array file {path}: {msg}")]
    Format { path: PathBuf, msg: String },
    #[error("label volume missing for image {path}")]
    MissingLabel { path: PathBuf },
    #[error("shape mismatch: {msg}")]
    Shape { msg: String },
    #[error("invalid shard context: rank {rank} >= world size {world_size}")]
    Shard { rank: usize, world_size: usize },
    #[error("{0}")]
    Other(String),
}

/// Number of voxels in a (z, y, x) shape, guarding against overflow.
pub fn voxel_count(shape: [usize; 3]) -> VolDatasetResult<usize> {
    shape[0]
        .checked_mul(shape[1])
        .and_then(|v| v.checked_mul(shape[2]))
        .ok_or_else(|| VolDatasetError::Shape {
            msg: format!("voxel count overflow for shape {shape:?}"),
        })
}

/// A dense 3D scalar field in (z, y, x) order, x fastest.
///
/// This is the CPU staging form; volumes are lifted to backend tensors at the
/// model boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Vec<f32>,
    pub shape: [usize; 3],
}

impl Volume {
    pub fn new(data: Vec<f32>, shape: [usize; 3]) -> VolDatasetResult<Self> {
        let expected = voxel_count(shape)?;
        if data.len() != expected {
            return Err(VolDatasetError::Shape {
                msg: format!(
                    "buffer holds {} voxels but shape {shape:?} needs {expected}",
                    data.len()
                ),
            });
        }
        Ok(Self { data, shape })
    }

    pub fn zeros(shape: [usize; 3]) -> VolDatasetResult<Self> {
        Ok(Self {
            data: vec![0.0; voxel_count(shape)?],
            shape,
        })
    }

    pub fn voxels(&self) -> usize {
        self.data.len()
    }
}

/// One validation sample: the model input volume and its ground-truth label.
///
/// The image carries the dataset's transform geometry; the label keeps its
/// original shape (predictions are mapped back to it).
#[derive(Debug, Clone)]
pub struct EvalSample {
    pub image: Volume,
    pub label: Volume,
}
