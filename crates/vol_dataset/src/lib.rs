//! Volume storage, cataloging, and loading for segmentation evaluation.
//!
//! This crate provides:
//! - A CPU-resident `Volume` type for 3D (z, y, x) voxel data
//! - The `.vsf` uncompressed array file format (bit-exact round trips)
//! - Catalog indexing of image/label volume pairs
//! - Invertible geometric transform pipelines
//! - Sharded, ordered sampling and prefetching for evaluation passes

pub mod catalog;
pub mod loader;
pub mod sampler;
pub mod transform;
pub mod types;
pub mod volfile;

pub use catalog::{CaseDataset, CasePair, CatalogConfig, EvalDataset};
pub use loader::EvalLoader;
pub use sampler::{ShardContext, ShardedSampler};
pub use transform::{FlipAxis, GeomTransform, TransformPipeline, TransformPipelineBuilder};
pub use types::{EvalSample, VolDatasetError, VolDatasetResult, Volume};
pub use volfile::{VolArray, VolData};
