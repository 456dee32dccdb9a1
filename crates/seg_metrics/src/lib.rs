//! Segmentation losses and ranking metrics.
//!
//! - Weighted loss specifications (`LossSpec`) and their evaluation against
//!   logits + labels, returning per-class Dice alongside the loss terms
//! - Voxel-level AUC-ROC over accumulated softmax probabilities

pub mod auc;
pub mod loss;

pub use auc::auc_roc;
pub use loss::{loss_computation, LossKind, LossSpec};

use thiserror::Error;

pub type MetricResult<T> = Result<T, MetricError>;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("empty loss specification")]
    EmptySpec,
    #[error("loss spec has {types} types but {coefs} coefficients")]
    CoefMismatch { types: usize, coefs: usize },
    #[error("shape mismatch: {msg}")]
    Shape { msg: String },
    #[error("auc-roc undefined: {msg}")]
    DegenerateAuc { msg: String },
    #[error("tensor extraction failed: {msg}")]
    Tensor { msg: String },
}
