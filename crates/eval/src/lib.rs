#![recursion_limit = "256"]

//! Evaluation harness for volumetric segmentation models.

pub mod evaluate;
pub mod infer;
pub mod model;
pub mod timer;

pub use evaluate::{evaluate, EvalError, EvalOptions, EvalReport, EvalResult};
pub use infer::inference;
pub use model::{load_segmenter_from_checkpoint, SegModel};
pub use timer::TimeAverager;

use clap::ValueEnum;

/// Backend alias for evaluation (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type EvalBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type EvalBackend = burn_ndarray::NdArray<f32>;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            println!("note: built with backend-wgpu; evaluation will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
