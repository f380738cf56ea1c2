//! BOLD fMRI preprocessing core: motion-artifact rejection and
//! region-similarity analysis.
//!
//! The crate covers the compute-heavy middle of a resting-state pipeline.
//! Rigid alignment and temporal filtering run as external collaborators; this
//! crate selects their reference frame, scores the result for residual
//! motion, drops the frames that moved, and reduces what survives to a
//! region-to-region similarity matrix.
//!
//! # Modules
//! - `volume`: scan, frame, mask, and segmentation containers
//! - `nifti_io`: NIfTI-1 reading and writing (gzip-transparent)
//! - `registration`: rigid frame-pair similarity scoring
//! - `reference`: all-pairs reference-frame selection with a cross-run cache
//! - `motion`: FD and DVARS metrics, rejection policy, diagnostic plots
//! - `connectivity`: region-average time series and the similarity matrix
//! - `pipeline`: per-scan orchestration and the external-tool wrapper

pub mod config;
pub mod connectivity;
pub mod error;
pub mod motion;
pub mod nifti_io;
pub mod pipeline;
pub mod reference;
pub mod registration;
pub mod volume;

pub use config::{PipelineConfig, Similarity};
pub use error::PipelineError;
pub use pipeline::CorePipeline;
