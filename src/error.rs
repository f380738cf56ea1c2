//! Error taxonomy for the preprocessing core.
//!
//! Load/shape errors are fatal for the scan being processed; degenerate
//! inputs (empty metric files, zero-voxel labels) are absorbed locally with a
//! logged warning and never surface as errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the preprocessing core.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The scan file could not be read or decoded.
    #[error("failed to load scan {path}: {detail}")]
    ScanLoad { path: PathBuf, detail: String },

    /// A time index outside `[0, num_frames)` was requested.
    #[error("frame index {index} out of range for scan with {num_frames} frames")]
    IndexOutOfRange { index: usize, num_frames: usize },

    /// Segmentation spatial shape does not match the scan's frame shape.
    #[error("segmentation shape {seg:?} does not match scan frame shape {scan:?}")]
    SegmentationMismatch {
        seg: (usize, usize, usize),
        scan: (usize, usize, usize),
    },

    /// Brain mask spatial shape does not match the scan's frame shape.
    #[error("mask shape {mask:?} does not match scan frame shape {scan:?}")]
    MaskMismatch {
        mask: (usize, usize, usize),
        scan: (usize, usize, usize),
    },

    /// The persisted reference-frame cache exists but cannot be parsed.
    /// This is a configuration error and is never silently repaired.
    #[error("reference-frame cache {path} is corrupt: {detail}")]
    CacheCorruption { path: PathBuf, detail: String },

    /// An external collaborator tool failed (non-zero exit, timeout, or
    /// unparseable output).
    #[error("external tool failed in stage '{stage}': {detail}")]
    ExternalTool { stage: String, detail: String },

    /// Split-frame filenames carry a zero-padded 4-digit index, so a scan may
    /// hold at most 9999 frames. This limit is enforced, not widened.
    #[error("frame count {num_frames} exceeds the 9999-frame limit of split-file naming")]
    FrameCountLimit { num_frames: usize },

    /// A diagnostic plot could not be rendered.
    #[error("failed to render plot {path}: {detail}")]
    Plot { path: PathBuf, detail: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
