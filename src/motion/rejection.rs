//! Artifact-rejection policy.
//!
//! Fuses the FD and DVARS outlier sets by union: a frame flagged by either
//! metric is rejected. The surviving split-frame files are identified by the
//! zero-padded 4-digit frame index embedded in their filenames, which is why
//! scans are capped at 9999 frames.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::motion::MotionMetricSeries;

const REJECTIONS_FILE_NAME: &str = "rejections.json";

/// Audit record of a rejection pass, persisted as `rejections.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectionRecord {
    /// Size of the union of both outlier sets.
    pub total_rejected: usize,
    pub rejected_by_fd: usize,
    pub rejected_by_dvars: usize,
    /// Sorted frame indices flagged by FD.
    pub fd_indices: Vec<usize>,
    /// Sorted frame indices flagged by DVARS.
    pub dvars_indices: Vec<usize>,
}

/// Result of applying the rejection policy to a set of split-frame files.
#[derive(Clone, Debug)]
pub struct RejectionOutcome {
    /// Split-frame paths that survived, in input order.
    pub kept: Vec<PathBuf>,
    pub record: RejectionRecord,
}

/// Remove every split-frame file whose index is flagged by either metric.
///
/// An empty metric series contributes no rejections. Files whose names carry
/// no flagged index pass through untouched.
pub fn reject_frames(
    split_frames: &[PathBuf],
    fd: &MotionMetricSeries,
    dvars: &MotionMetricSeries,
) -> Result<RejectionOutcome, PipelineError> {
    let num_frames = fd.len().max(dvars.len()).max(split_frames.len());
    if num_frames > 9999 {
        return Err(PipelineError::FrameCountLimit { num_frames });
    }

    let fd_indices = fd.outlier_indices();
    let dvars_indices = dvars.outlier_indices();

    let rejected: BTreeSet<usize> = fd_indices
        .iter()
        .chain(dvars_indices.iter())
        .copied()
        .collect();

    let tags: Vec<String> = rejected.iter().map(|i| format!("{i:04}")).collect();
    let kept: Vec<PathBuf> = split_frames
        .iter()
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            !tags.iter().any(|t| name.contains(t.as_str()))
        })
        .cloned()
        .collect();

    let record = RejectionRecord {
        total_rejected: rejected.len(),
        rejected_by_fd: fd_indices.len(),
        rejected_by_dvars: dvars_indices.len(),
        fd_indices,
        dvars_indices,
    };
    log::info!(
        "rejected {} of {} frames ({} by FD, {} by DVARS)",
        record.total_rejected,
        split_frames.len(),
        record.rejected_by_fd,
        record.rejected_by_dvars
    );

    Ok(RejectionOutcome { kept, record })
}

/// Persist the audit record as `rejections.json` under `out_dir`.
pub fn write_rejection_record(
    out_dir: &Path,
    record: &RejectionRecord,
) -> Result<PathBuf, PipelineError> {
    let path = out_dir.join(REJECTIONS_FILE_NAME);
    fs::write(&path, serde_json::to_string_pretty(record)?)?;
    Ok(path)
}
