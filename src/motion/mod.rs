//! Motion-artifact detection.
//!
//! Two independent per-frame quality metrics:
//! - `dvars`: signal-variance change (RMS of the voxel-wise temporal derivative)
//! - `fd`: frame-wise displacement from rigid-alignment parameters
//!
//! plus the fusion policy (`rejection`) that removes flagged frames, and
//! diagnostic plots (`plot`).

pub mod dvars;
pub mod fd;
pub mod plot;
pub mod rejection;

pub use dvars::dvars_series;
pub use fd::{expand_motion_parameters, fd_series_from_par};
pub use rejection::{reject_frames, RejectionOutcome, RejectionRecord};

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::PipelineError;

/// Which motion-quality estimator produced a series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// Frame-wise displacement (mm-equivalent).
    FrameDisplacement,
    /// Signal-variance change (DVARS, normalized-intensity units).
    SignalVariance,
}

/// Per-frame motion metric with threshold-based outlier flags.
///
/// Invariants: `values.len() == outliers.len()`; when non-empty, the first
/// value is exactly 0 and never flagged (no prior frame to differ against).
/// An empty series means the estimator had degenerate input and contributes
/// no outliers.
#[derive(Clone, Debug)]
pub struct MotionMetricSeries {
    pub kind: MetricKind,
    pub values: Vec<f64>,
    pub outliers: Vec<bool>,
    pub threshold: f64,
}

impl MotionMetricSeries {
    /// Build a series from frame-to-frame difference values (length `n-1`
    /// for an `n`-frame scan); a leading 0 is prepended to align indices with
    /// the frame count.
    pub fn from_diffs(kind: MetricKind, diffs: Vec<f64>, threshold: f64) -> Self {
        let mut values = Vec::with_capacity(diffs.len() + 1);
        values.push(0.0);
        values.extend(diffs);
        let mut outliers: Vec<bool> = values.iter().map(|&v| v > threshold).collect();
        outliers[0] = false;
        Self { kind, values, outliers, threshold }
    }

    /// Degenerate series: no frames, no outliers.
    pub fn empty(kind: MetricKind, threshold: f64) -> Self {
        Self { kind, values: Vec::new(), outliers: Vec::new(), threshold }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Indices of flagged frames, in order.
    pub fn outlier_indices(&self) -> Vec<usize> {
        self.outliers
            .iter()
            .enumerate()
            .filter(|(_, &o)| o)
            .map(|(i, _)| i)
            .collect()
    }

    /// Write the metric file: one real value per line, first line `0`.
    pub fn write_metrics(&self, path: &Path) -> Result<(), PipelineError> {
        let mut f = fs::File::create(path)?;
        for v in &self.values {
            writeln!(f, "{v}")?;
        }
        Ok(())
    }

    /// Write the outlier-flag file: one `0`/`1` per line, aligned with the
    /// metric file.
    pub fn write_outliers(&self, path: &Path) -> Result<(), PipelineError> {
        let mut f = fs::File::create(path)?;
        for &o in &self.outliers {
            writeln!(f, "{}", u8::from(o))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_zero_never_outlier() {
        let s = MotionMetricSeries::from_diffs(
            MetricKind::SignalVariance,
            vec![1.0, 7.0, 2.0],
            5.0,
        );
        assert_eq!(s.len(), 4);
        assert_eq!(s.values[0], 0.0);
        assert!(!s.outliers[0]);
        assert_eq!(s.outlier_indices(), vec![2]);
    }

    #[test]
    fn test_empty_diffs_single_frame() {
        let s = MotionMetricSeries::from_diffs(MetricKind::SignalVariance, vec![], 5.0);
        assert_eq!(s.values, vec![0.0]);
        assert!(s.outlier_indices().is_empty());
    }

    #[test]
    fn test_file_formats() {
        let dir = tempfile::tempdir().unwrap();
        let s = MotionMetricSeries::from_diffs(
            MetricKind::FrameDisplacement,
            vec![0.25, 0.75],
            0.5,
        );

        let metrics = dir.path().join("fd_metrics.txt");
        let flags = dir.path().join("fd_outliers.txt");
        s.write_metrics(&metrics).unwrap();
        s.write_outliers(&flags).unwrap();

        assert_eq!(fs::read_to_string(&metrics).unwrap(), "0\n0.25\n0.75\n");
        assert_eq!(fs::read_to_string(&flags).unwrap(), "0\n0\n1\n");
    }
}
