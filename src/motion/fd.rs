//! Frame-wise displacement from rigid-alignment parameters.
//!
//! The upstream motion-correction collaborator writes one line of six rigid
//! parameters per frame (three rotations in radians, then three translations
//! in mm, FSL column order). FD summarizes the frame-to-frame change as
//! `sum |dt| + HEAD_RADIUS_MM * sum |dr|` (Power et al. 2012).
//!
//! Also provides the 6-to-24 parameter expansion (`[p, p^2, p', p'^2]`)
//! consumed by the head-motion regression collaborator.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::PipelineError;
use crate::motion::{MetricKind, MotionMetricSeries};

/// Rotation-to-displacement conversion radius in mm (Power et al. 2012).
const HEAD_RADIUS_MM: f64 = 50.0;

fn parse_par_rows(path: &Path, text: &str) -> Result<Vec<[f64; 6]>, PipelineError> {
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cols: Vec<f64> = line
            .split_whitespace()
            .map(|c| c.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| PipelineError::ExternalTool {
                stage: "motion-parameters".into(),
                detail: format!("{}:{}: {e}", path.display(), lineno + 1),
            })?;
        if cols.len() < 6 {
            return Err(PipelineError::ExternalTool {
                stage: "motion-parameters".into(),
                detail: format!(
                    "{}:{}: expected 6 rigid parameters, got {}",
                    path.display(),
                    lineno + 1,
                    cols.len()
                ),
            });
        }
        rows.push([cols[0], cols[1], cols[2], cols[3], cols[4], cols[5]]);
    }
    Ok(rows)
}

/// Compute the FD series from a rigid-parameter (`.par`) file.
///
/// A missing or empty file is degenerate tool output, not an error: it yields
/// an empty series, which downstream fusion treats as "no outliers from this
/// metric".
pub fn fd_series_from_par(path: &Path, threshold: f64) -> Result<MotionMetricSeries, PipelineError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{}: missing motion-parameter file; empty FD series", path.display());
            return Ok(MotionMetricSeries::empty(MetricKind::FrameDisplacement, threshold));
        }
        Err(e) => return Err(e.into()),
    };

    let rows = parse_par_rows(path, &text)?;
    if rows.is_empty() {
        log::warn!("{}: empty motion-parameter file; empty FD series", path.display());
        return Ok(MotionMetricSeries::empty(MetricKind::FrameDisplacement, threshold));
    }

    let diffs = rows
        .windows(2)
        .map(|w| {
            let rot: f64 = (0..3).map(|c| (w[1][c] - w[0][c]).abs()).sum();
            let trans: f64 = (3..6).map(|c| (w[1][c] - w[0][c]).abs()).sum();
            trans + HEAD_RADIUS_MM * rot
        })
        .collect();

    Ok(MotionMetricSeries::from_diffs(
        MetricKind::FrameDisplacement,
        diffs,
        threshold,
    ))
}

/// Expand 6 rigid parameters per frame to 24: `[p, p^2, p', p'^2]`, with a
/// zero row prepended to the derivative blocks. Pure numeric transform for
/// the regression collaborator.
pub fn expand_motion_parameters(par_file: &Path, out_file: &Path) -> Result<(), PipelineError> {
    let text = fs::read_to_string(par_file)?;
    let rows = parse_par_rows(par_file, &text)?;

    let mut out = fs::File::create(out_file)?;
    for (t, row) in rows.iter().enumerate() {
        let deriv: Vec<f64> = if t == 0 {
            vec![0.0; 6]
        } else {
            (0..6).map(|c| row[c] - rows[t - 1][c]).collect()
        };

        let mut cols: Vec<f64> = Vec::with_capacity(24);
        cols.extend_from_slice(row);
        cols.extend(row.iter().map(|&p| p * p));
        cols.extend(deriv.iter());
        cols.extend(deriv.iter().map(|&d| d * d));

        let line: Vec<String> = cols.iter().map(|v| format!("{v}")).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    Ok(())
}
