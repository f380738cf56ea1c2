//! Signal-variance change (DVARS).
//!
//! For each consecutive frame pair, the spatial root-mean-square of the
//! voxel-wise temporal derivative. Abrupt intensity change between frames is
//! the signature of a motion artifact that survived rigid correction.
//!
//! When a brain mask is given the scan is masked first and the RMS is taken
//! over the full volume, matching the normalized-intensity units the default
//! threshold (5.0) was calibrated against.

use crate::error::PipelineError;
use crate::motion::{MetricKind, MotionMetricSeries};
use crate::volume::{BrainMask, Scan};

/// Compute the DVARS series for a cleaned scan.
///
/// A single-frame scan has no temporal derivative; its series is the lone
/// mandatory leading 0.
pub fn dvars_series(
    scan: &Scan,
    mask: Option<&BrainMask>,
    threshold: f64,
) -> Result<MotionMetricSeries, PipelineError> {
    let masked;
    let scan = match mask {
        Some(m) => {
            masked = scan.masked(m)?;
            &masked
        }
        None => scan,
    };

    let nt = scan.num_frames();
    let n = scan.frame_len();
    if nt <= 1 {
        log::warn!(
            "{}: scan has {nt} frame(s); DVARS series is degenerate",
            scan.path().display()
        );
    }

    let mut diffs = Vec::with_capacity(nt.saturating_sub(1));
    for t in 1..nt {
        let prev = scan.frame_data(t - 1)?;
        let curr = scan.frame_data(t)?;
        let sum_sq: f64 = prev
            .iter()
            .zip(curr.iter())
            .map(|(&a, &b)| {
                let d = b - a;
                d * d
            })
            .sum();
        diffs.push((sum_sq / n as f64).sqrt());
    }

    Ok(MotionMetricSeries::from_diffs(
        MetricKind::SignalVariance,
        diffs,
        threshold,
    ))
}
