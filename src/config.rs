//! Pipeline configuration.
//!
//! One immutable configuration object is constructed up front and passed to
//! each component; nothing is configured through module-level state.

/// Statistic used for the region-to-region similarity matrix.
///
/// Both options are symmetric and deterministic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Similarity {
    /// Pearson correlation of the region-average time series (default).
    Pearson,
    /// Sample covariance of the region-average time series.
    Covariance,
}

/// Recognized pipeline options with the defaults used in production runs.
///
/// Thresholds follow Power et al. 2012: FD in millimeter-equivalent units,
/// DVARS in the normalized-intensity units produced by median-1000
/// normalization.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// High-pass cutoff frequency in Hz, consumed by the external bandpass
    /// collaborator via [`PipelineConfig::bandpass_sigmas`].
    pub hp_frequency: f64,
    /// Low-pass cutoff frequency in Hz.
    pub lp_frequency: f64,
    /// DVARS outlier threshold (normalized-intensity units).
    pub dvars_threshold: f64,
    /// Frame-displacement outlier threshold (mm).
    pub fd_threshold: f64,
    /// Largest segmentation label value; region tables span `0..=max`.
    pub max_segment_value: u32,
    /// Whether intermediate artifacts (plots, per-metric files) are kept.
    pub save_intermediates: bool,
    /// Whether background label 0 participates in the similarity matrix.
    pub include_background: bool,
    /// Similarity statistic for the region matrix.
    pub similarity: Similarity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hp_frequency: 0.009,
            lp_frequency: 0.08,
            dvars_threshold: 5.0,
            fd_threshold: 0.5,
            max_segment_value: 170,
            save_intermediates: true,
            include_background: true,
            similarity: Similarity::Pearson,
        }
    }
}

impl PipelineConfig {
    /// Gaussian sigmas for the external temporal-filter collaborator.
    ///
    /// `sigma = 1 / (TR * frequency)`, with the repetition time in seconds.
    ///
    /// # Returns
    /// (high-pass sigma, low-pass sigma) in volumes
    pub fn bandpass_sigmas(&self, repetition_time: f64) -> (f64, f64) {
        (
            1.0 / (repetition_time * self.hp_frequency),
            1.0 / (repetition_time * self.lp_frequency),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bandpass_sigmas() {
        let config = PipelineConfig::default();
        let (hp, lp) = config.bandpass_sigmas(2.0);
        assert!((hp - 1.0 / (2.0 * 0.009)).abs() < 1e-12);
        assert!((lp - 1.0 / (2.0 * 0.08)).abs() < 1e-12);
    }
}
