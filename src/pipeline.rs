//! Pipeline orchestration.
//!
//! Drives one scan through the preprocessing core: reference-frame selection,
//! motion metrics, artifact rejection, and the region-similarity matrix.
//! External collaborators (rigid alignment, temporal filtering) run as
//! subprocesses between these stages; [`run_external`] is the shared wrapper
//! that turns their failures into [`PipelineError::ExternalTool`].

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::connectivity::{write_mapping_dict, RegionAverageArray, RegionSimilarityMatrix};
use crate::error::PipelineError;
use crate::motion::rejection::write_rejection_record;
use crate::motion::{
    dvars_series, fd_series_from_par, plot, reject_frames, MotionMetricSeries, RejectionOutcome,
};
use crate::reference::{ReferenceFrameCache, ReferenceFrameSelector};
use crate::registration::{SearchSchedule, VolumeSimilarityScorer};
use crate::volume::{BrainMask, Scan, Segmentation};

/// Both motion metrics for one scan.
pub struct MotionMetrics {
    pub fd: MotionMetricSeries,
    pub dvars: MotionMetricSeries,
}

/// One scan's trip through the preprocessing core, writing intermediates and
/// results under a derivatives directory.
pub struct CorePipeline {
    config: PipelineConfig,
    out_dir: PathBuf,
}

impl CorePipeline {
    pub fn new(config: PipelineConfig, out_dir: PathBuf) -> Self {
        Self { config, out_dir }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Pick the motion-correction reference frame, consulting the cross-run
    /// cache under the derivatives directory first.
    pub fn select_reference(&self, scan: &Scan) -> Result<usize, PipelineError> {
        let mut cache = ReferenceFrameCache::open(&self.out_dir)?;
        let selector =
            ReferenceFrameSelector::new(VolumeSimilarityScorer::new(SearchSchedule::default()));
        selector.select_cached(scan, &mut cache)
    }

    /// Compute FD (from the aligner's `.par` output) and DVARS (from the
    /// cleaned scan), writing the per-metric text files and diagnostic plots.
    pub fn motion_metrics(
        &self,
        scan: &Scan,
        mask: Option<&BrainMask>,
        par_path: &Path,
    ) -> Result<MotionMetrics, PipelineError> {
        let fd = fd_series_from_par(par_path, self.config.fd_threshold)?;
        let dvars = dvars_series(scan, mask, self.config.dvars_threshold)?;

        if self.config.save_intermediates {
            fd.write_metrics(&self.out_dir.join("fd_metrics.txt"))?;
            fd.write_outliers(&self.out_dir.join("fd_outliers.txt"))?;
            dvars.write_metrics(&self.out_dir.join("dvars_metrics.txt"))?;
            dvars.write_outliers(&self.out_dir.join("dvars_outliers.txt"))?;
            plot::plot_metric_series(&dvars, "DVARS", &self.out_dir.join("dvars_plot.png"))?;
            plot::plot_fd_vs_dvars(&fd, &dvars, &self.out_dir.join("fd_dvars_plot.png"))?;
        }

        Ok(MotionMetrics { fd, dvars })
    }

    /// Apply the union rejection policy to the split-frame files and persist
    /// the audit record.
    pub fn reject(
        &self,
        split_frames: &[PathBuf],
        metrics: &MotionMetrics,
    ) -> Result<RejectionOutcome, PipelineError> {
        let outcome = reject_frames(split_frames, &metrics.fd, &metrics.dvars)?;
        write_rejection_record(&self.out_dir, &outcome.record)?;
        Ok(outcome)
    }

    /// Build the region-average table and the similarity matrix, writing
    /// `average_arr.csv`, `sim_matrix.csv`, and `mapping_dict.json`.
    pub fn similarity(
        &self,
        scan: &Scan,
        seg: &Segmentation,
    ) -> Result<RegionSimilarityMatrix, PipelineError> {
        let averages =
            RegionAverageArray::compute(scan, seg, self.config.max_segment_value)?;
        let matrix = RegionSimilarityMatrix::compute(
            &averages,
            self.config.similarity,
            self.config.include_background,
        );

        averages.write_csv(&self.out_dir.join("average_arr.csv"))?;
        matrix.write_csv(&self.out_dir.join("sim_matrix.csv"))?;
        write_mapping_dict(&self.out_dir.join("mapping_dict.json"), matrix.size())?;
        Ok(matrix)
    }
}

/// Run an external collaborator to completion.
///
/// Polls rather than blocks so a wedged tool cannot stall the whole run;
/// non-zero exit and timeout both surface as [`PipelineError::ExternalTool`].
pub fn run_external(
    stage: &str,
    command: &mut Command,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let mut child = command.spawn().map_err(|e| PipelineError::ExternalTool {
        stage: stage.to_string(),
        detail: format!("failed to spawn: {e}"),
    })?;

    let started = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) if status.success() => return Ok(()),
            Some(status) => {
                return Err(PipelineError::ExternalTool {
                    stage: stage.to_string(),
                    detail: format!("exited with {status}"),
                })
            }
            None => {
                if started.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PipelineError::ExternalTool {
                        stage: stage.to_string(),
                        detail: format!("timed out after {}s", timeout.as_secs()),
                    });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Similarity;
    use std::fs;

    fn pipeline(dir: &Path) -> CorePipeline {
        CorePipeline::new(PipelineConfig::default(), dir.to_path_buf())
    }

    /// 3 voxels, 4 frames: constant background, two perfectly correlated
    /// regions.
    fn test_scan_and_seg() -> (Scan, Segmentation) {
        let scan = Scan::from_parts(
            vec![
                5.0, 1.0, 2.0, //
                5.0, 2.0, 4.0, //
                5.0, 3.0, 6.0, //
                5.0, 4.0, 8.0,
            ],
            (3, 1, 1, 4),
            (1.0, 1.0, 1.0),
            1.0,
            PathBuf::from("sub-01/ses-01/bold.nii.gz"),
        );
        let seg = Segmentation::from_labels(vec![0, 1, 2], (3, 1, 1));
        (scan, seg)
    }

    #[test]
    fn test_similarity_stage_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            max_segment_value: 2,
            similarity: Similarity::Pearson,
            ..PipelineConfig::default()
        };
        let pipeline = CorePipeline::new(config, dir.path().to_path_buf());
        let (scan, seg) = test_scan_and_seg();

        let matrix = pipeline.similarity(&scan, &seg).unwrap();
        assert_eq!(matrix.size(), 3);
        assert!((matrix.get(1, 2) - 1.0).abs() < 1e-12);
        assert_eq!(matrix.get(0, 1), 0.0);

        for file in ["average_arr.csv", "sim_matrix.csv", "mapping_dict.json"] {
            assert!(dir.path().join(file).exists(), "{file} missing");
        }
        assert_eq!(
            fs::read_to_string(dir.path().join("sim_matrix.csv")).unwrap(),
            "1,0,0\n0,1,1\n0,1,1\n"
        );
    }

    #[test]
    fn test_motion_metrics_stage_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let (scan, _) = test_scan_and_seg();

        let par = dir.path().join("mc.par");
        fs::write(
            &par,
            "0 0 0 0 0 0\n0 0 0 0.1 0 0\n0 0 0 0.9 0 0\n0 0 0 0.9 0 0\n",
        )
        .unwrap();

        let metrics = pipeline.motion_metrics(&scan, None, &par).unwrap();
        assert_eq!(metrics.fd.len(), 4);
        assert_eq!(metrics.fd.outlier_indices(), vec![2]);
        assert_eq!(metrics.dvars.len(), 4);

        for file in [
            "fd_metrics.txt",
            "fd_outliers.txt",
            "dvars_metrics.txt",
            "dvars_outliers.txt",
            "dvars_plot.png",
            "fd_dvars_plot.png",
        ] {
            assert!(dir.path().join(file).exists(), "{file} missing");
        }
    }

    #[test]
    fn test_save_intermediates_off_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            save_intermediates: false,
            ..PipelineConfig::default()
        };
        let pipeline = CorePipeline::new(config, dir.path().to_path_buf());
        let (scan, _) = test_scan_and_seg();

        let par = dir.path().join("mc.par");
        fs::write(&par, "0 0 0 0 0 0\n0 0 0 0.1 0 0\n").unwrap();
        pipeline.motion_metrics(&scan, None, &par).unwrap();

        assert!(!dir.path().join("fd_metrics.txt").exists());
        assert!(!dir.path().join("dvars_plot.png").exists());
    }

    #[test]
    fn test_reject_stage_writes_record() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let (scan, _) = test_scan_and_seg();

        let par = dir.path().join("mc.par");
        fs::write(
            &par,
            "0 0 0 0 0 0\n0 0 0 0.9 0 0\n0 0 0 0.9 0 0\n0 0 0 0.9 0 0\n",
        )
        .unwrap();
        let metrics = pipeline.motion_metrics(&scan, None, &par).unwrap();

        let split: Vec<PathBuf> = (0..4)
            .map(|i| dir.path().join(format!("bold_{i:04}.nii.gz")))
            .collect();
        let outcome = pipeline.reject(&split, &metrics).unwrap();

        assert_eq!(outcome.record.fd_indices, vec![1]);
        assert_eq!(outcome.kept.len(), 3);
        assert!(dir.path().join("rejections.json").exists());
    }

    #[test]
    fn test_select_reference_end_to_end_with_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        // frames 0 and 2 share a pattern; frame 1 is the odd one out
        let n = 4 * 4 * 2;
        let mut data = Vec::new();
        for &freq in &[0.37, 1.7, 0.37] {
            data.extend((0..n).map(|i| 2.0 + (i as f64 * freq).sin()));
        }
        let scan = Scan::from_parts(
            data,
            (4, 4, 2, 3),
            (1.0, 1.0, 1.0),
            1.0,
            PathBuf::from("sub-01/ses-01/bold.nii.gz"),
        );

        let first = pipeline.select_reference(&scan).unwrap();
        assert_eq!(first, 0, "odd frame must not win; ties break to index 0");
        assert!(dir.path().join("best_frames.json").exists());

        // Cached on the second call.
        let second = pipeline.select_reference(&scan).unwrap();
        assert_eq!(second, first);
    }

    #[test]
    fn test_run_external_success_and_failure() {
        run_external("echo", Command::new("true").arg("x"), Duration::from_secs(5)).unwrap();

        let err = run_external("fail", &mut Command::new("false"), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExternalTool { .. }));
    }

    #[test]
    fn test_run_external_timeout() {
        let err = run_external(
            "sleep",
            Command::new("sleep").arg("5"),
            Duration::from_millis(200),
        )
        .unwrap_err();
        match err {
            PipelineError::ExternalTool { stage, detail } => {
                assert_eq!(stage, "sleep");
                assert!(detail.contains("timed out"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
