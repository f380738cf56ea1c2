//! Region-average time series.
//!
//! One row per label value `0..=max_segment_value`, one column per time
//! frame; each cell is the mean intensity of the label's voxels in that
//! frame. Labels with no voxels keep an all-zero row so row index always
//! equals label value.

use std::path::Path;

use crate::error::PipelineError;
use crate::volume::{Scan, Segmentation};

/// Row-major `(max_label + 1) x num_frames` table of region means.
#[derive(Clone, Debug)]
pub struct RegionAverageArray {
    values: Vec<f64>,
    num_regions: usize,
    num_frames: usize,
}

impl RegionAverageArray {
    /// Average the scan over each segmentation label.
    ///
    /// Labels above `max_label` are ignored with a warning; labels with no
    /// voxels produce an all-zero row.
    ///
    /// # Arguments
    /// * `scan` - cleaned 4-D scan
    /// * `seg` - co-registered segmentation; spatial shape must match
    /// * `max_label` - largest label value given a row in the table
    pub fn compute(
        scan: &Scan,
        seg: &Segmentation,
        max_label: u32,
    ) -> Result<Self, PipelineError> {
        if seg.dims != scan.spatial_dims() {
            return Err(PipelineError::SegmentationMismatch {
                seg: seg.dims,
                scan: scan.spatial_dims(),
            });
        }

        let num_regions = max_label as usize + 1;
        let num_frames = scan.num_frames();
        let n = scan.frame_len();

        // Voxel counts are time-invariant.
        let mut counts = vec![0usize; num_regions];
        let mut out_of_range = 0usize;
        for &label in &seg.labels {
            if label as usize >= num_regions {
                out_of_range += 1;
            } else {
                counts[label as usize] += 1;
            }
        }
        if out_of_range > 0 {
            log::warn!(
                "{out_of_range} voxels carry labels above {max_label}; ignored"
            );
        }

        let mut values = vec![0.0; num_regions * num_frames];
        for t in 0..num_frames {
            let frame = scan.frame_data(t)?;
            for v in 0..n {
                let label = seg.labels[v] as usize;
                if label < num_regions {
                    values[label * num_frames + t] += frame[v];
                }
            }
        }
        for (label, &count) in counts.iter().enumerate() {
            if count == 0 {
                log::warn!("label {label} has no voxels; region row left at zero");
                continue;
            }
            for t in 0..num_frames {
                values[label * num_frames + t] /= count as f64;
            }
        }

        Ok(Self {
            values,
            num_regions,
            num_frames,
        })
    }

    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    pub fn num_frames(&self) -> usize {
        self.num_frames
    }

    /// The average time series of one region (row `label`).
    pub fn region_series(&self, label: usize) -> &[f64] {
        &self.values[label * self.num_frames..(label + 1) * self.num_frames]
    }

    /// Write the table as CSV, one row per region, no header.
    pub fn write_csv(&self, path: &Path) -> Result<(), PipelineError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        for label in 0..self.num_regions {
            let row: Vec<String> = self
                .region_series(label)
                .iter()
                .map(|v| v.to_string())
                .collect();
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// 3x1x1 scan, 2 frames: voxel values chosen so each region mean is
    /// distinct.
    fn test_inputs() -> (Scan, Segmentation) {
        let scan = Scan::from_parts(
            vec![
                5.0, 1.0, 2.0, // frame 0
                5.0, 3.0, 6.0, // frame 1
            ],
            (3, 1, 1, 2),
            (1.0, 1.0, 1.0),
            1.0,
            PathBuf::from("scan.nii.gz"),
        );
        let seg = Segmentation::from_labels(vec![0, 1, 2], (3, 1, 1));
        (scan, seg)
    }

    #[test]
    fn test_region_means() {
        let (scan, seg) = test_inputs();
        let avg = RegionAverageArray::compute(&scan, &seg, 2).unwrap();
        assert_eq!(avg.num_regions(), 3);
        assert_eq!(avg.num_frames(), 2);
        assert_eq!(avg.region_series(0), &[5.0, 5.0]);
        assert_eq!(avg.region_series(1), &[1.0, 3.0]);
        assert_eq!(avg.region_series(2), &[2.0, 6.0]);
    }

    #[test]
    fn test_multi_voxel_region_is_averaged() {
        let scan = Scan::from_parts(
            vec![2.0, 4.0, 9.0],
            (3, 1, 1, 1),
            (1.0, 1.0, 1.0),
            1.0,
            PathBuf::from("scan.nii.gz"),
        );
        let seg = Segmentation::from_labels(vec![1, 1, 0], (3, 1, 1));
        let avg = RegionAverageArray::compute(&scan, &seg, 1).unwrap();
        assert_eq!(avg.region_series(1), &[3.0]);
        assert_eq!(avg.region_series(0), &[9.0]);
    }

    #[test]
    fn test_empty_label_row_is_zero() {
        let (scan, seg) = test_inputs();
        let avg = RegionAverageArray::compute(&scan, &seg, 4).unwrap();
        assert_eq!(avg.region_series(3), &[0.0, 0.0]);
        assert_eq!(avg.region_series(4), &[0.0, 0.0]);
    }

    #[test]
    fn test_labels_above_max_are_ignored() {
        let (scan, _) = test_inputs();
        let seg = Segmentation::from_labels(vec![0, 1, 9], (3, 1, 1));
        let avg = RegionAverageArray::compute(&scan, &seg, 1).unwrap();
        assert_eq!(avg.num_regions(), 2);
        assert_eq!(avg.region_series(1), &[1.0, 3.0]);
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let (scan, _) = test_inputs();
        let seg = Segmentation::from_labels(vec![0, 1], (2, 1, 1));
        let err = RegionAverageArray::compute(&scan, &seg, 2).unwrap_err();
        assert!(matches!(err, PipelineError::SegmentationMismatch { .. }));
    }

    #[test]
    fn test_csv_output() {
        let dir = tempfile::tempdir().unwrap();
        let (scan, seg) = test_inputs();
        let avg = RegionAverageArray::compute(&scan, &seg, 2).unwrap();

        let path = dir.path().join("average_arr.csv");
        avg.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "5,5\n1,3\n2,6\n");
    }
}
