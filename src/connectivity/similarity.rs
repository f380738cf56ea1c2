//! Region-to-region similarity matrix.
//!
//! Pearson correlation of the region-average time series by default, sample
//! covariance as the alternative. Zero-variance rows (constant or all-zero
//! regions) get correlation 0 with every other region and 1 with themselves,
//! so empty labels never poison the matrix with NaN.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::Similarity;
use crate::connectivity::RegionAverageArray;
use crate::error::PipelineError;

/// Symmetric `n x n` similarity matrix over region rows, row-major.
#[derive(Clone, Debug)]
pub struct RegionSimilarityMatrix {
    values: Vec<f64>,
    n: usize,
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample covariance with `n - 1` in the denominator.
fn covariance(a: &[f64], b: &[f64]) -> f64 {
    let t = a.len();
    if t < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (t - 1) as f64
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let va = covariance(a, a);
    let vb = covariance(b, b);
    if va == 0.0 || vb == 0.0 {
        return 0.0;
    }
    covariance(a, b) / (va * vb).sqrt()
}

impl RegionSimilarityMatrix {
    /// Build the matrix from a region-average table.
    ///
    /// With `include_background` false, every entry involving label 0 is
    /// forced to 0 (the diagonal entry included) so the background row stays
    /// in the table without contributing edges.
    pub fn compute(
        averages: &RegionAverageArray,
        statistic: Similarity,
        include_background: bool,
    ) -> Self {
        let n = averages.num_regions();
        let mut values = vec![0.0; n * n];

        for i in 0..n {
            for j in i..n {
                if !include_background && (i == 0 || j == 0) {
                    continue;
                }
                let a = averages.region_series(i);
                let b = averages.region_series(j);
                let s = match statistic {
                    Similarity::Pearson => {
                        if i == j {
                            1.0
                        } else {
                            pearson(a, b)
                        }
                    }
                    Similarity::Covariance => covariance(a, b),
                };
                values[i * n + j] = s;
                values[j * n + i] = s;
            }
        }

        Self { values, n }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    /// Write the matrix as CSV, one row per region, no header.
    pub fn write_csv(&self, path: &Path) -> Result<(), PipelineError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_path(path)?;
        for i in 0..self.n {
            let row: Vec<String> = (0..self.n)
                .map(|j| self.get(i, j).to_string())
                .collect();
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Write the row-index-to-label mapping as JSON.
///
/// Row index equals label value throughout the table, so the map is the
/// identity; it is persisted anyway so downstream consumers never have to
/// assume that.
pub fn write_mapping_dict(path: &Path, num_regions: usize) -> Result<(), PipelineError> {
    let mapping: BTreeMap<usize, usize> = (0..num_regions).map(|i| (i, i)).collect();
    fs::write(path, serde_json::to_string_pretty(&mapping)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Scan, Segmentation};
    use std::path::PathBuf;

    /// bg constant 5, region 1 = [1,2,3,4], region 2 = [2,4,6,8]
    /// (perfectly correlated with region 1).
    fn test_averages() -> RegionAverageArray {
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
            PathBuf::from("scan.nii.gz"),
        );
        let seg = Segmentation::from_labels(vec![0, 1, 2], (3, 1, 1));
        RegionAverageArray::compute(&scan, &seg, 2).unwrap()
    }

    #[test]
    fn test_pearson_matrix() {
        let matrix =
            RegionSimilarityMatrix::compute(&test_averages(), Similarity::Pearson, true);
        assert_eq!(matrix.size(), 3);
        // constant background: unit diagonal, zero correlation elsewhere
        assert_eq!(matrix.get(0, 0), 1.0);
        assert_eq!(matrix.get(0, 1), 0.0);
        assert_eq!(matrix.get(0, 2), 0.0);
        // proportional series correlate perfectly
        assert!((matrix.get(1, 2) - 1.0).abs() < 1e-12);
        assert_eq!(matrix.get(1, 1), 1.0);
        assert_eq!(matrix.get(2, 2), 1.0);
    }

    #[test]
    fn test_matrix_is_symmetric() {
        let matrix =
            RegionSimilarityMatrix::compute(&test_averages(), Similarity::Pearson, true);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(matrix.get(i, j), matrix.get(j, i));
            }
        }
    }

    #[test]
    fn test_covariance_matrix() {
        let matrix =
            RegionSimilarityMatrix::compute(&test_averages(), Similarity::Covariance, true);
        // region 1 = [1,2,3,4]: sample variance 5/3
        assert!((matrix.get(1, 1) - 5.0 / 3.0).abs() < 1e-12);
        // region 2 doubles region 1: covariance 10/3, variance 20/3
        assert!((matrix.get(1, 2) - 10.0 / 3.0).abs() < 1e-12);
        assert!((matrix.get(2, 2) - 20.0 / 3.0).abs() < 1e-12);
        // constant background contributes nothing
        assert_eq!(matrix.get(0, 0), 0.0);
        assert_eq!(matrix.get(0, 1), 0.0);
    }

    #[test]
    fn test_background_exclusion() {
        let matrix =
            RegionSimilarityMatrix::compute(&test_averages(), Similarity::Pearson, false);
        for j in 0..3 {
            assert_eq!(matrix.get(0, j), 0.0);
            assert_eq!(matrix.get(j, 0), 0.0);
        }
        assert!((matrix.get(1, 2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_anticorrelated_regions() {
        let scan = Scan::from_parts(
            vec![1.0, 4.0, 2.0, 3.0, 3.0, 2.0, 4.0, 1.0],
            (2, 1, 1, 4),
            (1.0, 1.0, 1.0),
            1.0,
            PathBuf::from("scan.nii.gz"),
        );
        let seg = Segmentation::from_labels(vec![0, 1], (2, 1, 1));
        let avg = RegionAverageArray::compute(&scan, &seg, 1).unwrap();
        let matrix = RegionSimilarityMatrix::compute(&avg, Similarity::Pearson, true);
        assert!((matrix.get(0, 1) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_csv_and_mapping_output() {
        let dir = tempfile::tempdir().unwrap();
        let matrix =
            RegionSimilarityMatrix::compute(&test_averages(), Similarity::Pearson, true);

        let csv_path = dir.path().join("sim_matrix.csv");
        matrix.write_csv(&csv_path).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.starts_with("1,0,0\n"));

        let map_path = dir.path().join("mapping_dict.json");
        write_mapping_dict(&map_path, 3).unwrap();
        let parsed: BTreeMap<usize, usize> =
            serde_json::from_str(&std::fs::read_to_string(&map_path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[&2], 2);
    }
}
