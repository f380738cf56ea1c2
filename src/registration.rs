//! Rigid volume similarity scoring.
//!
//! Scores how dissimilar two 3-D frames are under the best rigid alignment
//! found by a coarse-to-fine rotation search: cost is `1 - NCC` (normalized
//! cross-correlation) at the best pose, so identical frames score 0.
//! Translation is handled by intensity-centroid alignment; rotations are
//! searched on a grid that narrows stage by stage, mirroring the schedule
//! files used by conventional rigid-registration tools.

use crate::volume::Frame;

/// One stage of the coarse-to-fine search.
#[derive(Clone, Debug)]
pub struct SearchStage {
    /// Half-width of the rotation grid around the current best pose, degrees.
    pub range_deg: f64,
    /// Grid step, degrees.
    pub step_deg: f64,
    /// Spatial subsampling stride for cost evaluation at this stage.
    pub subsample: usize,
}

/// Coarse-to-fine rotation search schedule.
#[derive(Clone, Debug)]
pub struct SearchSchedule {
    pub stages: Vec<SearchStage>,
}

impl Default for SearchSchedule {
    fn default() -> Self {
        Self {
            stages: vec![
                SearchStage { range_deg: 16.0, step_deg: 8.0, subsample: 4 },
                SearchStage { range_deg: 8.0, step_deg: 4.0, subsample: 2 },
                SearchStage { range_deg: 2.0, step_deg: 1.0, subsample: 1 },
            ],
        }
    }
}

/// Pairwise frame dissimilarity, used by the reference-frame search.
///
/// Implementations must be symmetric and deterministic.
pub trait FrameScorer: Sync {
    /// Non-negative dissimilarity; 0 means identical under rigid alignment.
    fn score(&self, a: &Frame, b: &Frame) -> f64;
}

/// Rigid-registration cost scorer parameterized by a [`SearchSchedule`].
#[derive(Clone, Debug)]
pub struct VolumeSimilarityScorer {
    schedule: SearchSchedule,
}

impl VolumeSimilarityScorer {
    pub fn new(schedule: SearchSchedule) -> Self {
        Self { schedule }
    }

    /// Best-alignment cost with `fixed` as the reference grid.
    fn directed_cost(&self, fixed: &Frame, moving: &Frame) -> f64 {
        // Intensity centroids give the translation estimate.
        let shift = centroid_mm(moving)
            .zip3(centroid_mm(fixed), |m, f| m - f);

        let mut best_angles = [0.0f64; 3];
        let mut best_cost = 1.0;

        for stage in &self.schedule.stages {
            let offsets = angle_offsets(stage.range_deg, stage.step_deg);
            let mut stage_best = f64::INFINITY;
            let mut stage_angles = best_angles;

            for &ax in &offsets {
                for &ay in &offsets {
                    for &az in &offsets {
                        let angles = [
                            best_angles[0] + ax.to_radians(),
                            best_angles[1] + ay.to_radians(),
                            best_angles[2] + az.to_radians(),
                        ];
                        let cost =
                            alignment_cost(fixed, moving, angles, shift, stage.subsample.max(1));
                        if cost < stage_best {
                            stage_best = cost;
                            stage_angles = angles;
                        }
                    }
                }
            }

            best_angles = stage_angles;
            best_cost = stage_best;
        }

        best_cost.max(0.0)
    }
}

impl FrameScorer for VolumeSimilarityScorer {
    /// Symmetric by construction: the two directed costs are averaged.
    fn score(&self, a: &Frame, b: &Frame) -> f64 {
        0.5 * (self.directed_cost(a, b) + self.directed_cost(b, a))
    }
}

#[derive(Clone, Copy)]
struct Vec3(f64, f64, f64);

impl Vec3 {
    fn zip3(self, other: Vec3, f: impl Fn(f64, f64) -> f64) -> Vec3 {
        Vec3(f(self.0, other.0), f(self.1, other.1), f(self.2, other.2))
    }
}

/// Grid offsets `-range..=range` in `step` increments, always including 0.
fn angle_offsets(range_deg: f64, step_deg: f64) -> Vec<f64> {
    if step_deg <= 0.0 || range_deg <= 0.0 {
        return vec![0.0];
    }
    let n = (range_deg / step_deg).round() as i64;
    (-n..=n).map(|i| i as f64 * step_deg).collect()
}

/// Intensity-weighted centroid in mm; geometric center for all-zero frames.
fn centroid_mm(frame: &Frame) -> Vec3 {
    let (nx, ny, nz) = frame.dims;
    let (vsx, vsy, vsz) = frame.voxel_size;
    let mut total = 0.0;
    let mut cx = 0.0;
    let mut cy = 0.0;
    let mut cz = 0.0;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let w = frame.data[i + j * nx + k * nx * ny].abs();
                total += w;
                cx += w * i as f64 * vsx;
                cy += w * j as f64 * vsy;
                cz += w * k as f64 * vsz;
            }
        }
    }
    if total > 0.0 {
        Vec3(cx / total, cy / total, cz / total)
    } else {
        Vec3(
            (nx as f64 - 1.0) * 0.5 * vsx,
            (ny as f64 - 1.0) * 0.5 * vsy,
            (nz as f64 - 1.0) * 0.5 * vsz,
        )
    }
}

/// Row-major rotation matrix `Rz(g) * Ry(b) * Rx(a)`.
fn rotation_matrix(angles: [f64; 3]) -> [f64; 9] {
    let (sa, ca) = angles[0].sin_cos();
    let (sb, cb) = angles[1].sin_cos();
    let (sg, cg) = angles[2].sin_cos();
    [
        cg * cb,
        cg * sb * sa - sg * ca,
        cg * sb * ca + sg * sa,
        sg * cb,
        sg * sb * sa + cg * ca,
        sg * sb * ca - cg * sa,
        -sb,
        cb * sa,
        cb * ca,
    ]
}

/// `1 - NCC` between `fixed` and `moving` resampled at the given pose.
///
/// Sampling is nearest-neighbor over the subsampled fixed grid; voxels that
/// map outside the moving volume are excluded from the correlation.
fn alignment_cost(
    fixed: &Frame,
    moving: &Frame,
    angles: [f64; 3],
    shift: Vec3,
    subsample: usize,
) -> f64 {
    let (fnx, fny, fnz) = fixed.dims;
    let (mnx, mny, mnz) = moving.dims;
    let (fvx, fvy, fvz) = fixed.voxel_size;
    let (mvx, mvy, mvz) = moving.voxel_size;
    let r = rotation_matrix(angles);

    // Rotate about the fixed volume's geometric center, then apply the
    // centroid shift into the moving volume.
    let fcx = (fnx as f64 - 1.0) * 0.5 * fvx;
    let fcy = (fny as f64 - 1.0) * 0.5 * fvy;
    let fcz = (fnz as f64 - 1.0) * 0.5 * fvz;

    let mut n = 0.0f64;
    let mut sum_a = 0.0;
    let mut sum_b = 0.0;
    let mut sum_aa = 0.0;
    let mut sum_bb = 0.0;
    let mut sum_ab = 0.0;

    for k in (0..fnz).step_by(subsample) {
        for j in (0..fny).step_by(subsample) {
            for i in (0..fnx).step_by(subsample) {
                let px = i as f64 * fvx - fcx;
                let py = j as f64 * fvy - fcy;
                let pz = k as f64 * fvz - fcz;

                let qx = r[0] * px + r[1] * py + r[2] * pz + fcx + shift.0;
                let qy = r[3] * px + r[4] * py + r[5] * pz + fcy + shift.1;
                let qz = r[6] * px + r[7] * py + r[8] * pz + fcz + shift.2;

                let mi = (qx / mvx).round();
                let mj = (qy / mvy).round();
                let mk = (qz / mvz).round();
                if mi < 0.0 || mj < 0.0 || mk < 0.0 {
                    continue;
                }
                let (mi, mj, mk) = (mi as usize, mj as usize, mk as usize);
                if mi >= mnx || mj >= mny || mk >= mnz {
                    continue;
                }

                let a = fixed.data[i + j * fnx + k * fnx * fny];
                let b = moving.data[mi + mj * mnx + mk * mnx * mny];
                n += 1.0;
                sum_a += a;
                sum_b += b;
                sum_aa += a * a;
                sum_bb += b * b;
                sum_ab += a * b;
            }
        }
    }

    if n == 0.0 {
        return 1.0; // no overlap
    }

    let mean_a = sum_a / n;
    let mean_b = sum_b / n;
    let var_a = (sum_aa / n - mean_a * mean_a).max(0.0);
    let var_b = (sum_bb / n - mean_b * mean_b).max(0.0);
    let cov = sum_ab / n - mean_a * mean_b;

    let corr = if var_a == 0.0 && var_b == 0.0 {
        // Two flat images: identical means count as a perfect match.
        if (mean_a - mean_b).abs() < 1e-12 { 1.0 } else { 0.0 }
    } else if var_a == 0.0 || var_b == 0.0 {
        0.0
    } else {
        cov / (var_a * var_b).sqrt()
    };

    (1.0 - corr).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_from(data: Vec<f64>, dims: (usize, usize, usize)) -> Frame {
        Frame {
            data,
            dims,
            voxel_size: (1.0, 1.0, 1.0),
            path: None,
        }
    }

    fn patterned_frame(n: usize, seed: f64) -> Frame {
        let data = (0..n * n * n)
            .map(|i| ((i as f64) * seed).sin() + 0.5 * ((i as f64) * 0.7).cos())
            .collect();
        frame_from(data, (n, n, n))
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let scorer = VolumeSimilarityScorer::new(SearchSchedule::default());
        let a = patterned_frame(6, 0.3);
        let b = a.clone();
        let score = scorer.score(&a, &b);
        assert!(score.abs() < 1e-9, "score = {score}");
    }

    #[test]
    fn test_score_is_symmetric() {
        let scorer = VolumeSimilarityScorer::new(SearchSchedule::default());
        let a = patterned_frame(6, 0.3);
        let b = patterned_frame(6, 0.9);
        assert_eq!(scorer.score(&a, &b), scorer.score(&b, &a));
    }

    #[test]
    fn test_score_non_negative_for_dissimilar_frames() {
        let scorer = VolumeSimilarityScorer::new(SearchSchedule::default());
        let a = patterned_frame(5, 0.3);
        let b = patterned_frame(5, 1.7);
        let score = scorer.score(&a, &b);
        assert!(score >= 0.0);
        assert!(score > 1e-6, "distinct frames should not score as identical");
    }

    #[test]
    fn test_flat_frames_equal_intensity_match() {
        let scorer = VolumeSimilarityScorer::new(SearchSchedule::default());
        let a = frame_from(vec![3.0; 27], (3, 3, 3));
        let b = frame_from(vec![3.0; 27], (3, 3, 3));
        assert!(scorer.score(&a, &b).abs() < 1e-12);
    }

    #[test]
    fn test_angle_offsets_include_zero() {
        let offsets = angle_offsets(16.0, 8.0);
        assert_eq!(offsets, vec![-16.0, -8.0, 0.0, 8.0, 16.0]);
        assert_eq!(angle_offsets(0.0, 1.0), vec![0.0]);
    }

    #[test]
    fn test_rotation_matrix_identity() {
        let r = rotation_matrix([0.0, 0.0, 0.0]);
        let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        for (a, b) in r.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-15);
        }
    }
}
