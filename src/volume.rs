//! Scan, frame, mask, and segmentation containers.
//!
//! All entities are immutable once constructed; every transformation produces
//! a new value. Voxel data is flat `f64` in Fortran order
//! (`index = i + j*nx + k*nx*ny`), with the time axis slowest for scans.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::nifti_io;

/// A 4-D BOLD scan. Identity is the source file path.
#[derive(Clone, Debug)]
pub struct Scan {
    data: Vec<f64>,
    dims: (usize, usize, usize, usize),
    voxel_size: (f64, f64, f64),
    repetition_time: f64,
    affine: [f64; 16],
    path: PathBuf,
}

/// A single 3-D time frame extracted from a [`Scan`].
///
/// Ephemeral: optionally persisted to a deterministic location so external
/// tools can see it, and deleted by [`remove_frame_cache`] when the caller is
/// done.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<f64>,
    pub dims: (usize, usize, usize),
    pub voxel_size: (f64, f64, f64),
    /// Where the frame was persisted, if it was.
    pub path: Option<PathBuf>,
}

/// A 3-D binary brain mask (1 = tissue), broadcast across all time frames.
#[derive(Clone, Debug)]
pub struct BrainMask {
    pub data: Vec<u8>,
    pub dims: (usize, usize, usize),
}

/// A 3-D integer-labeled segmentation co-registered into scan space.
/// Label 0 denotes background; labels need not be contiguous.
#[derive(Clone, Debug)]
pub struct Segmentation {
    pub labels: Vec<u32>,
    pub dims: (usize, usize, usize),
}

/// File stem with the `.nii` / `.nii.gz` suffix removed.
fn nifti_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .unwrap_or(&name)
        .to_string()
}

impl Scan {
    /// Load a scan from a `.nii` / `.nii.gz` file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = nifti_io::load_scan(path)?;
        Ok(Self {
            data: raw.data,
            dims: raw.dims,
            voxel_size: raw.voxel_size,
            repetition_time: raw.repetition_time,
            affine: raw.affine,
            path: path.to_path_buf(),
        })
    }

    /// Build a scan from in-memory parts (synthetic inputs, derived stages).
    pub fn from_parts(
        data: Vec<f64>,
        dims: (usize, usize, usize, usize),
        voxel_size: (f64, f64, f64),
        repetition_time: f64,
        path: PathBuf,
    ) -> Self {
        assert_eq!(data.len(), dims.0 * dims.1 * dims.2 * dims.3);
        let affine = nifti_io::affine_from_zooms(voxel_size);
        Self {
            data,
            dims,
            voxel_size,
            repetition_time,
            affine,
            path,
        }
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn dims(&self) -> (usize, usize, usize, usize) {
        self.dims
    }

    pub fn spatial_dims(&self) -> (usize, usize, usize) {
        (self.dims.0, self.dims.1, self.dims.2)
    }

    pub fn num_frames(&self) -> usize {
        self.dims.3
    }

    /// Voxels per frame.
    pub fn frame_len(&self) -> usize {
        self.dims.0 * self.dims.1 * self.dims.2
    }

    pub fn voxel_size(&self) -> (f64, f64, f64) {
        self.voxel_size
    }

    /// Repetition time in seconds.
    pub fn repetition_time(&self) -> f64 {
        self.repetition_time
    }

    pub fn affine(&self) -> &[f64; 16] {
        &self.affine
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan identity key: the last three path components
    /// (`subject/session/filename`), joined with `/`.
    pub fn scan_key(&self) -> String {
        let parts: Vec<String> = self
            .path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let start = parts.len().saturating_sub(3);
        parts[start..].join("/")
    }

    /// Borrow the voxel data of frame `index`.
    pub fn frame_data(&self, index: usize) -> Result<&[f64], PipelineError> {
        if index >= self.num_frames() {
            return Err(PipelineError::IndexOutOfRange {
                index,
                num_frames: self.num_frames(),
            });
        }
        let n = self.frame_len();
        Ok(&self.data[index * n..(index + 1) * n])
    }

    /// Extract frame `index` as an owned [`Frame`].
    ///
    /// When `cache_dir` is given the frame is persisted to
    /// `<stem>_vi<index>.nii.gz` in that directory; an already-present file is
    /// reused rather than rewritten.
    pub fn extract_frame(
        &self,
        index: usize,
        cache_dir: Option<&Path>,
    ) -> Result<Frame, PipelineError> {
        let data = self.frame_data(index)?.to_vec();
        let dims = self.spatial_dims();
        let mut path = None;

        if let Some(dir) = cache_dir {
            let file = dir.join(format!("{}_vi{}.nii.gz", nifti_stem(&self.path), index));
            if !file.exists() {
                nifti_io::save_nifti(
                    &file,
                    &data,
                    (dims.0, dims.1, dims.2, 1),
                    self.voxel_size,
                    self.repetition_time,
                    &self.affine,
                )?;
            }
            path = Some(file);
        }

        Ok(Frame {
            data,
            dims,
            voxel_size: self.voxel_size,
            path,
        })
    }

    /// Mask the scan to brain tissue: voxels outside the mask become 0 in
    /// every frame.
    pub fn masked(&self, mask: &BrainMask) -> Result<Scan, PipelineError> {
        if mask.dims != self.spatial_dims() {
            return Err(PipelineError::MaskMismatch {
                mask: mask.dims,
                scan: self.spatial_dims(),
            });
        }
        let n = self.frame_len();
        let mut data = self.data.clone();
        for t in 0..self.num_frames() {
            for v in 0..n {
                if mask.data[v] == 0 {
                    data[t * n + v] = 0.0;
                }
            }
        }
        Ok(Scan {
            data,
            ..self.clone()
        })
    }

    /// Median-1000 normalization: scale intensities so the median (within the
    /// mask if one is given) maps to 1000.
    ///
    /// A zero median is degenerate; the scan is returned unscaled with a
    /// warning.
    pub fn normalize_median_1000(
        &self,
        mask: Option<&BrainMask>,
    ) -> Result<Scan, PipelineError> {
        let n = self.frame_len();
        let mut samples: Vec<f64> = match mask {
            Some(m) => {
                if m.dims != self.spatial_dims() {
                    return Err(PipelineError::MaskMismatch {
                        mask: m.dims,
                        scan: self.spatial_dims(),
                    });
                }
                (0..self.num_frames())
                    .flat_map(|t| {
                        let frame = &self.data[t * n..(t + 1) * n];
                        frame
                            .iter()
                            .zip(m.data.iter())
                            .filter(|(_, &mv)| mv != 0)
                            .map(|(&v, _)| v)
                            .collect::<Vec<f64>>()
                    })
                    .collect()
            }
            None => self.data.clone(),
        };

        let median = median_in_place(&mut samples);
        log::info!("{}: median intensity {}", self.path.display(), median);
        if median == 0.0 || !median.is_finite() {
            log::warn!(
                "{}: degenerate median {}; skipping normalization",
                self.path.display(),
                median
            );
            return Ok(self.clone());
        }

        let scale = 1000.0 / median;
        let data = self.data.iter().map(|&v| v * scale).collect();
        Ok(Scan {
            data,
            ..self.clone()
        })
    }
}

/// Median of a sample buffer (average of the two middle values for even
/// lengths, NaN for an empty buffer).
fn median_in_place(samples: &mut [f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = samples.len();
    if n % 2 == 1 {
        samples[n / 2]
    } else {
        0.5 * (samples[n / 2 - 1] + samples[n / 2])
    }
}

/// Delete persisted frame files (`<stem>_vi*`) left behind by
/// [`Scan::extract_frame`].
pub fn remove_frame_cache(dir: &Path, scan_path: &Path) -> Result<(), PipelineError> {
    let prefix = format!("{}_vi", nifti_stem(scan_path));
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(prefix.as_str())
        {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

impl BrainMask {
    /// Load a mask volume; any nonzero voxel counts as tissue.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = nifti_io::load_volume(path)?;
        Ok(Self::from_volume(&raw.data, raw.dims))
    }

    pub fn from_volume(data: &[f64], dims: (usize, usize, usize)) -> Self {
        let data = data.iter().map(|&v| u8::from(v != 0.0)).collect();
        Self { data, dims }
    }

    /// Number of tissue voxels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

impl Segmentation {
    /// Load a segmentation volume; intensities are rounded to integer labels.
    /// Negative values are clamped to background with a warning.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = nifti_io::load_volume(path)?;
        let mut negatives = 0usize;
        let labels = raw
            .data
            .iter()
            .map(|&v| {
                let r = v.round();
                if r < 0.0 {
                    negatives += 1;
                    0
                } else {
                    r as u32
                }
            })
            .collect();
        if negatives > 0 {
            log::warn!(
                "{}: {} negative label voxels clamped to background",
                path.display(),
                negatives
            );
        }
        Ok(Self {
            labels,
            dims: raw.dims,
        })
    }

    pub fn from_labels(labels: Vec<u32>, dims: (usize, usize, usize)) -> Self {
        assert_eq!(labels.len(), dims.0 * dims.1 * dims.2);
        Self { labels, dims }
    }
}
