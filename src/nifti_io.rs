//! NIfTI file I/O.
//!
//! Loads 3-D volumes (masks, segmentations, reference frames) and 4-D BOLD
//! scans from `.nii` / `.nii.gz` files (gzip auto-detected), and writes
//! volumes back out with a hand-built NIfTI-1 header. Data is held as flat
//! `f64` buffers in Fortran order (`index = i + j*nx + k*nx*ny`, time
//! slowest).

use std::fs;
use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::PipelineError;

/// A 3-D volume loaded from disk.
pub struct VolumeData {
    /// Voxel intensities, Fortran order.
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz).
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm.
    pub voxel_size: (f64, f64, f64),
    /// 4x4 affine matrix, row-major.
    pub affine: [f64; 16],
}

/// A 4-D scan loaded from disk.
pub struct ScanData {
    /// Voxel intensities, Fortran order, time slowest.
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz, nt).
    pub dims: (usize, usize, usize, usize),
    /// Voxel sizes in mm.
    pub voxel_size: (f64, f64, f64),
    /// Repetition time in seconds (pixdim\[4\]; 1.0 when the header leaves it unset).
    pub repetition_time: f64,
    /// 4x4 affine matrix, row-major.
    pub affine: [f64; 16],
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn scan_load_err(path: &Path, detail: impl std::fmt::Display) -> PipelineError {
    PipelineError::ScanLoad {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

fn read_object(path: &Path) -> Result<InMemNiftiObject, PipelineError> {
    let bytes = fs::read(path).map_err(|e| scan_load_err(path, e))?;
    let obj = if is_gzip(&bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes.as_slice()));
        InMemNiftiObject::from_reader(decoder).map_err(|e| scan_load_err(path, e))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes.as_slice()))
            .map_err(|e| scan_load_err(path, e))?
    };
    Ok(obj)
}

/// Load a 3-D volume from a `.nii` / `.nii.gz` file.
///
/// A 4-D file is accepted with a warning; only its first time frame is kept.
pub fn load_volume(path: &Path) -> Result<VolumeData, PipelineError> {
    let obj = read_object(path)?;
    let header = obj.header();

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| scan_load_err(path, e))?;
    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(scan_load_err(
            path,
            format!("expected at least a 3D volume, got {}D", shape.len()),
        ));
    }
    if shape.len() > 3 && shape[3..].iter().any(|&d| d > 1) {
        log::warn!(
            "{}: volume has {} time frames; using the first",
            path.display(),
            shape[3]
        );
    }

    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let mut data = Vec::with_capacity(nx * ny * nz);
    // Fortran order: index = i + j*nx + k*nx*ny
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let value = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    array[[i, j, k, 0]]
                };
                data.push(value);
            }
        }
    }

    Ok(VolumeData {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
    })
}

/// Load a 4-D scan from a `.nii` / `.nii.gz` file.
///
/// A 3-D file is treated as a single-frame scan.
pub fn load_scan(path: &Path) -> Result<ScanData, PipelineError> {
    let obj = read_object(path)?;
    let header = obj.header();

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let repetition_time = if pixdim[4] > 0.0 { pixdim[4] as f64 } else { 1.0 };
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| scan_load_err(path, e))?;
    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(scan_load_err(
            path,
            format!("expected a 3D or 4D volume, got {}D", shape.len()),
        ));
    }

    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let nt = if shape.len() >= 4 { shape[3] } else { 1 };

    let mut data = Vec::with_capacity(nx * ny * nz * nt);
    // Fortran order per frame, frames consecutive
    for t in 0..nt {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let value = if shape.len() == 3 {
                        array[[i, j, k]]
                    } else {
                        array[[i, j, k, t]]
                    };
                    data.push(value);
                }
            }
        }
    }

    Ok(ScanData {
        data,
        dims: (nx, ny, nz, nt),
        voxel_size,
        repetition_time,
        affine,
    })
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    // Prefer sform if available (sform_code > 0)
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        // Fall back to identity with voxel scaling
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Serialize a volume or scan into NIfTI-1 bytes (float32 data).
///
/// `nt == 1` produces a 3-D header, otherwise a 4-D one with the repetition
/// time in `pixdim[4]`.
fn to_nifti_bytes(
    data: &[f64],
    dims: (usize, usize, usize, usize),
    voxel_size: (f64, f64, f64),
    repetition_time: f64,
    affine: &[f64; 16],
) -> Vec<u8> {
    let (nx, ny, nz, nt) = dims;
    let (vsx, vsy, vsz) = voxel_size;

    // NIfTI-1 header (348 bytes)
    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    let ndim: i16 = if nt > 1 { 4 } else { 3 };
    let dim: [i16; 8] = [ndim, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [
        1.0,
        vsx as f32,
        vsy as f32,
        vsz as f32,
        repetition_time as f32,
        1.0,
        1.0,
        1.0,
    ];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z
    for i in 0..4 {
        let offset = 280 + i * 4;
        header[offset..offset + 4].copy_from_slice(&(affine[i] as f32).to_le_bytes());
    }
    for i in 0..4 {
        let offset = 296 + i * 4;
        header[offset..offset + 4].copy_from_slice(&(affine[4 + i] as f32).to_le_bytes());
    }
    for i in 0..4 {
        let offset = 312 + i * 4;
        header[offset..offset + 4].copy_from_slice(&(affine[8 + i] as f32).to_le_bytes());
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + data.len() * 4);
    buffer.extend_from_slice(&header);
    // extension indicator (4 bytes, all zeros = no extension)
    buffer.extend_from_slice(&[0u8; 4]);
    for &val in data {
        buffer.extend_from_slice(&(val as f32).to_le_bytes());
    }
    buffer
}

/// Write a volume or scan to disk; `.gz` extension selects gzip compression.
pub fn save_nifti(
    path: &Path,
    data: &[f64],
    dims: (usize, usize, usize, usize),
    voxel_size: (f64, f64, f64),
    repetition_time: f64,
    affine: &[f64; 16],
) -> Result<(), PipelineError> {
    let bytes = to_nifti_bytes(data, dims, voxel_size, repetition_time, affine);
    let compressed = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if compressed {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        let gz = encoder.finish()?;
        fs::write(path, gz)?;
    } else {
        fs::write(path, bytes)?;
    }
    Ok(())
}

/// Identity affine scaled by voxel size.
pub fn affine_from_zooms(voxel_size: (f64, f64, f64)) -> [f64; 16] {
    let (vsx, vsy, vsz) = voxel_size;
    [
        vsx, 0.0, 0.0, 0.0,
        0.0, vsy, 0.0, 0.0,
        0.0, 0.0, vsz, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}
