// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::Path;

use ndarray::{Array2, Array3, ArrayD, IxDyn, ShapeBuilder};

use crate::error::{FdError, Result};

/// Supported file formats for model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    /// NumPy .npy format.
    Npy,
    /// MATLAB .mat format (Level 5).
    Mat,
}

/// Infer file format from extension.
pub fn infer_format(path: &Path) -> Result<FileFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => Ok(FileFormat::Npy),
        Some("mat") => Ok(FileFormat::Mat),
        Some(ext) => Err(FdError::UnsupportedFileFormat(ext.to_string())),
        None => Err(FdError::UnsupportedFileFormat("(no extension)".to_string())),
    }
}

/// Load a global model cube of shape `[nx, ny, nz]`, inferring the format
/// from the extension. `variable` names the array inside a .mat file.
pub fn load_model_cube(path: &Path, variable: &str, shape: [usize; 3]) -> Result<Array3<f32>> {
    let data = match infer_format(path)? {
        FileFormat::Npy => load_npy(path, &shape)?,
        FileFormat::Mat => load_mat(path, variable, &shape)?,
    };
    Array3::from_shape_vec(shape, data).map_err(|e| FdError::Other(format!("shape error: {}", e)))
}

/// Load a row-major array from a .npy file, accepting f32 or f64 data.
pub fn load_npy(path: &Path, expected_shape: &[usize]) -> Result<Vec<f32>> {
    // Try f32 first
    let arr: ArrayD<f32> = match ndarray_npy::read_npy(path) {
        Ok(a) => a,
        Err(_) => {
            let arr64: ArrayD<f64> = ndarray_npy::read_npy(path).map_err(|e| match e {
                ndarray_npy::ReadNpyError::Io(io) => FdError::file(path, io),
                other => FdError::UnsupportedDtype(format!("{}: {}", path.display(), other)),
            })?;
            arr64.mapv(|v| v as f32)
        }
    };

    let got_shape: Vec<usize> = arr.shape().to_vec();
    if got_shape != expected_shape {
        return Err(FdError::ShapeMismatch {
            expected: expected_shape.to_vec(),
            got: got_shape,
        });
    }

    // Fortran-order files must be re-laid out before taking the raw data.
    Ok(arr.as_standard_layout().to_owned().into_raw_vec())
}

/// Load a named array from a .mat file into row-major order.
///
/// The stored array may have the expected shape or its reverse; both are
/// read back as `expected_shape`.
pub fn load_mat(path: &Path, variable_name: &str, expected_shape: &[usize]) -> Result<Vec<f32>> {
    let file = std::fs::File::open(path).map_err(|e| FdError::file(path, e))?;
    let mut reader = std::io::BufReader::new(file);
    let mat = matfile::MatFile::parse(&mut reader)
        .map_err(|e| FdError::Other(format!("MAT parse error in {}: {}", path.display(), e)))?;

    let available: Vec<String> = mat.arrays().iter().map(|a| a.name().to_string()).collect();
    let array = mat
        .find_by_name(variable_name)
        .ok_or_else(|| FdError::MatVariableNotFound {
            expected: variable_name.to_string(),
            available,
        })?;

    let data: Vec<f32> = match array.data() {
        matfile::NumericData::Double { real, imag: _ } => real.iter().map(|&v| v as f32).collect(),
        matfile::NumericData::Single { real, imag: _ } => real.clone(),
        _ => {
            return Err(FdError::UnsupportedDtype(
                "MAT file array is not f64 or f32".to_string(),
            ))
        }
    };

    let mat_shape: Vec<usize> = array.size().to_vec();
    let reversed: Vec<usize> = expected_shape.iter().rev().cloned().collect();
    let shape_matches = mat_shape == expected_shape;
    let shape_reversed = mat_shape == reversed;
    if !shape_matches && !shape_reversed {
        return Err(FdError::ShapeMismatch {
            expected: expected_shape.to_vec(),
            got: mat_shape,
        });
    }

    // MAT data is column-major in the file's own shape.
    let arr = ArrayD::from_shape_vec(IxDyn(&mat_shape).f(), data)
        .map_err(|e| FdError::Other(format!("shape error: {}", e)))?;
    let arr = if shape_matches {
        arr
    } else {
        let permutation: Vec<usize> = (0..mat_shape.len()).rev().collect();
        arr.permuted_axes(IxDyn(&permutation))
    };
    Ok(arr.as_standard_layout().to_owned().into_raw_vec())
}

/// Save traces as a `[ntr, ns]` .npy array.
pub fn save_traces(path: &Path, traces: &Array2<f32>) -> Result<()> {
    ndarray_npy::write_npy(path, traces)
        .map_err(|e| FdError::Other(format!("npy write error for {}: {}", path.display(), e)))
}

/// Save a 3D volume as an `[nx, ny, nz]` .npy array.
pub fn save_volume(path: &Path, volume: &Array3<f32>) -> Result<()> {
    ndarray_npy::write_npy(path, volume)
        .map_err(|e| FdError::Other(format!("npy write error for {}: {}", path.display(), e)))
}

/// Read whitespace-separated numeric records, one per line.
///
/// Blank lines and text after `#` are ignored. Each record must have between
/// `min_cols` and `max_cols` values.
pub fn read_table(path: &Path, min_cols: usize, max_cols: usize) -> Result<Vec<Vec<f32>>> {
    let text = std::fs::read_to_string(path).map_err(|e| FdError::file(path, e))?;
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let content = line.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        let row = content
            .split_whitespace()
            .map(|t| t.parse::<f32>())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| {
                FdError::Other(format!("{}:{}: {}", path.display(), lineno + 1, e))
            })?;
        if row.len() < min_cols || row.len() > max_cols {
            return Err(FdError::Other(format!(
                "{}:{}: expected {} to {} values, found {}",
                path.display(),
                lineno + 1,
                min_cols,
                max_cols,
                row.len()
            )));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Read a single-column time signal.
pub fn read_signal(path: &Path) -> Result<Vec<f32>> {
    Ok(read_table(path, 1, 1)?.into_iter().map(|r| r[0]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("seisfd3d_io_{}_{}", std::process::id(), name))
    }

    /// Single-precision Level 5 MAT file with one array, column-major data.
    fn write_mat_single(path: &Path, name: &str, dims: &[usize], data: &[f32]) {
        fn pad8(n: usize) -> usize {
            n.div_ceil(8) * 8
        }
        let mut body: Vec<u8> = Vec::new();
        // Array flags: mxSINGLE_CLASS.
        for v in [6u32, 8, 7, 0] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.extend_from_slice(&5u32.to_le_bytes());
        body.extend_from_slice(&((dims.len() * 4) as u32).to_le_bytes());
        for &d in dims {
            body.extend_from_slice(&(d as i32).to_le_bytes());
        }
        body.resize(16 + 8 + pad8(dims.len() * 4), 0);
        let start = body.len();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&(name.len() as u32).to_le_bytes());
        body.extend_from_slice(name.as_bytes());
        body.resize(start + 8 + pad8(name.len()), 0);
        let start = body.len();
        body.extend_from_slice(&7u32.to_le_bytes());
        body.extend_from_slice(&((data.len() * 4) as u32).to_le_bytes());
        for v in data {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.resize(start + 8 + pad8(data.len() * 4), 0);

        let mut f = std::fs::File::create(path).unwrap();
        let mut header = [b' '; 116];
        header[..10].copy_from_slice(b"MATLAB 5.0");
        f.write_all(&header).unwrap();
        f.write_all(&[0u8; 8]).unwrap();
        f.write_all(&0x0100u16.to_le_bytes()).unwrap();
        f.write_all(b"IM").unwrap();
        f.write_all(&14u32.to_le_bytes()).unwrap();
        f.write_all(&(body.len() as u32).to_le_bytes()).unwrap();
        f.write_all(&body).unwrap();
    }

    #[test]
    fn npy_cube_roundtrip() {
        let path = tmp("cube.npy");
        let cube = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        save_volume(&path, &cube).unwrap();
        let loaded = load_model_cube(&path, "vp", [2, 3, 4]).unwrap();
        assert_eq!(loaded, cube);
        assert!(matches!(
            load_model_cube(&path, "vp", [4, 3, 2]),
            Err(FdError::ShapeMismatch { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn mat_cube_reads_column_major() {
        let path = tmp("cube.mat");
        let cube = Array3::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        let col_major: Vec<f32> = cube.t().iter().copied().collect();
        write_mat_single(&path, "rho", &[2, 3, 4], &col_major);

        let loaded = load_model_cube(&path, "rho", [2, 3, 4]).unwrap();
        assert_eq!(loaded, cube);
        assert!(matches!(
            load_model_cube(&path, "vs", [2, 3, 4]),
            Err(FdError::MatVariableNotFound { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn table_skips_comments_and_checks_width() {
        let path = tmp("table.txt");
        std::fs::write(&path, "# header\n1 2 3\n\n4 5 6 7 # trailing\n").unwrap();
        let rows = read_table(&path, 3, 4).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]]);
        assert!(read_table(&path, 4, 4).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_reports_path() {
        let err = read_signal(Path::new("/nonexistent/signal.txt")).unwrap_err();
        assert!(matches!(err, FdError::File { .. }));
        assert!(err.to_string().contains("signal.txt"));
    }

    #[test]
    fn unsupported_format() {
        let result = infer_format(Path::new("model.xyz"));
        assert!(matches!(result, Err(FdError::UnsupportedFileFormat(_))));
    }
}
