// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during solver setup, I/O, time stepping, or communication.
#[derive(Debug)]
pub enum FdError {
    /// Global grid shape is invalid (dimension too small).
    InvalidGridShape {
        /// The axis index.
        axis: usize,
        /// The size provided.
        size: usize,
    },
    /// Grid spacing is not positive and finite.
    InvalidGridSpacing(f32),
    /// Time step or simulated duration is not positive and finite.
    InvalidTimeStep(f32),
    /// Process grid does not tile the global grid or does not match the worker count.
    InvalidDecomposition {
        /// Requested processes per axis.
        procs: [usize; 3],
        /// Global grid size.
        global: [usize; 3],
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Spatial finite-difference order is unsupported.
    InvalidFdOrder(usize),
    /// Time-integration order is unsupported.
    InvalidTimeOrder(usize),
    /// Absorbing boundary settings are inconsistent with the grid.
    InvalidAbsorbingLayer(String),
    /// Source record is invalid (outside domain or unknown type).
    InvalidSource {
        /// Index of the record in the source list.
        index: usize,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Receiver record is invalid (outside domain).
    InvalidReceiver {
        /// Index of the record in the receiver list.
        index: usize,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Material parameter is not physically admissible.
    InvalidMaterial {
        /// The parameter name.
        name: &'static str,
        /// The invalid value.
        value: f32,
    },
    /// A configuration value failed validation.
    InvalidConfig {
        /// Dotted key of the offending setting.
        key: String,
        /// Explanation of why it's invalid.
        reason: String,
    },
    /// Array shape does not match expected shape.
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// Unsupported data type in file.
    UnsupportedDtype(String),
    /// Unsupported file format (unrecognized extension).
    UnsupportedFileFormat(String),
    /// Expected MAT variable not found in file.
    MatVariableNotFound {
        /// The variable name that was requested.
        expected: String,
        /// The variable names that are available.
        available: Vec<String>,
    },
    /// A non-finite velocity was detected at the stability probe.
    Unstable {
        /// Timestep at which the probe failed.
        step: usize,
        /// Rank that detected the instability.
        rank: usize,
    },
    /// Field or buffer allocation failed.
    Allocation {
        /// Number of f32 elements requested.
        elements: usize,
    },
    /// Checkpoint file does not match the live field layout.
    CheckpointMismatch {
        /// The checkpoint file.
        path: PathBuf,
        /// Explanation of the mismatch.
        reason: String,
    },
    /// Message passing failed (peer vanished or message malformed).
    Communication(String),
    /// The run was aborted because another worker failed.
    Aborted,
    /// I/O error on a known file.
    File {
        /// The offending path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// I/O error occurred.
    IoError(std::io::Error),
    /// Other error with a descriptive message.
    Other(String),
}

impl FdError {
    /// Wrap an I/O error with the path that caused it.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FdError::File {
            path: path.into(),
            source,
        }
    }

    /// True for errors that only echo a failure elsewhere in the process group.
    pub fn is_secondary(&self) -> bool {
        matches!(self, FdError::Aborted | FdError::Communication(_))
    }
}

impl fmt::Display for FdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdError::InvalidGridShape { axis, size } => {
                write!(
                    f,
                    "invalid grid shape: axis {} has size {} (must be >= 1)",
                    axis, size
                )
            }
            FdError::InvalidGridSpacing(h) => {
                write!(
                    f,
                    "invalid grid spacing: {} (must be positive and finite)",
                    h
                )
            }
            FdError::InvalidTimeStep(dt) => {
                write!(f, "invalid time step: {} (must be positive and finite)", dt)
            }
            FdError::InvalidDecomposition {
                procs,
                global,
                reason,
            } => {
                write!(
                    f,
                    "invalid decomposition {:?} of grid {:?}: {}",
                    procs, global, reason
                )
            }
            FdError::InvalidFdOrder(order) => {
                write!(
                    f,
                    "invalid FD order: {} (must be one of 2, 4, 6, 8, 10, 12)",
                    order
                )
            }
            FdError::InvalidTimeOrder(order) => {
                write!(f, "invalid time order: {} (must be 2, 3 or 4)", order)
            }
            FdError::InvalidAbsorbingLayer(reason) => {
                write!(f, "invalid absorbing boundary: {}", reason)
            }
            FdError::InvalidSource { index, reason } => {
                write!(f, "invalid source #{}: {}", index, reason)
            }
            FdError::InvalidReceiver { index, reason } => {
                write!(f, "invalid receiver #{}: {}", index, reason)
            }
            FdError::InvalidMaterial { name, value } => {
                write!(f, "invalid material parameter {}: {}", name, value)
            }
            FdError::InvalidConfig { key, reason } => {
                write!(f, "invalid configuration value '{}': {}", key, reason)
            }
            FdError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            FdError::UnsupportedDtype(dtype) => {
                write!(f, "unsupported dtype: {}", dtype)
            }
            FdError::UnsupportedFileFormat(ext) => {
                write!(f, "unsupported file format: {}", ext)
            }
            FdError::MatVariableNotFound {
                expected,
                available,
            } => {
                write!(
                    f,
                    "MAT variable '{}' not found; available variables: {:?}",
                    expected, available
                )
            }
            FdError::Unstable { step, rank } => {
                write!(
                    f,
                    "simulation is unstable: non-finite velocity at timestep {} (rank {})",
                    step, rank
                )
            }
            FdError::Allocation { elements } => {
                write!(f, "failed to allocate {} field elements", elements)
            }
            FdError::CheckpointMismatch { path, reason } => {
                write!(
                    f,
                    "checkpoint {} does not match the current run: {}",
                    path.display(),
                    reason
                )
            }
            FdError::Communication(msg) => write!(f, "communication error: {}", msg),
            FdError::Aborted => write!(f, "aborted by another worker"),
            FdError::File { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            FdError::IoError(e) => write!(f, "I/O error: {}", e),
            FdError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for FdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FdError::File { source, .. } => Some(source),
            FdError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FdError {
    fn from(e: std::io::Error) -> Self {
        FdError::IoError(e)
    }
}

/// Convenience type alias for Results with FdError.
pub type Result<T> = std::result::Result<T, FdError>;
