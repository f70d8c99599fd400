// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{FdError, Result};

/// Taylor coefficients of the staggered first derivative, indexed by half-width.
const TAYLOR: [&[f64]; 6] = [
    &[1.0],
    &[9.0 / 8.0, -1.0 / 24.0],
    &[75.0 / 64.0, -25.0 / 384.0, 3.0 / 640.0],
    &[1225.0 / 1024.0, -245.0 / 3072.0, 49.0 / 5120.0, -5.0 / 7168.0],
    &[
        19845.0 / 16384.0,
        -735.0 / 8192.0,
        567.0 / 40960.0,
        -405.0 / 229376.0,
        35.0 / 294912.0,
    ],
    &[
        160083.0 / 131072.0,
        -12705.0 / 131072.0,
        22869.0 / 1310720.0,
        -5445.0 / 1835008.0,
        847.0 / 2359296.0,
        -63.0 / 2883584.0,
    ],
];

/// Minimum grid points per shortest wavelength for each half-width.
const POINTS_PER_WAVELENGTH: [f32; 6] = [12.0, 8.0, 6.0, 5.0, 5.0, 4.0];

/// Unscaled staggered-grid coefficients for spatial order `fd_order`.
///
/// # Errors
/// Returns [`FdError::InvalidFdOrder`] unless the order is one of 2, 4, ..., 12.
pub fn taylor_coefficients(fd_order: usize) -> Result<&'static [f64]> {
    if fd_order < 2 || fd_order > 12 || fd_order % 2 != 0 {
        return Err(FdError::InvalidFdOrder(fd_order));
    }
    Ok(TAYLOR[fd_order / 2 - 1])
}

/// Weights of the staggered Adams–Bashforth scheme, newest first.
///
/// # Errors
/// Returns [`FdError::InvalidTimeOrder`] for orders other than 2, 3 and 4.
pub fn adams_bashforth(time_order: usize) -> Result<&'static [f32]> {
    match time_order {
        2 => Ok(&[1.0]),
        3 => Ok(&[25.0 / 24.0, -1.0 / 12.0, 1.0 / 24.0]),
        4 => Ok(&[13.0 / 12.0, -5.0 / 24.0, 1.0 / 6.0, -1.0 / 24.0]),
        _ => Err(FdError::InvalidTimeOrder(time_order)),
    }
}

/// Staggered first-derivative operator, coefficients pre-divided by the grid spacing.
///
/// Works on flat slices so that the same offsets address every field of a
/// subdomain; `stride` selects the axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Stencil {
    coeffs: Vec<f32>,
    gamma: f32,
    order: usize,
}

impl Stencil {
    /// Build the operator of spatial order `fd_order` for spacing `dh`.
    pub fn new(fd_order: usize, dh: f32) -> Result<Self> {
        if !(dh.is_finite() && dh > 0.0) {
            return Err(FdError::InvalidGridSpacing(dh));
        }
        let taylor = taylor_coefficients(fd_order)?;
        Ok(Stencil {
            coeffs: taylor.iter().map(|&c| (c / f64::from(dh)) as f32).collect(),
            gamma: taylor.iter().map(|c| c.abs()).sum::<f64>() as f32,
            order: fd_order,
        })
    }

    /// Spatial order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of taps on each side.
    pub fn half_width(&self) -> usize {
        self.coeffs.len()
    }

    /// Sum of absolute unscaled coefficients.
    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    /// Derivative at `p + 1/2` from samples at integer positions.
    #[inline]
    pub fn forward(&self, f: &[f32], p: usize, stride: usize) -> f32 {
        let mut acc = 0.0;
        for (m, &c) in self.coeffs.iter().enumerate() {
            acc += c * (f[p + (m + 1) * stride] - f[p - m * stride]);
        }
        acc
    }

    /// Derivative at `p` from samples at half positions, where `f[p]` sits at `p + 1/2`.
    #[inline]
    pub fn backward(&self, f: &[f32], p: usize, stride: usize) -> f32 {
        let mut acc = 0.0;
        for (m, &c) in self.coeffs.iter().enumerate() {
            acc += c * (f[p + m * stride] - f[p - (m + 1) * stride]);
        }
        acc
    }

    /// Largest stable time step for P velocity `vp_max`.
    pub fn courant_limit(&self, dh: f32, vp_max: f32) -> f32 {
        dh / (self.gamma * 3f32.sqrt() * vp_max)
    }

    /// Largest grid spacing that resolves S velocity `vs_min` at frequency `fmax`.
    pub fn dispersion_limit(&self, vs_min: f32, fmax: f32) -> f32 {
        vs_min / (fmax * POINTS_PER_WAVELENGTH[self.half_width() - 1])
    }
}
