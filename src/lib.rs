// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! A parallel staggered-grid finite-difference solver for 3D elastic and
//! viscoelastic wave propagation.
//!
//! The global grid is split over a Cartesian process grid. Each subdomain
//! runs on its own worker thread, advances velocity and stress with
//! high-order stencils and optional Adams–Bashforth time integration, and
//! swaps boundary layers with its neighbors after every half step. Absorbing
//! edges use a convolutional PML or a damping frame. Results do not depend
//! on the number of subdomains.

#![warn(missing_docs)]

/// Per-rank binary checkpoints.
pub mod checkpoint;
/// Message passing between subdomain workers.
pub mod comm;
/// TOML configuration and the validated run context.
pub mod config;
/// Convolutional PML and damping frame.
pub mod cpml;
/// Splitting the global grid over a process grid.
pub mod decomposition;
/// Time-stepping driver.
pub mod driver;
/// Error types for the library.
pub mod error;
/// Dense 3D arrays with arbitrary index bases.
pub mod field;
/// Boundary-layer exchange between neighboring subdomains.
pub mod halo;
/// Fixed-depth ring buffers for multistep history.
pub mod history;
/// Model input and result output files.
pub mod io;
/// Velocity and stress update kernels.
pub mod kernels;
/// Material models and staggered-grid averaging.
pub mod material;
/// Receiver sampling and seismogram assembly.
pub mod receiver;
/// Decimated wavefield volumes.
pub mod snapshot;
/// Source records, wavelets and injection.
pub mod source;
/// Finite-difference and Adams–Bashforth coefficients.
pub mod stencil;
/// Velocity, stress and history state of a subdomain.
pub mod wavefield;

pub use crate::config::{Config, RunContext};
pub use crate::decomposition::{Decomposition, Subdomain};
pub use crate::driver::{ProgressInfo, RunReport, Solver};
pub use crate::error::{FdError, Result};
pub use crate::field::{Extent3, Field3};
pub use crate::wavefield::Wavefield;
