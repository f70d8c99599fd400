// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! TOML run configuration and its validated, immutable form.
//!
//! A [`Config`] mirrors the file section by section. [`Config::validate`]
//! checks every value, reads the source and receiver tables, and produces a
//! [`RunContext`] that the solver shares read-only between workers.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cpml::CpmlParams;
use crate::error::{FdError, Result};
use crate::io;
use crate::material::{CubeFiles, Homogeneous, Layer, Layered, ModelProvider, Orthotropic};
use crate::receiver::{self, SamplingPlan, SeismoKind};
use crate::source::{self, SourceKind, SourceRecord, Wavelet};
use crate::stencil::{adams_bashforth, taylor_coefficients};

fn invalid(key: &str, reason: impl Into<String>) -> FdError {
    FdError::InvalidConfig {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn positive(key: &str, value: f32) -> Result<f32> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(invalid(key, format!("must be positive and finite, got {}", value)))
    }
}

/// Grid, process layout and spatial order.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainConfig {
    /// Global cells along x, y, z.
    pub size: [usize; 3],
    /// Grid spacing in metres.
    pub spacing: f32,
    /// Processes along x, y, z.
    #[serde(default = "default_procs")]
    pub procs: [usize; 3],
    /// Wrap-around boundaries.
    #[serde(default)]
    pub periodic: bool,
    /// Spatial finite-difference order.
    #[serde(default = "default_fd_order")]
    pub fd_order: usize,
}

fn default_procs() -> [usize; 3] {
    [1, 1, 1]
}

fn default_fd_order() -> usize {
    4
}

impl DomainConfig {
    fn validate(&self) -> Result<()> {
        for (axis, &size) in self.size.iter().enumerate() {
            if size == 0 {
                return Err(FdError::InvalidGridShape { axis, size });
            }
        }
        if !(self.spacing.is_finite() && self.spacing > 0.0) {
            return Err(FdError::InvalidGridSpacing(self.spacing));
        }
        taylor_coefficients(self.fd_order)?;
        for a in 0..3 {
            if self.procs[a] == 0 || self.size[a] % self.procs[a] != 0 {
                return Err(FdError::InvalidDecomposition {
                    procs: self.procs,
                    global: self.size,
                    reason: format!("axis {} does not split evenly", a),
                });
            }
            let local = self.size[a] / self.procs[a];
            if local < self.fd_order / 2 {
                return Err(FdError::InvalidDecomposition {
                    procs: self.procs,
                    global: self.size,
                    reason: format!(
                        "axis {}: {} local cells cannot feed a halo of {}",
                        a,
                        local,
                        self.fd_order / 2
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Simulated duration and time integration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeConfig {
    /// Simulated time in seconds.
    pub duration: f32,
    /// Time step in seconds.
    pub dt: f32,
    /// 2 for leapfrog, 3 or 4 for Adams–Bashforth.
    #[serde(default = "default_time_order")]
    pub time_order: usize,
}

fn default_time_order() -> usize {
    2
}

impl TimeConfig {
    fn validate(&self) -> Result<usize> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(FdError::InvalidTimeStep(self.dt));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(FdError::InvalidTimeStep(self.duration));
        }
        adams_bashforth(self.time_order)?;
        let nt = (self.duration / self.dt).round() as usize;
        if nt == 0 {
            return Err(invalid("time.duration", "shorter than one time step"));
        }
        Ok(nt)
    }
}

/// Kind of material model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Uniform isotropic medium.
    Homogeneous,
    /// Isotropic layers along y.
    Layered,
    /// Uniform orthotropic medium.
    Orthotropic,
    /// Global vp/vs/rho cubes.
    Files,
}

/// One `[[model.layers]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
    /// Depth of the layer top.
    pub top: f32,
    /// P velocity.
    pub vp: f32,
    /// S velocity.
    pub vs: f32,
    /// Density.
    pub rho: f32,
    /// P quality factor.
    pub qp: Option<f32>,
    /// S quality factor.
    pub qs: Option<f32>,
}

/// Material model and attenuation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Model kind.
    pub kind: ModelKind,
    /// P velocity (homogeneous).
    pub vp: Option<f32>,
    /// S velocity (homogeneous).
    pub vs: Option<f32>,
    /// Density (homogeneous, orthotropic).
    pub rho: Option<f32>,
    /// P quality factor.
    pub qp: Option<f32>,
    /// S quality factor.
    pub qs: Option<f32>,
    /// Layers (layered).
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    /// C11, C22, C33, C12, C13, C23, C44, C55, C66 (orthotropic).
    pub stiffness: Option<[f32; 9]>,
    /// P velocity cube (files).
    pub vp_file: Option<PathBuf>,
    /// S velocity cube (files).
    pub vs_file: Option<PathBuf>,
    /// Density cube (files).
    pub rho_file: Option<PathBuf>,
    /// Relaxation frequencies; empty for an elastic run.
    #[serde(default)]
    pub relaxation_frequencies: Vec<f32>,
}

fn quality(qp: Option<f32>, qs: Option<f32>, key: &str, attenuating: bool) -> Result<Option<(f32, f32)>> {
    match (qp, qs) {
        (Some(p), Some(s)) => Ok(Some((positive(key, p)?, positive(key, s)?))),
        (None, None) if !attenuating => Ok(None),
        (None, None) => Err(invalid(key, "qp and qs are required with relaxation frequencies")),
        _ => Err(invalid(key, "qp and qs must be given together")),
    }
}

impl ModelConfig {
    fn require(value: Option<f32>, key: &str) -> Result<f32> {
        value.ok_or_else(|| invalid(key, "missing"))
    }

    fn validate(&self, base: &Path) -> Result<Box<dyn ModelProvider>> {
        for &f in &self.relaxation_frequencies {
            positive("model.relaxation_frequencies", f)?;
        }
        let attenuating = !self.relaxation_frequencies.is_empty();
        let provider: Box<dyn ModelProvider> = match self.kind {
            ModelKind::Homogeneous => Box::new(Homogeneous {
                vp: Self::require(self.vp, "model.vp")?,
                vs: Self::require(self.vs, "model.vs")?,
                rho: Self::require(self.rho, "model.rho")?,
                q: quality(self.qp, self.qs, "model.qp", attenuating)?,
            }),
            ModelKind::Layered => {
                if self.layers.is_empty() {
                    return Err(invalid("model.layers", "at least one layer is required"));
                }
                if self.layers[0].top > 0.0 {
                    return Err(invalid("model.layers", "the first layer must start at depth 0"));
                }
                if self.layers.windows(2).any(|w| w[1].top <= w[0].top) {
                    return Err(invalid("model.layers", "layer tops must increase"));
                }
                let layers = self
                    .layers
                    .iter()
                    .map(|l| {
                        Ok(Layer {
                            top: l.top,
                            vp: l.vp,
                            vs: l.vs,
                            rho: l.rho,
                            q: quality(l.qp, l.qs, "model.layers.qp", attenuating)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(Layered { layers })
            }
            ModelKind::Orthotropic => {
                if attenuating {
                    return Err(invalid(
                        "model.relaxation_frequencies",
                        "viscoelastic runs need an isotropic model",
                    ));
                }
                Box::new(Orthotropic {
                    rho: Self::require(self.rho, "model.rho")?,
                    c: self
                        .stiffness
                        .ok_or_else(|| invalid("model.stiffness", "missing"))?,
                })
            }
            ModelKind::Files => {
                let path = |p: &Option<PathBuf>, key: &str| -> Result<PathBuf> {
                    let p = p.as_ref().ok_or_else(|| invalid(key, "missing"))?;
                    let p = base.join(p);
                    io::infer_format(&p)?;
                    Ok(p)
                };
                Box::new(CubeFiles {
                    vp: path(&self.vp_file, "model.vp_file")?,
                    vs: path(&self.vs_file, "model.vs_file")?,
                    rho: path(&self.rho_file, "model.rho_file")?,
                    q: quality(self.qp, self.qs, "model.qp", attenuating)?,
                })
            }
        };
        Ok(provider)
    }
}

/// Absorbing boundary kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryKind {
    /// Convolutional PML.
    Cpml,
    /// Exponential damping frame.
    Damping,
    /// Reflecting edges.
    None,
}

/// Absorbing boundary settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundaryConfig {
    /// Boundary kind.
    #[serde(default = "default_boundary_kind")]
    pub kind: BoundaryKind,
    /// Layer width in cells.
    #[serde(default = "default_width")]
    pub width: usize,
    /// CPML profile exponent.
    #[serde(default = "default_npower")]
    pub npower: f32,
    /// CPML maximum stretching.
    #[serde(default = "default_k_max")]
    pub k_max: f32,
    /// CPML frequency; defaults to the highest source frequency.
    pub fpml: Option<f32>,
    /// CPML reference velocity; defaults to the model's largest P velocity.
    pub vppml: Option<f32>,
    /// CPML target reflection coefficient.
    #[serde(default = "default_reflection")]
    pub reflection: f32,
    /// Amplitude reduction across a damping frame, in percent.
    #[serde(default = "default_damping")]
    pub damping: f32,
}

fn default_boundary_kind() -> BoundaryKind {
    BoundaryKind::Cpml
}

fn default_width() -> usize {
    10
}

fn default_npower() -> f32 {
    2.0
}

fn default_k_max() -> f32 {
    1.0
}

fn default_reflection() -> f32 {
    1e-3
}

fn default_damping() -> f32 {
    8.0
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        BoundaryConfig {
            kind: default_boundary_kind(),
            width: default_width(),
            npower: default_npower(),
            k_max: default_k_max(),
            fpml: None,
            vppml: None,
            reflection: default_reflection(),
            damping: default_damping(),
        }
    }
}

/// CPML settings with the reference velocity possibly left to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct CpmlSettings {
    /// Width in cells.
    pub width: usize,
    /// Profile exponent.
    pub npower: f32,
    /// Maximum stretching.
    pub k_max: f32,
    /// Frequency shift frequency.
    pub fpml: f32,
    /// Reference velocity, or `None` for the model's vp_max.
    pub vppml: Option<f32>,
    /// Target reflection coefficient.
    pub reflection: f32,
}

impl CpmlSettings {
    /// Concrete parameters, filling the reference velocity from `vp_max`.
    pub fn params(&self, vp_max: f32) -> CpmlParams {
        CpmlParams {
            width: self.width,
            npower: self.npower,
            k_max: self.k_max,
            fpml: self.fpml,
            vppml: self.vppml.unwrap_or(vp_max),
            reflection: self.reflection,
        }
    }
}

/// Validated absorbing boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Absorbing {
    /// No absorption.
    None,
    /// CPML layer.
    Cpml(CpmlSettings),
    /// Damping frame of `width` cells reducing amplitude by `percent`.
    Damping {
        /// Width in cells.
        width: usize,
        /// Reduction at the outer edge, in percent.
        percent: f32,
    },
}

impl Absorbing {
    /// Frame width, zero when absent.
    pub fn width(&self) -> usize {
        match self {
            Absorbing::None => 0,
            Absorbing::Cpml(c) => c.width,
            Absorbing::Damping { width, .. } => *width,
        }
    }
}

impl BoundaryConfig {
    /// Check that the frame fits the decomposition; returns its width.
    fn check_frame(&self, domain: &DomainConfig) -> Result<usize> {
        if self.kind == BoundaryKind::None {
            return Ok(0);
        }
        if domain.periodic {
            return Err(FdError::InvalidAbsorbingLayer(
                "absorbing layers cannot be combined with periodic boundaries".to_string(),
            ));
        }
        if self.width == 0 {
            return Err(FdError::InvalidAbsorbingLayer("width must be positive".to_string()));
        }
        for a in 0..3 {
            let local = domain.size[a] / domain.procs[a];
            let need = if domain.procs[a] == 1 { 2 * self.width } else { self.width };
            if local < need {
                return Err(FdError::InvalidAbsorbingLayer(format!(
                    "axis {}: local size {} is smaller than {} required by a layer of width {}",
                    a, local, need, self.width
                )));
            }
        }
        Ok(self.width)
    }

    fn validate(&self, domain: &DomainConfig, fmax: Option<f32>) -> Result<Absorbing> {
        self.check_frame(domain)?;
        match self.kind {
            BoundaryKind::Cpml => {
                let fpml = match self.fpml.or(fmax) {
                    Some(f) => positive("boundary.fpml", f)?,
                    None => return Err(invalid("boundary.fpml", "no source frequency to default to")),
                };
                if let Some(v) = self.vppml {
                    positive("boundary.vppml", v)?;
                }
                if !(self.reflection > 0.0 && self.reflection < 1.0) {
                    return Err(invalid("boundary.reflection", "must lie in (0, 1)"));
                }
                positive("boundary.npower", self.npower)?;
                if self.k_max < 1.0 {
                    return Err(invalid("boundary.k_max", "must be at least 1"));
                }
                Ok(Absorbing::Cpml(CpmlSettings {
                    width: self.width,
                    npower: self.npower,
                    k_max: self.k_max,
                    fpml,
                    vppml: self.vppml,
                    reflection: self.reflection,
                }))
            }
            BoundaryKind::Damping => {
                if self.width < 2 {
                    return Err(FdError::InvalidAbsorbingLayer(
                        "damping frame needs a width of at least 2".to_string(),
                    ));
                }
                if !(self.damping > 0.0 && self.damping < 100.0) {
                    return Err(invalid("boundary.damping", "must be a percentage in (0, 100)"));
                }
                Ok(Absorbing::Damping {
                    width: self.width,
                    percent: self.damping,
                })
            }
            BoundaryKind::None => Ok(Absorbing::None),
        }
    }
}

/// Source time function name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaveletKind {
    /// Ricker.
    Ricker,
    /// Fuchs–Mueller.
    FuchsMueller,
    /// sin^3.
    SinCubed,
    /// Samples from `signal_file`.
    File,
}

/// Plane-wave source settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaneWaveConfig {
    /// Depth of the source plane along y.
    pub depth: f32,
    /// Centre frequency.
    pub fc: f32,
    /// Amplitude.
    #[serde(default = "default_amp")]
    pub amp: f32,
}

fn default_amp() -> f32 {
    1.0
}

/// Source settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourcesConfig {
    /// ASCII source table.
    pub file: Option<PathBuf>,
    /// Plane-wave mode instead of a table.
    pub plane_wave: Option<PlaneWaveConfig>,
    /// Time function.
    #[serde(default = "default_wavelet")]
    pub wavelet: WaveletKind,
    /// Samples for `wavelet = "file"`.
    pub signal_file: Option<PathBuf>,
    /// Type code for records without one (1 explosive, 2-4 forces).
    #[serde(default = "default_source_type")]
    pub default_type: u32,
    /// One shot per source record.
    #[serde(default)]
    pub multi_shot: bool,
}

fn default_wavelet() -> WaveletKind {
    WaveletKind::Ricker
}

fn default_source_type() -> u32 {
    1
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            file: None,
            plane_wave: None,
            wavelet: default_wavelet(),
            signal_file: None,
            default_type: default_source_type(),
            multi_shot: false,
        }
    }
}

/// Receiver settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiversConfig {
    /// ASCII receiver table; no seismograms without one.
    pub file: Option<PathBuf>,
    /// `velocity`, `pressure`, `curl-div` or `all`.
    #[serde(default = "default_seismo")]
    pub kind: String,
    /// Sampling interval in steps.
    #[serde(default = "default_one")]
    pub ndt: usize,
    /// Steps skipped before the first sample.
    #[serde(default)]
    pub ndtshift: usize,
}

fn default_seismo() -> String {
    "velocity".to_string()
}

fn default_one() -> usize {
    1
}

impl Default for ReceiversConfig {
    fn default() -> Self {
        ReceiversConfig {
            file: None,
            kind: default_seismo(),
            ndt: 1,
            ndtshift: 0,
        }
    }
}

fn seismo_kind(name: &str) -> Result<SeismoKind> {
    match name {
        "velocity" => Ok(SeismoKind::Velocity),
        "pressure" => Ok(SeismoKind::Pressure),
        "curl-div" => Ok(SeismoKind::CurlDiv),
        "all" => Ok(SeismoKind::All),
        other => Err(invalid(
            "receivers.kind",
            format!("unknown kind '{}', expected velocity, pressure, curl-div or all", other),
        )),
    }
}

/// Snapshot settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotsConfig {
    /// Any of `vx`, `vy`, `vz`, `p`; empty disables snapshots.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Time of the first snapshot.
    #[serde(default)]
    pub tsnap1: f32,
    /// Time of the last snapshot.
    #[serde(default)]
    pub tsnap2: f32,
    /// Time between snapshots.
    #[serde(default)]
    pub tsnapinc: f32,
    /// Keep every n-th cell along x, y, z.
    #[serde(default = "default_decimation")]
    pub decimation: [usize; 3],
}

fn default_decimation() -> [usize; 3] {
    [1, 1, 1]
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        SnapshotsConfig {
            fields: Vec::new(),
            tsnap1: 0.0,
            tsnap2: 0.0,
            tsnapinc: 0.0,
            decimation: default_decimation(),
        }
    }
}

/// Quantity written to snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapField {
    /// x velocity.
    Vx,
    /// y velocity.
    Vy,
    /// z velocity.
    Vz,
    /// Pressure.
    Pressure,
}

impl SnapField {
    /// Name used in file names.
    pub fn name(self) -> &'static str {
        match self {
            SnapField::Vx => "vx",
            SnapField::Vy => "vy",
            SnapField::Vz => "vz",
            SnapField::Pressure => "p",
        }
    }
}

/// Validated snapshot schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotPlan {
    /// Quantities to write.
    pub fields: Vec<SnapField>,
    /// First snapshot step.
    pub first: usize,
    /// Steps between snapshots.
    pub every: usize,
    /// Last step that may produce a snapshot.
    pub last: usize,
    /// Per-axis decimation.
    pub decimation: [usize; 3],
}

impl SnapshotPlan {
    /// True if a snapshot is due after `step`.
    pub fn is_due(&self, step: usize) -> bool {
        step >= self.first && step <= self.last && (step - self.first) % self.every == 0
    }
}

impl SnapshotsConfig {
    fn validate(&self, dt: f32) -> Result<Option<SnapshotPlan>> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        let fields = self
            .fields
            .iter()
            .map(|f| match f.as_str() {
                "vx" => Ok(SnapField::Vx),
                "vy" => Ok(SnapField::Vy),
                "vz" => Ok(SnapField::Vz),
                "p" => Ok(SnapField::Pressure),
                other => Err(invalid("snapshots.fields", format!("unknown field '{}'", other))),
            })
            .collect::<Result<Vec<_>>>()?;
        if self.decimation.iter().any(|&d| d == 0) {
            return Err(invalid("snapshots.decimation", "must be positive"));
        }
        if self.tsnap2 < self.tsnap1 {
            return Err(invalid("snapshots.tsnap2", "must not precede tsnap1"));
        }
        let every = (self.tsnapinc / dt).round() as usize;
        Ok(Some(SnapshotPlan {
            fields,
            first: ((self.tsnap1 / dt).round() as usize).max(1),
            every: every.max(1),
            last: (self.tsnap2 / dt).round() as usize,
            decimation: self.decimation,
        }))
    }
}

/// Checkpoint settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Base path; each rank appends `.<rank>`.
    pub path: Option<PathBuf>,
    /// Write a checkpoint at the end of the run.
    #[serde(default)]
    pub save: bool,
    /// Continue from an existing checkpoint.
    #[serde(default)]
    pub restore: bool,
}

/// Validated checkpoint actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPlan {
    /// Base path.
    pub path: PathBuf,
    /// Write at the end of the run.
    pub save: bool,
    /// Restore before stepping.
    pub restore: bool,
}

/// Output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory for seismograms and snapshots.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// File name stem.
    #[serde(default = "default_stem")]
    pub stem: String,
    /// Steps between progress log lines.
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_stem() -> String {
    "seismo".to_string()
}

fn default_log_interval() -> usize {
    100
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: default_output_dir(),
            stem: default_stem(),
            log_interval: default_log_interval(),
        }
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `[domain]`.
    pub domain: DomainConfig,
    /// `[time]`.
    pub time: TimeConfig,
    /// `[model]`.
    pub model: ModelConfig,
    /// `[boundary]`.
    #[serde(default)]
    pub boundary: BoundaryConfig,
    /// `[sources]`.
    #[serde(default)]
    pub sources: SourcesConfig,
    /// `[receivers]`.
    #[serde(default)]
    pub receivers: ReceiversConfig,
    /// `[snapshots]`.
    #[serde(default)]
    pub snapshots: SnapshotsConfig,
    /// `[checkpoint]`.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    /// `[output]`.
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Immutable description of a run, shared by every worker.
pub struct RunContext {
    /// Global cells.
    pub global: [usize; 3],
    /// Grid spacing.
    pub dh: f32,
    /// Processes per axis.
    pub procs: [usize; 3],
    /// Wrap-around boundaries.
    pub periodic: bool,
    /// Spatial order.
    pub fd_order: usize,
    /// Time integration order.
    pub time_order: usize,
    /// Time step.
    pub dt: f32,
    /// Number of time steps.
    pub nt: usize,
    /// Material model.
    pub model: Box<dyn ModelProvider>,
    /// Relaxation frequencies; empty when elastic.
    pub frequencies: Vec<f32>,
    /// Absorbing boundary.
    pub absorbing: Absorbing,
    /// Source records of each shot.
    pub shots: Vec<Vec<SourceRecord>>,
    /// Source time function.
    pub wavelet: Wavelet,
    /// Receiver grid indices (1-based, global).
    pub receivers: Vec<[usize; 3]>,
    /// Seismogram kind and sampling.
    pub seismo: Option<(SeismoKind, SamplingPlan)>,
    /// Snapshot schedule.
    pub snapshots: Option<SnapshotPlan>,
    /// Checkpoint actions.
    pub checkpoint: Option<CheckpointPlan>,
    /// Output directory; `None` keeps results in memory only.
    pub output_dir: Option<PathBuf>,
    /// Output file stem.
    pub stem: String,
    /// Steps between progress log lines.
    pub log_interval: usize,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("global", &self.global)
            .field("dh", &self.dh)
            .field("procs", &self.procs)
            .field("periodic", &self.periodic)
            .field("fd_order", &self.fd_order)
            .field("time_order", &self.time_order)
            .field("dt", &self.dt)
            .field("nt", &self.nt)
            .field("model", &self.model.describe())
            .field("frequencies", &self.frequencies)
            .field("absorbing", &self.absorbing)
            .field("shots", &self.shots.len())
            .field("wavelet", &self.wavelet)
            .field("receivers", &self.receivers.len())
            .field("seismo", &self.seismo)
            .field("snapshots", &self.snapshots)
            .field("checkpoint", &self.checkpoint)
            .field("output_dir", &self.output_dir)
            .field("stem", &self.stem)
            .field("log_interval", &self.log_interval)
            .finish()
    }
}

impl RunContext {
    /// Halo depth of every wavefield array.
    pub fn halo(&self) -> usize {
        let h = self.fd_order / 2;
        if self.fd_order == 2 && matches!(self.absorbing, Absorbing::Cpml(_)) {
            2 * h
        } else {
            h
        }
    }

    /// Number of workers.
    pub fn num_ranks(&self) -> usize {
        self.procs.iter().product()
    }

    /// Highest source centre frequency.
    pub fn fmax(&self) -> Option<f32> {
        self.shots
            .iter()
            .flatten()
            .map(|s| s.fc)
            .filter(|f| f.is_finite())
            .reduce(f32::max)
    }
}

impl Config {
    /// Read and parse a TOML file; relative paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| FdError::file(path, e))?;
        let mut cfg = Self::parse(&text)?;
        cfg.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(cfg)
    }

    /// Parse TOML text; relative paths resolve against the working directory.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| invalid("<file>", e.to_string()))
    }

    /// Check every section and build the run context.
    pub fn validate(&self) -> Result<RunContext> {
        let base = self.base_dir.as_path();
        self.domain.validate()?;
        let nt = self.time.validate()?;
        let dt = self.time.dt;
        let dh = self.domain.spacing;
        let global = self.domain.size;
        let model = self.model.validate(base)?;

        let src = &self.sources;
        let kind = SourceKind::from_code(src.default_type).ok_or_else(|| {
            invalid("sources.default_type", format!("unknown type {}", src.default_type))
        })?;
        let wavelet = match src.wavelet {
            WaveletKind::Ricker => Wavelet::Ricker,
            WaveletKind::FuchsMueller => Wavelet::FuchsMueller,
            WaveletKind::SinCubed => Wavelet::SinCubed,
            WaveletKind::File => {
                let p = src
                    .signal_file
                    .as_ref()
                    .ok_or_else(|| invalid("sources.signal_file", "required for wavelet = \"file\""))?;
                Wavelet::Samples(io::read_signal(&base.join(p))?)
            }
        };
        let needs_fc = !matches!(wavelet, Wavelet::Samples(_));

        let records = match (&src.file, &src.plane_wave) {
            (Some(_), Some(_)) => {
                return Err(invalid("sources", "give either file or plane_wave, not both"));
            }
            (Some(f), None) => source::read_sources(&base.join(f), kind)?,
            (None, Some(pw)) => {
                let frame = self.boundary.check_frame(&self.domain)?;
                source::plane_wave_sources(global, dh, frame, pw.depth, pw.fc, pw.amp, kind)?
            }
            (None, None) => Vec::new(),
        };
        source::validate_sources(&records, global, dh, needs_fc)?;
        let shots = if src.multi_shot {
            records.into_iter().map(|r| vec![r]).collect()
        } else {
            vec![records]
        };
        let fmax = shots.iter().flatten().map(|s| s.fc).reduce(f32::max);
        let absorbing = self.boundary.validate(&self.domain, fmax)?;

        let rc = &self.receivers;
        let kind = seismo_kind(&rc.kind)?;
        if rc.ndt == 0 {
            return Err(invalid("receivers.ndt", "must be positive"));
        }
        let receivers = match &rc.file {
            Some(f) => receiver::read_receivers(&base.join(f), global, dh)?,
            None => Vec::new(),
        };
        let seismo = (!receivers.is_empty()).then_some((
            kind,
            SamplingPlan {
                nt,
                ndt: rc.ndt,
                ndtshift: rc.ndtshift,
            },
        ));

        let checkpoint = match (&self.checkpoint.path, self.checkpoint.save || self.checkpoint.restore) {
            (Some(p), true) => Some(CheckpointPlan {
                path: base.join(p),
                save: self.checkpoint.save,
                restore: self.checkpoint.restore,
            }),
            (None, true) => return Err(invalid("checkpoint.path", "required to save or restore")),
            (_, false) => None,
        };
        if checkpoint.is_some() && shots.len() > 1 {
            return Err(invalid("checkpoint", "checkpoints are not supported with multiple shots"));
        }
        if self.output.log_interval == 0 {
            return Err(invalid("output.log_interval", "must be positive"));
        }

        Ok(RunContext {
            global,
            dh,
            procs: self.domain.procs,
            periodic: self.domain.periodic,
            fd_order: self.domain.fd_order,
            time_order: self.time.time_order,
            dt,
            nt,
            model,
            frequencies: self.model.relaxation_frequencies.clone(),
            absorbing,
            shots,
            wavelet,
            receivers,
            seismo,
            snapshots: self.snapshots.validate(dt)?,
            checkpoint,
            output_dir: Some(base.join(&self.output.dir)),
            stem: self.output.stem.clone(),
            log_interval: self.output.log_interval,
        })
    }
}
