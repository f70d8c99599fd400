// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::f32::consts::PI;
use std::path::Path;

use crate::decomposition::Subdomain;
use crate::error::{FdError, Result};
use crate::io;
use crate::material::Material;
use crate::wavefield::{TensorField, VectorField};

/// How a source couples into the wavefield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Pressure source on the normal stresses.
    Explosive,
    /// Point force along x.
    ForceX,
    /// Point force along y.
    ForceY,
    /// Point force along z.
    ForceZ,
}

impl SourceKind {
    /// Kind from its numeric code (1 explosive, 2-4 forces in x, y, z).
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(SourceKind::Explosive),
            2 => Some(SourceKind::ForceX),
            3 => Some(SourceKind::ForceY),
            4 => Some(SourceKind::ForceZ),
            _ => None,
        }
    }
}

/// Source time function shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Wavelet {
    /// Ricker wavelet, delayed by 1.5 periods.
    Ricker,
    /// Fuchs–Mueller wavelet, one period long.
    FuchsMueller,
    /// sin^3 pulse, one period long.
    SinCubed,
    /// Samples read from a file, one per time step.
    Samples(Vec<f32>),
}

impl Wavelet {
    /// Unit-amplitude value at time `t` for centre frequency `fc` and delay `td`.
    pub fn value(&self, t: f32, fc: f32, td: f32, step: usize) -> f32 {
        match self {
            Wavelet::Ricker => {
                let period = 1.5 / fc;
                let tau = PI * (t - period - td) / period;
                (1.0 - 2.0 * tau * tau) * (-tau * tau).exp()
            }
            Wavelet::FuchsMueller => {
                if t >= td && t <= td + 1.0 / fc {
                    let w = 2.0 * PI * fc * (t - td);
                    w.sin() - 0.5 * (2.0 * w).sin()
                } else {
                    0.0
                }
            }
            Wavelet::SinCubed => {
                let ts = 1.0 / fc;
                if t >= td && t <= td + ts {
                    (0.75 * PI / ts) * (PI * (t + td) / ts).sin().powi(3)
                } else {
                    0.0
                }
            }
            Wavelet::Samples(s) => step
                .checked_sub(1)
                .and_then(|i| s.get(i))
                .copied()
                .unwrap_or(0.0),
        }
    }
}

/// One source in global coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Position in metres.
    pub position: [f32; 3],
    /// Time shift in seconds.
    pub tshift: f32,
    /// Centre frequency in Hz.
    pub fc: f32,
    /// Amplitude.
    pub amp: f32,
    /// Coupling.
    pub kind: SourceKind,
}

impl SourceRecord {
    /// 1-based global grid index nearest to the source.
    pub fn grid_index(&self, dh: f32) -> [isize; 3] {
        self.position.map(|x| (x / dh).round() as isize + 1)
    }
}

fn record_from_row(index: usize, row: &[f32], default_kind: SourceKind) -> Result<SourceRecord> {
    let kind = match row.get(6) {
        None => default_kind,
        Some(&code) => SourceKind::from_code(code as u32).ok_or_else(|| FdError::InvalidSource {
            index,
            reason: format!("unknown source type {}", code),
        })?,
    };
    Ok(SourceRecord {
        position: [row[0], row[1], row[2]],
        tshift: row[3],
        fc: row[4],
        amp: row[5],
        kind,
    })
}

/// Read `x y z tshift fc amp [type]` records from an ASCII file.
pub fn read_sources(path: &Path, default_kind: SourceKind) -> Result<Vec<SourceRecord>> {
    io::read_table(path, 6, 7)?
        .iter()
        .enumerate()
        .map(|(i, row)| record_from_row(i, row, default_kind))
        .collect()
}

/// Plane of sources at depth `depth` covering every (x, z) node inside the
/// absorbing frame of width `frame`.
pub fn plane_wave_sources(
    global: [usize; 3],
    dh: f32,
    frame: usize,
    depth: f32,
    fc: f32,
    amp: f32,
    kind: SourceKind,
) -> Result<Vec<SourceRecord>> {
    let inner = |a: usize| {
        global[a]
            .checked_sub(frame)
            .filter(|&hi| hi > frame)
            .ok_or_else(|| FdError::InvalidSource {
                index: 0,
                reason: format!(
                    "absorbing frame of width {} leaves no plane-wave nodes along axis {} of {}",
                    frame, a, global[a]
                ),
            })
    };
    let (x_hi, z_hi) = (inner(0)?, inner(2)?);
    let mut out = Vec::new();
    for gx in frame + 1..=x_hi {
        for gz in frame + 1..=z_hi {
            out.push(SourceRecord {
                position: [(gx - 1) as f32 * dh, depth, (gz - 1) as f32 * dh],
                tshift: 0.0,
                fc,
                amp,
                kind,
            });
        }
    }
    Ok(out)
}

/// Check that every record lies on the global grid and has a usable frequency.
pub fn validate_sources(records: &[SourceRecord], global: [usize; 3], dh: f32, needs_fc: bool) -> Result<()> {
    for (index, r) in records.iter().enumerate() {
        let g = r.grid_index(dh);
        for a in 0..3 {
            if g[a] < 1 || g[a] > global[a] as isize {
                return Err(FdError::InvalidSource {
                    index,
                    reason: format!("position {:?} lies outside the grid", r.position),
                });
            }
        }
        if needs_fc && !(r.fc.is_finite() && r.fc > 0.0) {
            return Err(FdError::InvalidSource {
                index,
                reason: format!("centre frequency {} must be positive", r.fc),
            });
        }
    }
    Ok(())
}

/// A source owned by this subdomain with its pre-computed time signal.
#[derive(Debug, Clone)]
pub struct LocalSource {
    /// Local grid index.
    pub idx: [isize; 3],
    /// Coupling.
    pub kind: SourceKind,
    /// Amplitude-scaled signal; entry `n - 1` belongs to step `n`.
    pub signal: Vec<f32>,
}

/// The sources of one shot that fall inside a subdomain.
#[derive(Debug, Clone, Default)]
pub struct LocalSources {
    sources: Vec<LocalSource>,
    scale: f32,
}

impl LocalSources {
    /// Keep the records owned by `sub` and synthesize their signals for `nt` steps.
    pub fn new(records: &[SourceRecord], sub: &Subdomain, wavelet: &Wavelet, nt: usize, dt: f32, dh: f32) -> Self {
        let sources = records
            .iter()
            .filter_map(|r| {
                let g = r.grid_index(dh);
                if g.iter().any(|&x| x < 1) {
                    return None;
                }
                let idx = sub.to_local([g[0] as usize, g[1] as usize, g[2] as usize])?;
                let signal = (1..=nt)
                    .map(|n| r.amp * wavelet.value(n as f32 * dt, r.fc, r.tshift, n))
                    .collect();
                Some(LocalSource {
                    idx,
                    kind: r.kind,
                    signal,
                })
            })
            .collect();
        LocalSources {
            sources,
            scale: dt / (dh * dh * dh),
        }
    }

    /// Number of local sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True if no source falls in this subdomain.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn amplitude(&self, src: &LocalSource, step: usize) -> f32 {
        step.checked_sub(1)
            .and_then(|i| src.signal.get(i))
            .map_or(0.0, |s| s * self.scale)
    }

    /// Add point forces of step `step` to the velocity.
    pub fn inject_forces(&self, v: &mut VectorField, mat: &Material, step: usize) {
        for src in &self.sources {
            let (axis, buoy) = match src.kind {
                SourceKind::ForceX => (0, &mat.rip),
                SourceKind::ForceY => (1, &mat.rjp),
                SourceKind::ForceZ => (2, &mat.rkp),
                SourceKind::Explosive => continue,
            };
            let [i, j, k] = src.idx;
            let a = self.amplitude(src, step) * buoy.get(i, j, k);
            v.component_mut(axis).add(i, j, k, a);
        }
    }

    /// Add explosive sources of step `step` to the normal stresses.
    pub fn inject_explosive(&self, s: &mut TensorField, step: usize) {
        for src in self.sources.iter().filter(|s| s.kind == SourceKind::Explosive) {
            let [i, j, k] = src.idx;
            let a = self.amplitude(src, step);
            s.xx.add(i, j, k, a);
            s.yy.add(i, j, k, a);
            s.zz.add(i, j, k, a);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::Decomposition;
    use crate::field::Extent3;

    #[test]
    fn ricker_peaks_after_delay() {
        let fc = 10.0;
        let peak = Wavelet::Ricker.value(1.5 / fc, fc, 0.0, 0);
        assert!((peak - 1.0).abs() < 1e-6);
        assert!(Wavelet::Ricker.value(0.0, fc, 0.0, 0).abs() < 1e-3);
    }

    #[test]
    fn windowed_wavelets_vanish_outside() {
        let fc = 5.0;
        for w in [Wavelet::FuchsMueller, Wavelet::SinCubed] {
            assert_eq!(w.value(0.05, fc, 0.1, 0), 0.0);
            assert_eq!(w.value(0.31, fc, 0.1, 0), 0.0);
            assert!(w.value(0.15, fc, 0.1, 0).abs() > 0.0);
        }
    }

    #[test]
    fn sampled_wavelet_indexes_by_step() {
        let w = Wavelet::Samples(vec![1.0, 2.0, 3.0]);
        assert_eq!(w.value(0.0, 0.0, 0.0, 1), 1.0);
        assert_eq!(w.value(0.0, 0.0, 0.0, 3), 3.0);
        assert_eq!(w.value(0.0, 0.0, 0.0, 4), 0.0);
    }

    #[test]
    fn records_parse_type_column() {
        let rec = record_from_row(0, &[10.0, 20.0, 30.0, 0.0, 5.0, 2.0, 3.0], SourceKind::Explosive).unwrap();
        assert_eq!(rec.kind, SourceKind::ForceY);
        assert_eq!(rec.grid_index(10.0), [2, 3, 4]);
        let def = record_from_row(0, &[0.0; 6], SourceKind::ForceZ).unwrap();
        assert_eq!(def.kind, SourceKind::ForceZ);
        assert!(record_from_row(3, &[0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 9.0], SourceKind::Explosive).is_err());
    }

    #[test]
    fn out_of_grid_source_is_rejected() {
        let rec = SourceRecord {
            position: [100.0, 0.0, 0.0],
            tshift: 0.0,
            fc: 5.0,
            amp: 1.0,
            kind: SourceKind::Explosive,
        };
        assert!(validate_sources(&[rec.clone()], [11, 4, 4], 10.0, true).is_ok());
        assert!(matches!(
            validate_sources(&[rec], [10, 4, 4], 10.0, true),
            Err(FdError::InvalidSource { index: 0, .. })
        ));
    }

    #[test]
    fn plane_wave_covers_inner_nodes() {
        let recs = plane_wave_sources([10, 10, 8], 5.0, 2, 20.0, 8.0, 1.0, SourceKind::ForceY).unwrap();
        assert_eq!(recs.len(), 6 * 4);
        assert!(recs.iter().all(|r| r.position[1] == 20.0));
        assert_eq!(recs[0].grid_index(5.0), [3, 5, 3]);
    }

    #[test]
    fn plane_wave_inside_oversized_frame_fails() {
        for frame in [4, 5, 12] {
            let recs = plane_wave_sources([8, 8, 10], 5.0, frame, 20.0, 8.0, 1.0, SourceKind::ForceY);
            assert!(matches!(recs, Err(FdError::InvalidSource { .. })), "frame {}", frame);
        }
    }

    #[test]
    fn each_source_owned_by_one_rank() {
        let d = Decomposition::new([8, 8, 8], [2, 2, 2], 8, false).unwrap();
        let rec = SourceRecord {
            position: [40.0, 30.0, 0.0],
            tshift: 0.0,
            fc: 5.0,
            amp: 1.0,
            kind: SourceKind::Explosive,
        };
        let owners: Vec<usize> = d
            .subdomains()
            .iter()
            .filter(|s| !LocalSources::new(&[rec.clone()], s, &Wavelet::Ricker, 4, 1e-3, 10.0).is_empty())
            .map(|s| s.rank)
            .collect();
        assert_eq!(owners, vec![d.owner_of([5, 4, 1]).unwrap()]);
    }

    #[test]
    fn explosive_adds_to_normal_stresses() {
        let d = Decomposition::new([4, 4, 4], [1, 1, 1], 1, false).unwrap();
        let sub = d.subdomain(0);
        let rec = SourceRecord {
            position: [1.0, 1.0, 1.0],
            tshift: 0.0,
            fc: 5.0,
            amp: 2.0,
            kind: SourceKind::Explosive,
        };
        let src = LocalSources::new(&[rec], &sub, &Wavelet::Samples(vec![0.5]), 1, 0.1, 1.0);
        let mut s = TensorField::zeros(Extent3::with_halo([4, 4, 4], 1)).unwrap();
        src.inject_explosive(&mut s, 1);
        // amp * signal * dt / dh^3
        assert!((s.xx.get(2, 2, 2) - 0.1).abs() < 1e-7);
        assert_eq!(s.xx.get(2, 2, 2), s.zz.get(2, 2, 2));
        assert_eq!(s.xy.get(2, 2, 2), 0.0);
        src.inject_explosive(&mut s, 2);
        assert!((s.yy.get(2, 2, 2) - 0.1).abs() < 1e-7);
    }
}
