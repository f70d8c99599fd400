// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Absorbing boundaries: convolutional PML and a simple damping frame.
//!
//! Both act only on the outer shell of subdomains that touch a global face,
//! after the bulk update of the same field.

use std::f32::consts::PI;

use tracing::debug;

use crate::decomposition::{Face, Subdomain};
use crate::error::{FdError, Result};
use crate::field::{Extent3, Field3};
use crate::material::Material;
use crate::stencil::Stencil;
use crate::wavefield::{TensorField, VectorField, Wavefield};

/// CPML tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CpmlParams {
    /// Layer width in cells.
    pub width: usize,
    /// Exponent of the damping profile.
    pub npower: f32,
    /// Maximum coordinate stretching.
    pub k_max: f32,
    /// Dominant frequency used for the frequency shift.
    pub fpml: f32,
    /// Reference P velocity inside the layer.
    pub vppml: f32,
    /// Target reflection coefficient.
    pub reflection: f32,
}

/// Check that every edge subdomain is thick enough for an absorbing layer
/// of `width` cells.
pub fn check_layer_fits(sub: &Subdomain, width: usize, periodic: bool) -> Result<()> {
    if width == 0 {
        return Ok(());
    }
    if periodic {
        return Err(FdError::InvalidAbsorbingLayer(
            "absorbing layers cannot be combined with periodic boundaries".to_string(),
        ));
    }
    for axis in 0..3 {
        let n = sub.local[axis];
        let need = if sub.procs[axis] == 1 { 2 * width } else { width };
        if n < need {
            return Err(FdError::InvalidAbsorbingLayer(format!(
                "axis {}: local size {} is smaller than {} required by a layer of width {}",
                axis, n, need, width
            )));
        }
    }
    Ok(())
}

/// Damping profile along one axis, indexed by layer position `0..2*width`.
///
/// Positions below `width` belong to the low side, the rest to the high side.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    /// 1/K.
    pub k_inv: Vec<f32>,
    /// Recursive convolution coefficient a.
    pub a: Vec<f32>,
    /// Recursive convolution coefficient b.
    pub b: Vec<f32>,
}

impl Profile {
    /// Profile for cells at integer (`half == false`) or half-integer positions.
    pub fn new(params: &CpmlParams, global: usize, dh: f32, dt: f32, half: bool) -> Self {
        let fw = params.width;
        let fwf = fw as f32;
        let d0 = -(params.npower + 1.0) * params.vppml * params.reflection.ln() / (2.0 * fwf * dh);
        let shift = if half { 0.5 } else { 0.0 };
        let mut profile = Profile {
            k_inv: Vec::with_capacity(2 * fw),
            a: Vec::with_capacity(2 * fw),
            b: Vec::with_capacity(2 * fw),
        };
        for l in 0..2 * fw {
            // Position in cells from the outer edge of the grid.
            let x = if l < fw {
                l as f32 + shift
            } else {
                (global + l + 1 - 2 * fw) as f32 - 1.0 + shift
            };
            let depth = if l < fw {
                fwf - x
            } else {
                x - (global as f32 - 1.0 - fwf)
            };
            let q = depth.clamp(0.0, fwf) / fwf;
            let qn = q.powf(params.npower);
            let d = d0 * qn;
            let k = 1.0 + (params.k_max - 1.0) * qn;
            let alpha = PI * params.fpml * (1.0 - q);
            let b = (-(d / k + alpha) * dt).exp();
            let a = if d > 1e-6 {
                d * (b - 1.0) / (k * (d + k * alpha))
            } else {
                0.0
            };
            profile.k_inv.push(1.0 / k);
            profile.a.push(a);
            profile.b.push(b);
        }
        profile
    }
}

#[derive(Debug)]
struct AxisLayer {
    full: Profile,
    half: Profile,
    /// Margin regions with the offset mapping a local index to a layer position.
    sides: Vec<(Extent3, isize)>,
    /// Memory of d(stress)/d(axis), one per velocity component.
    psi_v: [Field3; 3],
    /// Memory of d(velocity component)/d(axis), one per component.
    psi_s: [Field3; 3],
}

/// Convolutional PML state of one subdomain.
#[derive(Debug)]
pub struct Cpml {
    axes: [Option<AxisLayer>; 3],
}

fn cells(region: &Extent3) -> impl Iterator<Item = [isize; 3]> + '_ {
    (region.lo[0]..=region.hi[0]).flat_map(move |i| {
        (region.lo[1]..=region.hi[1])
            .flat_map(move |j| (region.lo[2]..=region.hi[2]).map(move |k| [i, j, k]))
    })
}

fn zeros3(extent: Extent3) -> Result<[Field3; 3]> {
    Ok([
        Field3::zeros(extent)?,
        Field3::zeros(extent)?,
        Field3::zeros(extent)?,
    ])
}

impl Cpml {
    /// Profiles and memory fields for the global faces this subdomain touches.
    pub fn new(sub: &Subdomain, params: &CpmlParams, dh: f32, dt: f32, periodic: bool) -> Result<Self> {
        check_layer_fits(sub, params.width, periodic)?;
        let fw = params.width as isize;
        let mut axes: [Option<AxisLayer>; 3] = Default::default();
        for (axis, slot) in axes.iter_mut().enumerate() {
            let n = sub.local[axis] as isize;
            let interior = sub.interior();
            let mut sides = Vec::new();
            if sub.on_global_edge(Face::new(axis, true)) {
                sides.push((interior.with_axis(axis, 1, fw), -1));
            }
            if sub.on_global_edge(Face::new(axis, false)) {
                sides.push((interior.with_axis(axis, n - fw + 1, n), fw - (n - fw + 1)));
            }
            if sides.is_empty() {
                continue;
            }
            let psi_extent = interior.with_axis(axis, 0, 2 * fw - 1);
            *slot = Some(AxisLayer {
                full: Profile::new(params, sub.global[axis], dh, dt, false),
                half: Profile::new(params, sub.global[axis], dh, dt, true),
                sides,
                psi_v: zeros3(psi_extent)?,
                psi_s: zeros3(psi_extent)?,
            });
        }
        let layered: Vec<usize> = (0..3).filter(|&a| axes[a].is_some()).collect();
        debug!(rank = sub.rank, ?layered, "CPML axes allocated");
        Ok(Cpml { axes })
    }

    /// State with no layer, for runs without CPML.
    pub fn inactive() -> Self {
        Cpml {
            axes: Default::default(),
        }
    }

    /// True if this subdomain holds any layer.
    pub fn is_active(&self) -> bool {
        self.axes.iter().any(Option::is_some)
    }

    /// Memory fields in a fixed order, for checkpointing.
    pub fn psi_fields(&self) -> Vec<&Field3> {
        self.axes
            .iter()
            .flatten()
            .flat_map(|l| l.psi_v.iter().chain(l.psi_s.iter()))
            .collect()
    }

    /// Mutable memory fields in the order of [`psi_fields`](Self::psi_fields).
    pub fn psi_fields_mut(&mut self) -> Vec<&mut Field3> {
        self.axes
            .iter_mut()
            .flatten()
            .flat_map(|l| l.psi_v.iter_mut().chain(l.psi_s.iter_mut()))
            .collect()
    }

    /// Reset every memory field, e.g. between shots.
    pub fn zero(&mut self) {
        self.psi_fields_mut().into_iter().for_each(|f| f.fill(0.0));
    }

    /// Fold the layer terms into the velocity just advanced by the bulk update.
    pub fn correct_velocity(&mut self, wf: &mut Wavefield, mat: &Material, stencil: &Stencil, dt: f32) {
        let strides = wf.v.x.strides();
        let buoyancy = [&mat.rip, &mat.rjp, &mat.rkp];
        for (axis, layer) in self.axes.iter_mut().enumerate() {
            let Some(layer) = layer else { continue };
            let stride = strides[axis];
            for comp in 0..3 {
                let s = wf.s.component(comp, axis).as_slice();
                let forward = comp == axis;
                let prof = if forward { &layer.half } else { &layer.full };
                let psi = &mut layer.psi_v[comp];
                let v = wf.v.component_mut(comp);
                let buoy = buoyancy[comp].as_slice();
                for (region, shift) in &layer.sides {
                    for idx in cells(region) {
                        let p = v.offset(idx[0], idx[1], idx[2]);
                        let l = (idx[axis] + shift) as usize;
                        let d = if forward {
                            stencil.forward(s, p, stride)
                        } else {
                            stencil.backward(s, p, stride)
                        };
                        let mut at = idx;
                        at[axis] = l as isize;
                        let m = prof.b[l] * psi[at] + prof.a[l] * d;
                        psi[at] = m;
                        v.as_mut_slice()[p] += dt * buoy[p] * ((prof.k_inv[l] - 1.0) * d + m);
                    }
                }
            }
        }
    }

    /// Fold the layer terms into the stress just advanced by the bulk update.
    pub fn correct_stress(&mut self, wf: &mut Wavefield, mat: &Material, stencil: &Stencil, dt: f32) {
        let strides = wf.v.x.strides();
        let rows = [
            [&mat.c11, &mat.c12, &mat.c13],
            [&mat.c12, &mat.c22, &mat.c23],
            [&mat.c13, &mat.c23, &mat.c33],
        ];
        for (axis, layer) in self.axes.iter_mut().enumerate() {
            let Some(layer) = layer else { continue };
            let stride = strides[axis];
            for comp in 0..3 {
                let v = wf.v.component(comp).as_slice();
                let normal = comp == axis;
                let prof = if normal { &layer.full } else { &layer.half };
                let psi = &mut layer.psi_s[comp];
                for (region, shift) in &layer.sides {
                    for idx in cells(region) {
                        let p = wf.s.xx.offset(idx[0], idx[1], idx[2]);
                        let l = (idx[axis] + shift) as usize;
                        let d = if normal {
                            stencil.backward(v, p, stride)
                        } else {
                            stencil.forward(v, p, stride)
                        };
                        let mut at = idx;
                        at[axis] = l as isize;
                        let m = prof.b[l] * psi[at] + prof.a[l] * d;
                        psi[at] = m;
                        let term = dt * ((prof.k_inv[l] - 1.0) * d + m);
                        if normal {
                            for (b, row) in rows.iter().enumerate() {
                                let c = row[axis].as_slice()[p];
                                wf.s.component_mut(b, b).as_mut_slice()[p] += c * term;
                            }
                        } else {
                            let mu = shear_modulus(mat, axis, comp).as_slice()[p];
                            wf.s.component_mut(axis, comp).as_mut_slice()[p] += mu * term;
                        }
                    }
                }
            }
        }
    }
}

fn shear_modulus(mat: &Material, a: usize, b: usize) -> &Field3 {
    match (a.min(b), a.max(b)) {
        (0, 1) => &mat.c66ipjp,
        (1, 2) => &mat.c44jpkp,
        _ => &mat.c55ipkp,
    }
}

/// Exponential damping frame applied to velocity and stress near global faces.
#[derive(Debug, Clone)]
pub struct DampingFrame {
    /// Per-axis factors over local indices `1..=local`.
    factors: [Vec<f32>; 3],
    interior: Extent3,
}

impl DampingFrame {
    /// Frame of `width` cells reducing amplitudes by `damping` percent at the edge.
    ///
    /// Returns `None` for subdomains that touch no global face.
    pub fn new(sub: &Subdomain, width: usize, damping: f32, periodic: bool) -> Result<Option<Self>> {
        if width < 2 {
            return Err(FdError::InvalidAbsorbingLayer(
                "damping frame needs a width of at least 2".to_string(),
            ));
        }
        if !(damping > 0.0 && damping < 100.0) {
            return Err(FdError::InvalidAbsorbingLayer(format!(
                "damping must be a percentage in (0, 100), got {}",
                damping
            )));
        }
        check_layer_fits(sub, width, periodic)?;
        if !Face::ALL.iter().any(|&f| sub.on_global_edge(f)) {
            return Ok(None);
        }

        let amp = 1.0 - damping / 100.0;
        let fw = width as f32;
        let a = (-amp.ln() / ((fw - 1.0) * (fw - 1.0))).sqrt();
        let coeff = |i: usize| (-(a * (fw - i as f32)).powi(2)).exp();

        let factors = [0, 1, 2].map(|axis| {
            (1..=sub.local[axis])
                .map(|l| {
                    let g = sub.offset[axis] + l;
                    let ng = sub.global[axis];
                    if g <= width {
                        coeff(g)
                    } else if g > ng - width {
                        coeff(ng - g + 1)
                    } else {
                        1.0
                    }
                })
                .collect::<Vec<f32>>()
        });
        Ok(Some(DampingFrame {
            factors,
            interior: sub.interior(),
        }))
    }

    fn factor(&self, [i, j, k]: [isize; 3]) -> f32 {
        self.factors[0][i as usize - 1]
            .min(self.factors[1][j as usize - 1])
            .min(self.factors[2][k as usize - 1])
    }

    /// Scale every velocity component.
    pub fn apply_velocity(&self, v: &mut VectorField) {
        for f in v.components_mut() {
            f.update_region(&self.interior, |_, idx, old| old * self.factor(idx));
        }
    }

    /// Scale every stress component.
    pub fn apply_stress(&self, s: &mut TensorField) {
        for f in s.components_mut() {
            f.update_region(&self.interior, |_, idx, old| old * self.factor(idx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::Decomposition;

    fn params(width: usize) -> CpmlParams {
        CpmlParams {
            width,
            npower: 2.0,
            k_max: 1.0,
            fpml: 10.0,
            vppml: 3000.0,
            reflection: 1e-3,
        }
    }

    #[test]
    fn profile_is_symmetric_and_fades_inward() {
        let p = Profile::new(&params(6), 40, 10.0, 1e-3, false);
        assert_eq!(p.b.len(), 12);
        for l in 0..6 {
            assert!((p.b[l] - p.b[11 - l]).abs() < 1e-6, "position {}", l);
        }
        // Strongest damping at the outer edge.
        assert!(p.b[0] < p.b[5]);
        assert!(p.a[0] < 0.0);
        assert!(p.k_inv.iter().all(|&k| (k - 1.0).abs() < 1e-6));
    }

    #[test]
    fn layer_allocated_only_on_edge_ranks() {
        let d = Decomposition::new([24, 24, 24], [3, 1, 1], 3, false).unwrap();
        let middle = Cpml::new(&d.subdomain(1), &params(4), 10.0, 1e-3, false).unwrap();
        // y and z are spanned by one process, so every rank has those layers.
        assert_eq!(middle.psi_fields().len(), 12);
        let edge = Cpml::new(&d.subdomain(0), &params(4), 10.0, 1e-3, false).unwrap();
        assert_eq!(edge.psi_fields().len(), 18);
        assert!(edge.is_active());
    }

    #[test]
    fn layer_must_fit() {
        let d = Decomposition::new([12, 24, 24], [3, 1, 1], 3, false).unwrap();
        let r = Cpml::new(&d.subdomain(0), &params(6), 10.0, 1e-3, false);
        assert!(matches!(r, Err(FdError::InvalidAbsorbingLayer(_))));
        let d = Decomposition::new([10, 24, 24], [1, 1, 1], 1, false).unwrap();
        let r = Cpml::new(&d.subdomain(0), &params(6), 10.0, 1e-3, false);
        assert!(matches!(r, Err(FdError::InvalidAbsorbingLayer(_))));
        let r = Cpml::new(&d.subdomain(0), &params(2), 10.0, 1e-3, true);
        assert!(matches!(r, Err(FdError::InvalidAbsorbingLayer(_))));
    }

    #[test]
    fn damping_frame_reaches_target_amplitude() {
        let d = Decomposition::new([20, 20, 20], [1, 1, 1], 1, false).unwrap();
        let sub = d.subdomain(0);
        let frame = DampingFrame::new(&sub, 5, 8.0, false).unwrap().unwrap();
        assert!((frame.factor([1, 10, 10]) - 0.92).abs() < 1e-5);
        assert!((frame.factor([20, 10, 10]) - 0.92).abs() < 1e-5);
        assert_eq!(frame.factor([5, 10, 10]), 1.0);
        assert_eq!(frame.factor([10, 10, 10]), 1.0);
        assert!(frame.factor([1, 1, 1]) <= frame.factor([1, 10, 10]));
    }

    #[test]
    fn interior_rank_has_no_frame() {
        let d = Decomposition::new([30, 30, 30], [3, 3, 3], 27, false).unwrap();
        let centre = d.subdomain(d.rank_of([1, 1, 1]));
        assert!(DampingFrame::new(&centre, 5, 8.0, false).unwrap().is_none());
    }
}
