// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::Path;

use ndarray::Array2;

use crate::comm::Communicator;
use crate::decomposition::{Decomposition, Subdomain};
use crate::error::{FdError, Result};
use crate::io;
use crate::material::Material;
use crate::stencil::Stencil;
use crate::wavefield::Wavefield;

/// Which quantities are recorded at receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeismoKind {
    /// vx, vy, vz.
    Velocity,
    /// Pressure -(sxx + syy + szz) / 3.
    Pressure,
    /// Energy-scaled divergence and curl of the velocity.
    CurlDiv,
    /// Everything above.
    All,
}

/// A recorded quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// x velocity.
    Vx,
    /// y velocity.
    Vy,
    /// z velocity.
    Vz,
    /// Pressure.
    Pressure,
    /// Divergence scaled by sqrt(lambda + 2 mu).
    Div,
    /// Signed root of the shear energy of the curl.
    Curl,
}

impl Component {
    /// Short name used in output file names.
    pub fn name(self) -> &'static str {
        match self {
            Component::Vx => "vx",
            Component::Vy => "vy",
            Component::Vz => "vz",
            Component::Pressure => "p",
            Component::Div => "div",
            Component::Curl => "curl",
        }
    }
}

impl SeismoKind {
    /// Components recorded for this kind, in output order.
    pub fn components(self) -> &'static [Component] {
        use Component::*;
        match self {
            SeismoKind::Velocity => &[Vx, Vy, Vz],
            SeismoKind::Pressure => &[Pressure],
            SeismoKind::CurlDiv => &[Div, Curl],
            SeismoKind::All => &[Vx, Vy, Vz, Pressure, Div, Curl],
        }
    }
}

/// Time steps at which receivers are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    /// Total number of time steps.
    pub nt: usize,
    /// Sampling interval in steps.
    pub ndt: usize,
    /// Steps skipped before the first sample.
    pub ndtshift: usize,
}

impl SamplingPlan {
    /// Number of samples per trace.
    pub fn samples(&self) -> usize {
        if self.ndtshift > self.nt {
            0
        } else {
            (self.nt - self.ndtshift).div_ceil(self.ndt)
        }
    }

    /// Sample index recorded at `step` (1-based), if any.
    pub fn sample_at(&self, step: usize) -> Option<usize> {
        if step <= self.ndtshift || step > self.nt {
            return None;
        }
        let rel = step - self.ndtshift - 1;
        (rel % self.ndt == 0).then_some(rel / self.ndt)
    }
}

/// Read `x y z` receiver positions and map them to 1-based global grid indices.
pub fn read_receivers(path: &Path, global: [usize; 3], dh: f32) -> Result<Vec<[usize; 3]>> {
    let rows = io::read_table(path, 3, 3)?;
    receivers_on_grid(&rows, global, dh)
}

/// Map receiver positions in metres to 1-based global grid indices.
pub fn receivers_on_grid(rows: &[Vec<f32>], global: [usize; 3], dh: f32) -> Result<Vec<[usize; 3]>> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let mut g = [0usize; 3];
            for a in 0..3 {
                let i = (row[a] / dh).round() as isize + 1;
                if i < 1 || i > global[a] as isize {
                    return Err(FdError::InvalidReceiver {
                        index,
                        reason: format!("position {:?} lies outside the grid", row),
                    });
                }
                g[a] = i as usize;
            }
            Ok(g)
        })
        .collect()
}

/// Local receiver traces of one shot.
#[derive(Debug, Clone)]
pub struct Seismograms {
    kind: SeismoKind,
    plan: SamplingPlan,
    cells: Vec<[isize; 3]>,
    /// Per component, `cells.len() * samples` values, trace-major.
    data: Vec<Vec<f32>>,
}

impl Seismograms {
    /// Traces for the receivers owned by `sub`, in global receiver order.
    pub fn new(receivers: &[[usize; 3]], sub: &Subdomain, kind: SeismoKind, plan: SamplingPlan) -> Self {
        let cells: Vec<[isize; 3]> = receivers.iter().filter_map(|&g| sub.to_local(g)).collect();
        let len = cells.len() * plan.samples();
        Seismograms {
            kind,
            plan,
            data: vec![vec![0.0; len]; kind.components().len()],
            cells,
        }
    }

    /// Number of receivers owned locally.
    pub fn local_traces(&self) -> usize {
        self.cells.len()
    }

    /// Clear all samples before a new shot.
    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|d| d.fill(0.0));
    }

    /// Record the current state if `step` is a sampling step.
    pub fn record(&mut self, step: usize, wf: &Wavefield, mat: &Material, stencil: &Stencil) {
        let Some(n) = self.plan.sample_at(step) else {
            return;
        };
        let ns = self.plan.samples();
        let [sx, sy, sz] = wf.v.x.strides();
        let (vx, vy, vz) = (wf.v.x.as_slice(), wf.v.y.as_slice(), wf.v.z.as_slice());
        for (r, &[i, j, k]) in self.cells.iter().enumerate() {
            let p = wf.v.x.offset(i, j, k);
            for (c, comp) in self.kind.components().iter().enumerate() {
                let value = match comp {
                    Component::Vx => vx[p],
                    Component::Vy => vy[p],
                    Component::Vz => vz[p],
                    Component::Pressure => {
                        let s = &wf.s;
                        -(s.xx.as_slice()[p] + s.yy.as_slice()[p] + s.zz.as_slice()[p]) / 3.0
                    }
                    Component::Div => {
                        let div = stencil.backward(vx, p, sx)
                            + stencil.backward(vy, p, sy)
                            + stencil.backward(vz, p, sz);
                        div * mat.c11.as_slice()[p].sqrt()
                    }
                    Component::Curl => {
                        let wx = stencil.forward(vz, p, sy) - stencil.forward(vy, p, sz);
                        let wy = stencil.forward(vx, p, sz) - stencil.forward(vz, p, sx);
                        let wz = stencil.forward(vy, p, sx) - stencil.forward(vx, p, sy);
                        let mu = mat.node_shear_modulus(p);
                        let amp = mu * (wx * wx.abs() + wy * wy.abs() + wz * wz.abs());
                        amp.signum() * amp.abs().sqrt()
                    }
                };
                self.data[c][r * ns + n] = value;
            }
        }
    }

    /// Merge all ranks' traces on the root.
    ///
    /// `receivers` is the full global receiver list. Returns one `[ntr, ns]`
    /// array per component on the root and `None` elsewhere.
    pub fn gather<C: Communicator>(
        &self,
        comm: &mut C,
        decomp: &Decomposition,
        receivers: &[[usize; 3]],
    ) -> Result<Option<Vec<(Component, Array2<f32>)>>> {
        let flat: Vec<f32> = self.data.iter().flatten().copied().collect();
        let Some(parts) = comm.gather(&flat)? else {
            return Ok(None);
        };
        let ns = self.plan.samples();
        let components = self.kind.components();
        let mut out: Vec<(Component, Array2<f32>)> = components
            .iter()
            .map(|&c| (c, Array2::zeros((receivers.len(), ns))))
            .collect();

        for (rank, part) in parts.iter().enumerate() {
            let owned: Vec<usize> = receivers
                .iter()
                .enumerate()
                .filter(|(_, &g)| decomp.owner_of(g) == Some(rank))
                .map(|(i, _)| i)
                .collect();
            let per_component = owned.len() * ns;
            if part.len() != per_component * components.len() {
                return Err(FdError::Communication(format!(
                    "rank {} sent {} seismogram values, expected {}",
                    rank,
                    part.len(),
                    per_component * components.len()
                )));
            }
            for (c, (_, arr)) in out.iter_mut().enumerate() {
                let block = &part[c * per_component..(c + 1) * per_component];
                for (t, &global_trace) in owned.iter().enumerate() {
                    for s in 0..ns {
                        arr[[global_trace, s]] = block[t * ns + s];
                    }
                }
            }
        }
        Ok(Some(out))
    }
}

/// Write merged traces as `<stem>_<component>.npy` files in `dir`.
pub fn write_seismograms(dir: &Path, stem: &str, traces: &[(Component, Array2<f32>)]) -> Result<()> {
    for (comp, arr) in traces {
        let path = dir.join(format!("{}_{}.npy", stem, comp.name()));
        io::save_traces(&path, arr)?;
    }
    Ok(())
}
