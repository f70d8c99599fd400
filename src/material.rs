// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Material parameters: per-cell base model, providers that fill it, and the
//! averaged coefficients read by the update kernels.

use std::path::PathBuf;

use tracing::debug;

use crate::comm::Communicator;
use crate::decomposition::Subdomain;
use crate::error::{FdError, Result};
use crate::field::{Extent3, Field3};
use crate::halo::{exchange_margin, HaloBuffers};
use crate::io;

/// Index of each stiffness entry in [`MaterialBlock::c`] (Voigt notation).
pub mod voigt {
    /// C11.
    pub const C11: usize = 0;
    /// C22.
    pub const C22: usize = 1;
    /// C33.
    pub const C33: usize = 2;
    /// C12.
    pub const C12: usize = 3;
    /// C13.
    pub const C13: usize = 4;
    /// C23.
    pub const C23: usize = 5;
    /// C44 (yz shear).
    pub const C44: usize = 6;
    /// C55 (xz shear).
    pub const C55: usize = 7;
    /// C66 (xy shear).
    pub const C66: usize = 8;
}
use voigt::*;

/// Per-cell model over the local block plus a one-cell margin.
#[derive(Debug)]
pub struct MaterialBlock {
    /// Density.
    pub rho: Field3,
    /// Stiffness entries, indexed by the constants in [`voigt`].
    pub c: [Field3; 9],
    /// P-wave and S-wave relaxation strengths (2/Q), when attenuating.
    pub tau: Option<(Field3, Field3)>,
    isotropic: bool,
}

impl MaterialBlock {
    /// Zeroed block for a subdomain of size `local`.
    pub fn new(local: [usize; 3], attenuation: bool) -> Result<Self> {
        let extent = Extent3::with_halo(local, 1);
        let zeros = || Field3::zeros(extent);
        Ok(MaterialBlock {
            rho: zeros()?,
            c: [
                zeros()?,
                zeros()?,
                zeros()?,
                zeros()?,
                zeros()?,
                zeros()?,
                zeros()?,
                zeros()?,
                zeros()?,
            ],
            tau: if attenuation {
                Some((zeros()?, zeros()?))
            } else {
                None
            },
            isotropic: true,
        })
    }

    /// True unless an orthotropic cell was set.
    pub fn is_isotropic(&self) -> bool {
        self.isotropic
    }

    /// Set an isotropic cell from velocities and density.
    pub fn set_isotropic(&mut self, idx: [isize; 3], vp: f32, vs: f32, rho: f32) -> Result<()> {
        check_positive("rho", rho)?;
        check_positive("vp", vp)?;
        if !(vs.is_finite() && vs >= 0.0) {
            return Err(FdError::InvalidMaterial { name: "vs", value: vs });
        }
        let mu = rho * vs * vs;
        let pi = rho * vp * vp;
        self.rho[idx] = rho;
        for n in [C11, C22, C33] {
            self.c[n][idx] = pi;
        }
        for n in [C12, C13, C23] {
            self.c[n][idx] = pi - 2.0 * mu;
        }
        for n in [C44, C55, C66] {
            self.c[n][idx] = mu;
        }
        Ok(())
    }

    /// Set an orthotropic cell from explicit stiffness entries.
    pub fn set_orthotropic(&mut self, idx: [isize; 3], rho: f32, c: &[f32; 9]) -> Result<()> {
        check_positive("rho", rho)?;
        for (n, name) in [(C11, "c11"), (C22, "c22"), (C33, "c33")] {
            check_positive(name, c[n])?;
        }
        self.rho[idx] = rho;
        for (n, &v) in c.iter().enumerate() {
            self.c[n][idx] = v;
        }
        self.isotropic = false;
        Ok(())
    }

    /// Set the quality factors of a cell; ignored for purely elastic blocks.
    pub fn set_quality(&mut self, idx: [isize; 3], q: Option<(f32, f32)>) -> Result<()> {
        let Some((taup, taus)) = &mut self.tau else {
            return Ok(());
        };
        let (qp, qs) = q.ok_or_else(|| FdError::InvalidConfig {
            key: "model.qp".to_string(),
            reason: "attenuation requires quality factors for every cell".to_string(),
        })?;
        check_positive("qp", qp)?;
        check_positive("qs", qs)?;
        taup[idx] = 2.0 / qp;
        taus[idx] = 2.0 / qs;
        Ok(())
    }

    /// Fill the one-cell margin from neighbors, replicating edge cells on
    /// non-periodic global faces.
    pub fn synchronize_margin<C: Communicator>(&mut self, comm: &mut C, sub: &Subdomain) -> Result<()> {
        let mut fields: Vec<&mut Field3> = vec![&mut self.rho];
        let [_, _, _, _, _, _, c44, c55, c66] = &mut self.c;
        fields.extend([c44, c55, c66]);
        if let Some((_, taus)) = &mut self.tau {
            fields.push(taus);
        }
        let mut buffers = HaloBuffers::new(sub.local, fields.len(), 1)?;
        exchange_margin(comm, sub, &mut buffers, &mut fields)
    }

    /// Largest P velocity over the interior.
    pub fn vp_max(&self, interior: &Extent3) -> f32 {
        let mut vmax = 0.0f32;
        self.rho.for_each_in(interior, |[i, j, k], rho| {
            for n in [C11, C22, C33] {
                vmax = vmax.max((self.c[n].get(i, j, k) / rho).sqrt());
            }
        });
        vmax
    }

    /// Smallest non-zero S velocity over the interior, if any.
    pub fn vs_min(&self, interior: &Extent3) -> Option<f32> {
        let mut vmin = f32::INFINITY;
        self.rho.for_each_in(interior, |[i, j, k], rho| {
            for n in [C44, C55, C66] {
                let mu = self.c[n].get(i, j, k);
                if mu > 0.0 {
                    vmin = vmin.min((mu / rho).sqrt());
                }
            }
        });
        vmin.is_finite().then_some(vmin)
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FdError::InvalidMaterial { name, value })
    }
}

/// Source of per-cell material values for a subdomain.
///
/// Implementations fill the interior `1..=local` of `block` for the part of
/// the global model owned by `sub`; the margin is synchronized afterwards.
pub trait ModelProvider: Send + Sync {
    /// Short description for logging.
    fn describe(&self) -> String;

    /// Fill the interior of `block`.
    fn fill(&self, sub: &Subdomain, dh: f32, block: &mut MaterialBlock) -> Result<()>;
}

fn for_interior<F>(sub: &Subdomain, mut f: F) -> Result<()>
where
    F: FnMut([isize; 3], [usize; 3]) -> Result<()>,
{
    let n = sub.local;
    for i in 1..=n[0] as isize {
        for j in 1..=n[1] as isize {
            for k in 1..=n[2] as isize {
                let g = sub.to_global([i, j, k]);
                f([i, j, k], [g[0] as usize, g[1] as usize, g[2] as usize])?;
            }
        }
    }
    Ok(())
}

/// Homogeneous isotropic medium.
#[derive(Debug, Clone, PartialEq)]
pub struct Homogeneous {
    /// P velocity.
    pub vp: f32,
    /// S velocity.
    pub vs: f32,
    /// Density.
    pub rho: f32,
    /// (Qp, Qs), required for viscoelastic runs.
    pub q: Option<(f32, f32)>,
}

impl ModelProvider for Homogeneous {
    fn describe(&self) -> String {
        format!(
            "homogeneous vp={} vs={} rho={}",
            self.vp, self.vs, self.rho
        )
    }

    fn fill(&self, sub: &Subdomain, _dh: f32, block: &mut MaterialBlock) -> Result<()> {
        for_interior(sub, |l, _| {
            block.set_isotropic(l, self.vp, self.vs, self.rho)?;
            block.set_quality(l, self.q)
        })
    }
}

/// One layer of a [`Layered`] model.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Depth of the top of the layer along y, in metres.
    pub top: f32,
    /// P velocity.
    pub vp: f32,
    /// S velocity.
    pub vs: f32,
    /// Density.
    pub rho: f32,
    /// (Qp, Qs), required for viscoelastic runs.
    pub q: Option<(f32, f32)>,
}

/// Isotropic layers stacked along y, sorted by increasing top depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Layered {
    /// Layers; the first must start at depth 0.
    pub layers: Vec<Layer>,
}

impl Layered {
    /// The layer containing depth `y`.
    fn layer_at(&self, y: f32) -> Option<&Layer> {
        self.layers.iter().rev().find(|l| l.top <= y)
    }
}

impl ModelProvider for Layered {
    fn describe(&self) -> String {
        format!("{} layers along y", self.layers.len())
    }

    fn fill(&self, sub: &Subdomain, dh: f32, block: &mut MaterialBlock) -> Result<()> {
        for_interior(sub, |l, g| {
            let depth = (g[1] - 1) as f32 * dh;
            let layer = self.layer_at(depth).ok_or_else(|| FdError::InvalidConfig {
                key: "model.layers".to_string(),
                reason: format!("no layer covers depth {}", depth),
            })?;
            block.set_isotropic(l, layer.vp, layer.vs, layer.rho)?;
            block.set_quality(l, layer.q)
        })
    }
}

/// Homogeneous orthotropic medium.
#[derive(Debug, Clone, PartialEq)]
pub struct Orthotropic {
    /// Density.
    pub rho: f32,
    /// C11, C22, C33, C12, C13, C23, C44, C55, C66.
    pub c: [f32; 9],
}

impl ModelProvider for Orthotropic {
    fn describe(&self) -> String {
        format!("orthotropic rho={} c={:?}", self.rho, self.c)
    }

    fn fill(&self, sub: &Subdomain, _dh: f32, block: &mut MaterialBlock) -> Result<()> {
        for_interior(sub, |l, _| block.set_orthotropic(l, self.rho, &self.c))
    }
}

/// Isotropic model read from global vp, vs and rho cubes (.npy or .mat).
#[derive(Debug, Clone, PartialEq)]
pub struct CubeFiles {
    /// P velocity cube.
    pub vp: PathBuf,
    /// S velocity cube.
    pub vs: PathBuf,
    /// Density cube.
    pub rho: PathBuf,
    /// Constant (Qp, Qs), required for viscoelastic runs.
    pub q: Option<(f32, f32)>,
}

impl ModelProvider for CubeFiles {
    fn describe(&self) -> String {
        format!(
            "model files vp={} vs={} rho={}",
            self.vp.display(),
            self.vs.display(),
            self.rho.display()
        )
    }

    fn fill(&self, sub: &Subdomain, _dh: f32, block: &mut MaterialBlock) -> Result<()> {
        let vp = io::load_model_cube(&self.vp, "vp", sub.global)?;
        let vs = io::load_model_cube(&self.vs, "vs", sub.global)?;
        let rho = io::load_model_cube(&self.rho, "rho", sub.global)?;
        for_interior(sub, |l, g| {
            let idx = [g[0] - 1, g[1] - 1, g[2] - 1];
            block.set_isotropic(l, vp[idx], vs[idx], rho[idx])?;
            block.set_quality(l, self.q)
        })
    }
}

/// Coefficients of one relaxation mechanism.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mechanism {
    /// 2π f_l DT.
    pub eta: f32,
    /// 1 / (1 + eta/2).
    pub b: f32,
    /// 1 - eta/2.
    pub c: f32,
}

impl Mechanism {
    /// Mechanism with relaxation frequency `freq` for time step `dt`.
    pub fn new(freq: f32, dt: f32) -> Self {
        let eta = 2.0 * std::f32::consts::PI * freq * dt;
        Mechanism {
            eta,
            b: 1.0 / (1.0 + 0.5 * eta),
            c: 1.0 - 0.5 * eta,
        }
    }
}

/// Relaxation moduli feeding the memory variables.
#[derive(Debug)]
pub struct Relaxation {
    /// π τp at nodes.
    pub p_relax: Field3,
    /// 2 μ τs at nodes.
    pub s_relax: Field3,
    /// Averaged μ τs at the xy, yz and xz shear positions.
    pub shear_relax: [Field3; 3],
    /// Relaxation mechanisms.
    pub mechanisms: Vec<Mechanism>,
}

/// Averaged, time-invariant coefficients on the wavefield extent.
///
/// Shares its extent with the wavefield so flat offsets address both.
#[derive(Debug)]
pub struct Material {
    /// Buoyancy at the vx position (i+1/2).
    pub rip: Field3,
    /// Buoyancy at the vy position (j+1/2).
    pub rjp: Field3,
    /// Buoyancy at the vz position (k+1/2).
    pub rkp: Field3,
    /// Normal stiffness entries at nodes (unrelaxed when attenuating).
    pub c11: Field3,
    /// C22.
    pub c22: Field3,
    /// C33.
    pub c33: Field3,
    /// C12.
    pub c12: Field3,
    /// C13.
    pub c13: Field3,
    /// C23.
    pub c23: Field3,
    /// Shear modulus at (i+1/2, j+1/2).
    pub c66ipjp: Field3,
    /// Shear modulus at (j+1/2, k+1/2).
    pub c44jpkp: Field3,
    /// Shear modulus at (i+1/2, k+1/2).
    pub c55ipkp: Field3,
    /// Viscoelastic parameters, when attenuating.
    pub relaxation: Option<Relaxation>,
    isotropic: bool,
}

fn harmonic4(v: [f32; 4]) -> f32 {
    if v.iter().any(|&x| x == 0.0) {
        0.0
    } else {
        4.0 / v.iter().map(|x| 1.0 / x).sum::<f32>()
    }
}

fn mean4(v: [f32; 4]) -> f32 {
    0.25 * v.iter().sum::<f32>()
}

/// Values of `f` at the four corners spanned by unit steps along `a` and `b`.
fn corners(f: &Field3, [i, j, k]: [isize; 3], a: usize, b: usize) -> [f32; 4] {
    let mut da = [0isize; 3];
    let mut db = [0isize; 3];
    da[a] = 1;
    db[b] = 1;
    [
        f.get(i, j, k),
        f.get(i + da[0], j + da[1], k + da[2]),
        f.get(i + db[0], j + db[1], k + db[2]),
        f.get(i + da[0] + db[0], j + da[1] + db[1], k + da[2] + db[2]),
    ]
}

impl Material {
    /// Average a synchronized block onto `extent`.
    ///
    /// `frequencies` are the relaxation frequencies; they must be non-empty
    /// exactly when the block carries quality factors.
    pub fn from_block(
        block: &MaterialBlock,
        local: [usize; 3],
        extent: Extent3,
        frequencies: &[f32],
        dt: f32,
    ) -> Result<Self> {
        let interior = Extent3::interior(local);
        let nmech = frequencies.len() as f32;

        let buoyancy = |axis: usize| -> Result<Field3> {
            let mut f = Field3::zeros(extent)?;
            f.update_region(&interior, |_, [i, j, k], _| {
                let mut d = [0isize; 3];
                d[axis] = 1;
                let avg = 0.5 * (block.rho.get(i, j, k) + block.rho.get(i + d[0], j + d[1], k + d[2]));
                1.0 / avg
            });
            Ok(f)
        };

        let node = |value: &(dyn Fn([isize; 3]) -> f32 + Sync)| -> Result<Field3> {
            let mut f = Field3::zeros(extent)?;
            f.update_region(&interior, |_, idx, _| value(idx));
            Ok(f)
        };

        let shear = |n: usize, a: usize, b: usize, tau: Option<&Field3>| -> Result<Field3> {
            let mut f = Field3::zeros(extent)?;
            f.update_region(&interior, |_, idx, _| {
                let mu = harmonic4(corners(&block.c[n], idx, a, b));
                match tau {
                    Some(t) => mu * (1.0 + nmech * mean4(corners(t, idx, a, b))),
                    None => mu,
                }
            });
            Ok(f)
        };

        let material = match &block.tau {
            None => Material {
                rip: buoyancy(0)?,
                rjp: buoyancy(1)?,
                rkp: buoyancy(2)?,
                c11: node(&|[i, j, k]: [isize; 3]| block.c[C11].get(i, j, k))?,
                c22: node(&|[i, j, k]: [isize; 3]| block.c[C22].get(i, j, k))?,
                c33: node(&|[i, j, k]: [isize; 3]| block.c[C33].get(i, j, k))?,
                c12: node(&|[i, j, k]: [isize; 3]| block.c[C12].get(i, j, k))?,
                c13: node(&|[i, j, k]: [isize; 3]| block.c[C13].get(i, j, k))?,
                c23: node(&|[i, j, k]: [isize; 3]| block.c[C23].get(i, j, k))?,
                c66ipjp: shear(C66, 0, 1, None)?,
                c44jpkp: shear(C44, 1, 2, None)?,
                c55ipkp: shear(C55, 0, 2, None)?,
                relaxation: None,
                isotropic: block.is_isotropic(),
            },
            Some((taup, taus)) => {
                if !block.is_isotropic() {
                    return Err(FdError::InvalidConfig {
                        key: "model.kind".to_string(),
                        reason: "viscoelastic runs require an isotropic model".to_string(),
                    });
                }
                if frequencies.is_empty() {
                    return Err(FdError::InvalidConfig {
                        key: "model.relaxation_frequencies".to_string(),
                        reason: "attenuation needs at least one relaxation mechanism".to_string(),
                    });
                }
                let pi = &block.c[C11];
                let mu = &block.c[C44];
                let g = |[i, j, k]: [isize; 3]| pi.get(i, j, k) * (1.0 + nmech * taup.get(i, j, k));
                let f2 = |[i, j, k]: [isize; 3]| {
                    2.0 * mu.get(i, j, k) * (1.0 + nmech * taus.get(i, j, k))
                };
                let shear_relax = |a: usize, b: usize| -> Result<Field3> {
                    let mut f = Field3::zeros(extent)?;
                    f.update_region(&interior, |_, idx, _| {
                        harmonic4(corners(mu, idx, a, b)) * mean4(corners(taus, idx, a, b))
                    });
                    Ok(f)
                };
                Material {
                    rip: buoyancy(0)?,
                    rjp: buoyancy(1)?,
                    rkp: buoyancy(2)?,
                    c11: node(&g)?,
                    c22: node(&g)?,
                    c33: node(&g)?,
                    c12: node(&|idx: [isize; 3]| g(idx) - f2(idx))?,
                    c13: node(&|idx: [isize; 3]| g(idx) - f2(idx))?,
                    c23: node(&|idx: [isize; 3]| g(idx) - f2(idx))?,
                    c66ipjp: shear(C44, 0, 1, Some(taus))?,
                    c44jpkp: shear(C44, 1, 2, Some(taus))?,
                    c55ipkp: shear(C44, 0, 2, Some(taus))?,
                    relaxation: Some(Relaxation {
                        p_relax: node(&|[i, j, k]: [isize; 3]| pi.get(i, j, k) * taup.get(i, j, k))?,
                        s_relax: node(&|[i, j, k]: [isize; 3]| 2.0 * mu.get(i, j, k) * taus.get(i, j, k))?,
                        shear_relax: [shear_relax(0, 1)?, shear_relax(1, 2)?, shear_relax(0, 2)?],
                        mechanisms: frequencies.iter().map(|&f| Mechanism::new(f, dt)).collect(),
                    }),
                    isotropic: true,
                }
            }
        };
        Ok(material)
    }

    /// True for isotropic media.
    pub fn is_isotropic(&self) -> bool {
        self.isotropic
    }

    /// Number of relaxation mechanisms (0 when elastic).
    pub fn mechanisms(&self) -> usize {
        self.relaxation.as_ref().map_or(0, |r| r.mechanisms.len())
    }

    /// Shear modulus at a node, from 0.5 (C11 - C12).
    pub fn node_shear_modulus(&self, flat: usize) -> f32 {
        0.5 * (self.c11.as_slice()[flat] - self.c12.as_slice()[flat])
    }
}

/// Build the averaged material of one subdomain.
///
/// Fills the block from `provider`, synchronizes its margin and averages it
/// onto `extent`. Returns the material with the local (vp_max, vs_min).
pub fn build_material<C: Communicator>(
    comm: &mut C,
    sub: &Subdomain,
    provider: &dyn ModelProvider,
    dh: f32,
    dt: f32,
    frequencies: &[f32],
    extent: Extent3,
) -> Result<(Material, f32, Option<f32>)> {
    let mut block = MaterialBlock::new(sub.local, !frequencies.is_empty())?;
    provider.fill(sub, dh, &mut block)?;
    block.synchronize_margin(comm, sub)?;
    let interior = sub.interior();
    let vp_max = block.vp_max(&interior);
    let vs_min = block.vs_min(&interior);
    debug!(rank = sub.rank, vp_max, ?vs_min, "material block filled");
    let material = Material::from_block(&block, sub.local, extent, frequencies, dt)?;
    Ok((material, vp_max, vs_min))
}
