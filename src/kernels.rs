// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! Bulk velocity and stress updates on the staggered grid.
//!
//! Both updates run in two passes. The first evaluates spatial derivatives
//! into the current slot of a history ring; the second blends the ring with
//! the Adams–Bashforth weights (a single weight of one for leapfrog) and
//! advances the field. The ring is rotated afterwards.

use std::time::{Duration, Instant};

use crate::error::{FdError, Result};
use crate::field::Extent3;
use crate::history::HistoryRing;
use crate::material::{Material, Mechanism, Relaxation};
use crate::stencil::{adams_bashforth, Stencil};
use crate::wavefield::{TensorField, VectorField, Wavefield};

type Slices6<'a> = [&'a [f32]; 6];

fn slices6(t: &TensorField) -> Slices6<'_> {
    t.components().map(|f| f.as_slice())
}

/// Spatial operator, time step and multistep weights of a run.
#[derive(Debug, Clone)]
pub struct Scheme {
    /// Spatial derivative operator.
    pub stencil: Stencil,
    /// Adams–Bashforth weights, newest first.
    pub ab: &'static [f32],
    /// Time step.
    pub dt: f32,
}

impl Scheme {
    /// Build the scheme for the given orders, spacing and time step.
    pub fn new(fd_order: usize, time_order: usize, dh: f32, dt: f32) -> Result<Self> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(FdError::InvalidTimeStep(dt));
        }
        Ok(Scheme {
            stencil: Stencil::new(fd_order, dh)?,
            ab: adams_bashforth(time_order)?,
            dt,
        })
    }

    /// Advance velocity over `region` from the current stress.
    ///
    /// Halo cells of the stress must be current. Returns the elapsed time.
    pub fn update_v(&self, region: &Extent3, wf: &mut Wavefield, mat: &Material) -> Duration {
        let start = Instant::now();
        let st = &self.stencil;
        let [sx, sy, sz] = wf.v.x.strides();
        let [sxx, syy, szz, sxy, syz, sxz] = slices6(&wf.s);

        let acc = wf.accel.current_mut();
        acc.x.update_region(region, |p, _, _| {
            st.forward(sxx, p, sx) + st.backward(sxy, p, sy) + st.backward(sxz, p, sz)
        });
        acc.y.update_region(region, |p, _, _| {
            st.backward(sxy, p, sx) + st.forward(syy, p, sy) + st.backward(syz, p, sz)
        });
        acc.z.update_region(region, |p, _, _| {
            st.backward(sxz, p, sx) + st.backward(syz, p, sy) + st.forward(szz, p, sz)
        });

        let accel = &wf.accel;
        let history: Vec<(f32, &VectorField)> = self
            .ab
            .iter()
            .enumerate()
            .map(|(m, &beta)| (self.dt * beta, accel.get(m)))
            .collect();
        let buoyancy = [&mat.rip, &mat.rjp, &mat.rkp];
        for (axis, v) in wf.v.components_mut().into_iter().enumerate() {
            let terms: Vec<(f32, &[f32])> = history
                .iter()
                .map(|(w, a)| (*w, a.component(axis).as_slice()))
                .collect();
            let b = buoyancy[axis].as_slice();
            v.update_region(region, |p, _, old| {
                old + b[p] * terms.iter().map(|(w, a)| w * a[p]).sum::<f32>()
            });
        }

        wf.rotate_velocity_history();
        start.elapsed()
    }

    /// Advance stress, elastic or viscoelastic depending on `mat`.
    pub fn update_s(&self, region: &Extent3, wf: &mut Wavefield, mat: &Material) -> Result<Duration> {
        if mat.relaxation.is_some() {
            self.update_s_viscoelastic(region, wf, mat)
        } else {
            Ok(self.update_s_elastic(region, wf, mat))
        }
    }

    /// Advance stress with the (an)isotropic elastic constitutive law.
    pub fn update_s_elastic(&self, region: &Extent3, wf: &mut Wavefield, mat: &Material) -> Duration {
        let start = Instant::now();
        self.compute_strain(region, wf);
        self.integrate_stress(region, &mut wf.s, &wf.strain, None, mat);
        wf.rotate_stress_history();
        start.elapsed()
    }

    /// Advance memory variables and stress with the viscoelastic law.
    ///
    /// # Errors
    /// Fails if the wavefield has no memory variables or the material has no
    /// relaxation parameters, or if their mechanism counts differ.
    pub fn update_s_viscoelastic(
        &self,
        region: &Extent3,
        wf: &mut Wavefield,
        mat: &Material,
    ) -> Result<Duration> {
        let start = Instant::now();
        let relax = mat.relaxation.as_ref().ok_or_else(|| {
            FdError::Other("viscoelastic update without relaxation parameters".to_string())
        })?;
        let mechanisms = wf.memory.as_ref().map_or(0, |m| m.current().len());
        if mechanisms != relax.mechanisms.len() {
            return Err(FdError::Other(format!(
                "wavefield holds {} memory tensors but material has {} mechanisms",
                mechanisms,
                relax.mechanisms.len()
            )));
        }
        self.compute_strain(region, wf);
        if let Some(mem) = wf.memory.as_mut() {
            update_memory(region, wf.strain.current(), mem, relax);
        }
        self.integrate_stress(region, &mut wf.s, &wf.strain, wf.memory.as_ref(), mat);
        wf.rotate_stress_history();
        Ok(start.elapsed())
    }

    /// Strain rates from the current velocity into the strain ring's current slot.
    /// Shear entries hold the symmetric sum of both cross derivatives.
    fn compute_strain(&self, region: &Extent3, wf: &mut Wavefield) {
        let st = &self.stencil;
        let [sx, sy, sz] = wf.v.x.strides();
        let (vx, vy, vz) = (wf.v.x.as_slice(), wf.v.y.as_slice(), wf.v.z.as_slice());
        let e = wf.strain.current_mut();
        e.xx.update_region(region, |p, _, _| st.backward(vx, p, sx));
        e.yy.update_region(region, |p, _, _| st.backward(vy, p, sy));
        e.zz.update_region(region, |p, _, _| st.backward(vz, p, sz));
        e.xy.update_region(region, |p, _, _| st.forward(vx, p, sy) + st.forward(vy, p, sx));
        e.yz.update_region(region, |p, _, _| st.forward(vy, p, sz) + st.forward(vz, p, sy));
        e.xz.update_region(region, |p, _, _| st.forward(vx, p, sz) + st.forward(vz, p, sx));
    }

    fn integrate_stress(
        &self,
        region: &Extent3,
        s: &mut TensorField,
        strain: &HistoryRing<TensorField>,
        memory: Option<&HistoryRing<Vec<TensorField>>>,
        mat: &Material,
    ) {
        let dt = self.dt;
        let weights: Vec<(f32, Slices6)> = self
            .ab
            .iter()
            .enumerate()
            .map(|(m, &beta)| (dt * beta, slices6(strain.get(m))))
            .collect();

        // Leapfrog averages old and new memory variables; Adams–Bashforth
        // blends them with the strain weights.
        let memory_terms: Vec<(f32, Slices6)> = match memory {
            None => Vec::new(),
            Some(mem) if self.ab.len() == 1 => mem
                .current()
                .iter()
                .chain(mem.get(1).iter())
                .map(|r| (0.5 * dt, slices6(r)))
                .collect(),
            Some(mem) => self
                .ab
                .iter()
                .enumerate()
                .flat_map(move |(m, &beta)| mem.get(m).iter().map(move |r| (dt * beta, slices6(r))))
                .collect(),
        };

        let c11 = mat.c11.as_slice();
        let c22 = mat.c22.as_slice();
        let c33 = mat.c33.as_slice();
        let c12 = mat.c12.as_slice();
        let c13 = mat.c13.as_slice();
        let c23 = mat.c23.as_slice();
        let rows = [[c11, c12, c13], [c12, c22, c23], [c13, c23, c33]];
        let shear = [
            mat.c66ipjp.as_slice(),
            mat.c44jpkp.as_slice(),
            mat.c55ipkp.as_slice(),
        ];

        let [sxx, syy, szz, sxy, syz, sxz] = s.components_mut();
        for (n, field) in [sxx, syy, szz].into_iter().enumerate() {
            let row = rows[n];
            let (weights, memory_terms) = (&weights, &memory_terms);
            field.update_region(region, move |p, _, old| {
                let mut acc = old;
                for (w, e) in weights {
                    acc += w * (row[0][p] * e[0][p] + row[1][p] * e[1][p] + row[2][p] * e[2][p]);
                }
                for (w, r) in memory_terms {
                    acc += w * r[n][p];
                }
                acc
            });
        }
        for (k, field) in [sxy, syz, sxz].into_iter().enumerate() {
            let n = 3 + k;
            let mu = shear[k];
            let (weights, memory_terms) = (&weights, &memory_terms);
            field.update_region(region, move |p, _, old| {
                let rate: f32 = weights.iter().map(|(w, e)| w * e[n][p]).sum();
                let mut acc = old + mu[p] * rate;
                for (w, r) in memory_terms {
                    acc += w * r[n][p];
                }
                acc
            });
        }
    }
}

/// Crank–Nicolson update of every mechanism's memory tensor from the
/// current strain rate. Reads the previous values from age 1 of the ring.
fn update_memory(
    region: &Extent3,
    strain: &TensorField,
    mem: &mut HistoryRing<Vec<TensorField>>,
    relax: &Relaxation,
) {
    let e = slices6(strain);
    let pr = relax.p_relax.as_slice();
    let sr = relax.s_relax.as_slice();
    let (new, older) = mem.split_current();
    let old = older.get(1);
    for ((r, r_old), mech) in new.iter_mut().zip(old.iter()).zip(&relax.mechanisms) {
        let Mechanism { eta, b, c } = *mech;
        let prev = slices6(r_old);
        let [rxx, ryy, rzz, rxy, ryz, rxz] = r.components_mut();
        // Normal component n sees the trace minus the two other normal rates.
        for (n, field) in [rxx, ryy, rzz].into_iter().enumerate() {
            let (o1, o2) = ((n + 1) % 3, (n + 2) % 3);
            let prev = prev[n];
            field.update_region(region, |p, _, _| {
                let tr = e[0][p] + e[1][p] + e[2][p];
                let m = pr[p] * tr - sr[p] * (e[o1][p] + e[o2][p]);
                b * (c * prev[p] - eta * m)
            });
        }
        for (k, field) in [rxy, ryz, rxz].into_iter().enumerate() {
            let n = 3 + k;
            let relax_mu = relax.shear_relax[k].as_slice();
            let prev = prev[n];
            field.update_region(region, |p, _, _| {
                b * (c * prev[p] - eta * relax_mu[p] * e[n][p])
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decomposition::Decomposition;
    use crate::material::{Homogeneous, MaterialBlock, ModelProvider};

    const N: usize = 8;
    const H: usize = 2;

    fn setup(time_order: usize, q: Option<(f32, f32)>, freqs: &[f32]) -> (Scheme, Wavefield, Material) {
        let scheme = Scheme::new(4, time_order, 10.0, 1e-3).unwrap();
        let sub = Decomposition::new([N; 3], [1, 1, 1], 1, false)
            .unwrap()
            .subdomain(0);
        let extent = Extent3::with_halo([N; 3], H);
        let wf = Wavefield::new(extent, time_order, freqs.len()).unwrap();
        let mut block = MaterialBlock::new([N; 3], q.is_some()).unwrap();
        let model = Homogeneous { vp: 3000.0, vs: 1500.0, rho: 2000.0, q };
        model.fill(&sub, 10.0, &mut block).unwrap();
        let mut comms = crate::comm::create_world(
            &Decomposition::new([N; 3], [1, 1, 1], 1, false).unwrap(),
            [1024; 3],
        )
        .unwrap();
        block.synchronize_margin(&mut comms[0], &sub).unwrap();
        let mat = Material::from_block(&block, [N; 3], extent, freqs, 1e-3).unwrap();
        (scheme, wf, mat)
    }

    fn interior() -> Extent3 {
        Extent3::interior([N; 3])
    }

    #[test]
    fn quiet_field_stays_quiet() {
        for order in 2..=4 {
            let (scheme, mut wf, mat) = setup(order, None, &[]);
            for _ in 0..5 {
                scheme.update_v(&interior(), &mut wf, &mat);
                scheme.update_s(&interior(), &mut wf, &mat).unwrap();
            }
            assert!(wf.is_quiet(), "time order {}", order);
        }
    }

    #[test]
    fn linear_stress_accelerates_uniformly() {
        let (scheme, mut wf, mat) = setup(2, None, &[]);
        let whole = *wf.extent();
        // d(sxx)/dx = 5 everywhere.
        wf.s.xx.update_region(&whole, |_, [i, _, _], _| 5.0 * 10.0 * i as f32);
        scheme.update_v(&interior(), &mut wf, &mat);
        let expected = 1e-3 * 5.0 / 2000.0;
        assert!((wf.v.x.get(4, 4, 4) - expected).abs() < 1e-9);
        assert_eq!(wf.v.y.get(4, 4, 4), 0.0);
        assert_eq!(wf.v.x.get(0, 4, 4), 0.0, "halo must not be written");
    }

    #[test]
    fn linear_velocity_loads_normal_stresses() {
        let (scheme, mut wf, mat) = setup(2, None, &[]);
        let whole = *wf.extent();
        // d(vx)/dx = 2 everywhere.
        wf.v.x.update_region(&whole, |_, [i, _, _], _| 2.0 * 10.0 * i as f32);
        scheme.update_s(&interior(), &mut wf, &mat).unwrap();
        let pi = 2000.0 * 3000.0f32 * 3000.0;
        let lambda = pi - 2.0 * 2000.0 * 1500.0 * 1500.0;
        let sxx = wf.s.xx.get(3, 3, 3);
        let syy = wf.s.yy.get(3, 3, 3);
        assert!((sxx - 1e-3 * 2.0 * pi).abs() / sxx < 1e-5);
        assert!((syy - 1e-3 * 2.0 * lambda).abs() / syy < 1e-5);
        assert_eq!(wf.s.xy.get(3, 3, 3), 0.0);
    }

    #[test]
    fn adams_bashforth_reaches_full_weight() {
        let (scheme, mut wf, mat) = setup(3, None, &[]);
        let whole = *wf.extent();
        wf.s.yy.update_region(&whole, |_, [_, j, _], _| 10.0 * j as f32);
        let mut prev = 0.0;
        let mut increments = Vec::new();
        for _ in 0..4 {
            scheme.update_v(&interior(), &mut wf, &mat);
            let v = wf.v.y.get(4, 4, 4);
            increments.push(v - prev);
            prev = v;
        }
        let full = 1e-3 / 2000.0;
        // Missing history contributes nothing until the ring is full.
        assert!((increments[0] - full * 25.0 / 24.0).abs() < 1e-10);
        assert!((increments[2] - full).abs() < 1e-10);
        assert!((increments[3] - full).abs() < 1e-10);
    }

    #[test]
    fn memory_variables_relax_to_steady_state() {
        let (scheme, mut wf, mat) = setup(2, Some((30.0, 20.0)), &[100.0]);
        let whole = *wf.extent();
        wf.v.y.update_region(&whole, |_, [_, j, _], _| 10.0 * j as f32);
        let relax = mat.relaxation.as_ref().unwrap();
        for _ in 0..200 {
            scheme.update_s(&interior(), &mut wf, &mat).unwrap();
        }
        // After rotation the newest memory tensor has age 1.
        let mem = wf.memory.as_ref().unwrap();
        let r = &mem.get(1)[0];
        let p = r.xx.offset(4, 4, 4);
        // eyy = 1: steady state r = -M.
        let m_xx = relax.p_relax.as_slice()[p] - relax.s_relax.as_slice()[p];
        let m_yy = relax.p_relax.as_slice()[p];
        assert!((r.xx.as_slice()[p] + m_xx).abs() / m_xx.abs() < 1e-3);
        assert!((r.yy.as_slice()[p] + m_yy).abs() / m_yy < 1e-3);
        assert_eq!(r.xy.as_slice()[p], 0.0);
    }

    #[test]
    fn viscoelastic_requires_relaxation() {
        let (scheme, mut wf, mat) = setup(2, None, &[]);
        assert!(scheme.update_s_viscoelastic(&interior(), &mut wf, &mat).is_err());
    }
}
