// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::Result;
use crate::field::{Extent3, Field3};
use crate::history::HistoryRing;

/// Three staggered vector components (velocity, or its time derivative).
#[derive(Debug, Clone)]
pub struct VectorField {
    /// x component, at (i+1/2, j, k).
    pub x: Field3,
    /// y component, at (i, j+1/2, k).
    pub y: Field3,
    /// z component, at (i, j, k+1/2).
    pub z: Field3,
}

impl VectorField {
    /// Zero-filled components over `extent`.
    pub fn zeros(extent: Extent3) -> Result<Self> {
        Ok(VectorField {
            x: Field3::zeros(extent)?,
            y: Field3::zeros(extent)?,
            z: Field3::zeros(extent)?,
        })
    }

    /// Component along `axis`.
    pub fn component(&self, axis: usize) -> &Field3 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }

    /// Mutable component along `axis`.
    pub fn component_mut(&mut self, axis: usize) -> &mut Field3 {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => &mut self.z,
        }
    }

    /// All components, x first.
    pub fn components(&self) -> [&Field3; 3] {
        [&self.x, &self.y, &self.z]
    }

    /// All components mutably, x first.
    pub fn components_mut(&mut self) -> [&mut Field3; 3] {
        [&mut self.x, &mut self.y, &mut self.z]
    }

    /// Set every component to zero.
    pub fn zero(&mut self) {
        self.components_mut().into_iter().for_each(|f| f.fill(0.0));
    }

    /// Bytes held by all components.
    pub fn nbytes(&self) -> usize {
        self.components().iter().map(|f| f.nbytes()).sum()
    }
}

/// Symmetric tensor stored as six staggered components.
///
/// Used for stress, strain rate, and viscoelastic memory variables. Normal
/// components live at cell centres; `xy` at (i+1/2, j+1/2, k), `yz` at
/// (i, j+1/2, k+1/2) and `xz` at (i+1/2, j, k+1/2).
#[derive(Debug, Clone)]
pub struct TensorField {
    /// xx component.
    pub xx: Field3,
    /// yy component.
    pub yy: Field3,
    /// zz component.
    pub zz: Field3,
    /// xy component.
    pub xy: Field3,
    /// yz component.
    pub yz: Field3,
    /// xz component.
    pub xz: Field3,
}

impl TensorField {
    /// Zero-filled components over `extent`.
    pub fn zeros(extent: Extent3) -> Result<Self> {
        Ok(TensorField {
            xx: Field3::zeros(extent)?,
            yy: Field3::zeros(extent)?,
            zz: Field3::zeros(extent)?,
            xy: Field3::zeros(extent)?,
            yz: Field3::zeros(extent)?,
            xz: Field3::zeros(extent)?,
        })
    }

    /// Normal component along `axis`.
    pub fn normal(&self, axis: usize) -> &Field3 {
        match axis {
            0 => &self.xx,
            1 => &self.yy,
            _ => &self.zz,
        }
    }

    /// Shear component for the pair `(a, b)`, `a != b`, in either order.
    pub fn shear(&self, a: usize, b: usize) -> &Field3 {
        match (a.min(b), a.max(b)) {
            (0, 1) => &self.xy,
            (1, 2) => &self.yz,
            _ => &self.xz,
        }
    }

    /// Component `(a, b)` of the tensor.
    pub fn component(&self, a: usize, b: usize) -> &Field3 {
        if a == b {
            self.normal(a)
        } else {
            self.shear(a, b)
        }
    }

    /// Mutable component `(a, b)` of the tensor.
    pub fn component_mut(&mut self, a: usize, b: usize) -> &mut Field3 {
        match (a.min(b), a.max(b)) {
            (0, 0) => &mut self.xx,
            (1, 1) => &mut self.yy,
            (2, 2) => &mut self.zz,
            (0, 1) => &mut self.xy,
            (1, 2) => &mut self.yz,
            _ => &mut self.xz,
        }
    }

    /// Components differentiated along `axis` by the velocity update:
    /// the normal one first, then the two shear ones touching `axis`.
    pub fn axis_set_mut(&mut self, axis: usize) -> [&mut Field3; 3] {
        let TensorField {
            xx,
            yy,
            zz,
            xy,
            yz,
            xz,
        } = self;
        match axis {
            0 => [xx, xy, xz],
            1 => [yy, xy, yz],
            _ => [zz, xz, yz],
        }
    }

    /// All six components in the order xx, yy, zz, xy, yz, xz.
    pub fn components(&self) -> [&Field3; 6] {
        [&self.xx, &self.yy, &self.zz, &self.xy, &self.yz, &self.xz]
    }

    /// All six components mutably.
    pub fn components_mut(&mut self) -> [&mut Field3; 6] {
        [
            &mut self.xx,
            &mut self.yy,
            &mut self.zz,
            &mut self.xy,
            &mut self.yz,
            &mut self.xz,
        ]
    }

    /// Set every component to zero.
    pub fn zero(&mut self) {
        self.components_mut().into_iter().for_each(|f| f.fill(0.0));
    }

    /// Bytes held by all components.
    pub fn nbytes(&self) -> usize {
        self.components().iter().map(|f| f.nbytes()).sum()
    }
}

/// All time-dependent state of one subdomain.
///
/// Every field shares the same extent, so a flat offset computed on one of
/// them addresses the same cell in all others.
#[derive(Debug)]
pub struct Wavefield {
    /// Particle velocity.
    pub v: VectorField,
    /// Stress.
    pub s: TensorField,
    /// Stress divergence history (one snapshot per time level).
    pub accel: HistoryRing<VectorField>,
    /// Strain-rate history; shear entries hold the symmetric sums.
    pub strain: HistoryRing<TensorField>,
    /// Memory variables per relaxation mechanism, when viscoelastic.
    pub memory: Option<HistoryRing<Vec<TensorField>>>,
    extent: Extent3,
}

impl Wavefield {
    /// Allocate zeroed state for `time_order` and `mechanisms` relaxation mechanisms.
    ///
    /// Derivative histories keep `time_order` levels for Adams–Bashforth
    /// (one for leapfrog); memory variables keep at least two so the
    /// leapfrog update can average old and new values.
    pub fn new(extent: Extent3, time_order: usize, mechanisms: usize) -> Result<Self> {
        let levels = if time_order > 2 { time_order } else { 1 };
        let accel = HistoryRing::try_from_fn(levels, || VectorField::zeros(extent))?;
        let strain = HistoryRing::try_from_fn(levels, || TensorField::zeros(extent))?;
        let memory = if mechanisms > 0 {
            Some(HistoryRing::try_from_fn(levels.max(2), || {
                (0..mechanisms)
                    .map(|_| TensorField::zeros(extent))
                    .collect::<Result<Vec<_>>>()
            })?)
        } else {
            None
        };
        Ok(Wavefield {
            v: VectorField::zeros(extent)?,
            s: TensorField::zeros(extent)?,
            accel,
            strain,
            memory,
            extent,
        })
    }

    /// Shared extent of every field.
    pub fn extent(&self) -> &Extent3 {
        &self.extent
    }

    /// Reset all state to zero, e.g. between shots.
    pub fn zero(&mut self) {
        self.v.zero();
        self.s.zero();
        self.accel.iter_mut().for_each(VectorField::zero);
        self.strain.iter_mut().for_each(TensorField::zero);
        if let Some(mem) = &mut self.memory {
            mem.iter_mut()
                .for_each(|mechs| mechs.iter_mut().for_each(TensorField::zero));
        }
    }

    /// Advance every history ring by one time level.
    pub fn rotate_velocity_history(&mut self) {
        self.accel.rotate();
    }

    /// Advance strain and memory rings by one time level.
    pub fn rotate_stress_history(&mut self) {
        self.strain.rotate();
        if let Some(mem) = &mut self.memory {
            mem.rotate();
        }
    }

    /// Bytes held by all fields.
    pub fn nbytes(&self) -> usize {
        let mut total = self.v.nbytes() + self.s.nbytes();
        total += self.accel.iter().map(VectorField::nbytes).sum::<usize>();
        total += self.strain.iter().map(TensorField::nbytes).sum::<usize>();
        if let Some(mem) = &self.memory {
            total += mem
                .iter()
                .flat_map(|m| m.iter())
                .map(TensorField::nbytes)
                .sum::<usize>();
        }
        total
    }

    /// True if velocity and stress are identically zero.
    pub fn is_quiet(&self) -> bool {
        self.v
            .components()
            .iter()
            .chain(self.s.components().iter())
            .all(|f| f.as_slice().iter().all(|&x| x == 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_depths_follow_time_order() {
        let e = Extent3::with_halo([2, 2, 2], 1);
        let w2 = Wavefield::new(e, 2, 0).unwrap();
        assert_eq!(w2.accel.depth(), 1);
        assert!(w2.memory.is_none());
        let w4 = Wavefield::new(e, 4, 2).unwrap();
        assert_eq!(w4.accel.depth(), 4);
        assert_eq!(w4.strain.depth(), 4);
        let mem = w4.memory.as_ref().unwrap();
        assert_eq!(mem.depth(), 4);
        assert_eq!(mem.current().len(), 2);
        let wv = Wavefield::new(e, 2, 1).unwrap();
        assert_eq!(wv.memory.as_ref().unwrap().depth(), 2);
    }

    fn centre_values(set: [&mut Field3; 3]) -> [f32; 3] {
        set.map(|f| f.get(1, 1, 1))
    }

    #[test]
    fn axis_sets_pick_expected_components() {
        let e = Extent3::interior([1, 1, 1]);
        let mut t = TensorField::zeros(e).unwrap();
        t.xx.fill(1.0);
        t.xy.fill(2.0);
        t.xz.fill(3.0);
        t.yy.fill(4.0);
        t.yz.fill(5.0);
        t.zz.fill(6.0);
        assert_eq!(centre_values(t.axis_set_mut(0)), [1.0, 2.0, 3.0]);
        assert_eq!(centre_values(t.axis_set_mut(1)), [4.0, 2.0, 5.0]);
        assert_eq!(centre_values(t.axis_set_mut(2)), [6.0, 3.0, 5.0]);
        assert_eq!(t.shear(2, 1).get(1, 1, 1), 5.0);
        assert_eq!(t.component(0, 2).get(1, 1, 1), 3.0);
    }

    #[test]
    fn zero_clears_everything() {
        let e = Extent3::with_halo([2, 2, 2], 1);
        let mut w = Wavefield::new(e, 3, 1).unwrap();
        w.v.x.fill(1.0);
        w.s.yz.fill(2.0);
        assert!(!w.is_quiet());
        w.zero();
        assert!(w.is_quiet());
    }
}
