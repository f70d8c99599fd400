// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::Path;

use ndarray::Array3;

use crate::comm::Communicator;
use crate::config::{SnapField, SnapshotPlan};
use crate::decomposition::{Decomposition, Subdomain};
use crate::error::{FdError, Result};
use crate::io;
use crate::wavefield::Wavefield;

/// Local indices along one axis that survive decimation by `d`.
fn kept(sub: &Subdomain, axis: usize, d: usize) -> Vec<isize> {
    (1..=sub.local[axis])
        .filter(|l| (sub.offset[axis] + l - 1) % d == 0)
        .map(|l| l as isize)
        .collect()
}

/// Decimated global volume shape.
pub fn snapshot_shape(global: [usize; 3], decimation: [usize; 3]) -> [usize; 3] {
    [0, 1, 2].map(|a| global[a].div_ceil(decimation[a]))
}

/// Collects decimated volumes of the wavefield on the root.
#[derive(Debug, Clone)]
pub struct Snapshots {
    plan: SnapshotPlan,
    kept: [Vec<isize>; 3],
}

impl Snapshots {
    /// Snapshot taker for the cells of `sub`.
    pub fn new(plan: SnapshotPlan, sub: &Subdomain) -> Self {
        let kept = [0, 1, 2].map(|a| kept(sub, a, plan.decimation[a]));
        Snapshots { plan, kept }
    }

    /// True if a snapshot is due after `step`.
    pub fn is_due(&self, step: usize) -> bool {
        self.plan.is_due(step)
    }

    fn local_values(&self, field: SnapField, wf: &Wavefield) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.kept.iter().map(Vec::len).product());
        for &i in &self.kept[0] {
            for &j in &self.kept[1] {
                for &k in &self.kept[2] {
                    out.push(match field {
                        SnapField::Vx => wf.v.x.get(i, j, k),
                        SnapField::Vy => wf.v.y.get(i, j, k),
                        SnapField::Vz => wf.v.z.get(i, j, k),
                        SnapField::Pressure => {
                            -(wf.s.xx.get(i, j, k) + wf.s.yy.get(i, j, k) + wf.s.zz.get(i, j, k))
                                / 3.0
                        }
                    });
                }
            }
        }
        out
    }

    /// Gather every configured quantity; volumes are returned on the root only.
    pub fn gather<C: Communicator>(
        &self,
        comm: &mut C,
        decomp: &Decomposition,
        wf: &Wavefield,
    ) -> Result<Option<Vec<(SnapField, Array3<f32>)>>> {
        let d = self.plan.decimation;
        let shape = snapshot_shape(decomp.global(), d);
        let mut out = Vec::with_capacity(self.plan.fields.len());
        for &field in &self.plan.fields {
            let Some(parts) = comm.gather(&self.local_values(field, wf))? else {
                continue;
            };
            let mut vol = Array3::zeros((shape[0], shape[1], shape[2]));
            for (rank, part) in parts.iter().enumerate() {
                let sub = decomp.subdomain(rank);
                let idx = [0, 1, 2].map(|a| kept(&sub, a, d[a]));
                let expected: usize = idx.iter().map(Vec::len).product();
                if part.len() != expected {
                    return Err(FdError::Communication(format!(
                        "rank {} sent {} snapshot values, expected {}",
                        rank,
                        part.len(),
                        expected
                    )));
                }
                let mut values = part.iter();
                let global = |a: usize, l: isize| (sub.offset[a] + l as usize - 1) / d[a];
                for &i in &idx[0] {
                    for &j in &idx[1] {
                        for &k in &idx[2] {
                            if let Some(&v) = values.next() {
                                vol[[global(0, i), global(1, j), global(2, k)]] = v;
                            }
                        }
                    }
                }
            }
            out.push((field, vol));
        }
        Ok((comm.rank() == crate::comm::ROOT).then_some(out))
    }
}

/// Write volumes as `<stem>_<field>_<shot>_<step>.npy` in `dir`.
pub fn write_snapshots(
    dir: &Path,
    stem: &str,
    shot: usize,
    step: usize,
    volumes: &[(SnapField, Array3<f32>)],
) -> Result<()> {
    for (field, vol) in volumes {
        let path = dir.join(format!("{}_{}_{}_{:06}.npy", stem, field.name(), shot, step));
        io::save_volume(&path, vol)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::run_world;
    use crate::field::Extent3;

    #[test]
    fn decimated_shape_rounds_up() {
        assert_eq!(snapshot_shape([10, 9, 8], [3, 1, 2]), [4, 9, 4]);
    }

    #[test]
    fn gathered_volume_matches_global_pattern() {
        let d = Decomposition::new([6, 4, 4], [2, 2, 1], 4, false).unwrap();
        let plan = SnapshotPlan {
            fields: vec![SnapField::Vy],
            first: 1,
            every: 1,
            last: 1,
            decimation: [2, 1, 2],
        };
        let out = run_world(&d, [256, 256, 256], |mut comm| {
            let sub = d.subdomain(comm.rank());
            let mut wf = Wavefield::new(Extent3::with_halo(sub.local, 2), 2, 0)?;
            wf.v.y.update_region(&sub.interior(), |_, l, _| {
                let g = sub.to_global(l);
                (g[0] * 100 + g[1] * 10 + g[2]) as f32
            });
            let snaps = Snapshots::new(plan.clone(), &sub);
            snaps.gather(&mut comm, &d, &wf)
        })
        .unwrap();
        let vols = out[0].as_ref().unwrap();
        let vol = &vols[0].1;
        assert_eq!(vol.shape(), &[3, 4, 2]);
        // Decimated index n maps back to global 1 + n * d.
        assert_eq!(vol[[0, 0, 0]], 111.0);
        assert_eq!(vol[[2, 3, 1]], 543.0);
        assert_eq!(vol[[1, 2, 0]], 331.0);
        assert!(out[1].is_none());
    }
}
