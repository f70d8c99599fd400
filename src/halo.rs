// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::time::{Duration, Instant};

use crate::comm::Communicator;
use crate::decomposition::{Face, Subdomain};
use crate::error::{FdError, Result};
use crate::field::{Extent3, Field3};
use crate::wavefield::{TensorField, VectorField};

/// Number of boundary layers of one field sent in each direction along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layers {
    /// Layers packed from the low edge; they fill the low neighbor's high halo.
    pub toward_low: usize,
    /// Layers packed from the high edge; they fill the high neighbor's low halo.
    pub toward_high: usize,
}

impl Layers {
    /// Layers needed by a field of stencil half-width `half`.
    ///
    /// A field staggered by +1/2 along the axis is read with backward
    /// differences and needs `half` layers below and `half - 1` above; a
    /// cell-centred one the reverse.
    pub fn for_stencil(half: usize, staggered: bool) -> Self {
        if staggered {
            Layers {
                toward_low: half - 1,
                toward_high: half,
            }
        } else {
            Layers {
                toward_low: half,
                toward_high: half - 1,
            }
        }
    }

    /// Same depth in both directions.
    pub fn symmetric(depth: usize) -> Self {
        Layers {
            toward_low: depth,
            toward_high: depth,
        }
    }

    fn toward(self, low: bool) -> usize {
        if low {
            self.toward_low
        } else {
            self.toward_high
        }
    }
}

/// Pre-allocated flat buffers, one per face, reused by every exchange.
#[derive(Debug)]
pub struct HaloBuffers {
    bufs: [Vec<f32>; 6],
    pad: usize,
}

/// Values in one plane normal to `axis` when axes before it are padded by `pad`.
fn face_area(local: [usize; 3], axis: usize, pad: usize) -> usize {
    (0..3)
        .filter(|&b| b != axis)
        .map(|b| if b < axis { local[b] + 2 * pad } else { local[b] })
        .product()
}

impl HaloBuffers {
    /// Buffers for up to `max_layers` layers per face.
    ///
    /// `pad` widens each plane along axes already exchanged, so corner
    /// cells travel with later axes (used for the material margin).
    pub fn new(local: [usize; 3], max_layers: usize, pad: usize) -> Result<Self> {
        let mut bufs: [Vec<f32>; 6] = Default::default();
        for face in Face::ALL {
            let len = face_area(local, face.axis(), pad) * max_layers;
            let mut v = Vec::new();
            v.try_reserve_exact(len)
                .map_err(|_| FdError::Allocation { elements: len })?;
            v.resize(len, 0.0);
            bufs[face.index()] = v;
        }
        Ok(HaloBuffers { bufs, pad })
    }

    /// Largest message per axis that buffers of this shape would carry,
    /// without allocating them.
    pub fn message_sizes(local: [usize; 3], max_layers: usize, pad: usize) -> [usize; 3] {
        [0, 1, 2].map(|axis| face_area(local, axis, pad) * max_layers)
    }

    /// Largest message along each axis, for sizing the transport.
    pub fn capacity(&self) -> [usize; 3] {
        [
            self.bufs[0].len().max(self.bufs[1].len()),
            self.bufs[2].len().max(self.bufs[3].len()),
            self.bufs[4].len().max(self.bufs[5].len()),
        ]
    }
}

/// The plane at position `p` along `axis`.
fn plane(local: [usize; 3], axis: usize, p: isize, pad: usize) -> Extent3 {
    let mut lo = [1isize; 3];
    let mut hi = [local[0] as isize, local[1] as isize, local[2] as isize];
    for b in 0..3 {
        if b == axis {
            lo[b] = p;
            hi[b] = p;
        } else if b < axis {
            lo[b] -= pad as isize;
            hi[b] += pad as isize;
        }
    }
    Extent3::new(lo, hi)
}

/// Exchange boundary layers of `fields` with both neighbors along `axis`.
///
/// Messages toward the low face go first, then toward the high face. Packing
/// is skipped when there is no destination, unpacking when there is no source.
pub fn exchange_axis<C: Communicator>(
    comm: &mut C,
    sub: &Subdomain,
    buffers: &mut HaloBuffers,
    axis: usize,
    fields: &mut [(&mut Field3, Layers)],
) -> Result<()> {
    let n = sub.local[axis] as isize;
    let pad = buffers.pad;
    let area = face_area(sub.local, axis, pad);

    for low in [true, false] {
        let face = Face::new(axis, low);
        let layers: usize = fields.iter().map(|(_, l)| l.toward(low)).sum();
        let total = layers * area;
        let buf = buffers.bufs[face.index()]
            .get_mut(..total)
            .ok_or_else(|| FdError::Other(format!("halo buffer too small for {} values", total)))?;

        if sub.neighbor(face).rank().is_some() {
            let mut o = 0;
            for (f, l) in fields.iter() {
                for layer in 1..=l.toward(low) as isize {
                    let p = if low { layer } else { n - layer + 1 };
                    f.read_region(&plane(sub.local, axis, p, pad), &mut buf[o..o + area]);
                    o += area;
                }
            }
        }

        comm.sendrecv_replace(buf, face)?;

        if sub.neighbor(face.opposite()).rank().is_some() {
            let mut o = 0;
            for (f, l) in fields.iter_mut() {
                for layer in 1..=l.toward(low) as isize {
                    let p = if low { n + layer } else { 1 - layer };
                    f.write_region(&plane(sub.local, axis, p, pad), &buf[o..o + area]);
                    o += area;
                }
            }
        }
    }
    Ok(())
}

/// Make freshly updated velocity boundary layers visible to neighbors.
///
/// Axes are exchanged in x, y, z order. Returns the elapsed wall time.
pub fn exchange_velocity<C: Communicator>(
    comm: &mut C,
    sub: &Subdomain,
    buffers: &mut HaloBuffers,
    v: &mut VectorField,
    half: usize,
) -> Result<Duration> {
    let start = Instant::now();
    for axis in 0..3 {
        let mut fields: Vec<(&mut Field3, Layers)> = v
            .components_mut()
            .into_iter()
            .enumerate()
            .map(|(c, f)| (f, Layers::for_stencil(half, c == axis)))
            .collect();
        exchange_axis(comm, sub, buffers, axis, &mut fields)?;
    }
    Ok(start.elapsed())
}

/// Make freshly updated stress boundary layers visible to neighbors.
///
/// Along each axis only the components differentiated along it travel.
pub fn exchange_stress<C: Communicator>(
    comm: &mut C,
    sub: &Subdomain,
    buffers: &mut HaloBuffers,
    s: &mut TensorField,
    half: usize,
) -> Result<Duration> {
    let start = Instant::now();
    for axis in 0..3 {
        let [normal, shear_a, shear_b] = s.axis_set_mut(axis);
        let mut fields = [
            (normal, Layers::for_stencil(half, false)),
            (shear_a, Layers::for_stencil(half, true)),
            (shear_b, Layers::for_stencil(half, true)),
        ];
        exchange_axis(comm, sub, buffers, axis, &mut fields)?;
    }
    Ok(start.elapsed())
}

/// Synchronize the one-cell margin of material arrays.
///
/// `buffers` must be built with `pad = 1`. Faces on a non-periodic global
/// edge replicate the edge cell outward instead.
pub fn exchange_margin<C: Communicator>(
    comm: &mut C,
    sub: &Subdomain,
    buffers: &mut HaloBuffers,
    fields: &mut [&mut Field3],
) -> Result<()> {
    for axis in 0..3 {
        let mut entries: Vec<(&mut Field3, Layers)> = fields
            .iter_mut()
            .map(|f| (&mut **f, Layers::symmetric(1)))
            .collect();
        exchange_axis(comm, sub, buffers, axis, &mut entries)?;

        let n = sub.local[axis] as isize;
        for low in [true, false] {
            let face = Face::new(axis, low);
            if sub.neighbor(face).rank().is_some() {
                continue;
            }
            let (edge, ghost) = if low { (1, 0) } else { (n, n + 1) };
            let src = plane(sub.local, axis, edge, 1);
            let dst = plane(sub.local, axis, ghost, 1);
            let mut tmp = vec![0.0; src.len()];
            for f in fields.iter_mut() {
                f.read_region(&src, &mut tmp);
                f.write_region(&dst, &tmp);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::run_world;
    use crate::decomposition::Decomposition;

    #[test]
    fn stencil_layers_match_buffer_depths() {
        // Velocity to-low buffers carry 3h-1 layers, to-high ones 3h-2.
        for half in 1..=6 {
            let stag = Layers::for_stencil(half, true);
            let node = Layers::for_stencil(half, false);
            let nf1 = 3 * half - 1;
            let nf2 = nf1 - 1;
            assert_eq!(stag.toward_low + 2 * node.toward_low, nf1);
            assert_eq!(stag.toward_high + 2 * node.toward_high, nf2);
            // Stress sets swap the roles.
            assert_eq!(node.toward_low + 2 * stag.toward_low, nf2);
            assert_eq!(node.toward_high + 2 * stag.toward_high, nf1);
        }
    }

    #[test]
    fn plane_padding_only_on_earlier_axes() {
        let p = plane([4, 5, 6], 1, 3, 1);
        assert_eq!(p.lo, [0, 3, 1]);
        assert_eq!(p.hi, [5, 3, 6]);
        assert_eq!(face_area([4, 5, 6], 1, 1), 6 * 6);
        assert_eq!(face_area([4, 5, 6], 0, 1), 5 * 6);
        let bufs = HaloBuffers::new([4, 5, 6], 3, 1).unwrap();
        assert_eq!(bufs.capacity(), HaloBuffers::message_sizes([4, 5, 6], 3, 1));
    }

    #[test]
    fn margin_replicates_edges_on_single_rank() {
        let d = Decomposition::new([3, 3, 3], [1, 1, 1], 1, false).unwrap();
        let out = run_world(&d, [64, 64, 64], |mut comm| {
            let sub = d.subdomain(comm.rank());
            let mut f = Field3::zeros(Extent3::with_halo(sub.local, 1))?;
            f.update_region(&sub.interior(), |_, [i, j, k], _| (i * 100 + j * 10 + k) as f32);
            let mut bufs = HaloBuffers::new(sub.local, 1, 1)?;
            exchange_margin(&mut comm, &sub, &mut bufs, &mut [&mut f])?;
            Ok(f)
        })
        .unwrap();
        let f = &out[0];
        assert_eq!(f.get(0, 2, 2), 122.0);
        assert_eq!(f.get(4, 2, 2), 322.0);
        assert_eq!(f.get(4, 4, 0), 331.0);
        assert_eq!(f.get(0, 0, 0), 111.0);
    }
}
