// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::error::{FdError, Result};
use crate::field::Extent3;

/// One of the six faces of a sub-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Face {
    /// Face at the low end of the x axis.
    XLow,
    /// Face at the high end of the x axis.
    XHigh,
    /// Face at the low end of the y axis.
    YLow,
    /// Face at the high end of the y axis.
    YHigh,
    /// Face at the low end of the z axis.
    ZLow,
    /// Face at the high end of the z axis.
    ZHigh,
}

impl Face {
    /// All faces, in index order.
    pub const ALL: [Face; 6] = [
        Face::XLow,
        Face::XHigh,
        Face::YLow,
        Face::YHigh,
        Face::ZLow,
        Face::ZHigh,
    ];

    /// The face with the given axis and side.
    pub fn new(axis: usize, low: bool) -> Face {
        Face::ALL[2 * axis + usize::from(!low)]
    }

    /// Dense index in `0..6`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Axis normal to this face.
    pub fn axis(self) -> usize {
        self.index() / 2
    }

    /// True for the low side of the axis.
    pub fn is_low(self) -> bool {
        self.index() % 2 == 0
    }

    /// The face on the other side of the same axis.
    pub fn opposite(self) -> Face {
        Face::ALL[self.index() ^ 1]
    }
}

/// What lies across a face of a sub-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    /// Another (or the same, under wrap-around) subdomain.
    Rank(usize),
    /// The global domain edge with periodicity disabled.
    Boundary,
}

impl Neighbor {
    /// The rank, if any.
    pub fn rank(self) -> Option<usize> {
        match self {
            Neighbor::Rank(r) => Some(r),
            Neighbor::Boundary => None,
        }
    }
}

/// A validated Cartesian split of the global grid over a process grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    global: [usize; 3],
    procs: [usize; 3],
    local: [usize; 3],
    periodic: bool,
}

impl Decomposition {
    /// Split `global` cells over `procs` processes per axis.
    ///
    /// # Errors
    /// Fails if any size is zero, if the process count does not match
    /// `num_workers`, or if a global dimension is not evenly divisible.
    pub fn new(
        global: [usize; 3],
        procs: [usize; 3],
        num_workers: usize,
        periodic: bool,
    ) -> Result<Self> {
        for (axis, &size) in global.iter().enumerate() {
            if size == 0 {
                return Err(FdError::InvalidGridShape { axis, size });
            }
        }
        let invalid = |reason: String| FdError::InvalidDecomposition {
            procs,
            global,
            reason,
        };
        if procs.iter().any(|&p| p == 0) {
            return Err(invalid("process counts must be positive".to_string()));
        }
        let total: usize = procs.iter().product();
        if total != num_workers {
            return Err(invalid(format!(
                "{} processes requested but {} workers available",
                total, num_workers
            )));
        }
        let mut local = [0; 3];
        for a in 0..3 {
            if global[a] % procs[a] != 0 {
                return Err(invalid(format!(
                    "axis {} size {} is not divisible by {}",
                    a, global[a], procs[a]
                )));
            }
            local[a] = global[a] / procs[a];
        }
        Ok(Decomposition {
            global,
            procs,
            local,
            periodic,
        })
    }

    /// Global grid size.
    pub fn global(&self) -> [usize; 3] {
        self.global
    }

    /// Processes per axis.
    pub fn procs(&self) -> [usize; 3] {
        self.procs
    }

    /// Local sub-block size (identical for every rank).
    pub fn local(&self) -> [usize; 3] {
        self.local
    }

    /// True if faces on the global edge wrap around.
    pub fn periodic(&self) -> bool {
        self.periodic
    }

    /// Total number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.procs.iter().product()
    }

    /// Rank at a process-grid position; x varies fastest.
    pub fn rank_of(&self, pos: [usize; 3]) -> usize {
        pos[0] + self.procs[0] * (pos[1] + self.procs[1] * pos[2])
    }

    /// Process-grid position of a rank.
    pub fn position_of(&self, rank: usize) -> [usize; 3] {
        let px = rank % self.procs[0];
        let rest = rank / self.procs[0];
        [px, rest % self.procs[1], rest / self.procs[1]]
    }

    /// Describe the sub-block owned by `rank`.
    pub fn subdomain(&self, rank: usize) -> Subdomain {
        let pos = self.position_of(rank);
        let mut offset = [0; 3];
        for a in 0..3 {
            offset[a] = pos[a] * self.local[a];
        }
        let mut neighbors = [Neighbor::Boundary; 6];
        for face in Face::ALL {
            let a = face.axis();
            let p = pos[a];
            let n = self.procs[a];
            let at_edge = if face.is_low() { p == 0 } else { p + 1 == n };
            if at_edge && !self.periodic {
                continue;
            }
            let mut npos = pos;
            npos[a] = if face.is_low() { (p + n - 1) % n } else { (p + 1) % n };
            neighbors[face.index()] = Neighbor::Rank(self.rank_of(npos));
        }
        Subdomain {
            rank,
            position: pos,
            procs: self.procs,
            local: self.local,
            global: self.global,
            offset,
            neighbors,
        }
    }

    /// All sub-blocks in rank order.
    pub fn subdomains(&self) -> Vec<Subdomain> {
        (0..self.num_ranks()).map(|r| self.subdomain(r)).collect()
    }

    /// Rank owning the 1-based global cell `g`.
    pub fn owner_of(&self, g: [usize; 3]) -> Option<usize> {
        let mut pos = [0; 3];
        for a in 0..3 {
            if g[a] == 0 || g[a] > self.global[a] {
                return None;
            }
            pos[a] = (g[a] - 1) / self.local[a];
        }
        Some(self.rank_of(pos))
    }
}

/// The part of the global grid owned by one rank, with its six neighbors.
///
/// Local indices run `1 ..= local[a]`; global index = `offset[a] + local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdomain {
    /// Rank owning this block.
    pub rank: usize,
    /// Position in the process grid.
    pub position: [usize; 3],
    /// Process-grid size.
    pub procs: [usize; 3],
    /// Local block size.
    pub local: [usize; 3],
    /// Global grid size.
    pub global: [usize; 3],
    /// Global index of local cell 0 along each axis.
    pub offset: [usize; 3],
    /// Neighbor across each face, indexed by [`Face::index`].
    pub neighbors: [Neighbor; 6],
}

impl Subdomain {
    /// Neighbor across `face`.
    pub fn neighbor(&self, face: Face) -> Neighbor {
        self.neighbors[face.index()]
    }

    /// True if `face` lies on the global domain edge.
    pub fn on_global_edge(&self, face: Face) -> bool {
        let a = face.axis();
        if face.is_low() {
            self.position[a] == 0
        } else {
            self.position[a] + 1 == self.procs[a]
        }
    }

    /// The owned block `1 ..= local`.
    pub fn interior(&self) -> Extent3 {
        Extent3::interior(self.local)
    }

    /// Local index of a 1-based global cell, if this rank owns it.
    pub fn to_local(&self, g: [usize; 3]) -> Option<[isize; 3]> {
        let mut l = [0isize; 3];
        for a in 0..3 {
            if g[a] <= self.offset[a] || g[a] > self.offset[a] + self.local[a] {
                return None;
            }
            l[a] = (g[a] - self.offset[a]) as isize;
        }
        Some(l)
    }

    /// 1-based global index of a local cell (may fall outside the grid for halo cells).
    pub fn to_global(&self, l: [isize; 3]) -> [isize; 3] {
        [
            l[0] + self.offset[0] as isize,
            l[1] + self.offset[1] as isize,
            l[2] + self.offset[2] as isize,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_helpers() {
        for face in Face::ALL {
            assert_eq!(face.opposite().opposite(), face);
            assert_eq!(face.opposite().axis(), face.axis());
            assert_ne!(face.opposite().is_low(), face.is_low());
            assert_eq!(Face::new(face.axis(), face.is_low()), face);
        }
    }

    #[test]
    fn rejects_wrong_worker_count() {
        let r = Decomposition::new([8, 8, 8], [2, 2, 2], 4, false);
        assert!(matches!(r, Err(FdError::InvalidDecomposition { .. })));
    }

    #[test]
    fn rejects_indivisible_axis() {
        let r = Decomposition::new([10, 8, 8], [3, 1, 1], 3, false);
        assert!(matches!(r, Err(FdError::InvalidDecomposition { .. })));
    }

    #[test]
    fn rank_position_roundtrip() {
        let d = Decomposition::new([12, 12, 12], [2, 3, 2], 12, false).unwrap();
        for r in 0..12 {
            assert_eq!(d.rank_of(d.position_of(r)), r);
        }
    }

    #[test]
    fn neighbors_boundary_and_periodic() {
        let d = Decomposition::new([8, 8, 8], [2, 1, 1], 2, false).unwrap();
        let s0 = d.subdomain(0);
        assert_eq!(s0.neighbor(Face::XLow), Neighbor::Boundary);
        assert_eq!(s0.neighbor(Face::XHigh), Neighbor::Rank(1));
        assert_eq!(s0.neighbor(Face::YLow), Neighbor::Boundary);

        let d = Decomposition::new([8, 8, 8], [2, 1, 1], 2, true).unwrap();
        let s0 = d.subdomain(0);
        assert_eq!(s0.neighbor(Face::XLow), Neighbor::Rank(1));
        // A lone process along y wraps onto itself.
        assert_eq!(s0.neighbor(Face::YLow), Neighbor::Rank(0));
        assert_eq!(s0.neighbor(Face::YHigh), Neighbor::Rank(0));
    }

    #[test]
    fn neighbors_are_mutual() {
        let d = Decomposition::new([12, 12, 12], [3, 2, 2], 12, true).unwrap();
        for s in d.subdomains() {
            for face in Face::ALL {
                if let Neighbor::Rank(n) = s.neighbor(face) {
                    let other = d.subdomain(n);
                    assert_eq!(other.neighbor(face.opposite()), Neighbor::Rank(s.rank));
                }
            }
        }
    }

    #[test]
    fn global_local_mapping() {
        let d = Decomposition::new([8, 6, 4], [2, 3, 1], 6, false).unwrap();
        let s = d.subdomain(d.rank_of([1, 2, 0]));
        assert_eq!(s.offset, [4, 4, 0]);
        assert_eq!(s.to_local([5, 5, 1]), Some([1, 1, 1]));
        assert_eq!(s.to_local([4, 5, 1]), None);
        assert_eq!(s.to_global([1, 1, 1]), [5, 5, 1]);
        assert_eq!(d.owner_of([5, 5, 1]), Some(s.rank));
        assert_eq!(d.owner_of([9, 1, 1]), None);
    }
}
