// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::ops::{Index, IndexMut};

use rayon::prelude::*;

use crate::error::{FdError, Result};

/// Inclusive per-axis index bounds of a 3D block.
///
/// Lower bounds may be zero or negative so that halo layers keep the
/// natural numbering `1 - h ..= n + h` around an owned block `1 ..= n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent3 {
    /// Lowest valid index along each axis.
    pub lo: [isize; 3],
    /// Highest valid index along each axis.
    pub hi: [isize; 3],
}

impl Extent3 {
    /// Create an extent from inclusive bounds.
    pub fn new(lo: [isize; 3], hi: [isize; 3]) -> Self {
        Extent3 { lo, hi }
    }

    /// The owned block `1 ..= n` along each axis.
    pub fn interior(n: [usize; 3]) -> Self {
        Extent3 {
            lo: [1, 1, 1],
            hi: [n[0] as isize, n[1] as isize, n[2] as isize],
        }
    }

    /// The owned block grown by `h` cells on every side.
    pub fn with_halo(n: [usize; 3], h: usize) -> Self {
        Self::interior(n).grow(h)
    }

    /// Grow the extent by `h` cells on every side.
    pub fn grow(&self, h: usize) -> Self {
        let h = h as isize;
        Extent3 {
            lo: [self.lo[0] - h, self.lo[1] - h, self.lo[2] - h],
            hi: [self.hi[0] + h, self.hi[1] + h, self.hi[2] + h],
        }
    }

    /// Replace the bounds along one axis.
    pub fn with_axis(&self, axis: usize, lo: isize, hi: isize) -> Self {
        let mut e = *self;
        e.lo[axis] = lo;
        e.hi[axis] = hi;
        e
    }

    /// Number of indices along each axis (zero for an empty axis).
    pub fn shape(&self) -> [usize; 3] {
        let mut s = [0; 3];
        for (a, len) in s.iter_mut().enumerate() {
            *len = if self.hi[a] >= self.lo[a] {
                (self.hi[a] - self.lo[a] + 1) as usize
            } else {
                0
            };
        }
        s
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// True if the extent contains no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `idx` lies inside the extent.
    pub fn contains(&self, idx: [isize; 3]) -> bool {
        (0..3).all(|a| idx[a] >= self.lo[a] && idx[a] <= self.hi[a])
    }

    /// True if `other` lies entirely inside this extent.
    pub fn contains_extent(&self, other: &Extent3) -> bool {
        other.is_empty() || (self.contains(other.lo) && self.contains(other.hi))
    }
}

/// A dense, owned 3D array of `f32` over an arbitrary inclusive [`Extent3`].
///
/// Storage is row-major with the last axis contiguous. Indexing is
/// bounds-checked in debug builds only.
#[derive(Debug, Clone, PartialEq)]
pub struct Field3 {
    extent: Extent3,
    strides: [usize; 3],
    data: Vec<f32>,
}

impl Field3 {
    /// Allocate a zero-filled field.
    ///
    /// # Errors
    /// Returns [`FdError::Allocation`] if the backing storage cannot be reserved.
    pub fn zeros(extent: Extent3) -> Result<Self> {
        let shape = extent.shape();
        let len = extent.len();
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| FdError::Allocation { elements: len })?;
        data.resize(len, 0.0);
        Ok(Field3 {
            extent,
            strides: [shape[1] * shape[2], shape[2], 1],
            data,
        })
    }

    /// Allocate a field filled with `value`.
    pub fn filled(extent: Extent3, value: f32) -> Result<Self> {
        let mut f = Self::zeros(extent)?;
        f.fill(value);
        Ok(f)
    }

    /// The index bounds of this field.
    pub fn extent(&self) -> &Extent3 {
        &self.extent
    }

    /// Row-major strides (in elements) along each axis.
    pub fn strides(&self) -> [usize; 3] {
        self.strides
    }

    /// Flat offset of a 3D index.
    #[inline]
    pub fn offset(&self, i: isize, j: isize, k: isize) -> usize {
        debug_assert!(
            self.extent.contains([i, j, k]),
            "index ({}, {}, {}) outside {:?}",
            i,
            j,
            k,
            self.extent
        );
        (i - self.extent.lo[0]) as usize * self.strides[0]
            + (j - self.extent.lo[1]) as usize * self.strides[1]
            + (k - self.extent.lo[2]) as usize
    }

    /// Value at a 3D index.
    #[inline]
    pub fn get(&self, i: isize, j: isize, k: isize) -> f32 {
        self.data[self.offset(i, j, k)]
    }

    /// Overwrite the value at a 3D index.
    #[inline]
    pub fn set(&mut self, i: isize, j: isize, k: isize, value: f32) {
        let o = self.offset(i, j, k);
        self.data[o] = value;
    }

    /// Add to the value at a 3D index.
    #[inline]
    pub fn add(&mut self, i: isize, j: isize, k: isize, value: f32) {
        let o = self.offset(i, j, k);
        self.data[o] += value;
    }

    /// Raw storage.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw storage.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Size of the backing storage in bytes.
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Apply `f(flat, [i, j, k], old) -> new` to every cell of `region`,
    /// in parallel over planes of the first axis.
    ///
    /// `flat` is this field's own offset for the cell, which is also valid for
    /// any other field sharing the same extent.
    pub fn update_region<F>(&mut self, region: &Extent3, f: F)
    where
        F: Fn(usize, [isize; 3], f32) -> f32 + Sync,
    {
        if region.is_empty() {
            return;
        }
        debug_assert!(self.extent.contains_extent(region));
        let lo = self.extent.lo;
        let plane = self.strides[0];
        let row = self.strides[1];
        let x0 = (region.lo[0] - lo[0]) as usize;
        let x1 = (region.hi[0] - lo[0]) as usize;
        let j0 = (region.lo[1] - lo[1]) as usize;
        let k0 = (region.lo[2] - lo[2]) as usize;
        let [_, nj, nk] = region.shape();

        self.data[x0 * plane..(x1 + 1) * plane]
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(p, chunk)| {
                let i = region.lo[0] + p as isize;
                let base = (x0 + p) * plane;
                for jj in 0..nj {
                    let j = region.lo[1] + jj as isize;
                    let start = (j0 + jj) * row + k0;
                    for kk in 0..nk {
                        let local = start + kk;
                        let k = region.lo[2] + kk as isize;
                        chunk[local] = f(base + local, [i, j, k], chunk[local]);
                    }
                }
            });
    }

    /// Visit every cell of `region` in row-major order.
    pub fn for_each_in<F>(&self, region: &Extent3, mut f: F)
    where
        F: FnMut([isize; 3], f32),
    {
        for i in region.lo[0]..=region.hi[0] {
            for j in region.lo[1]..=region.hi[1] {
                for k in region.lo[2]..=region.hi[2] {
                    f([i, j, k], self.get(i, j, k));
                }
            }
        }
    }

    /// Copy the values of `region` into a new vector in row-major order.
    pub fn extract(&self, region: &Extent3) -> Vec<f32> {
        let mut out = Vec::with_capacity(region.len());
        self.for_each_in(region, |_, v| out.push(v));
        out
    }

    /// Copy the values of `region` into `out` in row-major order.
    /// `out` must hold exactly `region.len()` values.
    pub fn read_region(&self, region: &Extent3, out: &mut [f32]) {
        debug_assert_eq!(out.len(), region.len());
        let [_, nj, nk] = region.shape();
        let mut o = 0;
        for i in region.lo[0]..=region.hi[0] {
            for jj in 0..nj {
                let start = self.offset(i, region.lo[1] + jj as isize, region.lo[2]);
                out[o..o + nk].copy_from_slice(&self.data[start..start + nk]);
                o += nk;
            }
        }
    }

    /// Overwrite `region` with `values` given in row-major order.
    pub fn write_region(&mut self, region: &Extent3, values: &[f32]) {
        debug_assert_eq!(values.len(), region.len());
        let [_, nj, nk] = region.shape();
        let mut o = 0;
        for i in region.lo[0]..=region.hi[0] {
            for jj in 0..nj {
                let start = self.offset(i, region.lo[1] + jj as isize, region.lo[2]);
                self.data[start..start + nk].copy_from_slice(&values[o..o + nk]);
                o += nk;
            }
        }
    }
}

impl Index<[isize; 3]> for Field3 {
    type Output = f32;

    #[inline]
    fn index(&self, idx: [isize; 3]) -> &f32 {
        &self.data[self.offset(idx[0], idx[1], idx[2])]
    }
}

impl IndexMut<[isize; 3]> for Field3 {
    #[inline]
    fn index_mut(&mut self, idx: [isize; 3]) -> &mut f32 {
        let o = self.offset(idx[0], idx[1], idx[2]);
        &mut self.data[o]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_shape_and_halo() {
        let e = Extent3::with_halo([4, 5, 6], 2);
        assert_eq!(e.lo, [-1, -1, -1]);
        assert_eq!(e.hi, [6, 7, 8]);
        assert_eq!(e.shape(), [8, 9, 10]);
        assert!(e.contains([-1, 7, 0]));
        assert!(!e.contains([7, 0, 0]));
    }

    #[test]
    fn empty_extent() {
        let e = Extent3::new([1, 1, 1], [0, 4, 4]);
        assert!(e.is_empty());
        assert_eq!(e.shape(), [0, 4, 4]);
    }

    #[test]
    fn offsets_follow_custom_bases() {
        let f = Field3::zeros(Extent3::with_halo([3, 3, 3], 1)).unwrap();
        assert_eq!(f.offset(0, 0, 0), 0);
        assert_eq!(f.offset(0, 0, 1), 1);
        assert_eq!(f.offset(0, 1, 0), 5);
        assert_eq!(f.offset(1, 0, 0), 25);
        assert_eq!(f.offset(4, 4, 4), 124);
    }

    #[test]
    fn index_roundtrip() {
        let mut f = Field3::zeros(Extent3::with_halo([2, 3, 4], 2)).unwrap();
        f[[-1, 0, 5]] = 3.5;
        f.add(-1, 0, 5, 1.0);
        assert_eq!(f.get(-1, 0, 5), 4.5);
        assert_eq!(f.as_slice().iter().filter(|&&v| v != 0.0).count(), 1);
    }

    #[test]
    fn update_region_touches_only_region() {
        let mut f = Field3::zeros(Extent3::with_halo([6, 5, 4], 2)).unwrap();
        let region = Extent3::interior([6, 5, 4]);
        f.update_region(&region, |_, [i, j, k], old| old + (i * 100 + j * 10 + k) as f32);
        assert_eq!(f.get(3, 2, 1), 321.0);
        assert_eq!(f.get(0, 2, 1), 0.0);
        assert_eq!(f.get(3, 6, 1), 0.0);
        let nonzero = f.as_slice().iter().filter(|&&v| v != 0.0).count();
        assert_eq!(nonzero, region.len());
    }

    #[test]
    fn update_region_flat_offset_matches() {
        let mut f = Field3::zeros(Extent3::with_halo([4, 4, 4], 1)).unwrap();
        let probe = Field3::zeros(Extent3::with_halo([4, 4, 4], 1)).unwrap();
        f.update_region(&Extent3::interior([4, 4, 4]), |flat, [i, j, k], _| {
            (flat == probe.offset(i, j, k)) as u8 as f32
        });
        assert_eq!(
            f.as_slice().iter().filter(|&&v| v == 1.0).count(),
            64,
            "every flat offset should match offset()"
        );
    }

    #[test]
    fn extract_is_row_major() {
        let mut f = Field3::zeros(Extent3::interior([2, 2, 2])).unwrap();
        f.update_region(&Extent3::interior([2, 2, 2]), |flat, _, _| flat as f32);
        assert_eq!(
            f.extract(&Extent3::interior([2, 2, 2])),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]
        );
    }
}
