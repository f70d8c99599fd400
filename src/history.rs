// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

/// Fixed-depth ring of owned buffers for multistep time integration.
///
/// Age 0 is the current (newest) slot. [`rotate`](HistoryRing::rotate)
/// relabels the oldest slot as the next current one without moving data,
/// so the buffer about to be overwritten is always the stalest snapshot.
#[derive(Debug)]
pub struct HistoryRing<T> {
    slots: Vec<T>,
    head: usize,
}

/// Read-only view of the slots older than the current one.
pub struct Older<'a, T> {
    tail: &'a [T],
    wrap: &'a [T],
}

impl<'a, T> Older<'a, T> {
    /// Snapshot of the given age (1 = previous step).
    ///
    /// # Panics
    /// Panics if `age` is zero or not older than the ring depth.
    pub fn get(&self, age: usize) -> &'a T {
        let idx = age - 1;
        if idx < self.tail.len() {
            &self.tail[idx]
        } else {
            &self.wrap[idx - self.tail.len()]
        }
    }

    /// Number of older snapshots available.
    pub fn len(&self) -> usize {
        self.tail.len() + self.wrap.len()
    }

    /// True if the ring has depth one.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> HistoryRing<T> {
    /// Build a ring from pre-allocated slots; the first one starts as current.
    ///
    /// # Panics
    /// Panics if `slots` is empty.
    pub fn new(slots: Vec<T>) -> Self {
        assert!(!slots.is_empty(), "history ring needs at least one slot");
        HistoryRing { slots, head: 0 }
    }

    /// Build a ring of `depth` slots using a fallible constructor.
    pub fn try_from_fn<E>(
        depth: usize,
        mut make: impl FnMut() -> Result<T, E>,
    ) -> Result<Self, E> {
        let slots = (0..depth.max(1))
            .map(|_| make())
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self::new(slots))
    }

    /// Total number of backing buffers.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Backing-slot index currently labelled as age 0.
    pub fn current_slot(&self) -> usize {
        self.head
    }

    /// The current (newest) snapshot.
    pub fn current(&self) -> &T {
        &self.slots[self.head]
    }

    /// Mutable access to the current snapshot.
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.head]
    }

    /// Snapshot of the given age (0 = current).
    pub fn get(&self, age: usize) -> &T {
        debug_assert!(age < self.slots.len());
        &self.slots[(self.head + age) % self.slots.len()]
    }

    /// Split into the mutable current slot and a view of the older ones.
    pub fn split_current(&mut self) -> (&mut T, Older<'_, T>) {
        let (left, right) = self.slots.split_at_mut(self.head);
        let (current, tail) = right.split_at_mut(1);
        (
            &mut current[0],
            Older {
                tail,
                wrap: left,
            },
        )
    }

    /// Relabel slots so that the oldest becomes current. O(1), no copies.
    pub fn rotate(&mut self) {
        let n = self.slots.len();
        self.head = (self.head + n - 1) % n;
    }

    /// Iterate from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.slots.len()).map(move |age| self.get(age))
    }

    /// Iterate mutably from newest to oldest.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        let head = self.head;
        let (left, right) = self.slots.split_at_mut(head);
        right.iter_mut().chain(left.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_makes_oldest_current() {
        let mut ring = HistoryRing::new(vec![0, 1, 2]);
        assert_eq!(*ring.current(), 0);
        ring.rotate();
        assert_eq!(*ring.current(), 2);
        assert_eq!(*ring.get(1), 0);
        assert_eq!(*ring.get(2), 1);
    }

    #[test]
    fn identity_cycle_has_period_depth() {
        for depth in 1..=4 {
            let mut ring = HistoryRing::new((0..depth).collect::<Vec<_>>());
            let first = ring.current_slot();
            let mut seen = vec![first];
            for _ in 1..depth {
                ring.rotate();
                seen.push(ring.current_slot());
            }
            ring.rotate();
            assert_eq!(ring.current_slot(), first);
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), depth);
        }
    }

    #[test]
    fn split_current_matches_get() {
        let mut ring = HistoryRing::new(vec![10, 11, 12, 13]);
        ring.rotate();
        ring.rotate();
        let expected: Vec<i32> = (1..4).map(|a| *ring.get(a)).collect();
        let (cur, older) = ring.split_current();
        *cur = 99;
        let got: Vec<i32> = (1..4).map(|a| *older.get(a)).collect();
        assert_eq!(got, expected);
        assert_eq!(older.len(), 3);
        assert_eq!(*ring.current(), 99);
    }

    #[test]
    fn newest_written_value_ages() {
        let mut ring = HistoryRing::new(vec![0.0f32; 3]);
        for step in 1..=5 {
            *ring.current_mut() = step as f32;
            ring.rotate();
        }
        // Current slot is the next destination and holds the oldest value.
        assert_eq!(*ring.get(1), 5.0);
        assert_eq!(*ring.get(2), 4.0);
        assert_eq!(*ring.current(), 3.0);
    }

    #[test]
    fn iter_mut_is_newest_first() {
        let mut ring = HistoryRing::new(vec![1, 2, 3]);
        ring.rotate();
        let order: Vec<i32> = ring.iter_mut().map(|v| *v).collect();
        let expected: Vec<i32> = ring.iter().copied().collect();
        assert_eq!(order, expected);
    }
}
