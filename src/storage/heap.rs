//! Expiration Index
//!
//! A binary min-heap of keys ordered by expiration deadline. Unlike
//! `std::collections::BinaryHeap` it can remove an arbitrary element in
//! O(log n): every mutation reports the new array position of each slot it
//! moves through a `reindex` callback, and the owner records that position
//! next to the entry. Removal then starts from the recorded position instead
//! of scanning.
//!
//! ```text
//!            index 0 (soonest deadline)
//!               ┌───┐
//!               │ a │
//!              ┌┴───┴┐
//!           ┌───┐   ┌───┐
//!   index 1 │ b │   │ c │ index 2
//!           └───┘   └───┘
//! ```
//!
//! Slots without a deadline sort after every timed slot, as if they expired
//! in the infinite future.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// One element of the heap array.
#[derive(Debug, Clone)]
pub(crate) struct HeapSlot {
    pub(crate) key: Arc<str>,
    pub(crate) deadline: Option<Instant>,
}

impl HeapSlot {
    pub(crate) fn new(key: Arc<str>, deadline: Option<Instant>) -> Self {
        Self { key, deadline }
    }

    fn cmp_deadline(&self, other: &Self) -> Ordering {
        match (self.deadline, other.deadline) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ExpiryHeap {
    slots: Vec<HeapSlot>,
}

impl ExpiryHeap {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot with the soonest deadline.
    pub(crate) fn peek(&self) -> Option<&HeapSlot> {
        self.slots.first()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, index: usize) -> Option<&HeapSlot> {
        self.slots.get(index)
    }

    /// Pushes a slot and returns the position it settled at.
    pub(crate) fn push<F>(&mut self, slot: HeapSlot, reindex: &mut F) -> usize
    where
        F: FnMut(&Arc<str>, usize),
    {
        let last = self.slots.len();
        self.slots.push(slot);
        reindex(&self.slots[last].key, last);
        self.sift_up(last, reindex)
    }

    /// Removes the slot at `index`.
    ///
    /// The last slot is swapped into the hole and sifted in whichever
    /// direction restores heap order. The removed slot is not reindexed.
    pub(crate) fn remove<F>(&mut self, index: usize, reindex: &mut F) -> Option<HeapSlot>
    where
        F: FnMut(&Arc<str>, usize),
    {
        if index >= self.slots.len() {
            return None;
        }

        let removed = self.slots.swap_remove(index);

        if index < self.slots.len() {
            reindex(&self.slots[index].key, index);
            if self.sift_down(index, reindex) == index {
                self.sift_up(index, reindex);
            }
        }

        Some(removed)
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.slots[i].cmp_deadline(&self.slots[j]) == Ordering::Less
    }

    fn swap<F>(&mut self, i: usize, j: usize, reindex: &mut F)
    where
        F: FnMut(&Arc<str>, usize),
    {
        self.slots.swap(i, j);
        reindex(&self.slots[i].key, i);
        reindex(&self.slots[j].key, j);
    }

    fn sift_up<F>(&mut self, mut index: usize, reindex: &mut F) -> usize
    where
        F: FnMut(&Arc<str>, usize),
    {
        while index > 0 {
            let parent = (index - 1) / 2;
            if !self.less(index, parent) {
                break;
            }
            self.swap(index, parent, reindex);
            index = parent;
        }
        index
    }

    fn sift_down<F>(&mut self, mut index: usize, reindex: &mut F) -> usize
    where
        F: FnMut(&Arc<str>, usize),
    {
        let len = self.slots.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, index) {
                break;
            }
            self.swap(index, child, reindex);
            index = child;
        }
        index
    }
}
