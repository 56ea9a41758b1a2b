//! Distance-ordered binary heaps for beam search.
//!
//! One heap type, two comparator directions: [`NearestFirst`] pops the
//! closest entry (the search frontier), [`FurthestFirst`] pops the farthest
//! (the bounded result set). Equal distances are ordered by slot so heap
//! output is deterministic.

use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::marker::PhantomData;

/// A scored graph slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub slot: u32,
}

impl Neighbor {
    pub fn new(distance: f32, slot: u32) -> Self {
        Self { distance, slot }
    }

    /// Ascending by distance, then by slot.
    #[inline]
    pub fn ascending(a: &Neighbor, b: &Neighbor) -> Ordering {
        OrderedFloat(a.distance)
            .cmp(&OrderedFloat(b.distance))
            .then(a.slot.cmp(&b.slot))
    }
}

/// Comparator direction for a [`DistanceHeap`].
pub trait HeapOrder {
    /// The entry that compares greatest is popped first.
    fn cmp(a: &Neighbor, b: &Neighbor) -> Ordering;
}

/// Pops the smallest distance first.
#[derive(Debug)]
pub struct NearestFirst;

/// Pops the largest distance first.
#[derive(Debug)]
pub struct FurthestFirst;

impl HeapOrder for NearestFirst {
    #[inline]
    fn cmp(a: &Neighbor, b: &Neighbor) -> Ordering {
        Neighbor::ascending(b, a)
    }
}

impl HeapOrder for FurthestFirst {
    #[inline]
    fn cmp(a: &Neighbor, b: &Neighbor) -> Ordering {
        Neighbor::ascending(a, b)
    }
}

struct Entry<O> {
    item: Neighbor,
    _order: PhantomData<O>,
}

impl<O: HeapOrder> PartialEq for Entry<O> {
    fn eq(&self, other: &Self) -> bool {
        O::cmp(&self.item, &other.item) == Ordering::Equal
    }
}

impl<O: HeapOrder> Eq for Entry<O> {}

impl<O: HeapOrder> PartialOrd for Entry<O> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<O: HeapOrder> Ord for Entry<O> {
    fn cmp(&self, other: &Self) -> Ordering {
        O::cmp(&self.item, &other.item)
    }
}

/// Binary heap of [`Neighbor`]s ordered by `O`.
pub struct DistanceHeap<O: HeapOrder> {
    inner: BinaryHeap<Entry<O>>,
}

/// Frontier of unexpanded candidates.
pub type CandidateHeap = DistanceHeap<NearestFirst>;
/// Bounded set of best results; the worst is on top.
pub type ResultHeap = DistanceHeap<FurthestFirst>;

impl<O: HeapOrder> DistanceHeap<O> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BinaryHeap::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, item: Neighbor) {
        self.inner.push(Entry {
            item,
            _order: PhantomData,
        });
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Neighbor> {
        self.inner.pop().map(|e| e.item)
    }

    #[inline]
    pub fn peek(&self) -> Option<&Neighbor> {
        self.inner.peek().map(|e| &e.item)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drains the heap into a vector sorted ascending by distance, then slot.
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        let mut items: Vec<Neighbor> = self.inner.into_iter().map(|e| e.item).collect();
        items.sort_unstable_by(Neighbor::ascending);
        items
    }
}

impl ResultHeap {
    /// Pushes `item` and evicts the worst entry when the heap exceeds `bound`.
    #[inline]
    pub fn push_bounded(&mut self, item: Neighbor, bound: usize) {
        self.push(item);
        if self.len() > bound {
            self.pop();
        }
    }

    /// Distance of the current worst entry, or `f32::MAX` when empty.
    #[inline]
    pub fn worst_distance(&self) -> f32 {
        self.peek().map_or(f32::MAX, |n| n.distance)
    }
}
