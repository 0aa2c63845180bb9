//! Selection heap.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::memory::{MemoryLease, MemoryRegistry};

/// Binary min-heap of `(priority, source index)` nodes with a fixed capacity.
/// Nodes with equal priorities are ordered by source index.
///
/// Time complexity of [`SelectionHeap::insert`] and [`SelectionHeap::extract_min`] is log(*n*)
/// where *n* is the number of nodes.
pub struct SelectionHeap<K, C> {
    nodes: Vec<(K, usize)>,
    capacity: usize,
    compare: C,
    _lease: MemoryLease,
}

impl<K> SelectionHeap<K, fn(&K, &K) -> Ordering>
where
    K: Ord,
{
    /// Creates a heap ordered by the priority type's natural order.
    pub fn natural(capacity: usize, memory: &Arc<MemoryRegistry>) -> Self {
        Self::allocate(capacity, K::cmp, memory)
    }
}

impl<K, C> SelectionHeap<K, C>
where
    C: Fn(&K, &K) -> Ordering,
{
    /// Creates a heap able to hold `capacity` nodes without reallocation.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of nodes, usually the merge arity
    /// * `compare` - Priority compare function
    /// * `memory` - Registry the node storage is accounted in
    pub fn allocate(capacity: usize, compare: C, memory: &Arc<MemoryRegistry>) -> Self {
        SelectionHeap {
            nodes: Vec::with_capacity(capacity),
            capacity,
            compare,
            _lease: memory.allocate(Self::node_size() * capacity),
        }
    }

    /// Size of a single heap node in bytes.
    pub fn node_size() -> usize {
        std::mem::size_of::<(K, usize)>()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a node.
    ///
    /// # Panics
    /// Panics if the heap already holds `capacity` nodes.
    pub fn insert(&mut self, priority: K, source: usize) {
        assert!(self.nodes.len() < self.capacity, "selection heap capacity exceeded");

        self.nodes.push((priority, source));
        self.sift_up(self.nodes.len() - 1);
    }

    /// Removes and returns the node with the minimal priority, [`None`] if the heap is empty.
    pub fn extract_min(&mut self) -> Option<(K, usize)> {
        if self.nodes.is_empty() {
            return None;
        }

        let min = self.nodes.swap_remove(0);
        if !self.nodes.is_empty() {
            self.sift_down(0);
        }

        return Some(min);
    }

    fn less(&self, a: usize, b: usize) -> bool {
        let (a_priority, a_source) = &self.nodes[a];
        let (b_priority, b_source) = &self.nodes[b];

        (self.compare)(a_priority, b_priority).then(a_source.cmp(b_source)) == Ordering::Less
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.nodes.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;

            let mut smallest = pos;
            if left < self.nodes.len() && self.less(left, smallest) {
                smallest = left;
            }
            if right < self.nodes.len() && self.less(right, smallest) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.nodes.swap(pos, smallest);
            pos = smallest;
        }
    }
}
