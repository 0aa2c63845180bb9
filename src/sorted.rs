//! Sorted (k-way) merge policies.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::engine::MergeError;
use crate::heap::SelectionHeap;
use crate::memory::MemoryRegistry;
use crate::policy::{MergePolicy, MergeStep, TakenFlags};
use crate::quicksort;

/// Merges sorted inputs into a single sorted output.
/// Inputs should be sorted according to `compare` otherwise the result is undefined.
///
/// The selection heap holds the pending record of every live input. After an input is taken its next record is
/// inserted at the following step, once the engine has advanced the input.
pub struct SortedMerge<T, F> {
    compare: F,
    heap: Option<SelectionHeap<T, F>>,
    last_taken: Option<usize>,
}

impl<T, F> SortedMerge<T, F>
where
    T: Copy + Send,
    F: Fn(&T, &T) -> Ordering + Copy + Sync,
{
    pub fn new(compare: F) -> Self {
        SortedMerge {
            compare,
            heap: None,
            last_taken: None,
        }
    }
}

impl<T, F> MergePolicy<T> for SortedMerge<T, F>
where
    T: Copy + Send,
    F: Fn(&T, &T) -> Ordering + Copy + Sync,
{
    fn initialize(&mut self, memory: &Arc<MemoryRegistry>, inputs: &[Option<T>]) -> Result<(), MergeError> {
        if inputs.is_empty() {
            return Err(MergeError::InvalidArity(0));
        }

        self.heap = None;
        let mut heap = SelectionHeap::allocate(inputs.len(), self.compare, memory);
        for (index, input) in inputs.iter().enumerate() {
            if let Some(item) = input {
                heap.insert(*item, index);
            }
        }
        self.heap = Some(heap);
        self.last_taken = None;

        return Ok(());
    }

    fn operate(&mut self, inputs: &[Option<T>], taken: &mut TakenFlags) -> Result<MergeStep<T>, MergeError> {
        let heap = match self.heap.as_mut() {
            Some(heap) => heap,
            None => return Err(MergeError::Uninitialized),
        };

        if let Some(index) = self.last_taken.take() {
            if let Some(item) = inputs[index] {
                heap.insert(item, index);
            }
        }

        return match heap.extract_min() {
            Some((item, source)) => {
                taken.take(source);
                self.last_taken = Some(source);
                Ok(MergeStep::Output(item))
            }
            None => {
                debug_assert!(inputs.iter().all(Option::is_none), "empty heap but more input");
                Ok(MergeStep::Done)
            }
        };
    }

    fn main_mem_operate(&mut self, buffer: &mut [T]) -> Result<(), MergeError> {
        quicksort::sort_by(buffer, self.compare);

        return Ok(());
    }

    fn space_usage_overhead(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn space_usage_per_stream(&self) -> usize {
        SelectionHeap::<T, F>::node_size()
    }
}

/// Sorted merge using the natural order of the records.
/// In-memory runs are sorted with the operator-based quicksort.
pub struct OrdMerge<T> {
    inner: SortedMerge<T, fn(&T, &T) -> Ordering>,
}

impl<T> OrdMerge<T>
where
    T: Ord + Copy + Send,
{
    pub fn new() -> Self {
        OrdMerge {
            inner: SortedMerge::new(T::cmp as fn(&T, &T) -> Ordering),
        }
    }
}

impl<T> Default for OrdMerge<T>
where
    T: Ord + Copy + Send,
{
    fn default() -> Self {
        OrdMerge::new()
    }
}

impl<T> MergePolicy<T> for OrdMerge<T>
where
    T: Ord + Copy + Send,
{
    fn initialize(&mut self, memory: &Arc<MemoryRegistry>, inputs: &[Option<T>]) -> Result<(), MergeError> {
        self.inner.initialize(memory, inputs)
    }

    fn operate(&mut self, inputs: &[Option<T>], taken: &mut TakenFlags) -> Result<MergeStep<T>, MergeError> {
        self.inner.operate(inputs, taken)
    }

    fn main_mem_operate(&mut self, buffer: &mut [T]) -> Result<(), MergeError> {
        quicksort::sort(buffer);

        return Ok(());
    }

    fn space_usage_overhead(&self) -> usize {
        self.inner.space_usage_overhead()
    }

    fn space_usage_per_stream(&self) -> usize {
        self.inner.space_usage_per_stream()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rstest::*;

    use super::{OrdMerge, SortedMerge};
    use crate::memory::{ExceededPolicy, MemoryRegistry};
    use crate::policy::{MergePolicy, MergeStep, TakenFlags};

    fn drive<P: MergePolicy<i32>>(policy: &mut P, inputs: &[Vec<i32>]) -> Vec<i32> {
        let memory = Arc::new(MemoryRegistry::new(1024 * 1024, ExceededPolicy::Warn));
        let mut cursors = vec![0; inputs.len()];
        let mut pending = Vec::from_iter(inputs.iter().map(|input| input.first().copied()));
        let mut taken = TakenFlags::new(inputs.len());
        let mut output = Vec::new();

        policy.initialize(&memory, &pending).unwrap();
        loop {
            taken.clear();
            match policy.operate(&pending, &mut taken).unwrap() {
                MergeStep::Output(item) => output.push(item),
                MergeStep::Continue => {}
                MergeStep::Done => break,
            }
            for index in taken.iter() {
                cursors[index] += 1;
                pending[index] = inputs[index].get(cursors[index]).copied();
            }
        }

        return output;
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![], vec![]], vec![])]
    #[case(
        vec![
            vec![4, 5, 7],
            vec![1, 6],
            vec![3],
            vec![],
        ],
        vec![1, 3, 4, 5, 6, 7],
    )]
    #[case(
        vec![
            vec![1, 1, 2],
            vec![1, 2, 2],
        ],
        vec![1, 1, 1, 2, 2, 2],
    )]
    fn test_ord_merge(#[case] inputs: Vec<Vec<i32>>, #[case] expected: Vec<i32>) {
        let mut policy = OrdMerge::<i32>::new();
        if inputs.is_empty() {
            let memory = Arc::new(MemoryRegistry::default());
            assert!(policy.initialize(&memory, &[]).is_err());
            return;
        }
        assert_eq!(drive(&mut policy, &inputs), expected);
    }

    #[rstest]
    fn test_sorted_merge_reversed() {
        let inputs = vec![vec![9, 4, 1], vec![8, 7], vec![5, 3, 2]];
        let mut policy = SortedMerge::new(|a: &i32, b: &i32| b.cmp(a));

        assert_eq!(drive(&mut policy, &inputs), vec![9, 8, 7, 5, 4, 3, 2, 1]);
    }

    #[rstest]
    fn test_main_mem_sort() {
        let mut natural = OrdMerge::<i32>::new();
        let mut buffer = vec![5, 3, 3, 1, 4, 1, 5, 9, 2, 6];
        natural.main_mem_operate(buffer.as_mut_slice()).unwrap();
        assert_eq!(buffer, vec![1, 1, 2, 3, 3, 4, 5, 5, 6, 9]);

        let mut reversed = SortedMerge::new(|a: &i32, b: &i32| b.cmp(a));
        reversed.main_mem_operate(buffer.as_mut_slice()).unwrap();
        assert_eq!(buffer, vec![9, 6, 5, 5, 4, 3, 3, 2, 1, 1]);
    }
}
