//! Merge policy interface.
//!
//! A merge policy decides, one step at a time, which input record goes to the output next. The engine owns the
//! streams and hands the policy the pending (next unread) record of every input; the policy reports which inputs it
//! consumed through [`TakenFlags`] and the engine advances exactly those.

use std::sync::Arc;

use crate::engine::MergeError;
use crate::memory::MemoryRegistry;

/// Outcome of a single [`MergePolicy::operate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStep<T> {
    /// The record is written to the output, taken inputs are advanced.
    Output(T),
    /// Nothing is written, taken inputs (if any) are advanced.
    Continue,
    /// The merge is complete. All inputs must be exhausted.
    Done,
}

/// Inputs consumed by a policy during one merge step.
#[derive(Debug, Clone)]
pub struct TakenFlags {
    flags: Vec<bool>,
    count: usize,
}

impl TakenFlags {
    pub fn new(arity: usize) -> Self {
        TakenFlags {
            flags: vec![false; arity],
            count: 0,
        }
    }

    /// Marks input `index` as consumed.
    pub fn take(&mut self, index: usize) {
        if !self.flags[index] {
            self.flags[index] = true;
            self.count += 1;
        }
    }

    pub fn is_taken(&self, index: usize) -> bool {
        self.flags[index]
    }

    /// Returns the number of inputs taken.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Returns indices of taken inputs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.flags
            .iter()
            .enumerate()
            .filter_map(|(index, &taken)| taken.then(|| index))
    }

    pub fn clear(&mut self) {
        if self.count > 0 {
            self.flags.fill(false);
            self.count = 0;
        }
    }
}

/// Merge policy interface.
pub trait MergePolicy<T> {
    /// Prepares the policy for a merge of `inputs.len()` inputs.
    ///
    /// # Arguments
    /// * `memory` - Registry the policy state (heap) is accounted in
    /// * `inputs` - First record of every input, [`None`] for empty inputs
    fn initialize(&mut self, memory: &Arc<MemoryRegistry>, inputs: &[Option<T>]) -> Result<(), MergeError>;

    /// Performs a single merge step.
    ///
    /// # Arguments
    /// * `inputs` - Pending record of every input, [`None`] for exhausted inputs
    /// * `taken` - Cleared flags the policy sets for every input it consumed
    fn operate(&mut self, inputs: &[Option<T>], taken: &mut TakenFlags) -> Result<MergeStep<T>, MergeError>;

    /// Processes a buffer that holds the whole input in main memory.
    fn main_mem_operate(&mut self, _buffer: &mut [T]) -> Result<(), MergeError> {
        Err(MergeError::NoMainMemoryOperation)
    }

    /// Fixed memory (bytes) the policy needs regardless of the merge arity.
    fn space_usage_overhead(&self) -> usize;

    /// Memory (bytes) the policy needs for every merged input.
    fn space_usage_per_stream(&self) -> usize;
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::TakenFlags;

    #[rstest]
    fn test_taken_flags() {
        let mut taken = TakenFlags::new(4);
        assert_eq!(taken.count(), 0);

        taken.take(3);
        taken.take(1);
        taken.take(3);
        assert_eq!(taken.count(), 2);
        assert!(taken.is_taken(1));
        assert!(!taken.is_taken(0));
        assert_eq!(Vec::from_iter(taken.iter()), vec![1, 3]);

        taken.clear();
        assert_eq!(taken.count(), 0);
        assert_eq!(taken.iter().next(), None);
    }
}
