//! Random shuffle merge policy.

use std::cmp::Ordering;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::engine::MergeError;
use crate::heap::SelectionHeap;
use crate::memory::MemoryRegistry;
use crate::policy::{MergePolicy, MergeStep, TakenFlags};

/// Merge policy reordering its inputs into a random permutation.
///
/// Every live input sits in the selection heap with a random priority. The input with the lowest priority
/// contributes the next output record and is reinserted with a fresh priority, so all live inputs stay in
/// contention until they are exhausted. Equal priorities are resolved by input index.
pub struct RandomShuffle {
    rng: StdRng,
    heap: Option<SelectionHeap<u32, fn(&u32, &u32) -> Ordering>>,
    arity: usize,

    #[cfg(debug_assertions)]
    last_taken: Option<usize>,
    #[cfg(debug_assertions)]
    input_count: u64,
    #[cfg(debug_assertions)]
    output_count: u64,
}

impl RandomShuffle {
    /// Creates a shuffle policy.
    ///
    /// # Arguments
    /// * `seed` - Random generator seed. If the parameter is [`None`] the generator is seeded from system entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        RandomShuffle {
            rng,
            heap: None,
            arity: 0,
            #[cfg(debug_assertions)]
            last_taken: None,
            #[cfg(debug_assertions)]
            input_count: 0,
            #[cfg(debug_assertions)]
            output_count: 0,
        }
    }
}

impl<T: Copy> MergePolicy<T> for RandomShuffle {
    fn initialize(&mut self, memory: &Arc<MemoryRegistry>, inputs: &[Option<T>]) -> Result<(), MergeError> {
        if inputs.is_empty() {
            return Err(MergeError::InvalidArity(0));
        }
        self.arity = inputs.len();

        // release the previous heap before accounting for the new one
        self.heap = None;
        let mut heap = SelectionHeap::natural(inputs.len(), memory);
        for (index, input) in inputs.iter().enumerate().rev() {
            if input.is_some() {
                heap.insert(self.rng.gen(), index);
            }
        }

        #[cfg(debug_assertions)]
        {
            self.last_taken = None;
            self.input_count = heap.len() as u64;
            self.output_count = 0;
        }

        self.heap = Some(heap);

        return Ok(());
    }

    fn operate(&mut self, inputs: &[Option<T>], taken: &mut TakenFlags) -> Result<MergeStep<T>, MergeError> {
        debug_assert_eq!(inputs.len(), self.arity, "input count changed during merge");
        let heap = match self.heap.as_mut() {
            Some(heap) => heap,
            None => return Err(MergeError::Uninitialized),
        };

        #[cfg(debug_assertions)]
        {
            if let Some(index) = self.last_taken.take() {
                if inputs[index].is_some() {
                    self.input_count += 1;
                }
            }
        }

        let (_, source) = match heap.extract_min() {
            Some(node) => node,
            None => {
                #[cfg(debug_assertions)]
                {
                    debug_assert!(inputs.iter().all(Option::is_none), "empty heap but more input");
                    debug_assert_eq!(
                        self.input_count, self.output_count,
                        "merge done, input_count = {}, output_count = {}",
                        self.input_count, self.output_count
                    );
                }
                return Ok(MergeStep::Done);
            }
        };

        return match inputs[source] {
            Some(item) => {
                heap.insert(self.rng.gen(), source);
                taken.take(source);

                #[cfg(debug_assertions)]
                {
                    self.last_taken = Some(source);
                    self.output_count += 1;
                }

                Ok(MergeStep::Output(item))
            }
            None => Ok(MergeStep::Continue),
        };
    }

    fn main_mem_operate(&mut self, buffer: &mut [T]) -> Result<(), MergeError> {
        buffer.shuffle(&mut self.rng);

        return Ok(());
    }

    fn space_usage_overhead(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    fn space_usage_per_stream(&self) -> usize {
        SelectionHeap::<u32, fn(&u32, &u32) -> Ordering>::node_size()
    }
}
