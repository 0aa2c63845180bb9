//! `ext-merge` is an external memory merge engine.
//!
//! External memory algorithms handle data sets that do not fit into the main memory (RAM) of a computer and
//! instead reside in slower external memory, usually a disk. The engine distributes such data into runs that fit
//! in memory, prepares every run in memory and merges the runs back into a single stream, in as many passes as the
//! memory budget requires. What a merge does is decided by a pluggable merge policy: the library provides sorted
//! merges and a random shuffle.
//!
//! # Overview
//!
//! `ext-merge` supports the following features:
//!
//! * **Memory accounting:**
//!   every stream block, run buffer and heap is registered with a [`MemoryRegistry`] before it is used.
//!   The merge arity and run size are derived from the memory still available.
//! * **Fixed-size record streams:**
//!   records implementing [`Record`] are stored in files as fixed-width little-endian values and accessed through
//!   a single memory-accounted block buffer with random access by index.
//! * **Pluggable merge policies:**
//!   implement [`MergePolicy`] to decide, one record at a time, which input goes to the output next.
//! * **Multithreading support:**
//!   in-memory run preparation (sorting) is performed in a thread pool.
//! * **Typed binary serialization:**
//!   a compact [`serde`] format with optional per-value type tags for variable-shaped data.
//!
//! # Example
//!
//! ```no_run
//! use std::path;
//! use std::sync::Arc;
//!
//! use log;
//!
//! use ext_merge::{ExceededPolicy, MemoryRegistry, MergeEngineBuilder, RecordStream};
//!
//! fn main() {
//!     let memory = Arc::new(MemoryRegistry::new(50 * 1024 * 1024, ExceededPolicy::Warn));
//!     let engine = MergeEngineBuilder::new()
//!         .with_tmp_dir(path::Path::new("./"))
//!         .with_memory(memory.clone())
//!         .build()
//!         .unwrap();
//!
//!     let mut input: RecordStream<u64> =
//!         RecordStream::open(path::Path::new("input.bin"), &memory, engine.block_size()).unwrap();
//!     let mut output = RecordStream::open(path::Path::new("output.bin"), &memory, engine.block_size()).unwrap();
//!     output.truncate(0).unwrap();
//!
//!     let stats = engine.sort(&mut input, &mut output).unwrap();
//!     log::info!("sorted in {} merge passes", stats.passes);
//! }
//! ```

pub mod buffer;
pub mod engine;
pub mod heap;
pub mod memory;
pub mod policy;
pub mod quicksort;
pub mod record;
pub mod serialization;
pub mod shuffle;
pub mod sorted;
pub mod stream;

pub use buffer::RunBuffer;
pub use engine::{MergeEngine, MergeEngineBuilder, MergeError, MergeStats};
pub use heap::SelectionHeap;
pub use memory::{ExceededPolicy, MemoryError, MemoryLease, MemoryRegistry};
pub use policy::{MergePolicy, MergeStep, TakenFlags};
pub use record::Record;
pub use shuffle::RandomShuffle;
pub use sorted::{OrdMerge, SortedMerge};
pub use stream::{RecordStream, StreamError};
