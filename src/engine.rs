//! Generalized merge engine.

use log;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::RunBuffer;
use crate::memory::MemoryRegistry;
use crate::policy::{MergePolicy, MergeStep, TakenFlags};
use crate::record::Record;
use crate::shuffle::RandomShuffle;
use crate::sorted::{OrdMerge, SortedMerge};
use crate::stream::{RecordStream, StreamError, DEFAULT_BLOCK_SIZE};

/// Merge error.
#[derive(Debug)]
pub enum MergeError {
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Input or output stream error.
    Stream(StreamError),
    /// Memory limit too low to merge at least two streams or to hold a single record.
    InsufficientMemory { available: usize, required: usize },
    /// Merge requested with an unusable number of inputs.
    InvalidArity(usize),
    /// The policy has no main memory operation.
    NoMainMemoryOperation,
    /// The policy was operated before being initialized.
    Uninitialized,
    /// The policy reported completion while inputs were not exhausted.
    InputsRemaining,
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            MergeError::TempDir(err) => Some(err),
            MergeError::ThreadPoolBuildError(err) => Some(err),
            MergeError::Stream(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MergeError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            MergeError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            MergeError::Stream(err) => write!(f, "stream operation failed: {}", err),
            MergeError::InsufficientMemory { available, required } => write!(
                f,
                "insufficient memory: {} bytes available, at least {} bytes required",
                available, required
            ),
            MergeError::InvalidArity(arity) => write!(f, "invalid merge arity: {}", arity),
            MergeError::NoMainMemoryOperation => write!(f, "merge policy has no main memory operation"),
            MergeError::Uninitialized => write!(f, "merge policy is not initialized"),
            MergeError::InputsRemaining => write!(f, "merge finished with unconsumed input"),
        }
    }
}

impl From<StreamError> for MergeError {
    fn from(err: StreamError) -> Self {
        MergeError::Stream(err)
    }
}

/// Merge statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of merge passes performed.
    pub passes: usize,
    /// Number of runs the merge started with.
    pub runs: usize,
    /// Records read from merge inputs over all passes.
    pub consumed: u64,
    /// Records written to merge outputs over all passes.
    pub produced: u64,
}

impl MergeStats {
    fn add_pass(&mut self, pass: MergeStats) {
        self.passes += pass.passes;
        self.consumed += pass.consumed;
        self.produced += pass.produced;
    }
}

/// Merge engine builder. Provides methods for [`MergeEngine`] initialization.
#[derive(Clone)]
pub struct MergeEngineBuilder {
    /// Number of threads to be used to prepare runs in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Stream block size in bytes.
    block_size: usize,
    /// Memory registry.
    memory: Option<Arc<MemoryRegistry>>,
}

impl MergeEngineBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        MergeEngineBuilder::default()
    }

    /// Builds a [`MergeEngine`] instance using provided configuration.
    pub fn build(self) -> Result<MergeEngine, MergeError> {
        MergeEngine::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.block_size,
            self.memory.unwrap_or_default(),
        )
    }

    /// Sets number of threads to be used to prepare runs in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> MergeEngineBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> MergeEngineBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets stream block size.
    pub fn with_block_size(mut self, block_size: usize) -> MergeEngineBuilder {
        self.block_size = block_size;
        return self;
    }

    /// Sets memory registry all engine allocations are accounted in.
    pub fn with_memory(mut self, memory: Arc<MemoryRegistry>) -> MergeEngineBuilder {
        self.memory = Some(memory);
        return self;
    }
}

impl Default for MergeEngineBuilder {
    fn default() -> Self {
        MergeEngineBuilder {
            threads_number: None,
            tmp_dir: None,
            block_size: DEFAULT_BLOCK_SIZE,
            memory: None,
        }
    }
}

/// Merge engine.
///
/// Drives merge policies over record streams within the memory budget of its registry: computes the affordable
/// merge arity, forms memory-sized runs and merges them in as many passes as needed.
pub struct MergeEngine {
    /// Run preparation thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: tempfile::TempDir,
    /// Stream block size in bytes.
    block_size: usize,
    /// Memory registry.
    memory: Arc<MemoryRegistry>,
}

impl MergeEngine {
    /// Creates a new merge engine instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to prepare runs in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `block_size` - Stream block size in bytes.
    /// * `memory` - Memory registry all engine allocations are accounted in.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        block_size: usize,
        memory: Arc<MemoryRegistry>,
    ) -> Result<Self, MergeError> {
        log::info!(
            "initializing merge engine (memory limit: {} bytes, block size: {} bytes)",
            memory.limit(),
            block_size
        );

        return Ok(MergeEngine {
            block_size,
            memory,
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, MergeError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| MergeError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, MergeError> {
        let tmp_dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(|err| MergeError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Returns the memory registry engine allocations are accounted in.
    pub fn memory(&self) -> &Arc<MemoryRegistry> {
        &self.memory
    }

    /// Returns the block size (in bytes) of the streams the engine creates.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Creates an empty temporary stream in the engine's temporary directory.
    pub fn create_stream<T: Record>(&self) -> Result<RecordStream<T>, MergeError> {
        RecordStream::temporary(self.tmp_dir.path(), &self.memory, self.block_size).map_err(|err| match err {
            StreamError::IO(err) => MergeError::TempDir(err),
            err => MergeError::Stream(err),
        })
    }

    /// Memory a single open stream takes during a merge, its pending record included.
    fn stream_space<T: Record>(&self) -> usize {
        RecordStream::<T>::memory_usage(self.block_size) + std::mem::size_of::<Option<T>>()
    }

    /// Computes how many of `runs` streams can be merged at once within the available memory.
    ///
    /// Every merged stream costs a stream block, its pending record, a taken flag and the policy's per-stream space;
    /// the policy overhead and the output stream are paid once.
    pub fn arity<T, P>(&self, policy: &P, runs: usize) -> Result<usize, MergeError>
    where
        T: Record,
        P: MergePolicy<T>,
    {
        let available = self.memory.available();
        let fixed = policy.space_usage_overhead() + self.stream_space::<T>();
        let per_stream = self.stream_space::<T>() + policy.space_usage_per_stream() + std::mem::size_of::<bool>();

        let affordable = available.saturating_sub(fixed) / per_stream;
        if runs > 1 && affordable < 2 {
            return Err(MergeError::InsufficientMemory {
                available,
                required: fixed + 2 * per_stream,
            });
        }

        return Ok(std::cmp::min(std::cmp::max(affordable, 2), runs));
    }

    /// Computes how many records fit in a main memory run next to an input and an output stream.
    pub fn run_capacity<T, P>(&self, policy: &P) -> Result<usize, MergeError>
    where
        T: Record,
        P: MergePolicy<T>,
    {
        let available = self.memory.available();
        let overhead = policy.space_usage_overhead() + 2 * self.stream_space::<T>();
        let record_size = std::cmp::max(1, std::mem::size_of::<T>());

        let capacity = available.saturating_sub(overhead) / record_size;
        if capacity == 0 {
            return Err(MergeError::InsufficientMemory {
                available,
                required: overhead + record_size,
            });
        }

        return Ok(capacity);
    }

    /// Performs a single merge pass of `inputs` into `output`.
    /// Inputs are read from their cursors, the output is written at its cursor.
    ///
    /// # Arguments
    /// * `inputs` - Streams to be merged
    /// * `output` - Stream the merged records are written to
    /// * `policy` - Merge policy deciding the output order
    pub fn merge_pass<T, P>(
        &self,
        inputs: &mut [RecordStream<T>],
        output: &mut RecordStream<T>,
        policy: &mut P,
    ) -> Result<MergeStats, MergeError>
    where
        T: Record,
        P: MergePolicy<T>,
    {
        if inputs.is_empty() {
            return Err(MergeError::InvalidArity(0));
        }

        let mut stats = MergeStats {
            passes: 1,
            runs: inputs.len(),
            ..MergeStats::default()
        };

        let mut pending = Vec::with_capacity(inputs.len());
        for input in inputs.iter_mut() {
            pending.push(Self::next_record(input)?);
        }
        policy.initialize(&self.memory, &pending)?;

        let mut taken = TakenFlags::new(inputs.len());
        loop {
            taken.clear();
            match policy.operate(&pending, &mut taken)? {
                MergeStep::Output(item) => {
                    output.write(&item)?;
                    stats.produced += 1;
                }
                MergeStep::Continue => {}
                MergeStep::Done => {
                    if pending.iter().any(Option::is_some) {
                        return Err(MergeError::InputsRemaining);
                    }
                    break;
                }
            }

            for index in taken.iter() {
                if pending[index].is_some() {
                    stats.consumed += 1;
                }
                pending[index] = Self::next_record(&mut inputs[index])?;
            }
        }

        for input in inputs.iter_mut() {
            input.release_buffer()?;
        }
        output.flush()?;

        return Ok(stats);
    }

    fn next_record<T: Record>(stream: &mut RecordStream<T>) -> Result<Option<T>, StreamError> {
        if stream.can_read() {
            Ok(Some(stream.read()?))
        } else {
            Ok(None)
        }
    }

    /// Merges `runs` into `output`, in several passes if the memory budget does not allow merging all runs at once.
    /// Intermediate runs are stored in temporary streams.
    ///
    /// # Arguments
    /// * `runs` - Streams to be merged, read from their cursors
    /// * `output` - Stream the merged records are written to
    /// * `policy` - Merge policy deciding the output order
    pub fn merge<T, P>(
        &self,
        mut runs: Vec<RecordStream<T>>,
        output: &mut RecordStream<T>,
        policy: &mut P,
    ) -> Result<MergeStats, MergeError>
    where
        T: Record,
        P: MergePolicy<T>,
    {
        let mut stats = MergeStats {
            runs: runs.len(),
            ..MergeStats::default()
        };
        if runs.is_empty() {
            return Ok(stats);
        }

        // parked runs hold no block memory
        for run in runs.iter_mut() {
            run.release_buffer()?;
        }

        loop {
            let arity = self.arity::<T, P>(&*policy, runs.len())?;
            if runs.len() <= arity {
                log::debug!("final merge pass (runs: {})", runs.len());
                stats.add_pass(self.merge_pass(&mut runs, output, policy)?);

                return Ok(stats);
            }

            log::debug!(
                "merge pass {} (runs: {}, arity: {})",
                stats.passes + 1,
                runs.len(),
                arity
            );

            let mut next_runs = Vec::with_capacity((runs.len() + arity - 1) / arity);
            let mut remaining = runs.into_iter();
            loop {
                let mut group = Vec::from_iter(remaining.by_ref().take(arity));
                if group.len() <= 1 {
                    next_runs.extend(group);
                    break;
                }

                let mut merged = self.create_stream()?;
                let pass = self.merge_pass(&mut group, &mut merged, policy)?;
                stats.consumed += pass.consumed;
                stats.produced += pass.produced;

                merged.seek(0)?;
                merged.release_buffer()?;
                next_runs.push(merged);
            }

            stats.passes += 1;
            runs = next_runs;
        }
    }

    /// Processes `input` with `policy` into `output`.
    ///
    /// If the input fits in main memory it is processed by the policy's main memory operation. Otherwise it is
    /// distributed into memory-sized runs, each prepared by the main memory operation, and the runs are merged.
    ///
    /// # Arguments
    /// * `input` - Stream to be processed, read from the beginning
    /// * `output` - Stream the result is written to at its cursor
    /// * `policy` - Merge policy
    pub fn partition_and_merge<T, P>(
        &self,
        input: &mut RecordStream<T>,
        output: &mut RecordStream<T>,
        policy: &mut P,
    ) -> Result<MergeStats, MergeError>
    where
        T: Record,
        P: MergePolicy<T> + Send,
    {
        input.seek(0)?;
        let len = input.size();
        let capacity = self.run_capacity::<T, P>(&*policy)?;

        if len <= capacity as u64 {
            log::debug!("processing input in main memory (records: {})", len);

            let mut buffer = RunBuffer::new(len as usize, &self.memory);
            buffer.fill_from(input)?;
            self.thread_pool
                .install(|| policy.main_mem_operate(buffer.as_mut_slice()))?;
            buffer.write_to(output)?;
            output.flush()?;

            return Ok(MergeStats {
                passes: 0,
                runs: 1,
                consumed: len,
                produced: len,
            });
        }

        log::debug!("distributing {} records into runs of {} records", len, capacity);

        let mut runs = Vec::with_capacity((len / capacity as u64 + 1) as usize);
        {
            let mut buffer = RunBuffer::new(capacity, &self.memory);
            while input.can_read() {
                buffer.clear();
                buffer.fill_from(input)?;
                self.thread_pool
                    .install(|| policy.main_mem_operate(buffer.as_mut_slice()))?;

                let mut run = self.create_stream()?;
                buffer.write_to(&mut run)?;
                run.seek(0)?;
                run.release_buffer()?;
                runs.push(run);
            }
        }
        input.release_buffer()?;

        log::debug!("run formation done (runs: {})", runs.len());

        return self.merge(runs, output, policy);
    }

    /// Sorts `input` into `output` using the records' natural order.
    pub fn sort<T>(&self, input: &mut RecordStream<T>, output: &mut RecordStream<T>) -> Result<MergeStats, MergeError>
    where
        T: Record + Ord,
    {
        self.partition_and_merge(input, output, &mut OrdMerge::new())
    }

    /// Sorts `input` into `output` using a custom compare function.
    pub fn sort_by<T, F>(
        &self,
        input: &mut RecordStream<T>,
        output: &mut RecordStream<T>,
        compare: F,
    ) -> Result<MergeStats, MergeError>
    where
        T: Record,
        F: Fn(&T, &T) -> Ordering + Copy + Sync + Send,
    {
        self.partition_and_merge(input, output, &mut SortedMerge::new(compare))
    }

    /// Writes a random permutation of `input` to `output`.
    ///
    /// # Arguments
    /// * `seed` - Random generator seed, [`None`] to seed from system entropy
    pub fn shuffle<T>(
        &self,
        input: &mut RecordStream<T>,
        output: &mut RecordStream<T>,
        seed: Option<u64>,
    ) -> Result<MergeStats, MergeError>
    where
        T: Record,
    {
        self.partition_and_merge(input, output, &mut RandomShuffle::new(seed))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{MergeEngine, MergeEngineBuilder, MergeError};
    use crate::memory::{ExceededPolicy, MemoryRegistry};
    use crate::policy::{MergePolicy, MergeStep, TakenFlags};
    use crate::record::Record;
    use crate::shuffle::RandomShuffle;
    use crate::sorted::OrdMerge;
    use crate::stream::RecordStream;

    fn engine(limit: usize, block_size: usize) -> MergeEngine {
        MergeEngineBuilder::new()
            .with_memory(Arc::new(MemoryRegistry::new(limit, ExceededPolicy::Warn)))
            .with_block_size(block_size)
            .with_threads_number(2)
            .with_tmp_dir(std::path::Path::new("./"))
            .build()
            .unwrap()
    }

    fn stream_of<T: Record>(engine: &MergeEngine, items: &[T]) -> RecordStream<T> {
        let mut stream = engine.create_stream().unwrap();
        stream.write_array(items).unwrap();
        stream.seek(0).unwrap();
        stream
    }

    fn contents<T: Record>(stream: &mut RecordStream<T>) -> Vec<T> {
        stream.seek(0).unwrap();
        let items: Result<Vec<T>, _> = stream.by_ref().collect();
        items.unwrap()
    }

    /// Emits inputs one after another and stops early when asked to.
    struct Concatenate {
        stop_after: Option<u64>,
        emitted: u64,
    }

    impl MergePolicy<u32> for Concatenate {
        fn initialize(&mut self, _memory: &Arc<MemoryRegistry>, _inputs: &[Option<u32>]) -> Result<(), MergeError> {
            self.emitted = 0;
            Ok(())
        }

        fn operate(&mut self, inputs: &[Option<u32>], taken: &mut TakenFlags) -> Result<MergeStep<u32>, MergeError> {
            if Some(self.emitted) == self.stop_after {
                return Ok(MergeStep::Done);
            }
            match inputs.iter().position(Option::is_some) {
                Some(index) => {
                    taken.take(index);
                    self.emitted += 1;
                    Ok(MergeStep::Output(inputs[index].unwrap()))
                }
                None => Ok(MergeStep::Done),
            }
        }

        fn space_usage_overhead(&self) -> usize {
            std::mem::size_of::<Self>()
        }

        fn space_usage_per_stream(&self) -> usize {
            0
        }
    }

    #[rstest]
    fn test_shuffle_scenario() {
        let engine = engine(1024 * 1024, 64);
        let run_once = |seed: u64| {
            let mut inputs = vec![
                stream_of(&engine, &[1u32, 2, 3]),
                stream_of(&engine, &[4, 5, 6, 7, 8]),
                stream_of(&engine, &[]),
                stream_of(&engine, &[9, 10]),
            ];
            let mut output = engine.create_stream().unwrap();
            let stats = engine
                .merge_pass(&mut inputs, &mut output, &mut RandomShuffle::new(Some(seed)))
                .unwrap();
            assert_eq!(stats.produced, 10);
            assert_eq!(stats.consumed, 10);
            contents(&mut output)
        };

        let first = run_once(1994);
        assert_eq!(first.len(), 10);
        assert_eq!(first, run_once(1994));

        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, Vec::from_iter(1..=10));
    }

    #[rstest]
    #[case(2)]
    #[case(5)]
    #[case(16)]
    fn test_merge_completeness(#[case] arity: usize) {
        let engine = engine(1024 * 1024, 128);
        let mut rng = StdRng::seed_from_u64(arity as u64);

        let mut expected = Vec::new();
        let mut inputs = Vec::new();
        for _ in 0..arity {
            let items = Vec::from_iter((0..rng.gen_range(1..300)).map(|_| rng.gen::<u64>()));
            expected.extend_from_slice(&items);
            inputs.push(stream_of(&engine, &items));
        }

        let mut output = engine.create_stream().unwrap();
        engine
            .merge_pass(&mut inputs, &mut output, &mut RandomShuffle::new(Some(1)))
            .unwrap();

        let mut actual = contents(&mut output);
        assert_eq!(actual.len(), expected.len());
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected);
    }

    #[rstest]
    fn test_sorted_merge_pass() {
        let engine = engine(1024 * 1024, 64);
        let mut inputs = vec![
            stream_of(&engine, &[4i64, 5, 7]),
            stream_of(&engine, &[1, 6]),
            stream_of(&engine, &[3]),
            stream_of(&engine, &[]),
        ];
        let mut output = engine.create_stream().unwrap();
        engine.merge_pass(&mut inputs, &mut output, &mut OrdMerge::new()).unwrap();

        assert_eq!(contents(&mut output), vec![1, 3, 4, 5, 6, 7]);
    }

    #[rstest]
    fn test_arity_monotonicity() {
        let policy = OrdMerge::<u64>::new();
        let mut previous = 0;
        for limit in (4 * 1024..256 * 1024).step_by(4 * 1024) {
            let engine = engine(limit, 256);
            let arity = engine.arity::<u64, _>(&policy, 1000).unwrap();

            assert!(arity >= 2);
            assert!(arity >= previous);
            previous = arity;
        }
        assert!(previous > 2);
    }

    #[rstest]
    fn test_arity_bounds() {
        let engine = engine(1024 * 1024, 256);
        let policy = OrdMerge::<u64>::new();

        assert_eq!(engine.arity::<u64, _>(&policy, 0).unwrap(), 0);
        assert_eq!(engine.arity::<u64, _>(&policy, 1).unwrap(), 1);
        assert_eq!(engine.arity::<u64, _>(&policy, 3).unwrap(), 3);
    }

    #[rstest]
    fn test_insufficient_memory() {
        let engine = engine(512, 256);
        let policy = OrdMerge::<u64>::new();

        assert!(matches!(
            engine.arity::<u64, _>(&policy, 2),
            Err(MergeError::InsufficientMemory { .. })
        ));
        assert_eq!(engine.arity::<u64, _>(&policy, 1).unwrap(), 1);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_external_sort(#[case] reversed: bool) {
        let engine = engine(2000, 64);

        let mut items = Vec::from_iter(0..10_000i32);
        items.shuffle(&mut StdRng::seed_from_u64(5));
        let mut input = stream_of(&engine, &items);
        let mut output = engine.create_stream().unwrap();

        let stats = if reversed {
            engine.sort_by(&mut input, &mut output, |a: &i32, b: &i32| a.cmp(b).reverse())
        } else {
            engine.sort(&mut input, &mut output)
        }
        .unwrap();

        assert!(stats.runs > 1);
        assert!(stats.passes >= 2);

        let expected = if reversed {
            Vec::from_iter((0..10_000).rev())
        } else {
            Vec::from_iter(0..10_000)
        };
        assert_eq!(contents(&mut output), expected);
    }

    #[rstest]
    fn test_main_memory_sort() {
        let engine = engine(1024 * 1024, 64);
        let mut input = stream_of(&engine, &[5u8, 3, 3, 1, 4, 1, 5, 9, 2, 6]);
        let mut output = engine.create_stream().unwrap();

        let stats = engine.sort(&mut input, &mut output).unwrap();

        assert_eq!(stats.passes, 0);
        assert_eq!(contents(&mut output), vec![1, 1, 2, 3, 3, 4, 5, 5, 6, 9]);
    }

    #[rstest]
    fn test_external_shuffle() {
        let engine = engine(2000, 64);
        let items = Vec::from_iter(0..5_000u32);

        let shuffle = |seed: u64| {
            let mut input = stream_of(&engine, &items);
            let mut output = engine.create_stream().unwrap();
            let stats = engine.shuffle(&mut input, &mut output, Some(seed)).unwrap();
            assert!(stats.runs > 1);
            contents(&mut output)
        };

        let shuffled = shuffle(77);
        assert_ne!(shuffled, items);
        assert_eq!(shuffled, shuffle(77));

        let mut sorted = shuffled.clone();
        sorted.sort();
        assert_eq!(sorted, items);
    }

    #[rstest]
    fn test_empty_input() {
        let engine = engine(1024 * 1024, 64);
        let mut input = engine.create_stream::<u64>().unwrap();
        let mut output = engine.create_stream().unwrap();

        engine.sort(&mut input, &mut output).unwrap();
        assert_eq!(output.size(), 0);

        let stats = engine.merge(Vec::new(), &mut output, &mut OrdMerge::new()).unwrap();
        assert_eq!(stats.runs, 0);
        assert_eq!(output.size(), 0);
    }

    #[rstest]
    fn test_multi_pass_merge() {
        let engine = engine(2000, 64);
        let runs = Vec::from_iter((0..30u32).map(|i| stream_of(&engine, &[i, i + 30, i + 60])));
        let mut output = engine.create_stream().unwrap();

        let stats = engine.merge(runs, &mut output, &mut OrdMerge::new()).unwrap();

        assert_eq!(stats.runs, 30);
        assert!(stats.passes >= 2);
        assert_eq!(contents(&mut output), Vec::from_iter(0..90));
    }

    #[rstest]
    fn test_custom_policy() {
        let engine = engine(1024 * 1024, 64);
        let mut inputs = vec![stream_of(&engine, &[1u32, 2]), stream_of(&engine, &[3])];
        let mut output = engine.create_stream().unwrap();
        let mut policy = Concatenate {
            stop_after: None,
            emitted: 0,
        };

        engine.merge_pass(&mut inputs, &mut output, &mut policy).unwrap();
        assert_eq!(contents(&mut output), vec![1, 2, 3]);

        let result = engine.partition_and_merge(&mut inputs[0], &mut output, &mut policy);
        assert!(matches!(result, Err(MergeError::NoMainMemoryOperation)));
    }

    #[rstest]
    fn test_inputs_remaining() {
        let engine = engine(1024 * 1024, 64);
        let mut inputs = vec![stream_of(&engine, &[1u32, 2, 3])];
        let mut output = engine.create_stream().unwrap();
        let mut policy = Concatenate {
            stop_after: Some(1),
            emitted: 0,
        };

        let result = engine.merge_pass(&mut inputs, &mut output, &mut policy);
        assert!(matches!(result, Err(MergeError::InputsRemaining)));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_output_write_failure(#[case] partitioned: bool) {
        let device = std::path::Path::new("/dev/full");
        if !device.exists() {
            return;
        }
        let engine = engine(1024 * 1024, 64);
        let mut output = RecordStream::<u32>::open(device, engine.memory(), 64).unwrap();

        let result = if partitioned {
            let mut input = stream_of(&engine, &[3u32, 1, 2]);
            engine.sort(&mut input, &mut output)
        } else {
            let mut inputs = vec![
                stream_of(&engine, &[1u32, 4]),
                stream_of(&engine, &[2, 5]),
                stream_of(&engine, &[3]),
            ];
            engine.merge_pass(&mut inputs, &mut output, &mut OrdMerge::new())
        };

        assert!(matches!(result, Err(MergeError::Stream(_))));
    }

    #[rstest]
    fn test_memory_released() {
        let engine = engine(4000, 64);
        let items = Vec::from_iter((0..3_000u16).rev());
        {
            let mut input = stream_of(&engine, &items);
            let mut output = engine.create_stream().unwrap();
            engine.sort(&mut input, &mut output).unwrap();
            assert_eq!(contents(&mut output), Vec::from_iter(0..3_000u16));
        }
        assert_eq!(engine.memory().used(), 0);
    }
}
