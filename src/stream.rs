//! Block-structured record streams.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log;
use tempfile;

use crate::memory::{MemoryLease, MemoryRegistry};
use crate::record::Record;

/// Default stream block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Stream error.
#[derive(Debug)]
pub enum StreamError {
    /// Read past the end of the stream.
    EndOfStream,
    /// Backward read at the beginning of the stream.
    BeforeStart,
    /// Seek beyond the end of the stream.
    SeekOutOfRange { index: u64, len: u64 },
    /// Underlying storage failure.
    IO(io::Error),
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            StreamError::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            StreamError::EndOfStream => write!(f, "end of stream reached"),
            StreamError::BeforeStart => write!(f, "beginning of stream reached"),
            StreamError::SeekOutOfRange { index, len } => {
                write!(f, "seek to {} beyond stream length {}", index, len)
            }
            StreamError::IO(err) => write!(f, "stream I/O operation failed: {}", err),
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::IO(err)
    }
}

/// Cached stream block.
struct Block {
    index: u64,
    bytes: Vec<u8>,
    dirty: bool,
    _lease: MemoryLease,
}

/// Stream of fixed-size records persisted to a file.
///
/// The stream keeps a cursor in `[0, size()]`. Reads and writes go through a single cached block of
/// `block_size / T::SIZE` records; the block memory is registered with the memory registry and allocated
/// lazily on first access.
pub struct RecordStream<T: Record> {
    file: fs::File,
    path: Option<PathBuf>,
    memory: Arc<MemoryRegistry>,
    block_items: u64,
    len: u64,
    pos: u64,
    block: Option<Block>,

    record_type: PhantomData<T>,
}

impl<T: Record> RecordStream<T> {
    /// Opens a named stream, creating the file if it does not exist.
    ///
    /// # Arguments
    /// * `path` - Stream file path
    /// * `memory` - Registry the block buffer is accounted in
    /// * `block_size` - I/O granularity in bytes
    pub fn open(path: &Path, memory: &Arc<MemoryRegistry>, block_size: usize) -> Result<Self, StreamError> {
        Self::check_record_size();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let record_size = Self::record_size();
        if file_len % record_size != 0 {
            return Err(StreamError::IO(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "file {} size {} is not a multiple of record size {}",
                    path.display(),
                    file_len,
                    record_size
                ),
            )));
        }

        return Ok(Self::from_file(
            file,
            Some(path.to_path_buf()),
            memory,
            block_size,
            file_len / record_size,
        ));
    }

    /// Creates an anonymous stream in `dir`. The underlying file is removed when the stream is dropped.
    pub fn temporary(dir: &Path, memory: &Arc<MemoryRegistry>, block_size: usize) -> Result<Self, StreamError> {
        let file = tempfile::tempfile_in(dir)?;

        return Ok(Self::from_file(file, None, memory, block_size, 0));
    }

    fn from_file(
        file: fs::File,
        path: Option<PathBuf>,
        memory: &Arc<MemoryRegistry>,
        block_size: usize,
        len: u64,
    ) -> Self {
        Self::check_record_size();

        RecordStream {
            file,
            path,
            memory: Arc::clone(memory),
            block_items: std::cmp::max(1, block_size / T::SIZE) as u64,
            len,
            pos: 0,
            block: None,
            record_type: PhantomData,
        }
    }

    fn check_record_size() {
        assert!(T::SIZE > 0, "records must have a non-zero size");
    }

    fn record_size() -> u64 {
        T::SIZE as u64
    }

    /// Returns the stream file path, [`None`] for temporary streams.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the stream length in records.
    pub fn size(&self) -> u64 {
        self.len
    }

    /// Returns the cursor position.
    pub fn offset(&self) -> u64 {
        self.pos
    }

    /// Returns the block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_items as usize * T::SIZE
    }

    /// Returns memory (in bytes) a stream holds while it is being read or written.
    pub fn memory_usage(block_size: usize) -> usize {
        std::cmp::max(1, block_size / T::SIZE) * T::SIZE + std::mem::size_of::<Self>()
    }

    pub fn can_read(&self) -> bool {
        self.pos < self.len
    }

    pub fn can_read_back(&self) -> bool {
        self.pos > 0
    }

    /// Reads the record at the cursor and advances the cursor.
    pub fn read(&mut self) -> Result<T, StreamError> {
        if self.pos >= self.len {
            return Err(StreamError::EndOfStream);
        }
        let item = self.record_at(self.pos)?;
        self.pos += 1;

        return Ok(item);
    }

    /// Moves the cursor one record back and reads the record there.
    pub fn read_back(&mut self) -> Result<T, StreamError> {
        if self.pos == 0 {
            return Err(StreamError::BeforeStart);
        }
        self.pos -= 1;

        return self.record_at(self.pos);
    }

    /// Fills `items` with consecutive records. Nothing is consumed if fewer records remain.
    pub fn read_array(&mut self, items: &mut [T]) -> Result<(), StreamError> {
        if self.len - self.pos < items.len() as u64 {
            return Err(StreamError::EndOfStream);
        }
        for item in items.iter_mut() {
            *item = self.read()?;
        }

        return Ok(());
    }

    /// Writes a record at the cursor, overwriting or extending the stream, and advances the cursor.
    pub fn write(&mut self, item: &T) -> Result<(), StreamError> {
        let offset = self.block_offset(self.pos);
        let block = self.load_block(self.pos / self.block_items)?;
        item.encode(&mut block.bytes[offset..offset + T::SIZE]);
        block.dirty = true;

        self.pos += 1;
        self.len = std::cmp::max(self.len, self.pos);

        return Ok(());
    }

    pub fn write_array(&mut self, items: &[T]) -> Result<(), StreamError> {
        for item in items {
            self.write(item)?;
        }

        return Ok(());
    }

    /// Moves the cursor to `index`, which must lie within `[0, size()]`.
    pub fn seek(&mut self, index: u64) -> Result<(), StreamError> {
        if index > self.len {
            return Err(StreamError::SeekOutOfRange { index, len: self.len });
        }
        self.pos = index;

        return Ok(());
    }

    /// Sets the stream length. Shrinking discards trailing records and clamps the cursor, growing extends the
    /// stream with records whose content is undefined.
    pub fn truncate(&mut self, len: u64) -> Result<(), StreamError> {
        self.release_buffer()?;
        self.file.set_len(len * Self::record_size())?;

        self.len = len;
        self.pos = std::cmp::min(self.pos, len);

        return Ok(());
    }

    /// Writes the cached block back if it was modified.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        if let Some(block) = self.block.as_mut() {
            Self::write_back(&mut self.file, block, self.block_items, self.len)?;
        }

        return Ok(());
    }

    /// Flushes the stream and returns its block memory to the registry.
    /// The block is allocated again on the next access.
    pub fn release_buffer(&mut self) -> Result<(), StreamError> {
        self.flush()?;
        self.block = None;

        return Ok(());
    }

    fn block_offset(&self, index: u64) -> usize {
        (index % self.block_items) as usize * T::SIZE
    }

    fn record_at(&mut self, index: u64) -> Result<T, StreamError> {
        let offset = self.block_offset(index);
        let block = self.load_block(index / self.block_items)?;

        return Ok(T::decode(&block.bytes[offset..offset + T::SIZE]));
    }

    fn load_block(&mut self, index: u64) -> Result<&mut Block, StreamError> {
        let cached = matches!(&self.block, Some(block) if block.index == index);
        if !cached {
            let mut block = match self.block.take() {
                Some(mut block) => {
                    Self::write_back(&mut self.file, &mut block, self.block_items, self.len)?;
                    block
                }
                None => {
                    let block_bytes = self.block_items as usize * T::SIZE;
                    Block {
                        index,
                        bytes: vec![0; block_bytes],
                        dirty: false,
                        _lease: self.memory.allocate(block_bytes),
                    }
                }
            };
            block.index = index;
            Self::read_in(&mut self.file, &mut block)?;
            self.block = Some(block);
        }

        return match self.block.as_mut() {
            Some(block) => Ok(block),
            None => unreachable!("block is loaded above"),
        };
    }

    fn read_in(file: &mut fs::File, block: &mut Block) -> Result<(), StreamError> {
        file.seek(SeekFrom::Start(block.index * block.bytes.len() as u64))?;

        let mut filled = 0;
        while filled < block.bytes.len() {
            match file.read(&mut block.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(StreamError::IO(err)),
            }
        }
        block.bytes[filled..].fill(0);
        block.dirty = false;

        return Ok(());
    }

    fn write_back(file: &mut fs::File, block: &mut Block, block_items: u64, len: u64) -> Result<(), StreamError> {
        if !block.dirty {
            return Ok(());
        }

        let first = block.index * block_items;
        let items = std::cmp::min(block_items, len.saturating_sub(first)) as usize;
        file.seek(SeekFrom::Start(first * T::SIZE as u64))?;
        file.write_all(&block.bytes[..items * T::SIZE])?;
        block.dirty = false;

        return Ok(());
    }
}

impl<T: Record> Iterator for RecordStream<T> {
    type Item = Result<T, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.can_read() {
            Some(self.read())
        } else {
            None
        }
    }
}

impl<T: Record> Drop for RecordStream<T> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("stream block write-back failed: {}", err);
        }
    }
}
