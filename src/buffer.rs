//! Memory-accounted run buffer.

use std::sync::Arc;

use crate::memory::{MemoryLease, MemoryRegistry};
use crate::record::Record;
use crate::stream::{RecordStream, StreamError};

/// Main-memory buffer limited by elements count. The whole capacity is registered with the memory registry
/// when the buffer is created.
pub struct RunBuffer<T> {
    limit: usize,
    inner: Vec<T>,
    _lease: MemoryLease,
}

impl<T: Record> RunBuffer<T> {
    pub fn new(limit: usize, memory: &Arc<MemoryRegistry>) -> Self {
        RunBuffer {
            limit,
            _lease: memory.allocate(limit * std::mem::size_of::<T>()),
            inner: Vec::with_capacity(limit),
        }
    }

    /// Adds a new element to the buffer.
    pub fn push(&mut self, item: T) {
        debug_assert!(!self.is_full(), "run buffer overflow");
        self.inner.push(item);
    }

    /// Returns buffer length
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        self.inner.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.inner.as_mut_slice()
    }

    /// Reads records from `stream` until the buffer is full or the stream is exhausted.
    /// Returns the number of records read.
    pub fn fill_from(&mut self, stream: &mut RecordStream<T>) -> Result<usize, StreamError> {
        let mut count = 0;
        while !self.is_full() && stream.can_read() {
            self.push(stream.read()?);
            count += 1;
        }

        return Ok(count);
    }

    /// Writes buffered records to `stream` at its cursor.
    pub fn write_to(&self, stream: &mut RecordStream<T>) -> Result<(), StreamError> {
        stream.write_array(&self.inner)
    }
}
