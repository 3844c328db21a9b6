//! In-memory source and sink elements.

use crate::element::{ElementIo, Processor, DEFAULT_BUFFER_LEN};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// A source that streams a block of memory into the pipeline.
///
/// Emits the data in chunks, then reports end of stream so downstream
/// elements finish naturally. Reopening restarts from the beginning.
///
/// # Example
///
/// ```rust,ignore
/// use streamline::elements::MemSource;
///
/// let src = MemSource::from_bytes(b"hello world").with_chunk_size(4);
/// ```
pub struct MemSource {
    data: Bytes,
    offset: usize,
    chunk_size: usize,
}

impl MemSource {
    /// Create a source from a byte slice, copying it.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Create a source from a `Vec<u8>` without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }

    /// Create a source from static data without copying.
    pub fn from_static(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }

    fn new(data: Bytes) -> Self {
        Self {
            data,
            offset: 0,
            chunk_size: DEFAULT_BUFFER_LEN,
        }
    }

    /// Set the number of bytes emitted per processing round.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Total data size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the source holds no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Processor for MemSource {
    fn open(&mut self, io: &ElementIo) -> Result<()> {
        self.offset = 0;
        io.set_total_bytes(self.data.len() as u64);
        Ok(())
    }

    fn process(&mut self, io: &ElementIo) -> Result<usize> {
        if self.offset >= self.data.len() {
            return Err(Error::Done);
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        io.write(&self.data[self.offset..end], io.output_timeout())?;
        let n = end - self.offset;
        self.offset = end;
        Ok(n)
    }
}

/// A sink that collects the stream into memory.
///
/// Take a [`collected`](MemSink::collected) handle before moving the
/// sink into an element; the handle observes everything the sink reads.
///
/// # Example
///
/// ```rust,ignore
/// use streamline::elements::MemSink;
///
/// let sink = MemSink::new();
/// let collected = sink.collected();
/// // ... run the pipeline ...
/// assert_eq!(collected.lock().unwrap().len(), 1024);
/// ```
pub struct MemSink {
    collected: Arc<Mutex<Vec<u8>>>,
    buf: Vec<u8>,
}

impl MemSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            collected: Arc::new(Mutex::new(Vec::new())),
            buf: Vec::new(),
        }
    }

    /// Shared handle to the bytes collected so far.
    pub fn collected(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.collected)
    }
}

impl Default for MemSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for MemSink {
    fn open(&mut self, io: &ElementIo) -> Result<()> {
        self.buf = vec![0; io.buffer_len()];
        Ok(())
    }

    fn process(&mut self, io: &ElementIo) -> Result<usize> {
        let n = io.read(&mut self.buf, io.input_timeout())?;
        self.collected.lock().unwrap().extend_from_slice(&self.buf[..n]);
        Ok(n)
    }
}
