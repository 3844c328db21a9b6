//! Bounded circular byte buffer with blocking I/O.
//!
//! The ring buffer is the byte-stream transport between pipeline stages:
//! - Single producer, single consumer, FIFO byte order
//! - Blocking `read`/`write` with per-call timeouts
//! - Level-triggered `abort` that wakes every blocked caller
//! - An explicit producer-done marker for clean end-of-stream

use crate::error::{Error, Result};
use crate::timeout::Deadline;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// A bounded circular byte store shared between one producer and one
/// consumer.
///
/// Cloning is cheap and yields another handle to the same buffer; the
/// producer and consumer sides each hold a clone.
///
/// # Example
///
/// ```rust,ignore
/// use streamline::ringbuf::RingBuffer;
///
/// let rb = RingBuffer::new(4096)?;
/// rb.write(b"pcm data", None)?;
/// let mut out = [0u8; 8];
/// let n = rb.read(&mut out, None)?;
/// ```
#[derive(Clone)]
pub struct RingBuffer {
    inner: Arc<RingInner>,
}

struct RingInner {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
}

struct RingState {
    buf: Box<[u8]>,
    read_pos: usize,
    filled: usize,
    aborted: bool,
    producer_done: bool,
    waiters: usize,
}

impl RingBuffer {
    /// Create a ring buffer with the given capacity in bytes.
    ///
    /// Fails with [`Error::InvalidArgument`] for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "ring buffer capacity must be non-zero".into(),
            ));
        }
        Ok(Self {
            inner: Arc::new(RingInner {
                state: Mutex::new(RingState {
                    buf: vec![0u8; capacity].into_boxed_slice(),
                    read_pos: 0,
                    filled: 0,
                    aborted: false,
                    producer_done: false,
                    waiters: 0,
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
            }),
        })
    }

    /// Write up to `data.len()` bytes, blocking while the buffer is full.
    ///
    /// Returns the number of bytes copied in (`min(data.len(), free)`, at
    /// least 1). An empty `data` returns `Ok(0)` without blocking.
    ///
    /// Errors: [`Error::Aborted`] once the buffer is aborted,
    /// [`Error::Done`] if the producer already marked completion,
    /// [`Error::Timeout`] when the deadline passes with the buffer full.
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let deadline = Deadline::new(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if state.aborted {
                return Err(Error::Aborted);
            }
            if state.producer_done {
                return Err(Error::Done);
            }
            let cap = state.buf.len();
            let free = cap - state.filled;
            if free > 0 {
                let n = free.min(data.len());
                let write_pos = (state.read_pos + state.filled) % cap;
                let first = n.min(cap - write_pos);
                state.buf[write_pos..write_pos + first].copy_from_slice(&data[..first]);
                if n > first {
                    state.buf[..n - first].copy_from_slice(&data[first..n]);
                }
                state.filled += n;
                self.inner.readable.notify_all();
                return Ok(n);
            }
            state = self.wait(&self.inner.writable, state, &deadline)?;
        }
    }

    /// Read up to `data.len()` bytes, blocking while the buffer is empty.
    ///
    /// Returns the number of bytes copied out (at least 1). An empty `data`
    /// returns `Ok(0)` without blocking.
    ///
    /// Errors: [`Error::Aborted`] once the buffer is aborted (this outranks
    /// residual data, so teardown is never delayed by stale bytes),
    /// [`Error::Done`] when the producer marked completion and the buffer
    /// has drained, [`Error::Timeout`] when the deadline passes.
    pub fn read(&self, data: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let deadline = Deadline::new(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if state.aborted {
                return Err(Error::Aborted);
            }
            if state.filled > 0 {
                let cap = state.buf.len();
                let n = state.filled.min(data.len());
                let first = n.min(cap - state.read_pos);
                data[..first].copy_from_slice(&state.buf[state.read_pos..state.read_pos + first]);
                if n > first {
                    data[first..n].copy_from_slice(&state.buf[..n - first]);
                }
                state.read_pos = (state.read_pos + n) % cap;
                state.filled -= n;
                self.inner.writable.notify_all();
                return Ok(n);
            }
            if state.producer_done {
                return Err(Error::Done);
            }
            state = self.wait(&self.inner.readable, state, &deadline)?;
        }
    }

    /// Mark that no more data will ever be written.
    ///
    /// Irreversible until [`reset`](Self::reset). Readers drain what is
    /// buffered and then see [`Error::Done`]; further writes fail with
    /// [`Error::Done`]. Idempotent.
    pub fn mark_producer_done(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.producer_done {
            state.producer_done = true;
            trace!("ring buffer marked done");
        }
        self.inner.readable.notify_all();
        self.inner.writable.notify_all();
    }

    /// Abort the buffer, waking every blocked reader and writer with
    /// [`Error::Aborted`].
    ///
    /// Level-triggered: current and future callers fail until
    /// [`reset`](Self::reset). Idempotent.
    pub fn abort(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.aborted {
            state.aborted = true;
            trace!("ring buffer aborted");
        }
        self.inner.readable.notify_all();
        self.inner.writable.notify_all();
    }

    /// Clear cursors, the abort flag and the done flag, restoring the
    /// buffer to its freshly constructed state.
    ///
    /// Fails with [`Error::InvalidState`] while any caller is still blocked
    /// on the buffer; abort first and let the waiters drain.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        if state.waiters > 0 {
            return Err(Error::InvalidState(
                "ring buffer reset with blocked callers".into(),
            ));
        }
        state.read_pos = 0;
        state.filled = 0;
        state.aborted = false;
        state.producer_done = false;
        Ok(())
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().unwrap().buf.len()
    }

    /// Bytes currently buffered.
    pub fn bytes_filled(&self) -> usize {
        self.inner.state.lock().unwrap().filled
    }

    /// Bytes of free space.
    pub fn bytes_free(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.buf.len() - state.filled
    }

    /// Whether the producer has marked completion.
    pub fn is_producer_done(&self) -> bool {
        self.inner.state.lock().unwrap().producer_done
    }

    /// Whether the buffer is currently aborted.
    pub fn is_aborted(&self) -> bool {
        self.inner.state.lock().unwrap().aborted
    }

    fn wait<'a>(
        &self,
        condvar: &Condvar,
        mut state: std::sync::MutexGuard<'a, RingState>,
        deadline: &Deadline,
    ) -> Result<std::sync::MutexGuard<'a, RingState>> {
        match deadline.remaining() {
            None => {
                state.waiters += 1;
                let mut state = condvar.wait(state).unwrap();
                state.waiters -= 1;
                Ok(state)
            }
            Some(d) if d.is_zero() => Err(Error::Timeout),
            Some(d) => {
                state.waiters += 1;
                let (mut state, _) = condvar.wait_timeout(state, d).unwrap();
                state.waiters -= 1;
                Ok(state)
            }
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("RingBuffer")
            .field("capacity", &state.buf.len())
            .field("filled", &state.filled)
            .field("aborted", &state.aborted)
            .field("producer_done", &state.producer_done)
            .finish()
    }
}
