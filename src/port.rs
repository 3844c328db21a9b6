//! Uniform byte-stream facade over the stage-to-stage transports.
//!
//! A [`Port`] is what an element actually reads from and writes to. It
//! hides which transport sits behind it:
//!
//! - **Ring**: a [`RingBuffer`], for byte streams with partial reads and
//!   writes.
//! - **Pool**: a [`FramePool`], for whole-frame delivery. Writes are
//!   chunked to the frame capacity; a read must supply a buffer at least
//!   as large as the next frame.
//! - **Callback**: an application closure, for feeding data in or
//!   draining it out at the edges of a pipeline.
//!
//! Lifecycle controls (done, abort, reset) and size queries forward to
//! the transport; callback ports accept the lifecycle calls as no-ops
//! and reject size queries with [`Error::Unsupported`].

use crate::error::{Error, Result};
use crate::framepool::FramePool;
use crate::ringbuf::RingBuffer;
use crate::timeout::Deadline;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Closure backing the read side of a callback port.
pub type ReadFn = Arc<dyn Fn(&mut [u8], Option<Duration>) -> Result<usize> + Send + Sync>;

/// Closure backing the write side of a callback port.
pub type WriteFn = Arc<dyn Fn(&[u8], Option<Duration>) -> Result<usize> + Send + Sync>;

/// Which transport a [`Port`] wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Byte ring buffer.
    Ring,
    /// Fixed-capacity frame pool.
    Pool,
    /// Application-supplied closure.
    Callback,
}

enum Transport {
    Ring(RingBuffer),
    Pool(FramePool),
    Callback(CallbackPort),
}

struct CallbackPort {
    reader: Option<ReadFn>,
    writer: Option<WriteFn>,
}

/// A stage-to-stage data port.
///
/// Cloning yields another handle to the same underlying transport;
/// upstream and downstream elements each hold a clone.
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

struct PortInner {
    transport: Transport,
    tag: Mutex<Option<String>>,
    element: Mutex<Option<String>>,
}

impl Port {
    /// Create a ring-buffer port of `capacity` bytes.
    pub fn ring(capacity: usize) -> Result<Self> {
        Ok(Self::from_transport(Transport::Ring(RingBuffer::new(
            capacity,
        )?)))
    }

    /// Create a frame-pool port of `frame_count` frames of
    /// `frame_capacity` bytes each.
    pub fn pool(frame_count: usize, frame_capacity: usize) -> Result<Self> {
        Ok(Self::from_transport(Transport::Pool(FramePool::new(
            frame_count,
            frame_capacity,
        )?)))
    }

    /// Wrap an existing ring buffer.
    pub fn from_ring(ring: RingBuffer) -> Self {
        Self::from_transport(Transport::Ring(ring))
    }

    /// Wrap an existing frame pool.
    pub fn from_pool(pool: FramePool) -> Self {
        Self::from_transport(Transport::Pool(pool))
    }

    /// Create a callback port whose reads pull from `f`.
    ///
    /// Suitable as an element input fed by the application.
    pub fn read_callback<F>(f: F) -> Self
    where
        F: Fn(&mut [u8], Option<Duration>) -> Result<usize> + Send + Sync + 'static,
    {
        Self::from_transport(Transport::Callback(CallbackPort {
            reader: Some(Arc::new(f)),
            writer: None,
        }))
    }

    /// Create a callback port whose writes push into `f`.
    ///
    /// Suitable as an element output drained by the application.
    pub fn write_callback<F>(f: F) -> Self
    where
        F: Fn(&[u8], Option<Duration>) -> Result<usize> + Send + Sync + 'static,
    {
        Self::from_transport(Transport::Callback(CallbackPort {
            reader: None,
            writer: Some(Arc::new(f)),
        }))
    }

    fn from_transport(transport: Transport) -> Self {
        Self {
            inner: Arc::new(PortInner {
                transport,
                tag: Mutex::new(None),
                element: Mutex::new(None),
            }),
        }
    }

    /// Advisory lifecycle hook: prepare the port for traffic.
    ///
    /// No variant needs preparation today; succeeds everywhere.
    pub fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Advisory lifecycle hook: the port will see no further traffic.
    ///
    /// Buffered data survives; use [`reset`](Self::reset) to discard it.
    pub fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Read up to `buf.len()` bytes, blocking per `timeout`.
    ///
    /// Ring ports return whatever is available. Pool ports deliver exactly
    /// one frame and fail with [`Error::InvalidArgument`] when `buf` is
    /// smaller than that frame, leaving the frame queued. Callback ports
    /// invoke their read closure, or fail with [`Error::Unsupported`] when
    /// constructed write-only.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        match &self.inner.transport {
            Transport::Ring(ring) => ring.read(buf, timeout),
            Transport::Pool(pool) => {
                let frame = pool.acquire_ready(timeout)?;
                if frame.len() > buf.len() {
                    let len = frame.len();
                    pool.requeue_ready(frame)?;
                    return Err(Error::InvalidArgument(format!(
                        "read buffer of {} bytes cannot hold a {len}-byte frame",
                        buf.len()
                    )));
                }
                let len = frame.len();
                buf[..len].copy_from_slice(frame.data());
                pool.release_free(frame)?;
                Ok(len)
            }
            Transport::Callback(cb) => match &cb.reader {
                Some(f) => f(buf, timeout),
                None => Err(Error::Unsupported {
                    op: "read",
                    variant: "write-only callback port",
                }),
            },
        }
    }

    /// Write up to `data.len()` bytes, blocking per `timeout`.
    ///
    /// Ring ports may write a prefix when space is short. Pool ports
    /// write at most one frame's capacity per call. Callback ports invoke
    /// their write closure, or fail with [`Error::Unsupported`] when
    /// constructed read-only. Returns the number of bytes accepted.
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        match &self.inner.transport {
            Transport::Ring(ring) => ring.write(data, timeout),
            Transport::Pool(pool) => {
                if data.is_empty() {
                    return Ok(0);
                }
                let mut frame = pool.acquire_free(timeout)?;
                let n = data.len().min(frame.capacity());
                frame.data_mut()[..n].copy_from_slice(&data[..n]);
                frame.set_len(n)?;
                pool.commit_ready(frame)?;
                Ok(n)
            }
            Transport::Callback(cb) => match &cb.writer {
                Some(f) => f(data, timeout),
                None => Err(Error::Unsupported {
                    op: "write",
                    variant: "read-only callback port",
                }),
            },
        }
    }

    /// Write all of `data`, looping over partial writes under one shared
    /// deadline.
    ///
    /// On [`Error::Timeout`] a prefix of `data` may already have been
    /// delivered.
    pub fn write_all(&self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        let deadline = Deadline::new(timeout);
        let mut written = 0;
        while written < data.len() {
            let n = self.write(&data[written..], deadline.remaining())?;
            if n == 0 && deadline.expired() {
                return Err(Error::Timeout);
            }
            written += n;
        }
        Ok(())
    }

    /// Signal that no more data will ever be written.
    ///
    /// Readers drain what is buffered and then see [`Error::Done`].
    /// Callback ports fail with [`Error::Unsupported`]; end-of-stream for
    /// a closure is between the application and itself.
    pub fn write_done(&self) -> Result<()> {
        match &self.inner.transport {
            Transport::Ring(ring) => {
                ring.mark_producer_done();
                Ok(())
            }
            Transport::Pool(pool) => {
                pool.mark_producer_done();
                Ok(())
            }
            Transport::Callback(_) => Err(Error::Unsupported {
                op: "write_done",
                variant: "callback port",
            }),
        }
    }

    /// Abort the transport, waking every blocked reader and writer with
    /// [`Error::Aborted`]. No-op on callback ports.
    pub fn abort(&self) {
        match &self.inner.transport {
            Transport::Ring(ring) => ring.abort(),
            Transport::Pool(pool) => pool.abort(),
            Transport::Callback(_) => {}
        }
    }

    /// Restore the transport to its freshly constructed state.
    ///
    /// Fails with [`Error::InvalidState`] while callers are blocked on it.
    /// No-op on callback ports.
    pub fn reset(&self) -> Result<()> {
        match &self.inner.transport {
            Transport::Ring(ring) => ring.reset(),
            Transport::Pool(pool) => pool.reset(),
            Transport::Callback(_) => Ok(()),
        }
    }

    /// Total capacity in bytes. [`Error::Unsupported`] on callback ports.
    pub fn total_size(&self) -> Result<usize> {
        match &self.inner.transport {
            Transport::Ring(ring) => Ok(ring.capacity()),
            Transport::Pool(pool) => Ok(pool.frame_count() * pool.frame_capacity()),
            Transport::Callback(_) => Err(Error::Unsupported {
                op: "total_size",
                variant: "callback port",
            }),
        }
    }

    /// Bytes currently buffered and readable. [`Error::Unsupported`] on
    /// callback ports.
    pub fn filled(&self) -> Result<usize> {
        match &self.inner.transport {
            Transport::Ring(ring) => Ok(ring.bytes_filled()),
            Transport::Pool(pool) => Ok(pool.ready_bytes()),
            Transport::Callback(_) => Err(Error::Unsupported {
                op: "filled",
                variant: "callback port",
            }),
        }
    }

    /// Bytes currently writable without blocking. [`Error::Unsupported`]
    /// on callback ports.
    pub fn free(&self) -> Result<usize> {
        match &self.inner.transport {
            Transport::Ring(ring) => Ok(ring.bytes_free()),
            Transport::Pool(pool) => Ok(pool.free_count() * pool.frame_capacity()),
            Transport::Callback(_) => Err(Error::Unsupported {
                op: "free",
                variant: "callback port",
            }),
        }
    }

    /// Whether the writer has signalled end-of-stream. Always false for
    /// callback ports.
    pub fn is_producer_done(&self) -> bool {
        match &self.inner.transport {
            Transport::Ring(ring) => ring.is_producer_done(),
            Transport::Pool(pool) => pool.is_producer_done(),
            Transport::Callback(_) => false,
        }
    }

    /// Whether the transport is currently aborted. Always false for
    /// callback ports.
    pub fn is_aborted(&self) -> bool {
        match &self.inner.transport {
            Transport::Ring(ring) => ring.is_aborted(),
            Transport::Pool(pool) => pool.is_aborted(),
            Transport::Callback(_) => false,
        }
    }

    /// Which transport this port wraps.
    pub fn kind(&self) -> PortKind {
        match &self.inner.transport {
            Transport::Ring(_) => PortKind::Ring,
            Transport::Pool(_) => PortKind::Pool,
            Transport::Callback(_) => PortKind::Callback,
        }
    }

    /// The port's diagnostic tag, if one has been assigned.
    pub fn tag(&self) -> Option<String> {
        self.inner.tag.lock().unwrap().clone()
    }

    /// Assign a diagnostic tag, typically `"{element}_out_rb"` or
    /// `"{element}_out_fb"` when created by a pipeline link.
    pub fn set_tag(&self, tag: impl Into<String>) {
        *self.inner.tag.lock().unwrap() = Some(tag.into());
    }

    /// Tag of the element hosting this port's input side, for
    /// diagnostics. The port does not hold the element itself.
    pub fn element(&self) -> Option<String> {
        self.inner.element.lock().unwrap().clone()
    }

    /// Record which element hosts this port.
    pub fn set_element(&self, tag: impl Into<String>) {
        *self.inner.element.lock().unwrap() = Some(tag.into());
    }

    /// Whether `other` is a handle to the same underlying transport.
    pub fn same_transport(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("kind", &self.kind())
            .field("tag", &self.tag())
            .finish()
    }
}
