//! Bounded pool of fixed-capacity frames with two-phase handoff.
//!
//! The frame pool is the whole-frame transport between pipeline stages.
//! `N` slots of `S` bytes each move between a free queue and a ready
//! queue:
//!
//! - producer: [`acquire_free`](FramePool::acquire_free) →
//!   fill → [`commit_ready`](FramePool::commit_ready)
//! - consumer: [`acquire_ready`](FramePool::acquire_ready) →
//!   consume → [`release_free`](FramePool::release_free)
//!
//! A checked-out [`Frame`] owns its slot's buffer outright, so at most one
//! side ever touches a frame's bytes. Frames are delivered in commit order
//! (FIFO) and producers block when the free queue is empty, which is the
//! backpressure path. Abort, producer-done and timeout semantics mirror
//! [`RingBuffer`](crate::ringbuf::RingBuffer).

use crate::error::{Error, Result};
use crate::timeout::Deadline;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::trace;

/// Inline capacity of a frame's metadata blob before it spills to the heap.
const META_INLINE: usize = 16;

/// Opaque per-frame metadata (e.g. a codec frame header).
pub type FrameMeta = SmallVec<[u8; META_INLINE]>;

/// A bounded pool of fixed-capacity, metadata-bearing frames.
///
/// Cloning is cheap and yields another handle to the same pool; the
/// producer and consumer sides each hold a clone.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    free_available: Condvar,
    ready_available: Condvar,
}

struct PoolState {
    slots: Box<[Slot]>,
    frame_capacity: usize,
    free: VecDeque<usize>,
    ready: VecDeque<usize>,
    ready_bytes: usize,
    aborted: bool,
    producer_done: bool,
    waiters: usize,
}

struct Slot {
    tag: SlotTag,
    // Parked while the slot is Free or Ready; owned by the Frame while
    // checked out.
    buf: Option<Box<[u8]>>,
    len: usize,
    meta: FrameMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotTag {
    Free,
    Ready,
    CheckedOut,
}

/// A frame checked out of a [`FramePool`].
///
/// Owns the slot's buffer while checked out; return it with
/// [`FramePool::commit_ready`] (producer side) or
/// [`FramePool::release_free`] (consumer side).
pub struct Frame {
    slot: usize,
    pool_id: usize,
    buf: Box<[u8]>,
    len: usize,
    meta: FrameMeta,
}

impl Frame {
    /// The valid bytes of this frame.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The frame's full backing storage, for filling.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Fixed capacity of the frame in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the frame holds no valid bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the number of valid bytes.
    ///
    /// Fails with [`Error::InvalidArgument`] when `len` exceeds the frame
    /// capacity.
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        if len > self.buf.len() {
            return Err(Error::InvalidArgument(format!(
                "frame length {len} exceeds capacity {}",
                self.buf.len()
            )));
        }
        self.len = len;
        Ok(())
    }

    /// The frame's metadata blob.
    pub fn meta(&self) -> &[u8] {
        &self.meta
    }

    /// Replace the frame's metadata blob.
    pub fn set_meta(&mut self, meta: &[u8]) {
        self.meta.clear();
        self.meta.extend_from_slice(meta);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("slot", &self.slot)
            .field("len", &self.len)
            .field("capacity", &self.buf.len())
            .field("meta_len", &self.meta.len())
            .finish()
    }
}

/// Failure to hand a frame back to a pool.
///
/// Converts into [`Error`] (losing the frame), so `?` still works in
/// code that has nothing useful to do with a refused frame.
#[derive(Debug, thiserror::Error)]
pub enum ReturnError {
    /// The frame does not belong to this pool, or its slot is not
    /// checked out. The frame comes back untouched so the caller can
    /// return it to its home pool and recover the slot.
    #[error("frame does not belong to this pool")]
    Rejected(Frame),
    /// The pool was aborted. The frame's data is discarded but its slot
    /// rejoins the free queue; the slot is never lost.
    #[error("operation aborted")]
    Aborted,
}

impl From<ReturnError> for Error {
    fn from(e: ReturnError) -> Self {
        match e {
            ReturnError::Rejected(_) => {
                Error::InvalidArgument("frame does not belong to this pool".into())
            }
            ReturnError::Aborted => Error::Aborted,
        }
    }
}

impl FramePool {
    /// Create a pool of `frame_count` frames of `frame_capacity` bytes each.
    ///
    /// Fails with [`Error::InvalidArgument`] when either is zero.
    pub fn new(frame_count: usize, frame_capacity: usize) -> Result<Self> {
        if frame_count == 0 || frame_capacity == 0 {
            return Err(Error::InvalidArgument(
                "frame pool dimensions must be non-zero".into(),
            ));
        }
        let slots: Vec<Slot> = (0..frame_count)
            .map(|_| Slot {
                tag: SlotTag::Free,
                buf: Some(vec![0u8; frame_capacity].into_boxed_slice()),
                len: 0,
                meta: FrameMeta::new(),
            })
            .collect();
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    slots: slots.into_boxed_slice(),
                    frame_capacity,
                    free: (0..frame_count).collect(),
                    ready: VecDeque::with_capacity(frame_count),
                    ready_bytes: 0,
                    aborted: false,
                    producer_done: false,
                    waiters: 0,
                }),
                free_available: Condvar::new(),
                ready_available: Condvar::new(),
            }),
        })
    }

    /// Check out an empty frame for filling, blocking while none are free.
    ///
    /// Errors: [`Error::Aborted`] once aborted, [`Error::Done`] after the
    /// producer marked completion, [`Error::Timeout`] on deadline expiry.
    pub fn acquire_free(&self, timeout: Option<Duration>) -> Result<Frame> {
        let deadline = Deadline::new(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if state.aborted {
                return Err(Error::Aborted);
            }
            if state.producer_done {
                return Err(Error::Done);
            }
            if let Some(idx) = state.free.pop_front() {
                return Ok(self.check_out(&mut state, idx));
            }
            state = self.wait(&self.inner.free_available, state, &deadline)?;
        }
    }

    /// Publish a filled frame to the consumer side. Non-blocking.
    ///
    /// A frame from another pool, or one whose slot is not checked out,
    /// is handed back in [`ReturnError::Rejected`]. Once aborted the
    /// frame's data is discarded, its slot returns to the free queue and
    /// the call fails with [`ReturnError::Aborted`]; the slot itself is
    /// never lost.
    pub fn commit_ready(&self, frame: Frame) -> std::result::Result<(), ReturnError> {
        let mut state = self.inner.state.lock().unwrap();
        let idx = self.check_in(&mut state, frame)?;
        if state.aborted {
            state.slots[idx].tag = SlotTag::Free;
            state.slots[idx].len = 0;
            state.slots[idx].meta.clear();
            state.free.push_back(idx);
            self.inner.free_available.notify_all();
            return Err(ReturnError::Aborted);
        }
        let len = state.slots[idx].len;
        state.slots[idx].tag = SlotTag::Ready;
        state.ready.push_back(idx);
        state.ready_bytes += len;
        self.inner.ready_available.notify_all();
        Ok(())
    }

    /// Take the oldest published frame, blocking while none are ready.
    ///
    /// Errors: [`Error::Aborted`] once aborted (this outranks residual
    /// frames), [`Error::Done`] when the producer marked completion and
    /// the ready queue has drained, [`Error::Timeout`] on deadline expiry.
    pub fn acquire_ready(&self, timeout: Option<Duration>) -> Result<Frame> {
        let deadline = Deadline::new(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if state.aborted {
                return Err(Error::Aborted);
            }
            if let Some(idx) = state.ready.pop_front() {
                state.ready_bytes -= state.slots[idx].len;
                return Ok(self.check_out(&mut state, idx));
            }
            if state.producer_done {
                return Err(Error::Done);
            }
            state = self.wait(&self.inner.ready_available, state, &deadline)?;
        }
    }

    /// Return a consumed frame to the free queue. Non-blocking.
    ///
    /// Clears the frame's length and metadata. A frame from another pool
    /// is handed back in [`ReturnError::Rejected`]. Works on an aborted
    /// pool, so frames already out can always come home.
    pub fn release_free(&self, frame: Frame) -> std::result::Result<(), ReturnError> {
        let mut state = self.inner.state.lock().unwrap();
        let idx = self.check_in(&mut state, frame)?;
        state.slots[idx].tag = SlotTag::Free;
        state.slots[idx].len = 0;
        state.slots[idx].meta.clear();
        state.free.push_back(idx);
        self.inner.free_available.notify_all();
        Ok(())
    }

    /// Put a frame back at the head of the ready queue, undoing an
    /// `acquire_ready`. Used when a consumer cannot accept the frame.
    pub(crate) fn requeue_ready(&self, frame: Frame) -> std::result::Result<(), ReturnError> {
        let mut state = self.inner.state.lock().unwrap();
        let idx = self.check_in(&mut state, frame)?;
        let len = state.slots[idx].len;
        state.slots[idx].tag = SlotTag::Ready;
        state.ready.push_front(idx);
        state.ready_bytes += len;
        self.inner.ready_available.notify_all();
        Ok(())
    }

    /// Mark that no more frames will ever be committed.
    ///
    /// Irreversible until [`reset`](Self::reset). Consumers drain what is
    /// ready and then see [`Error::Done`]; further `acquire_free` calls
    /// fail with [`Error::Done`]. Idempotent.
    pub fn mark_producer_done(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.producer_done {
            state.producer_done = true;
            trace!("frame pool marked done");
        }
        self.inner.free_available.notify_all();
        self.inner.ready_available.notify_all();
    }

    /// Abort the pool, waking every blocked caller with [`Error::Aborted`].
    ///
    /// Level-triggered: current and future callers fail until
    /// [`reset`](Self::reset). Idempotent.
    pub fn abort(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if !state.aborted {
            state.aborted = true;
            trace!("frame pool aborted");
        }
        self.inner.free_available.notify_all();
        self.inner.ready_available.notify_all();
    }

    /// Move every ready frame back to the free queue and clear the abort
    /// and done flags, restoring a freshly constructed pool.
    ///
    /// Fails with [`Error::InvalidState`] while callers are blocked or any
    /// frame is still checked out.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        if state.waiters > 0 {
            return Err(Error::InvalidState(
                "frame pool reset with blocked callers".into(),
            ));
        }
        if state.free.len() + state.ready.len() < state.slots.len() {
            return Err(Error::InvalidState(
                "frame pool reset with frames checked out".into(),
            ));
        }
        while let Some(idx) = state.ready.pop_front() {
            state.slots[idx].tag = SlotTag::Free;
            state.slots[idx].len = 0;
            state.slots[idx].meta.clear();
            state.free.push_back(idx);
        }
        state.ready_bytes = 0;
        state.aborted = false;
        state.producer_done = false;
        Ok(())
    }

    /// Number of frames in the pool.
    pub fn frame_count(&self) -> usize {
        self.inner.state.lock().unwrap().slots.len()
    }

    /// Fixed capacity of each frame in bytes.
    pub fn frame_capacity(&self) -> usize {
        self.inner.state.lock().unwrap().frame_capacity
    }

    /// Frames currently available to producers.
    pub fn free_count(&self) -> usize {
        self.inner.state.lock().unwrap().free.len()
    }

    /// Frames currently awaiting consumption.
    pub fn ready_count(&self) -> usize {
        self.inner.state.lock().unwrap().ready.len()
    }

    /// Frames currently checked out by callers.
    pub fn checked_out_count(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.slots.len() - state.free.len() - state.ready.len()
    }

    /// Total valid bytes across the ready queue.
    pub fn ready_bytes(&self) -> usize {
        self.inner.state.lock().unwrap().ready_bytes
    }

    /// Whether the producer has marked completion.
    pub fn is_producer_done(&self) -> bool {
        self.inner.state.lock().unwrap().producer_done
    }

    /// Whether the pool is currently aborted.
    pub fn is_aborted(&self) -> bool {
        self.inner.state.lock().unwrap().aborted
    }

    fn pool_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn check_out(&self, state: &mut PoolState, idx: usize) -> Frame {
        let slot = &mut state.slots[idx];
        slot.tag = SlotTag::CheckedOut;
        Frame {
            slot: idx,
            pool_id: self.pool_id(),
            // The buffer is always parked while the slot is queued.
            buf: slot.buf.take().unwrap_or_default(),
            len: slot.len,
            meta: std::mem::take(&mut slot.meta),
        }
    }

    /// Validate a returning frame and park its buffer back in the slot.
    /// A frame this pool does not own comes back in the error.
    fn check_in(
        &self,
        state: &mut PoolState,
        frame: Frame,
    ) -> std::result::Result<usize, ReturnError> {
        if frame.pool_id != self.pool_id()
            || frame.slot >= state.slots.len()
            || state.slots[frame.slot].tag != SlotTag::CheckedOut
        {
            return Err(ReturnError::Rejected(frame));
        }
        let idx = frame.slot;
        state.slots[idx].buf = Some(frame.buf);
        state.slots[idx].len = frame.len;
        state.slots[idx].meta = frame.meta;
        Ok(idx)
    }

    fn wait<'a>(
        &self,
        condvar: &Condvar,
        mut state: std::sync::MutexGuard<'a, PoolState>,
        deadline: &Deadline,
    ) -> Result<std::sync::MutexGuard<'a, PoolState>> {
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

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("FramePool")
            .field("frames", &state.slots.len())
            .field("free", &state.free.len())
            .field("ready", &state.ready.len())
            .field("aborted", &state.aborted)
            .field("producer_done", &state.producer_done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn conservation_holds(pool: &FramePool) -> bool {
        pool.free_count() + pool.ready_count() + pool.checked_out_count() == pool.frame_count()
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(matches!(FramePool::new(0, 16), Err(Error::InvalidArgument(_))));
        assert!(matches!(FramePool::new(4, 0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_two_phase_handoff() {
        let pool = FramePool::new(2, 8).unwrap();
        let mut frame = pool.acquire_free(None).unwrap();
        frame.data_mut()[..3].copy_from_slice(b"abc");
        frame.set_len(3).unwrap();
        frame.set_meta(&[0x01]);
        assert!(conservation_holds(&pool));
        pool.commit_ready(frame).unwrap();
        assert_eq!(pool.ready_count(), 1);
        assert_eq!(pool.ready_bytes(), 3);

        let frame = pool.acquire_ready(None).unwrap();
        assert_eq!(frame.data(), b"abc");
        assert_eq!(frame.meta(), &[0x01]);
        pool.release_free(frame).unwrap();
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.ready_bytes(), 0);
        assert!(conservation_holds(&pool));
    }

    #[test]
    fn test_release_clears_length_and_meta() {
        let pool = FramePool::new(1, 8).unwrap();
        let mut frame = pool.acquire_free(None).unwrap();
        frame.set_len(5).unwrap();
        frame.set_meta(b"meta");
        pool.commit_ready(frame).unwrap();
        let frame = pool.acquire_ready(None).unwrap();
        pool.release_free(frame).unwrap();

        let frame = pool.acquire_free(None).unwrap();
        assert_eq!(frame.len(), 0);
        assert!(frame.is_empty());
        assert!(frame.meta().is_empty());
        pool.release_free(frame).unwrap();
    }

    #[test]
    fn test_fifo_commit_order() {
        let pool = FramePool::new(4, 8).unwrap();
        for seq in 0..4u8 {
            let mut frame = pool.acquire_free(None).unwrap();
            frame.data_mut()[0] = seq;
            frame.set_len(1).unwrap();
            pool.commit_ready(frame).unwrap();
        }
        for seq in 0..4u8 {
            let frame = pool.acquire_ready(None).unwrap();
            assert_eq!(frame.data()[0], seq);
            pool.release_free(frame).unwrap();
        }
    }

    #[test]
    fn test_set_len_beyond_capacity_rejected() {
        let pool = FramePool::new(1, 8).unwrap();
        let mut frame = pool.acquire_free(None).unwrap();
        assert!(matches!(frame.set_len(9), Err(Error::InvalidArgument(_))));
        pool.release_free(frame).unwrap();
    }

    #[test]
    fn test_foreign_frame_rejected_and_recoverable() {
        let pool_a = FramePool::new(1, 8).unwrap();
        let pool_b = FramePool::new(1, 8).unwrap();
        let frame = pool_a.acquire_free(None).unwrap();
        // The rejecting pool hands the frame back untouched.
        let frame = match pool_b.commit_ready(frame) {
            Err(ReturnError::Rejected(frame)) => frame,
            other => panic!("expected rejection, got {other:?}"),
        };
        assert_eq!(pool_a.checked_out_count(), 1);
        // The home pool gets its slot back.
        pool_a.release_free(frame).unwrap();
        assert_eq!(pool_a.checked_out_count(), 0);
        assert_eq!(pool_a.free_count(), 1);
    }

    #[test]
    fn test_acquire_free_blocks_until_release() {
        let pool = FramePool::new(1, 8).unwrap();
        let held = pool.acquire_free(None).unwrap();

        let producer = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire_free(Some(Duration::from_secs(5))).map(|f| f.capacity()))
        };

        thread::sleep(Duration::from_millis(50));
        pool.release_free(held).unwrap();
        assert_eq!(producer.join().unwrap().unwrap(), 8);
    }

    #[test]
    fn test_acquire_ready_times_out_when_empty() {
        let pool = FramePool::new(1, 8).unwrap();
        let start = Instant::now();
        let err = pool.acquire_ready(Some(Duration::from_millis(30))).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_done_then_drain_returns_done() {
        let pool = FramePool::new(2, 8).unwrap();
        let mut frame = pool.acquire_free(None).unwrap();
        frame.set_len(2).unwrap();
        pool.commit_ready(frame).unwrap();
        pool.mark_producer_done();

        // Residual frame still delivered, then Done.
        let frame = pool.acquire_ready(Some(Duration::ZERO)).unwrap();
        pool.release_free(frame).unwrap();
        assert!(matches!(
            pool.acquire_ready(Some(Duration::ZERO)),
            Err(Error::Done)
        ));
        assert!(matches!(
            pool.acquire_free(Some(Duration::ZERO)),
            Err(Error::Done)
        ));
    }

    #[test]
    fn test_abort_wakes_both_sides() {
        let pool = FramePool::new(1, 8).unwrap();
        let held = pool.acquire_free(None).unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                pool.acquire_free(Some(Duration::from_secs(10))).err()
            }));
        }
        for _ in 0..2 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || {
                pool.acquire_ready(Some(Duration::from_secs(10))).err()
            }));
        }

        thread::sleep(Duration::from_millis(50));
        let start = Instant::now();
        pool.abort();
        for h in handles {
            assert!(matches!(h.join().unwrap(), Some(Error::Aborted)));
        }
        assert!(start.elapsed() < Duration::from_secs(2));

        // Committing after abort fails but still reclaims the slot.
        assert!(matches!(pool.commit_ready(held), Err(ReturnError::Aborted)));
        assert_eq!(pool.checked_out_count(), 0);
        pool.reset().unwrap();
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_conservation_under_concurrency() {
        let pool = FramePool::new(3, 16).unwrap();
        let producer = {
            let pool = pool.clone();
            thread::spawn(move || {
                for seq in 0..100u8 {
                    let mut frame = pool.acquire_free(None).unwrap();
                    frame.data_mut()[0] = seq;
                    frame.set_len(1).unwrap();
                    pool.commit_ready(frame).unwrap();
                }
                pool.mark_producer_done();
            })
        };
        let checker = {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    assert!(conservation_holds(&pool));
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };

        let mut next = 0u8;
        loop {
            match pool.acquire_ready(Some(Duration::from_secs(5))) {
                Ok(frame) => {
                    assert_eq!(frame.data()[0], next);
                    next = next.wrapping_add(1);
                    pool.release_free(frame).unwrap();
                }
                Err(Error::Done) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(next, 100);
        producer.join().unwrap();
        checker.join().unwrap();
        assert!(conservation_holds(&pool));
    }

    #[test]
    fn test_reset_restores_fresh_pool() {
        let pool = FramePool::new(2, 8).unwrap();
        let mut frame = pool.acquire_free(None).unwrap();
        frame.set_len(4).unwrap();
        pool.commit_ready(frame).unwrap();
        pool.mark_producer_done();
        pool.abort();

        pool.reset().unwrap();
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.ready_count(), 0);
        assert_eq!(pool.ready_bytes(), 0);
        assert!(!pool.is_aborted());
        assert!(!pool.is_producer_done());

        let mut frame = pool.acquire_free(None).unwrap();
        assert!(frame.is_empty());
        frame.set_len(1).unwrap();
        pool.commit_ready(frame).unwrap();
        assert_eq!(pool.ready_count(), 1);
    }

    #[test]
    fn test_reset_rejected_with_frame_out() {
        let pool = FramePool::new(2, 8).unwrap();
        let frame = pool.acquire_free(None).unwrap();
        assert!(matches!(pool.reset(), Err(Error::InvalidState(_))));
        pool.release_free(frame).unwrap();
        pool.reset().unwrap();
    }
}
