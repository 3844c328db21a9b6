//! Out-of-band reporting: status, position and stream-info events.
//!
//! Elements and pipelines publish [`Event`]s to an [`EventBus`]; the
//! application listens on the bus instead of polling element state. The
//! bus is a bounded queue so a slow or absent listener can never wedge
//! the data path: when full, new events displace less urgent old ones
//! (a stale position report is worthless, a terminal error is not).

use crate::error::{Error, Result};
use crate::timeout::Deadline;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Default event queue capacity used by pipelines.
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Externally visible status of an element, as carried by
/// [`EventPayload::StateChanged`].
///
/// Richer than the lifecycle state alone: the error statuses record which
/// phase of the element failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStatus {
    /// The element's task is processing data.
    Running,
    /// The element's task is parked, retaining buffered data.
    Paused,
    /// The element was stopped before its input finished.
    Stopped,
    /// The element consumed its entire input and closed normally.
    Finished,
    /// The processor failed to open.
    ErrorOpen,
    /// The processor returned a failure while processing.
    ErrorProcess,
    /// Reading from an input port failed.
    ErrorInput,
    /// Writing to an output port failed.
    ErrorOutput,
    /// The processor failed to close.
    ErrorClose,
}

impl ElementStatus {
    /// Whether this status ends the element's run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ElementStatus::Running | ElementStatus::Paused)
    }

    /// Whether this status reports a failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ElementStatus::ErrorOpen
                | ElementStatus::ErrorProcess
                | ElementStatus::ErrorInput
                | ElementStatus::ErrorOutput
                | ElementStatus::ErrorClose
        )
    }
}

/// Properties of the stream an element is producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamInfo {
    /// Samples per second, zero when unknown.
    pub sample_rate: u32,
    /// Channel count, zero when unknown.
    pub channels: u8,
    /// Bits per sample, zero when unknown.
    pub bits_per_sample: u8,
    /// Encoded bitrate in bits per second, zero when unknown.
    pub bitrate: u32,
    /// Total stream length in bytes, zero when unknown.
    pub total_bytes: u64,
}

/// Progress of an element through its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamPosition {
    /// Bytes consumed or produced so far.
    pub byte_pos: u64,
    /// Total stream length in bytes, zero when unknown.
    pub total_bytes: u64,
}

/// What an [`Event`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// The source changed status.
    StateChanged(ElementStatus),
    /// Periodic progress report.
    Position(StreamPosition),
    /// Stream properties became known or changed.
    Info(StreamInfo),
}

/// The report category of an event, derived from its payload so the two
/// can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCommand {
    /// A status change ([`EventPayload::StateChanged`]).
    ReportStatus,
    /// A progress report ([`EventPayload::Position`]).
    ReportPosition,
    /// A stream-properties report ([`EventPayload::Info`]).
    ReportInfo,
}

/// Who published an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// An individual element.
    Element,
    /// A pipeline, reporting on behalf of the whole graph.
    Pipeline,
}

/// A single report published to an [`EventBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Tag of the element or name of the pipeline that published this.
    pub source: String,
    /// Whether `source` names an element or a pipeline.
    pub source_kind: SourceKind,
    /// The report itself.
    pub payload: EventPayload,
}

impl Event {
    /// An event published by the element tagged `source`.
    pub fn element(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            source: source.into(),
            source_kind: SourceKind::Element,
            payload,
        }
    }

    /// An event published by the pipeline named `source`.
    pub fn pipeline(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            source: source.into(),
            source_kind: SourceKind::Pipeline,
            payload,
        }
    }

    /// The report category of this event.
    pub fn command(&self) -> EventCommand {
        match &self.payload {
            EventPayload::StateChanged(_) => EventCommand::ReportStatus,
            EventPayload::Position(_) => EventCommand::ReportPosition,
            EventPayload::Info(_) => EventCommand::ReportInfo,
        }
    }

    fn class(&self) -> EventClass {
        match &self.payload {
            EventPayload::Position(_) => EventClass::Position,
            EventPayload::Info(_) => EventClass::Info,
            EventPayload::StateChanged(status) if !status.is_terminal() => EventClass::Transition,
            EventPayload::StateChanged(_) => EventClass::Terminal,
        }
    }
}

/// Urgency ordering used when a full bus must make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventClass {
    Position,
    Info,
    Transition,
    Terminal,
}

/// Counters describing a bus's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    /// Events accepted onto the queue.
    pub posted: u64,
    /// Events handed to listeners.
    pub delivered: u64,
    /// Old events displaced by more urgent new ones.
    pub evicted: u64,
    /// New events discarded because nothing on the queue was less urgent.
    pub dropped: u64,
}

/// Bounded, eviction-on-overflow event queue.
///
/// Cloning is cheap and yields another handle to the same queue;
/// publishers and the listener each hold a clone.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    state: Mutex<BusState>,
    available: Condvar,
}

struct BusState {
    queue: VecDeque<Event>,
    capacity: usize,
    stats: BusStats,
}

impl EventBus {
    /// Create a bus holding at most `capacity` undelivered events.
    ///
    /// Fails with [`Error::InvalidArgument`] when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "event bus capacity must be non-zero".into(),
            ));
        }
        Ok(Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState {
                    queue: VecDeque::with_capacity(capacity),
                    capacity,
                    stats: BusStats::default(),
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Publish an event. Never blocks.
    ///
    /// When the queue is full, the oldest event of strictly lower urgency
    /// is evicted; failing that, a low-urgency event displaces its own
    /// oldest peer (a fresh position report supersedes a stale one);
    /// failing that, the incoming event is dropped.
    pub fn post(&self, event: Event) {
        let mut state = self.inner.state.lock().unwrap();
        if state.queue.len() >= state.capacity {
            let class = event.class();
            if let Some(pos) = state.queue.iter().position(|e| e.class() < class) {
                let victim = state.queue.remove(pos);
                debug!(
                    source = %event.source,
                    victim = ?victim.map(|e| e.source),
                    "event bus full, evicted less urgent event"
                );
                state.stats.evicted += 1;
            } else if class <= EventClass::Info {
                if let Some(pos) = state.queue.iter().position(|e| e.class() == class) {
                    state.queue.remove(pos);
                    state.stats.evicted += 1;
                } else {
                    state.stats.dropped += 1;
                    return;
                }
            } else {
                warn!(source = %event.source, "event bus full, dropped event");
                state.stats.dropped += 1;
                return;
            }
        }
        state.stats.posted += 1;
        state.queue.push_back(event);
        self.inner.available.notify_all();
    }

    /// Take the oldest event, blocking per `timeout`.
    ///
    /// `None` waits indefinitely; an expired deadline fails with
    /// [`Error::Timeout`].
    pub fn listen(&self, timeout: Option<Duration>) -> Result<Event> {
        let deadline = Deadline::new(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(event) = state.queue.pop_front() {
                state.stats.delivered += 1;
                return Ok(event);
            }
            state = match deadline.remaining() {
                None => self.inner.available.wait(state).unwrap(),
                Some(d) if d.is_zero() => return Err(Error::Timeout),
                Some(d) => self.inner.available.wait_timeout(state, d).unwrap().0,
            };
        }
    }

    /// Discard all undelivered events.
    pub fn clear(&self) {
        self.inner.state.lock().unwrap().queue.clear();
    }

    /// Undelivered events currently queued.
    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// True when no events are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum undelivered events the bus holds.
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().unwrap().capacity
    }

    /// Lifetime counters for this bus.
    pub fn stats(&self) -> BusStats {
        self.inner.state.lock().unwrap().stats
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("EventBus")
            .field("len", &state.queue.len())
            .field("capacity", &state.capacity)
            .field("stats", &state.stats)
            .finish()
    }
}
