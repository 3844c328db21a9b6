//! Processing elements: the active stages of a pipeline.
//!
//! An [`Element`] owns a [`Processor`] and, usually, a dedicated task
//! thread that drives it. The element wires the processor to its input
//! and output [`Port`]s through an [`ElementIo`] handle, runs the
//! lifecycle state machine, and reports status on an [`EventBus`]
//! listener when one is attached.
//!
//! Lifecycle is two-phase: [`run`](Element::run) spawns the task parked
//! in [`Paused`](ElementState::Paused), and [`resume`](Element::resume)
//! opens the processor and starts data flow. [`stop`](Element::stop)
//! aborts the element's ports first so any blocked read or write wakes
//! with [`Error::Aborted`], then queues the stop for the task.

mod io;
mod task;

pub use io::ElementIo;

use crate::error::{Error, Result};
use crate::event::{ElementStatus, EventBus, StreamInfo, StreamPosition};
use crate::port::{Port, PortKind};
use crate::timeout::Deadline;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use task::Command;
use tracing::{debug, error};

/// Default size of an element's working buffer in bytes.
pub const DEFAULT_BUFFER_LEN: usize = 2048;

/// Default capacity of a ring-buffer link transport in bytes.
pub const DEFAULT_RING_CAPACITY: usize = 4096;

/// Default frame count of a frame-pool link transport.
pub const DEFAULT_FRAME_COUNT: usize = 4;

/// Default per-frame capacity of a frame-pool link transport in bytes.
pub const DEFAULT_FRAME_CAPACITY: usize = 1024;

/// Default grace period for task teardown.
pub const DEFAULT_TERMINATE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Lifecycle state of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementState {
    /// Construction has not completed.
    #[default]
    Uninitialized,
    /// Configured and ready to run.
    Initialized,
    /// Task spawned (or transitions armed) but data flow not started.
    Paused,
    /// Processing data.
    Running,
    /// Stopped before the input finished.
    Stopped,
    /// Consumed the entire input and closed normally.
    Finished,
    /// Failed; see the reported [`ElementStatus`] for the phase.
    Error,
}

impl ElementState {
    /// Whether this state ends a run. Terminal states only leave via
    /// [`Element::reset_state`].
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ElementState::Stopped | ElementState::Finished | ElementState::Error
        )
    }

    /// Whether the element is between `run` and a terminal state.
    pub fn is_active(self) -> bool {
        matches!(self, ElementState::Running | ElementState::Paused)
    }
}

/// Which transport a pipeline link creates downstream of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSpec {
    /// Byte ring buffer of `capacity` bytes.
    Ring {
        /// Ring capacity in bytes.
        capacity: usize,
    },
    /// Frame pool of `frame_count` frames of `frame_capacity` bytes.
    Pool {
        /// Number of frames.
        frame_count: usize,
        /// Per-frame capacity in bytes.
        frame_capacity: usize,
    },
}

impl Default for TransportSpec {
    fn default() -> Self {
        TransportSpec::Ring {
            capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

impl TransportSpec {
    pub(crate) fn build(&self) -> Result<Port> {
        match *self {
            TransportSpec::Ring { capacity } => Port::ring(capacity),
            TransportSpec::Pool {
                frame_count,
                frame_capacity,
            } => Port::pool(frame_count, frame_capacity),
        }
    }

    pub(crate) fn tag_suffix(&self) -> &'static str {
        match self {
            TransportSpec::Ring { .. } => "out_rb",
            TransportSpec::Pool { .. } => "out_fb",
        }
    }
}

/// Task-thread options for an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOptions {
    /// Spawn a dedicated task thread. Disable for passive elements whose
    /// ports are driven entirely by neighbours or the application.
    pub enabled: bool,
    /// Stack size for the task thread, or the platform default.
    pub stack_size: Option<usize>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stack_size: None,
        }
    }
}

/// Construction-time configuration of an [`Element`].
///
/// When an element reads from a frame-pool port, `buffer_len` must be at
/// least the pool's frame capacity or reads will fail with
/// [`Error::InvalidArgument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementConfig {
    /// Size of the working buffer handed to the processor, in bytes.
    pub buffer_len: usize,
    /// Task-thread options.
    pub task: TaskOptions,
    /// Transport a pipeline link creates on this element's output side.
    pub out_transport: TransportSpec,
    /// Timeout for input-port reads; `None` waits forever.
    pub input_timeout: Option<Duration>,
    /// Timeout for output-port writes; `None` waits forever.
    pub output_timeout: Option<Duration>,
}

impl Default for ElementConfig {
    fn default() -> Self {
        Self {
            buffer_len: DEFAULT_BUFFER_LEN,
            task: TaskOptions::default(),
            out_transport: TransportSpec::default(),
            input_timeout: None,
            output_timeout: None,
        }
    }
}

impl ElementConfig {
    /// Configuration with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working buffer size.
    pub fn buffer_len(mut self, len: usize) -> Self {
        self.buffer_len = len;
        self
    }

    /// Set the task options.
    pub fn task(mut self, task: TaskOptions) -> Self {
        self.task = task;
        self
    }

    /// Set the link transport created downstream of this element.
    pub fn out_transport(mut self, spec: TransportSpec) -> Self {
        self.out_transport = spec;
        self
    }

    /// Set the input-read timeout. A bursty upstream then surfaces as
    /// retried [`Error::Timeout`](crate::error::Error::Timeout) rounds
    /// instead of an indefinitely parked task.
    pub fn input_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.input_timeout = timeout;
        self
    }

    /// Set the output-write timeout, independently of the input side.
    pub fn output_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.output_timeout = timeout;
        self
    }
}

/// The data-handling half of an element.
///
/// `open` and `close` bracket a run; `process` performs one round of
/// work, reading and writing through `io` with blocking calls. The
/// driver interprets the result of `process`:
///
/// - `Ok(n)`: `n` bytes were produced; keep going. `Ok(0)` also keeps
///   going, for rounds that buffer internally.
/// - `Err(`[`Error::Done`]`)`: input is exhausted. Outputs are marked
///   done, the processor is closed and the element finishes.
/// - `Err(`[`Error::Aborted`]`)`: a port was aborted, normally by a
///   stop in flight. The element stops.
/// - `Err(`[`Error::Timeout`]`)`: nothing this round; retried.
/// - Any other error fails the element.
///
/// A `close` failure during a normal finish fails the element too, so
/// `close` should only error when teardown genuinely went wrong.
pub trait Processor: Send + 'static {
    /// Prepare for a run. Called once before the first `process` of a
    /// run, never twice without an intervening `close`.
    fn open(&mut self, io: &ElementIo) -> Result<()> {
        let _ = io;
        Ok(())
    }

    /// Perform one round of work.
    fn process(&mut self, io: &ElementIo) -> Result<usize>;

    /// Tear down after a run.
    fn close(&mut self, io: &ElementIo) -> Result<()> {
        let _ = io;
        Ok(())
    }
}

/// A pipeline stage: a [`Processor`] plus ports, task and state machine.
///
/// Cloning is cheap and yields another handle to the same element.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

struct ElementInner {
    config: ElementConfig,
    io: ElementIo,
    state: Mutex<ElementState>,
    state_changed: Condvar,
    opened: Mutex<bool>,
    processor: Mutex<Box<dyn Processor>>,
    cmd_tx: Sender<Command>,
    cmd_rx: Receiver<Command>,
    task: Mutex<TaskState>,
    task_exited: Condvar,
}

#[derive(Default)]
struct TaskState {
    handle: Option<JoinHandle<()>>,
    exited: bool,
}

impl Element {
    /// Create an element around `processor`.
    ///
    /// The element starts in [`ElementState::Initialized`] with no ports
    /// attached. Fails with [`Error::InvalidArgument`] on an empty tag or
    /// a zero `buffer_len`.
    pub fn new(
        tag: impl Into<String>,
        processor: impl Processor,
        config: ElementConfig,
    ) -> Result<Self> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(Error::InvalidArgument("element tag must be non-empty".into()));
        }
        if config.buffer_len == 0 {
            return Err(Error::InvalidArgument(
                "element buffer_len must be non-zero".into(),
            ));
        }
        let (cmd_tx, cmd_rx) = unbounded();
        let io = ElementIo::new(tag, config.buffer_len);
        io.set_timeouts(config.input_timeout, config.output_timeout);
        Ok(Self {
            inner: Arc::new(ElementInner {
                io,
                config,
                state: Mutex::new(ElementState::Initialized),
                state_changed: Condvar::new(),
                opened: Mutex::new(false),
                processor: Mutex::new(Box::new(processor)),
                cmd_tx,
                cmd_rx,
                task: Mutex::new(TaskState::default()),
                task_exited: Condvar::new(),
            }),
        })
    }

    /// The element's tag.
    pub fn tag(&self) -> String {
        self.inner.io.tag()
    }

    /// Rename the element. Pipelines do this on registration.
    pub fn set_tag(&self, tag: impl Into<String>) {
        self.inner.io.set_tag(tag);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ElementState {
        *self.inner.state.lock().unwrap()
    }

    /// Progress through the stream, as accumulated by the driver.
    pub fn position(&self) -> StreamPosition {
        self.inner.io.position()
    }

    /// Stream properties last published through [`ElementIo::set_info`].
    pub fn info(&self) -> StreamInfo {
        self.inner.io.info()
    }

    /// Attach the event bus this element reports on.
    pub fn set_listener(&self, bus: EventBus) {
        self.inner.io.set_listener(bus);
    }

    /// Adjust the I/O timeouts of a live element. Takes effect from the
    /// next processing round.
    pub fn set_io_timeouts(&self, input: Option<Duration>, output: Option<Duration>) {
        self.inner.io.set_timeouts(input, output);
    }

    // ---- port wiring ----------------------------------------------------

    /// Set the primary input port.
    ///
    /// Fails with [`Error::InvalidState`] while the element is active.
    pub fn set_input_port(&self, port: Port) -> Result<()> {
        self.ensure_not_active("set input port")?;
        self.inner.io.set_input(port);
        Ok(())
    }

    /// Add a secondary input port with a priority; lower values are
    /// served first.
    ///
    /// Callback ports cannot be balanced against others and are rejected
    /// with [`Error::InvalidArgument`].
    pub fn add_input_port(&self, port: Port, priority: u8) -> Result<()> {
        self.ensure_not_active("add input port")?;
        if port.kind() == PortKind::Callback {
            return Err(Error::InvalidArgument(
                "callback ports cannot join a multi-input set".into(),
            ));
        }
        self.inner.io.add_input(port, priority);
        Ok(())
    }

    /// Set the primary output port.
    ///
    /// Fails with [`Error::InvalidState`] while the element is active.
    pub fn set_output_port(&self, port: Port) -> Result<()> {
        self.ensure_not_active("set output port")?;
        self.inner.io.set_output(port);
        Ok(())
    }

    /// Add a secondary output port, written by [`ElementIo::write_aux`]
    /// and [`ElementIo::fanout`].
    pub fn add_output_port(&self, port: Port) -> Result<()> {
        self.ensure_not_active("add output port")?;
        self.inner.io.add_output(port);
        Ok(())
    }

    /// The primary input port, if wired.
    pub fn input_port(&self) -> Option<Port> {
        self.inner.io.input(0)
    }

    /// The primary output port, if wired.
    pub fn output_port(&self) -> Option<Port> {
        self.inner.io.output(0)
    }

    fn ensure_not_active(&self, op: &str) -> Result<()> {
        let state = self.state();
        if state.is_active() {
            return Err(Error::InvalidState(format!(
                "cannot {op} while element '{}' is {state:?}",
                self.tag()
            )));
        }
        Ok(())
    }

    // ---- lifecycle ------------------------------------------------------

    /// Spawn the element's task, parked in [`ElementState::Paused`].
    ///
    /// Data does not flow until [`resume`](Self::resume). Ok when already
    /// run; fails with [`Error::InvalidState`] from a terminal state.
    pub fn run(&self) -> Result<()> {
        match self.state() {
            ElementState::Initialized => {}
            ElementState::Paused | ElementState::Running => return Ok(()),
            state => {
                return Err(Error::InvalidState(format!(
                    "cannot run element '{}' from {state:?}",
                    self.tag()
                )))
            }
        }
        // Stale commands from a previous run must not leak into this one.
        while self.inner.cmd_rx.try_recv().is_ok() {}
        if self.inner.config.task.enabled {
            self.spawn_task()?;
        }
        self.set_state(ElementState::Paused);
        Ok(())
    }

    /// Open the processor if needed and start data flow.
    ///
    /// Ok when already running; fails with [`Error::InvalidState`] unless
    /// the element is paused.
    pub fn resume(&self) -> Result<()> {
        match self.state() {
            ElementState::Running => Ok(()),
            ElementState::Paused => {
                if self.task_spawned() {
                    self.send_command(Command::Resume)
                } else {
                    self.sync_resume()
                }
            }
            state => Err(Error::InvalidState(format!(
                "cannot resume element '{}' from {state:?}",
                self.tag()
            ))),
        }
    }

    /// Park the task, retaining all buffered data.
    ///
    /// Ok when already paused; fails with [`Error::InvalidState`] unless
    /// the element is running.
    pub fn pause(&self) -> Result<()> {
        match self.state() {
            ElementState::Paused => Ok(()),
            ElementState::Running => {
                if self.task_spawned() {
                    self.send_command(Command::Pause)
                } else {
                    self.transition(ElementState::Paused, ElementStatus::Paused);
                    Ok(())
                }
            }
            state => Err(Error::InvalidState(format!(
                "cannot pause element '{}' from {state:?}",
                self.tag()
            ))),
        }
    }

    /// Stop the element, discarding in-flight data.
    ///
    /// Aborts the element's ports first, so a task blocked in port I/O
    /// wakes immediately, then queues the stop. Idempotent on terminal
    /// states. Note that aborting shared link ports also wakes the
    /// neighbouring elements; stopping one element mid-pipeline stops
    /// the stream.
    pub fn stop(&self) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Ok(());
        }
        if state == ElementState::Uninitialized {
            return Err(Error::InvalidState(format!(
                "cannot stop element '{}' before initialization",
                self.tag()
            )));
        }
        self.inner.io.abort_ports();
        if self.task_spawned() {
            self.send_command(Command::Stop)
        } else {
            self.sync_stop();
            Ok(())
        }
    }

    /// Block until the element reaches a terminal state.
    pub fn wait_until_terminal(&self, timeout: Option<Duration>) -> Result<ElementState> {
        let deadline = Deadline::new(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if state.is_terminal() {
                return Ok(*state);
            }
            state = match deadline.remaining() {
                None => self.inner.state_changed.wait(state).unwrap(),
                Some(d) if d.is_zero() => return Err(Error::Timeout),
                Some(d) => self.inner.state_changed.wait_timeout(state, d).unwrap().0,
            };
        }
    }

    /// Block until the element reaches `want`.
    pub fn wait_for_state(&self, want: ElementState, timeout: Option<Duration>) -> Result<()> {
        let deadline = Deadline::new(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if *state == want {
                return Ok(());
            }
            state = match deadline.remaining() {
                None => self.inner.state_changed.wait(state).unwrap(),
                Some(d) if d.is_zero() => return Err(Error::Timeout),
                Some(d) => self.inner.state_changed.wait_timeout(state, d).unwrap().0,
            };
        }
    }

    /// Stop the element and tear its task down, joining the thread.
    ///
    /// Fails with [`Error::Timeout`] when the task does not exit within
    /// `timeout`; the task keeps its thread in that case and a later
    /// terminate may be retried.
    pub fn terminate(&self, timeout: Option<Duration>) -> Result<()> {
        if !self.task_spawned() {
            if !self.state().is_terminal() && self.state() != ElementState::Uninitialized {
                self.inner.io.abort_ports();
                self.sync_stop();
            }
            return Ok(());
        }
        self.inner.io.abort_ports();
        self.send_command(Command::Destroy)?;

        let deadline = Deadline::new(timeout);
        let mut task = self.inner.task.lock().unwrap();
        while !task.exited {
            task = match deadline.remaining() {
                None => self.inner.task_exited.wait(task).unwrap(),
                Some(d) if d.is_zero() => return Err(Error::Timeout),
                Some(d) => self.inner.task_exited.wait_timeout(task, d).unwrap().0,
            };
        }
        if let Some(handle) = task.handle.take() {
            drop(task);
            if handle.join().is_err() {
                error!(tag = %self.tag(), "element task panicked");
            }
        }
        Ok(())
    }

    /// Return a terminal element to [`ElementState::Initialized`] so it
    /// can run again.
    ///
    /// Does not touch ports; a pipeline reset restores those. Fails with
    /// [`Error::InvalidState`] while the element is active.
    pub fn reset_state(&self) -> Result<()> {
        let mut state = self.inner.state.lock().unwrap();
        match *state {
            ElementState::Initialized => Ok(()),
            s if s.is_terminal() => {
                *state = ElementState::Initialized;
                self.inner.state_changed.notify_all();
                Ok(())
            }
            s => Err(Error::InvalidState(format!(
                "cannot reset element '{}' from {s:?}",
                self.tag()
            ))),
        }
    }

    // ---- internals ------------------------------------------------------

    pub(crate) fn io(&self) -> &ElementIo {
        &self.inner.io
    }

    pub(crate) fn out_transport(&self) -> TransportSpec {
        self.inner.config.out_transport
    }

    fn task_spawned(&self) -> bool {
        self.inner.task.lock().unwrap().handle.is_some()
    }

    fn spawn_task(&self) -> Result<()> {
        let mut task = self.inner.task.lock().unwrap();
        if task.handle.is_some() {
            return Ok(());
        }
        task.exited = false;
        let element = self.clone();
        let mut builder = std::thread::Builder::new().name(format!("el-{}", self.tag()));
        if let Some(stack_size) = self.inner.config.task.stack_size {
            builder = builder.stack_size(stack_size);
        }
        task.handle = Some(builder.spawn(move || task::run_loop(&element))?);
        Ok(())
    }

    fn send_command(&self, cmd: Command) -> Result<()> {
        self.inner
            .cmd_tx
            .send(cmd)
            .map_err(|_| Error::InvalidState(format!("element '{}' task is gone", self.tag())))
    }

    fn sync_resume(&self) -> Result<()> {
        match self.ensure_open() {
            Ok(()) => {
                self.transition(ElementState::Running, ElementStatus::Running);
                Ok(())
            }
            Err(e) => {
                error!(tag = %self.tag(), error = %e, "processor open failed");
                self.inner.io.abort_ports();
                self.transition(ElementState::Error, ElementStatus::ErrorOpen);
                Err(e)
            }
        }
    }

    fn sync_stop(&self) {
        match self.close_if_open() {
            Ok(()) => self.transition(ElementState::Stopped, ElementStatus::Stopped),
            Err(e) => {
                error!(tag = %self.tag(), error = %e, "processor close failed");
                self.transition(ElementState::Error, ElementStatus::ErrorClose);
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        let mut opened = self.inner.opened.lock().unwrap();
        if *opened {
            return Ok(());
        }
        let mut processor = self.inner.processor.lock().unwrap();
        processor.open(&self.inner.io)?;
        // Position restarts with the run; totals set during open survive.
        self.inner.io.reset_position();
        *opened = true;
        Ok(())
    }

    fn close_if_open(&self) -> Result<()> {
        let mut opened = self.inner.opened.lock().unwrap();
        if !*opened {
            return Ok(());
        }
        *opened = false;
        let mut processor = self.inner.processor.lock().unwrap();
        processor.close(&self.inner.io)
    }

    fn set_state(&self, next: ElementState) {
        let mut state = self.inner.state.lock().unwrap();
        if *state != next {
            debug!(tag = %self.tag(), from = ?*state, to = ?next, "element state change");
            *state = next;
        }
        self.inner.state_changed.notify_all();
    }

    fn transition(&self, next: ElementState, status: ElementStatus) {
        self.set_state(next);
        self.inner.io.report_status(status);
    }

    fn finish_task(&self) {
        let mut task = self.inner.task.lock().unwrap();
        task.exited = true;
        self.inner.task_exited.notify_all();
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("tag", &self.tag())
            .field("state", &self.state())
            .finish()
    }
}
