//! The I/O handle a [`Processor`](super::Processor) works through.
//!
//! [`ElementIo`] bundles an element's ports, stream progress and event
//! listener behind one cloneable handle, shared by the element, its task
//! thread and the processor. Port locks are never held across blocking
//! transport calls, so an abort always gets through to a blocked read
//! or write.
//!
//! With multiple inputs, [`read_any`](ElementIo::read_any) serves the
//! highest-priority input that has data, and after eight consecutive
//! grants to the same input it lets the best of the others through so a
//! chatty peer cannot starve the rest.

use crate::error::{Error, Result};
use crate::event::{ElementStatus, Event, EventBus, EventPayload, StreamInfo, StreamPosition};
use crate::port::{Port, PortKind};
use crate::timeout::Deadline;
use smallvec::SmallVec;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Consecutive grants to one input before another with data is served.
const STARVATION_BURST: u32 = 8;

/// Re-scan interval while every input is empty.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Which side of the element an I/O failure occurred on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureSide {
    Input,
    Output,
}

/// Port access, stream progress and event reporting for one element.
#[derive(Clone)]
pub struct ElementIo {
    inner: Arc<IoInner>,
}

struct IoInner {
    tag: Mutex<String>,
    buffer_len: usize,
    ports: Mutex<PortSet>,
    progress: Mutex<Progress>,
    listener: Mutex<Option<EventBus>>,
    timeouts: Mutex<IoTimeouts>,
}

#[derive(Default, Clone, Copy)]
struct IoTimeouts {
    input: Option<Duration>,
    output: Option<Duration>,
}

// Almost every element has one input and one output; the slot lists
// stay inline for those.
#[derive(Default)]
struct PortSet {
    inputs: SmallVec<[InputSlot; 2]>,
    outputs: SmallVec<[Port; 2]>,
    last_grant: Option<usize>,
    grant_streak: u32,
}

struct InputSlot {
    port: Port,
    priority: u8,
}

#[derive(Default)]
struct Progress {
    byte_pos: u64,
    total_bytes: u64,
    info: StreamInfo,
    failure: Option<FailureSide>,
}

impl ElementIo {
    pub(crate) fn new(tag: String, buffer_len: usize) -> Self {
        Self {
            inner: Arc::new(IoInner {
                tag: Mutex::new(tag),
                buffer_len,
                ports: Mutex::new(PortSet::default()),
                progress: Mutex::new(Progress::default()),
                listener: Mutex::new(None),
                timeouts: Mutex::new(IoTimeouts::default()),
            }),
        }
    }

    /// Tag of the owning element.
    pub fn tag(&self) -> String {
        self.inner.tag.lock().unwrap().clone()
    }

    pub(crate) fn set_tag(&self, tag: impl Into<String>) {
        *self.inner.tag.lock().unwrap() = tag.into();
    }

    /// Working buffer size the element was configured with. Processors
    /// size their scratch buffers from this.
    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }

    /// The configured input-read timeout; `None` waits forever.
    ///
    /// Processors pass this to [`read`](Self::read) so the element's
    /// configuration, not the processor, decides how patient a stage is
    /// with its upstream.
    pub fn input_timeout(&self) -> Option<Duration> {
        self.inner.timeouts.lock().unwrap().input
    }

    /// The configured output-write timeout; `None` waits forever.
    pub fn output_timeout(&self) -> Option<Duration> {
        self.inner.timeouts.lock().unwrap().output
    }

    pub(crate) fn set_timeouts(&self, input: Option<Duration>, output: Option<Duration>) {
        let mut timeouts = self.inner.timeouts.lock().unwrap();
        timeouts.input = input;
        timeouts.output = output;
    }

    /// Number of wired input ports.
    pub fn input_count(&self) -> usize {
        self.inner.ports.lock().unwrap().inputs.len()
    }

    /// Number of wired output ports.
    pub fn output_count(&self) -> usize {
        self.inner.ports.lock().unwrap().outputs.len()
    }

    /// The input port at `index` (0 is primary), if wired.
    pub fn input(&self, index: usize) -> Option<Port> {
        self.inner
            .ports
            .lock()
            .unwrap()
            .inputs
            .get(index)
            .map(|slot| slot.port.clone())
    }

    /// The output port at `index` (0 is primary), if wired.
    pub fn output(&self, index: usize) -> Option<Port> {
        self.inner.ports.lock().unwrap().outputs.get(index).cloned()
    }

    // ---- reading --------------------------------------------------------

    /// Read from the primary (or only) input; with several inputs, read
    /// from whichever is served first. Equivalent to
    /// [`read_any`](Self::read_any) without the slot index.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        self.read_any(buf, timeout).map(|(n, _)| n)
    }

    /// Read from the best input, returning the bytes read and the index
    /// of the input that supplied them.
    ///
    /// A single input is read directly with a blocking call. With
    /// several, the highest-priority input holding data is drained first
    /// (lower priority value wins, wiring order breaks ties), subject to
    /// starvation relief. [`Error::Done`] is returned only once every
    /// input is finished and drained; one aborted input aborts the read.
    pub fn read_any(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<(usize, usize)> {
        enum Mode {
            Single(Port),
            Multi,
        }
        let mode = {
            let ports = self.inner.ports.lock().unwrap();
            match ports.inputs.len() {
                0 => {
                    return Err(Error::NotFound(format!(
                        "element '{}' has no input port",
                        self.tag()
                    )))
                }
                1 => Mode::Single(ports.inputs[0].port.clone()),
                _ => Mode::Multi,
            }
        };
        match mode {
            Mode::Single(port) => match port.read(buf, timeout) {
                Ok(n) => Ok((n, 0)),
                Err(e) => Err(self.note_input_failure(e)),
            },
            Mode::Multi => self.read_multi(buf, &Deadline::new(timeout)),
        }
    }

    fn read_multi(&self, buf: &mut [u8], deadline: &Deadline) -> Result<(usize, usize)> {
        loop {
            if let Some((idx, port)) = self.pick_input()? {
                match port.read(buf, Some(Duration::ZERO)) {
                    Ok(n) => return Ok((n, idx)),
                    // The scan raced an empty transport; rescan.
                    Err(Error::Timeout) => {}
                    Err(e) => return Err(self.note_input_failure(e)),
                }
            } else {
                match deadline.remaining() {
                    None => std::thread::sleep(POLL_INTERVAL),
                    Some(d) if d.is_zero() => return Err(Error::Timeout),
                    Some(d) => std::thread::sleep(d.min(POLL_INTERVAL)),
                }
            }
        }
    }

    /// Choose the input to serve, or `None` when all are empty but the
    /// stream is not finished.
    fn pick_input(&self) -> Result<Option<(usize, Port)>> {
        let mut ports = self.inner.ports.lock().unwrap();
        let mut best: Option<(usize, u8)> = None;
        let mut all_done = true;
        for (idx, slot) in ports.inputs.iter().enumerate() {
            if slot.port.is_aborted() {
                return Err(Error::Aborted);
            }
            if slot.port.filled().unwrap_or(0) > 0 {
                all_done = false;
                match best {
                    Some((_, p)) if p <= slot.priority => {}
                    _ => best = Some((idx, slot.priority)),
                }
            } else if !slot.port.is_producer_done() {
                all_done = false;
            }
        }
        let Some((mut idx, _)) = best else {
            if all_done {
                return Err(Error::Done);
            }
            return Ok(None);
        };
        if ports.last_grant == Some(idx) && ports.grant_streak >= STARVATION_BURST {
            let alt = ports
                .inputs
                .iter()
                .enumerate()
                .filter(|(i, slot)| *i != idx && slot.port.filled().unwrap_or(0) > 0)
                .min_by_key(|(i, slot)| (slot.priority, *i))
                .map(|(i, _)| i);
            if let Some(alt) = alt {
                idx = alt;
            }
        }
        if ports.last_grant == Some(idx) {
            ports.grant_streak += 1;
        } else {
            ports.last_grant = Some(idx);
            ports.grant_streak = 1;
        }
        Ok(Some((idx, ports.inputs[idx].port.clone())))
    }

    // ---- writing --------------------------------------------------------

    /// Write all of `data` to the primary output.
    ///
    /// Returns `data.len()` for symmetry with [`read`](Self::read).
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.write_aux(0, data, timeout)
    }

    /// Write all of `data` to the output at `index`.
    pub fn write_aux(&self, index: usize, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let port = self.output(index).ok_or_else(|| {
            Error::NotFound(format!(
                "element '{}' has no output port {index}",
                self.tag()
            ))
        })?;
        match port.write_all(data, timeout) {
            Ok(()) => Ok(data.len()),
            Err(e) => Err(self.note_output_failure(e)),
        }
    }

    /// Write all of `data` to every output, under one shared deadline.
    ///
    /// On error some outputs may already hold the data.
    pub fn fanout(&self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        let outputs: Vec<Port> = self.inner.ports.lock().unwrap().outputs.to_vec();
        if outputs.is_empty() {
            return Err(Error::NotFound(format!(
                "element '{}' has no output port",
                self.tag()
            )));
        }
        let deadline = Deadline::new(timeout);
        for port in &outputs {
            port.write_all(data, deadline.remaining())
                .map_err(|e| self.note_output_failure(e))?;
        }
        Ok(())
    }

    // ---- progress and reporting -----------------------------------------

    /// Progress through the stream.
    pub fn position(&self) -> StreamPosition {
        let progress = self.inner.progress.lock().unwrap();
        StreamPosition {
            byte_pos: progress.byte_pos,
            total_bytes: progress.total_bytes,
        }
    }

    /// Record the total stream length, usually during `open`.
    pub fn set_total_bytes(&self, total: u64) {
        let mut progress = self.inner.progress.lock().unwrap();
        progress.total_bytes = total;
        progress.info.total_bytes = total;
    }

    /// Stream properties last stored with [`set_info`](Self::set_info).
    pub fn info(&self) -> StreamInfo {
        self.inner.progress.lock().unwrap().info
    }

    /// Store the stream's properties. Does not publish an event; call
    /// [`report_info`](Self::report_info) for that.
    pub fn set_info(&self, info: StreamInfo) {
        let mut progress = self.inner.progress.lock().unwrap();
        progress.info = info;
        if info.total_bytes != 0 {
            progress.total_bytes = info.total_bytes;
        }
    }

    /// Publish the current stream properties to the listener.
    pub fn report_info(&self) {
        self.post(EventPayload::Info(self.info()));
    }

    /// Publish the current position to the listener.
    pub fn report_position(&self) {
        self.post(EventPayload::Position(self.position()));
    }

    pub(crate) fn report_status(&self, status: ElementStatus) {
        self.post(EventPayload::StateChanged(status));
    }

    fn post(&self, payload: EventPayload) {
        let listener = self.inner.listener.lock().unwrap().clone();
        if let Some(bus) = listener {
            bus.post(Event::element(self.tag(), payload));
        }
    }

    pub(crate) fn set_listener(&self, bus: EventBus) {
        *self.inner.listener.lock().unwrap() = Some(bus);
    }

    pub(crate) fn add_progress(&self, n: usize) {
        self.inner.progress.lock().unwrap().byte_pos += n as u64;
    }

    pub(crate) fn reset_position(&self) {
        let mut progress = self.inner.progress.lock().unwrap();
        progress.byte_pos = 0;
        progress.failure = None;
    }

    pub(crate) fn take_failure(&self) -> Option<FailureSide> {
        self.inner.progress.lock().unwrap().failure.take()
    }

    fn note_input_failure(&self, e: Error) -> Error {
        if !e.is_flow_control() {
            self.inner.progress.lock().unwrap().failure = Some(FailureSide::Input);
        }
        e
    }

    fn note_output_failure(&self, e: Error) -> Error {
        if !e.is_flow_control() {
            self.inner.progress.lock().unwrap().failure = Some(FailureSide::Output);
        }
        e
    }

    // ---- wiring (element-side) ------------------------------------------

    pub(crate) fn set_input(&self, port: Port) {
        let mut ports = self.inner.ports.lock().unwrap();
        let slot = InputSlot { port, priority: 0 };
        if ports.inputs.is_empty() {
            ports.inputs.push(slot);
        } else {
            ports.inputs[0] = slot;
        }
    }

    pub(crate) fn add_input(&self, port: Port, priority: u8) {
        self.inner
            .ports
            .lock()
            .unwrap()
            .inputs
            .push(InputSlot { port, priority });
    }

    pub(crate) fn set_output(&self, port: Port) {
        let mut ports = self.inner.ports.lock().unwrap();
        if ports.outputs.is_empty() {
            ports.outputs.push(port);
        } else {
            ports.outputs[0] = port;
        }
    }

    pub(crate) fn add_output(&self, port: Port) {
        self.inner.ports.lock().unwrap().outputs.push(port);
    }

    /// Abort every port, waking all blocked I/O on them.
    pub(crate) fn abort_ports(&self) {
        let (inputs, outputs) = self.snapshot_ports();
        for port in inputs.iter().chain(outputs.iter()) {
            port.abort();
        }
    }

    /// Reset every port to its freshly constructed state.
    pub(crate) fn reset_ports(&self) -> Result<()> {
        let (inputs, outputs) = self.snapshot_ports();
        for port in inputs.iter().chain(outputs.iter()) {
            port.reset()?;
        }
        let mut ports = self.inner.ports.lock().unwrap();
        ports.last_grant = None;
        ports.grant_streak = 0;
        Ok(())
    }

    /// Signal end-of-stream on every output that supports it.
    pub(crate) fn mark_outputs_done(&self) {
        let (_, outputs) = self.snapshot_ports();
        for port in &outputs {
            // Callback outputs have no end-of-stream signal to forward.
            let _ = port.write_done();
        }
    }

    /// Drop all ring and pool ports, keeping callback ports, which belong
    /// to the application rather than to the links.
    pub(crate) fn detach_transport_ports(&self) {
        let mut ports = self.inner.ports.lock().unwrap();
        ports
            .inputs
            .retain(|slot| slot.port.kind() == PortKind::Callback);
        ports.outputs.retain(|port| port.kind() == PortKind::Callback);
        ports.last_grant = None;
        ports.grant_streak = 0;
    }

    fn snapshot_ports(&self) -> (Vec<Port>, Vec<Port>) {
        let ports = self.inner.ports.lock().unwrap();
        (
            ports.inputs.iter().map(|slot| slot.port.clone()).collect(),
            ports.outputs.to_vec(),
        )
    }
}

impl std::fmt::Debug for ElementIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports = self.inner.ports.lock().unwrap();
        f.debug_struct("ElementIo")
            .field("tag", &self.tag())
            .field("inputs", &ports.inputs.len())
            .field("outputs", &ports.outputs.len())
            .finish()
    }
}
