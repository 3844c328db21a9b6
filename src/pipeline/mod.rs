//! Pipeline construction and control.
//!
//! A [`Pipeline`] owns a set of registered elements, wires them into
//! chains with [`link`](Pipeline::link), and drives their lifecycles as
//! one unit. Starting is two-phase: every element's task is spawned
//! parked, then every element is resumed, so no stage can race ahead
//! before its neighbours have ports to talk to.
//!
//! # Example
//!
//! ```rust,ignore
//! use streamline::elements::{MemSink, MemSource};
//! use streamline::pipeline::Pipeline;
//! use streamline::element::{Element, ElementConfig};
//!
//! let mut pipeline = Pipeline::new("player");
//! pipeline.register(Element::new("s", MemSource::from_bytes(data), ElementConfig::default())?, "src")?;
//! pipeline.register(Element::new("k", MemSink::new(), ElementConfig::default())?, "sink")?;
//! pipeline.link(&["src", "sink"])?;
//! pipeline.run()?;
//! ```

use crate::element::{Element, DEFAULT_TERMINATE_TIMEOUT};
use crate::error::{Error, Result};
use crate::event::{ElementStatus, Event, EventBus, EventPayload};
use crate::port::Port;
use crate::timeout::Deadline;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Overall state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    /// No run in progress; registration and linking are allowed.
    #[default]
    Idle,
    /// Elements are processing data.
    Running,
    /// Elements are parked, retaining buffered data.
    Paused,
    /// A run ended; [`reset`](Pipeline::reset) returns to [`Idle`](Self::Idle).
    Stopped,
}

/// A named set of elements driven as one unit.
pub struct Pipeline {
    name: String,
    entries: Vec<Entry>,
    listener: Option<EventBus>,
    state: PipelineState,
}

struct Entry {
    name: String,
    element: Element,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            listener: None,
            state: PipelineState::Idle,
        }
    }

    /// The pipeline's name, used as the source of its events.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current pipeline state.
    ///
    /// Tracks the driven lifecycle only: a pipeline whose elements all
    /// finished on their own stays [`PipelineState::Running`] until
    /// [`stop`](Self::stop) formalizes the end of the run.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of registered elements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no elements are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attach the event bus; the pipeline and every registered element
    /// report on it.
    pub fn set_listener(&mut self, bus: EventBus) {
        for entry in &self.entries {
            entry.element.set_listener(bus.clone());
        }
        self.listener = Some(bus);
    }

    // ---- membership -----------------------------------------------------

    /// Register `element` under `name`, renaming the element to match.
    ///
    /// Fails with [`Error::InvalidArgument`] on an empty or duplicate
    /// name, and with [`Error::InvalidState`] unless the pipeline is
    /// idle.
    pub fn register(&mut self, element: Element, name: &str) -> Result<()> {
        self.ensure_idle("register")?;
        if name.is_empty() {
            return Err(Error::InvalidArgument("element name must be non-empty".into()));
        }
        if self.entries.iter().any(|e| e.name == name) {
            return Err(Error::InvalidArgument(format!(
                "element name '{name}' already registered"
            )));
        }
        element.set_tag(name);
        if let Some(bus) = &self.listener {
            element.set_listener(bus.clone());
        }
        debug!(pipeline = %self.name, element = %name, "registered");
        self.entries.push(Entry {
            name: name.to_string(),
            element,
        });
        Ok(())
    }

    /// Remove the element registered under `name` and hand it back.
    ///
    /// Rejected with [`Error::InvalidState`] while the element still
    /// shares a link port with another registered element; `unlink`
    /// first. Removing a stage from a wired chain would leave its
    /// ex-neighbours connected to a transport nobody serves.
    pub fn unregister(&mut self, name: &str) -> Result<Element> {
        self.ensure_idle("unregister")?;
        let idx = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| Error::NotFound(format!("element '{name}' is not registered")))?;
        let target = element_ports(&self.entries[idx].element);
        let linked = self.entries.iter().enumerate().any(|(i, entry)| {
            i != idx
                && element_ports(&entry.element)
                    .iter()
                    .any(|port| target.iter().any(|own| own.same_transport(port)))
        });
        if linked {
            return Err(Error::InvalidState(format!(
                "element '{name}' is still linked; unlink the pipeline first"
            )));
        }
        let entry = self.entries.remove(idx);
        debug!(pipeline = %self.name, element = %name, "unregistered");
        Ok(entry.element)
    }

    /// A handle to the element registered under `name`.
    pub fn element(&self, name: &str) -> Option<Element> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.element.clone())
    }

    // ---- wiring ---------------------------------------------------------

    /// Link the named elements into a chain, in order.
    ///
    /// For each consecutive pair, the upstream element's existing output
    /// port is carried if it has one; otherwise a fresh transport is
    /// built from the upstream's [`TransportSpec`](crate::element::TransportSpec)
    /// and tagged `"{tag}_out_rb"` or `"{tag}_out_fb"`. The port becomes
    /// the downstream element's primary input, or joins its input set
    /// when one is already wired.
    ///
    /// Chains compose: linking `["a", "b"]` and then `["b", "c"]` yields
    /// a three-stage pipeline, and linking two chains into the same tail
    /// element builds a multi-input stage.
    pub fn link(&mut self, names: &[&str]) -> Result<()> {
        self.ensure_idle("link")?;
        if names.len() < 2 {
            return Err(Error::InvalidArgument(
                "a link chain needs at least two elements".into(),
            ));
        }
        for (i, a) in names.iter().enumerate() {
            if names[..i].contains(a) {
                return Err(Error::InvalidArgument(format!(
                    "element '{a}' appears twice in the chain"
                )));
            }
        }
        let mut chain = Vec::with_capacity(names.len());
        for &name in names {
            let element = self
                .element(name)
                .ok_or_else(|| Error::NotFound(format!("element '{name}' is not registered")))?;
            chain.push(element);
        }

        for pair in chain.windows(2) {
            let (up, down) = (&pair[0], &pair[1]);
            let port = match up.output_port() {
                Some(port) => port,
                None => {
                    let spec = up.out_transport();
                    let port = spec.build()?;
                    port.set_tag(format!("{}_{}", up.tag(), spec.tag_suffix()));
                    port.set_element(up.tag());
                    up.set_output_port(port.clone())?;
                    port
                }
            };
            let already_wired = (0..down.io().input_count())
                .filter_map(|i| down.io().input(i))
                .any(|input| input.same_transport(&port));
            if already_wired {
                return Err(Error::InvalidArgument(format!(
                    "elements '{}' and '{}' are already linked",
                    up.tag(),
                    down.tag()
                )));
            }
            if down.input_port().is_none() {
                down.set_input_port(port)?;
            } else {
                let priority = down.io().input_count() as u8;
                down.add_input_port(port, priority)?;
            }
        }
        info!(pipeline = %self.name, chain = ?names, "linked");
        Ok(())
    }

    /// Drop every link transport, keeping application-owned callback
    /// ports, so the elements can be relinked.
    pub fn unlink(&mut self) -> Result<()> {
        if self.state == PipelineState::Running || self.state == PipelineState::Paused {
            return Err(Error::InvalidState(format!(
                "cannot unlink pipeline '{}' while {:?}",
                self.name, self.state
            )));
        }
        for entry in &self.entries {
            entry.element.io().detach_transport_ports();
        }
        debug!(pipeline = %self.name, "unlinked");
        Ok(())
    }

    // ---- lifecycle ------------------------------------------------------

    /// Start the pipeline: spawn every element's task parked, then
    /// resume them all.
    ///
    /// On failure every element is stopped again and the pipeline is
    /// left [`PipelineState::Stopped`]. Open failures of task-driven
    /// elements surface asynchronously as error events, not here.
    pub fn run(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot run pipeline '{}' from {:?}; stop and reset first",
                self.name, self.state
            )));
        }
        if self.entries.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "pipeline '{}' has no elements",
                self.name
            )));
        }
        info!(pipeline = %self.name, elements = self.entries.len(), "starting");
        if let Err(e) = self.start_all() {
            warn!(pipeline = %self.name, error = %e, "start failed, stopping");
            for entry in &self.entries {
                let _ = entry.element.stop();
            }
            let deadline = Deadline::new(Some(DEFAULT_TERMINATE_TIMEOUT));
            for entry in &self.entries {
                let _ = entry.element.wait_until_terminal(deadline.remaining());
            }
            self.state = PipelineState::Stopped;
            return Err(e);
        }
        self.set_state(PipelineState::Running, ElementStatus::Running);
        Ok(())
    }

    fn start_all(&self) -> Result<()> {
        for entry in &self.entries {
            entry.element.run()?;
        }
        for entry in &self.entries {
            entry.element.resume()?;
        }
        Ok(())
    }

    /// Pause every element, retaining all buffered data.
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Paused => return Ok(()),
            PipelineState::Running => {}
            s => {
                return Err(Error::InvalidState(format!(
                    "cannot pause pipeline '{}' from {s:?}",
                    self.name
                )))
            }
        }
        let mut first_err = None;
        for entry in &self.entries {
            // An element that already finished its stream has nothing to park.
            if entry.element.state().is_terminal() {
                continue;
            }
            if let Err(e) = entry.element.pause() {
                warn!(pipeline = %self.name, element = %entry.name, error = %e, "pause failed");
                first_err.get_or_insert(e);
            }
        }
        self.set_state(PipelineState::Paused, ElementStatus::Paused);
        first_err.map_or(Ok(()), Err)
    }

    /// Resume every paused element.
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Running => return Ok(()),
            PipelineState::Paused => {}
            s => {
                return Err(Error::InvalidState(format!(
                    "cannot resume pipeline '{}' from {s:?}",
                    self.name
                )))
            }
        }
        let mut first_err = None;
        for entry in &self.entries {
            if entry.element.state().is_terminal() {
                continue;
            }
            if let Err(e) = entry.element.resume() {
                warn!(pipeline = %self.name, element = %entry.name, error = %e, "resume failed");
                first_err.get_or_insert(e);
            }
        }
        self.set_state(PipelineState::Running, ElementStatus::Running);
        first_err.map_or(Ok(()), Err)
    }

    /// Stop every element and wait for their tasks to go terminal.
    ///
    /// Port aborts go out first, so blocked I/O anywhere in the graph
    /// unblocks immediately. Elements that already finished are left as
    /// they are. Ok when there is nothing to stop.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Running | PipelineState::Paused => {}
            PipelineState::Stopped | PipelineState::Idle => return Ok(()),
        }
        info!(pipeline = %self.name, "stopping");
        let mut first_err = None;
        for entry in &self.entries {
            if let Err(e) = entry.element.stop() {
                warn!(pipeline = %self.name, element = %entry.name, error = %e, "stop failed");
                first_err.get_or_insert(e);
            }
        }
        let deadline = Deadline::new(Some(DEFAULT_TERMINATE_TIMEOUT));
        for entry in &self.entries {
            if let Err(e) = entry.element.wait_until_terminal(deadline.remaining()) {
                warn!(
                    pipeline = %self.name,
                    element = %entry.name,
                    error = %e,
                    "element did not stop in time"
                );
                first_err.get_or_insert(e);
            }
        }
        self.set_state(PipelineState::Stopped, ElementStatus::Stopped);
        first_err.map_or(Ok(()), Err)
    }

    /// Block until every element reaches a terminal state, under one
    /// shared deadline.
    pub fn wait_until_terminal(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = Deadline::new(timeout);
        for entry in &self.entries {
            entry.element.wait_until_terminal(deadline.remaining())?;
        }
        Ok(())
    }

    /// Tear down every element's task under one shared deadline,
    /// keeping the elements registered and linked.
    ///
    /// Port aborts go out inside each element's terminate, so stages
    /// blocked in I/O cannot outlive the deadline by waiting. Safe after
    /// [`stop`](Self::stop), and usable instead of it when the graph
    /// must come down even if a stage is wedged. The first failure is
    /// reported after every element has been attempted.
    pub fn terminate(&mut self, timeout: Option<Duration>) -> Result<()> {
        info!(pipeline = %self.name, "terminating");
        let mut first_err = None;
        let deadline = Deadline::new(timeout);
        for entry in &self.entries {
            if let Err(e) = entry.element.terminate(deadline.remaining()) {
                warn!(pipeline = %self.name, element = %entry.name, error = %e, "terminate failed");
                first_err.get_or_insert(e);
            }
        }
        if matches!(self.state, PipelineState::Running | PipelineState::Paused) {
            self.set_state(PipelineState::Stopped, ElementStatus::Stopped);
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Return a stopped pipeline to [`PipelineState::Idle`], restoring
    /// every element and every link transport to a fresh state so the
    /// same graph can run again.
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Idle => return Ok(()),
            PipelineState::Stopped => {}
            s => {
                return Err(Error::InvalidState(format!(
                    "cannot reset pipeline '{}' while {s:?}",
                    self.name
                )))
            }
        }
        for entry in &self.entries {
            entry.element.reset_state()?;
            entry.element.io().reset_ports()?;
        }
        self.state = PipelineState::Idle;
        debug!(pipeline = %self.name, "reset");
        Ok(())
    }

    /// Tear the pipeline down: terminate every element's task under one
    /// shared deadline, drop all links and forget the elements.
    ///
    /// The pipeline itself returns to [`PipelineState::Idle`] and can be
    /// repopulated. The first teardown error is reported after all
    /// elements have been attempted.
    pub fn deinit(&mut self) -> Result<()> {
        let mut first_err = None;
        let deadline = Deadline::new(Some(DEFAULT_TERMINATE_TIMEOUT));
        for entry in &self.entries {
            if let Err(e) = entry.element.terminate(deadline.remaining()) {
                warn!(pipeline = %self.name, element = %entry.name, error = %e, "terminate failed");
                first_err.get_or_insert(e);
            }
            entry.element.io().detach_transport_ports();
        }
        self.entries.clear();
        self.state = PipelineState::Idle;
        info!(pipeline = %self.name, "deinitialized");
        first_err.map_or(Ok(()), Err)
    }

    // ---- internals ------------------------------------------------------

    fn ensure_idle(&self, op: &str) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot {op} on pipeline '{}' while {:?}",
                self.name, self.state
            )));
        }
        Ok(())
    }

    fn set_state(&mut self, state: PipelineState, status: ElementStatus) {
        if self.state != state {
            debug!(pipeline = %self.name, from = ?self.state, to = ?state, "pipeline state change");
            self.state = state;
        }
        if let Some(bus) = &self.listener {
            bus.post(Event::pipeline(
                self.name.clone(),
                EventPayload::StateChanged(status),
            ));
        }
    }
}

/// Every port wired to `element`, both sides.
fn element_ports(element: &Element) -> Vec<Port> {
    let io = element.io();
    (0..io.input_count())
        .filter_map(|i| io.input(i))
        .chain((0..io.output_count()).filter_map(|i| io.output(i)))
        .collect()
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            debug!(pipeline = %self.name, "dropping live pipeline");
            let _ = self.deinit();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("elements", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementConfig, ElementState};
    use crate::elements::{MemSink, MemSource, Passthrough};
    use crate::event::SourceKind;
    use crate::port::PortKind;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    fn source_el(data: &[u8]) -> Element {
        Element::new(
            "s",
            MemSource::from_bytes(data).with_chunk_size(64),
            ElementConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_register_renames_and_rejects_duplicates() {
        let mut pipeline = Pipeline::new("p");
        let el = source_el(b"x");
        pipeline.register(el.clone(), "src").unwrap();
        assert_eq!(el.tag(), "src");
        assert!(matches!(
            pipeline.register(source_el(b"y"), "src"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(pipeline.element("src").is_some());
        assert!(pipeline.element("missing").is_none());
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_link_validates_chain() {
        let mut pipeline = Pipeline::new("p");
        pipeline.register(source_el(b"x"), "src").unwrap();
        assert!(matches!(
            pipeline.link(&["src"]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pipeline.link(&["src", "ghost"]),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            pipeline.link(&["src", "src"]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_relinking_same_pair_rejected() {
        let mut pipeline = Pipeline::new("p");
        pipeline.register(source_el(b"x"), "src").unwrap();
        pipeline
            .register(
                Element::new("k", MemSink::new(), ElementConfig::default()).unwrap(),
                "sink",
            )
            .unwrap();
        pipeline.link(&["src", "sink"]).unwrap();
        assert!(matches!(
            pipeline.link(&["src", "sink"]),
            Err(Error::InvalidArgument(_))
        ));
        // After an unlink the pair wires up again.
        pipeline.unlink().unwrap();
        pipeline.link(&["src", "sink"]).unwrap();
    }

    #[test]
    fn test_link_creates_tagged_transport() {
        let mut pipeline = Pipeline::new("p");
        pipeline.register(source_el(b"x"), "src").unwrap();
        pipeline
            .register(
                Element::new("k", MemSink::new(), ElementConfig::default()).unwrap(),
                "sink",
            )
            .unwrap();
        pipeline.link(&["src", "sink"]).unwrap();

        let src = pipeline.element("src").unwrap();
        let sink = pipeline.element("sink").unwrap();
        let out = src.output_port().unwrap();
        let inp = sink.input_port().unwrap();
        assert!(out.same_transport(&inp));
        assert_eq!(out.kind(), PortKind::Ring);
        assert_eq!(out.tag().as_deref(), Some("src_out_rb"));
        assert_eq!(out.element().as_deref(), Some("src"));
    }

    #[test]
    fn test_link_into_multi_input_tail() {
        let mut pipeline = Pipeline::new("p");
        pipeline.register(source_el(b"a"), "a").unwrap();
        pipeline.register(source_el(b"b"), "b").unwrap();
        pipeline
            .register(
                Element::new("m", MemSink::new(), ElementConfig::default()).unwrap(),
                "mix",
            )
            .unwrap();
        pipeline.link(&["a", "mix"]).unwrap();
        pipeline.link(&["b", "mix"]).unwrap();

        let mix = pipeline.element("mix").unwrap();
        assert_eq!(mix.io().input_count(), 2);
    }

    #[test]
    fn test_run_empty_rejected() {
        let mut pipeline = Pipeline::new("p");
        assert!(matches!(pipeline.run(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_run_stop_reset_rerun() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        let mut pipeline = Pipeline::new("p");
        let sink = MemSink::new();
        let collected = sink.collected();
        pipeline
            .register(
                Element::new(
                    "s",
                    MemSource::from_vec(payload.clone()).with_chunk_size(256),
                    ElementConfig::default(),
                )
                .unwrap(),
                "src",
            )
            .unwrap();
        pipeline
            .register(
                Element::new("t", Passthrough::new(), ElementConfig::default()).unwrap(),
                "thru",
            )
            .unwrap();
        pipeline
            .register(
                Element::new("k", sink, ElementConfig::default()).unwrap(),
                "sink",
            )
            .unwrap();
        pipeline.link(&["src", "thru", "sink"]).unwrap();

        pipeline.run().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Running);
        pipeline.wait_until_terminal(WAIT).unwrap();
        assert_eq!(*collected.lock().unwrap(), payload);

        // Rerun requires an explicit stop and reset.
        assert!(matches!(pipeline.run(), Err(Error::InvalidState(_))));
        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        pipeline.reset().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(
            pipeline.element("src").unwrap().state(),
            ElementState::Initialized
        );

        pipeline.run().unwrap();
        pipeline.wait_until_terminal(WAIT).unwrap();
        assert_eq!(collected.lock().unwrap().len(), payload.len() * 2);
        pipeline.stop().unwrap();
        pipeline.deinit().unwrap();
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_pipeline_posts_lifecycle_events() {
        let bus = EventBus::new(32).unwrap();
        let mut pipeline = Pipeline::new("p");
        pipeline.set_listener(bus.clone());
        pipeline
            .register(source_el(b"tiny payload"), "src")
            .unwrap();
        pipeline
            .register(
                Element::new("k", MemSink::new(), ElementConfig::default()).unwrap(),
                "sink",
            )
            .unwrap();
        pipeline.link(&["src", "sink"]).unwrap();
        pipeline.run().unwrap();
        pipeline.wait_until_terminal(WAIT).unwrap();
        pipeline.stop().unwrap();

        let mut pipeline_statuses = Vec::new();
        while let Ok(event) = bus.listen(Some(Duration::ZERO)) {
            if event.source_kind == SourceKind::Pipeline {
                if let EventPayload::StateChanged(status) = event.payload {
                    pipeline_statuses.push(status);
                }
            }
        }
        assert_eq!(
            pipeline_statuses,
            vec![ElementStatus::Running, ElementStatus::Stopped]
        );
        pipeline.deinit().unwrap();
    }

    #[test]
    fn test_terminate_without_stop() {
        let mut pipeline = Pipeline::new("p");
        pipeline
            .register(
                Element::new(
                    "s",
                    MemSource::from_vec(vec![3u8; 1 << 20]).with_chunk_size(512),
                    ElementConfig::default(),
                )
                .unwrap(),
                "src",
            )
            .unwrap();
        pipeline
            .register(
                Element::new("k", MemSink::new(), ElementConfig::default()).unwrap(),
                "sink",
            )
            .unwrap();
        pipeline.link(&["src", "sink"]).unwrap();
        pipeline.run().unwrap();

        pipeline.terminate(WAIT).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert!(pipeline.element("src").unwrap().state().is_terminal());
        assert!(pipeline.element("sink").unwrap().state().is_terminal());
        // Elements stay registered for reset and re-run.
        assert_eq!(pipeline.len(), 2);
        pipeline.deinit().unwrap();
    }

    #[test]
    fn test_unregister_returns_element() {
        let mut pipeline = Pipeline::new("p");
        pipeline.register(source_el(b"x"), "src").unwrap();
        let el = pipeline.unregister("src").unwrap();
        assert_eq!(el.tag(), "src");
        assert!(pipeline.is_empty());
        assert!(matches!(
            pipeline.unregister("src"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_unregister_rejected_while_linked() {
        let mut pipeline = Pipeline::new("p");
        pipeline.register(source_el(b"x"), "src").unwrap();
        pipeline
            .register(
                Element::new("k", MemSink::new(), ElementConfig::default()).unwrap(),
                "sink",
            )
            .unwrap();
        pipeline.link(&["src", "sink"]).unwrap();

        // Pulling a wired stage would orphan its neighbour's transport.
        assert!(matches!(
            pipeline.unregister("src"),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            pipeline.unregister("sink"),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(pipeline.len(), 2);

        pipeline.unlink().unwrap();
        let el = pipeline.unregister("src").unwrap();
        assert_eq!(el.tag(), "src");
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_pause_resume_cycle() {
        let mut pipeline = Pipeline::new("p");
        let sink = MemSink::new();
        let collected = sink.collected();
        pipeline
            .register(
                Element::new(
                    "s",
                    MemSource::from_vec(vec![7u8; 50_000]).with_chunk_size(512),
                    ElementConfig::default(),
                )
                .unwrap(),
                "src",
            )
            .unwrap();
        pipeline
            .register(
                Element::new("k", sink, ElementConfig::default()).unwrap(),
                "sink",
            )
            .unwrap();
        pipeline.link(&["src", "sink"]).unwrap();
        pipeline.run().unwrap();

        pipeline.pause().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Paused);
        let frozen = collected.lock().unwrap().len();
        std::thread::sleep(Duration::from_millis(100));
        // The sink is parked, so nothing more may arrive.
        assert_eq!(collected.lock().unwrap().len(), frozen);

        pipeline.resume().unwrap();
        pipeline.wait_until_terminal(WAIT).unwrap();
        assert_eq!(collected.lock().unwrap().len(), 50_000);
        pipeline.stop().unwrap();
        pipeline.deinit().unwrap();
    }
}
