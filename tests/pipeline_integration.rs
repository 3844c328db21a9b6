//! End-to-end pipeline scenarios.
//!
//! These tests verify that:
//! - A source → identity → sink chain delivers its payload byte-exactly,
//!   with exactly one Finished status per element on the bus
//! - A failing middle stage aborts its neighbours' ports, surfaces one
//!   ErrorProcess status, and never leaves a task hanging past teardown
//! - A stopped pipeline resets and re-runs on the same graph
//! - Raw endpoints drive a chain from foreign code without tasks
//! - The frame-pool transport carries a chain end to end

use std::collections::HashMap;
use std::time::Duration;
use streamline::element::{
    Element, ElementConfig, ElementIo, ElementState, Processor, TaskOptions, TransportSpec,
};
use streamline::elements::{raw_sink, raw_source, MemSink, MemSource, Passthrough};
use streamline::error::{Error, Result};
use streamline::event::{ElementStatus, EventBus, EventPayload, SourceKind};
use streamline::pipeline::{Pipeline, PipelineState};
use streamline::port::Port;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 7 + 3) % 256) as u8).collect()
}

/// Drain the bus until `last` reports a terminal status, collecting every
/// element-terminal status seen on the way.
fn terminal_statuses_until(bus: &EventBus, last: &str) -> Vec<(String, ElementStatus)> {
    let mut seen = Vec::new();
    loop {
        let event = bus.listen(WAIT).unwrap();
        if event.source_kind != SourceKind::Element {
            continue;
        }
        if let EventPayload::StateChanged(status) = event.payload {
            if status.is_terminal() {
                let done = event.source == last;
                seen.push((event.source, status));
                if done {
                    return seen;
                }
            }
        }
    }
}

#[test]
fn test_three_stage_chain_delivers_payload_byte_exact() {
    init_tracing();
    let payload = pattern(50_000);
    let bus = EventBus::new(32).unwrap();

    let mut pipeline = Pipeline::new("player");
    pipeline.set_listener(bus.clone());

    // 50_000 bytes in 137-byte chunks forces many partial ring writes.
    let source = MemSource::from_vec(payload.clone()).with_chunk_size(137);
    let sink = MemSink::new();
    let collected = sink.collected();

    pipeline
        .register(
            Element::new("s", source, ElementConfig::default()).unwrap(),
            "src",
        )
        .unwrap();
    pipeline
        .register(
            Element::new(
                "t",
                Passthrough::new(),
                ElementConfig::default().buffer_len(256),
            )
            .unwrap(),
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

    let statuses = terminal_statuses_until(&bus, "sink");
    assert_eq!(*collected.lock().unwrap(), payload);

    // Exactly one terminal status per element, all Finished.
    let mut counts: HashMap<String, usize> = HashMap::new();
    for (source, status) in statuses {
        assert_eq!(status, ElementStatus::Finished, "element {source}");
        *counts.entry(source).or_insert(0) += 1;
    }
    assert_eq!(counts.get("src"), Some(&1));
    assert_eq!(counts.get("thru"), Some(&1));
    assert_eq!(counts.get("sink"), Some(&1));

    pipeline.stop().unwrap();
    pipeline.deinit().unwrap();
}

/// Fails after forwarding a fixed number of bytes.
struct FailAfter {
    budget: usize,
    buf: Vec<u8>,
}

impl Processor for FailAfter {
    fn open(&mut self, io: &ElementIo) -> Result<()> {
        self.buf = vec![0; io.buffer_len()];
        Ok(())
    }

    fn process(&mut self, io: &ElementIo) -> Result<usize> {
        if self.budget == 0 {
            return Err(Error::Process("synthetic stage failure".into()));
        }
        let want = self.budget.min(self.buf.len());
        let n = io.read(&mut self.buf[..want], None)?;
        io.write(&self.buf[..n], None)?;
        self.budget -= n;
        Ok(n)
    }
}

#[test]
fn test_middle_stage_failure_propagates_and_terminates_cleanly() {
    init_tracing();
    let bus = EventBus::new(32).unwrap();
    let mut pipeline = Pipeline::new("p");
    pipeline.set_listener(bus.clone());

    pipeline
        .register(
            Element::new(
                "s",
                // Far more data than the failing stage will accept.
                MemSource::from_vec(pattern(1 << 20)).with_chunk_size(512),
                ElementConfig::default(),
            )
            .unwrap(),
            "src",
        )
        .unwrap();
    pipeline
        .register(
            Element::new(
                "f",
                FailAfter {
                    budget: 4096,
                    buf: Vec::new(),
                },
                ElementConfig::default(),
            )
            .unwrap(),
            "fail",
        )
        .unwrap();
    pipeline
        .register(
            Element::new("k", MemSink::new(), ElementConfig::default()).unwrap(),
            "sink",
        )
        .unwrap();
    pipeline.link(&["src", "fail", "sink"]).unwrap();
    pipeline.run().unwrap();

    // The failing element reports ErrorProcess on the bus.
    let failed = loop {
        let event = bus.listen(WAIT).unwrap();
        if let EventPayload::StateChanged(status) = event.payload {
            if status.is_error() {
                break (event.source, status);
            }
        }
    };
    assert_eq!(failed, ("fail".to_string(), ElementStatus::ErrorProcess));

    // The failing element aborted its own ports before reporting, so
    // both neighbours were unblocked by the failure itself; no
    // controller intervention yet.
    let src = pipeline.element("src").unwrap();
    let sink = pipeline.element("sink").unwrap();
    assert!(src.output_port().unwrap().is_aborted());
    assert!(sink.input_port().unwrap().is_aborted());

    // With their ports aborted the neighbours wind down on their own.
    src.wait_until_terminal(WAIT).unwrap();
    sink.wait_until_terminal(WAIT).unwrap();
    assert_eq!(src.state(), ElementState::Stopped);
    assert_eq!(sink.state(), ElementState::Stopped);

    pipeline.stop().unwrap();
    pipeline.terminate(WAIT).unwrap();
    pipeline.deinit().unwrap();
}

#[test]
fn test_reset_and_rerun_same_graph() {
    init_tracing();
    let payload = pattern(8192);
    let mut pipeline = Pipeline::new("p");
    let sink = MemSink::new();
    let collected = sink.collected();

    pipeline
        .register(
            Element::new(
                "s",
                MemSource::from_vec(payload.clone()).with_chunk_size(1024),
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

    for round in 1..=3usize {
        pipeline.run().unwrap();
        pipeline.wait_until_terminal(WAIT).unwrap();
        pipeline.stop().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(collected.lock().unwrap().len(), payload.len() * round);
        pipeline.reset().unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }
    assert_eq!(
        collected.lock().unwrap()[2 * payload.len()..],
        payload[..],
        "third run delivered the payload byte-exact"
    );
    pipeline.deinit().unwrap();
}

#[test]
fn test_raw_endpoints_drive_chain_from_foreign_code() {
    init_tracing();
    let mut pipeline = Pipeline::new("bridge");
    let (src, writer) = raw_source("in", ElementConfig::default()).unwrap();
    let (dst, reader) = raw_sink("out", ElementConfig::default()).unwrap();
    pipeline.register(src, "in").unwrap();
    pipeline
        .register(
            Element::new("t", Passthrough::new(), ElementConfig::default()).unwrap(),
            "thru",
        )
        .unwrap();
    pipeline.register(dst, "out").unwrap();
    pipeline.link(&["in", "thru", "out"]).unwrap();
    pipeline.run().unwrap();

    let payload = pattern(10_000);
    let feeder = {
        let payload = payload.clone();
        std::thread::spawn(move || {
            for chunk in payload.chunks(313) {
                writer.write_all(chunk, WAIT).unwrap();
            }
            writer.done().unwrap();
        })
    };

    let mut got = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf, WAIT) {
            Ok(n) => got.extend_from_slice(&buf[..n]),
            Err(Error::Done) => break,
            Err(e) => panic!("unexpected read error: {e}"),
        }
    }
    feeder.join().unwrap();
    assert_eq!(got, payload);

    pipeline.stop().unwrap();
    pipeline.deinit().unwrap();
}

#[test]
fn test_frame_pool_transport_end_to_end() {
    init_tracing();
    let payload = pattern(20_000);
    let pool_spec = TransportSpec::Pool {
        frame_count: 4,
        frame_capacity: 256,
    };

    let mut pipeline = Pipeline::new("framed");
    let sink = MemSink::new();
    let collected = sink.collected();
    pipeline
        .register(
            Element::new(
                "s",
                MemSource::from_vec(payload.clone()).with_chunk_size(256),
                ElementConfig::default().out_transport(pool_spec),
            )
            .unwrap(),
            "src",
        )
        .unwrap();
    pipeline
        .register(
            Element::new(
                "t",
                Passthrough::new(),
                // A pool reader's scratch buffer must hold a whole frame.
                ElementConfig::default()
                    .buffer_len(256)
                    .out_transport(pool_spec),
            )
            .unwrap(),
            "thru",
        )
        .unwrap();
    pipeline
        .register(
            Element::new("k", sink, ElementConfig::default().buffer_len(256)).unwrap(),
            "sink",
        )
        .unwrap();
    pipeline.link(&["src", "thru", "sink"]).unwrap();

    let thru = pipeline.element("thru").unwrap();
    pipeline.run().unwrap();
    pipeline.wait_until_terminal(WAIT).unwrap();
    assert_eq!(*collected.lock().unwrap(), payload);
    assert_eq!(
        thru.output_port().unwrap().tag().as_deref(),
        Some("thru_out_fb")
    );

    pipeline.stop().unwrap();
    pipeline.deinit().unwrap();
}

#[test]
fn test_passive_element_pumped_by_caller() {
    init_tracing();
    // A no-task element never moves data on its own; the driving side
    // reads and writes its ports directly.
    let config = ElementConfig::default().task(TaskOptions {
        enabled: false,
        stack_size: None,
    });
    let el = Element::new("pump", Passthrough::new(), config).unwrap();
    let input = Port::ring(64).unwrap();
    let output = Port::ring(64).unwrap();
    el.set_input_port(input.clone()).unwrap();
    el.set_output_port(output.clone()).unwrap();
    el.run().unwrap();
    el.resume().unwrap();

    input.write_all(b"stays put", WAIT).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(output.filled().unwrap(), 0);
    assert_eq!(input.filled().unwrap(), 9);

    el.stop().unwrap();
    el.terminate(WAIT).unwrap();
}
