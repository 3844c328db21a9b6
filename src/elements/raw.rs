//! Raw endpoints: push bytes into and pull bytes out of a pipeline.
//!
//! A raw source is the first element of a chain and is fed by the
//! application through a [`RawWriter`]; a raw sink is the last element
//! and is drained through a [`RawReader`]. Both elements are passive:
//! they have no task, and the handles talk to the link transports
//! directly.

use crate::element::{Element, ElementConfig, ElementIo, Processor};
use crate::error::{Error, Result};
use crate::port::Port;
use std::time::Duration;

/// Processor for endpoint elements driven entirely from outside.
struct Passive;

impl Processor for Passive {
    fn process(&mut self, _io: &ElementIo) -> Result<usize> {
        Ok(0)
    }
}

/// Create a source element fed by the application.
///
/// The returned element goes first in a link chain; once linked, bytes
/// written through the [`RawWriter`] flow to the downstream element.
/// The task option in `config` is ignored; endpoint elements never
/// spawn one.
pub fn raw_source(tag: impl Into<String>, config: ElementConfig) -> Result<(Element, RawWriter)> {
    let mut config = config;
    config.task.enabled = false;
    let element = Element::new(tag, Passive, config)?;
    let writer = RawWriter {
        element: element.clone(),
    };
    Ok((element, writer))
}

/// Create a sink element drained by the application.
///
/// The returned element goes last in a link chain; once linked, the
/// [`RawReader`] pulls whatever the upstream element produced. The task
/// option in `config` is ignored; endpoint elements never spawn one.
pub fn raw_sink(tag: impl Into<String>, config: ElementConfig) -> Result<(Element, RawReader)> {
    let mut config = config;
    config.task.enabled = false;
    let element = Element::new(tag, Passive, config)?;
    let reader = RawReader {
        element: element.clone(),
    };
    Ok((element, reader))
}

/// Application handle feeding a raw source element.
pub struct RawWriter {
    element: Element,
}

impl RawWriter {
    /// Write up to `data.len()` bytes into the pipeline, blocking per
    /// `timeout` when the link is full. Returns the bytes accepted.
    ///
    /// Fails with [`Error::InvalidState`] until the element is linked.
    pub fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<usize> {
        self.port()?.write(data, timeout)
    }

    /// Write all of `data`, looping over partial writes.
    pub fn write_all(&self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        self.port()?.write_all(data, timeout)
    }

    /// Signal that the application will write no more data. Downstream
    /// elements drain what is buffered and then finish.
    pub fn done(&self) -> Result<()> {
        self.port()?.write_done()
    }

    fn port(&self) -> Result<Port> {
        self.element.output_port().ok_or_else(|| {
            Error::InvalidState(format!(
                "raw source '{}' is not linked",
                self.element.tag()
            ))
        })
    }
}

impl std::fmt::Debug for RawWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawWriter")
            .field("element", &self.element.tag())
            .finish()
    }
}

/// Application handle draining a raw sink element.
pub struct RawReader {
    element: Element,
}

impl RawReader {
    /// Read up to `buf.len()` bytes out of the pipeline, blocking per
    /// `timeout` while the link is empty. [`Error::Done`] reports a
    /// finished, fully drained stream.
    ///
    /// Fails with [`Error::InvalidState`] until the element is linked.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        self.port()?.read(buf, timeout)
    }

    fn port(&self) -> Result<Port> {
        self.element.input_port().ok_or_else(|| {
            Error::InvalidState(format!(
                "raw sink '{}' is not linked",
                self.element.tag()
            ))
        })
    }
}

impl std::fmt::Debug for RawReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawReader")
            .field("element", &self.element.tag())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Option<Duration> = Some(Duration::from_secs(5));

    #[test]
    fn test_unlinked_handles_rejected() {
        let (_el, writer) = raw_source("in", ElementConfig::default()).unwrap();
        assert!(matches!(
            writer.write(b"x", Some(Duration::ZERO)),
            Err(Error::InvalidState(_))
        ));

        let (_el, reader) = raw_sink("out", ElementConfig::default()).unwrap();
        assert!(matches!(
            reader.read(&mut [0u8; 4], Some(Duration::ZERO)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_writer_to_reader_over_shared_link() {
        let (src, writer) = raw_source("in", ElementConfig::default()).unwrap();
        let (dst, reader) = raw_sink("out", ElementConfig::default()).unwrap();
        let link = Port::ring(32).unwrap();
        src.set_output_port(link.clone()).unwrap();
        dst.set_input_port(link).unwrap();
        for el in [&src, &dst] {
            el.run().unwrap();
            el.resume().unwrap();
        }

        writer.write_all(b"end to end", WAIT).unwrap();
        writer.done().unwrap();

        let mut got = Vec::new();
        let mut buf = [0u8; 8];
        loop {
            match reader.read(&mut buf, WAIT) {
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(Error::Done) => break,
                Err(e) => panic!("unexpected read error: {e}"),
            }
        }
        assert_eq!(got, b"end to end");

        for el in [&src, &dst] {
            el.stop().unwrap();
            el.terminate(WAIT).unwrap();
        }
    }

    #[test]
    fn test_endpoint_elements_never_spawn_tasks() {
        let config = ElementConfig::default();
        let (el, _writer) = raw_source("in", config).unwrap();
        el.set_output_port(Port::ring(16).unwrap()).unwrap();
        el.run().unwrap();
        el.resume().unwrap();
        // Synchronous transition proves no task is involved.
        assert_eq!(el.state(), crate::element::ElementState::Running);
        el.stop().unwrap();
        el.terminate(WAIT).unwrap();
    }
}
