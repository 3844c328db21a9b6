//! Passthrough element - forwards bytes unchanged.

use crate::element::{ElementIo, Processor};
use crate::error::Result;

/// An element that copies its input to its output unchanged.
///
/// Useful as a placeholder stage, for exercising pipeline plumbing in
/// tests, and as the canonical minimal [`Processor`].
pub struct Passthrough {
    buf: Vec<u8>,
}

impl Passthrough {
    /// Create a new passthrough element.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Passthrough {
    fn open(&mut self, io: &ElementIo) -> Result<()> {
        self.buf = vec![0; io.buffer_len()];
        Ok(())
    }

    fn process(&mut self, io: &ElementIo) -> Result<usize> {
        let n = io.read(&mut self.buf, io.input_timeout())?;
        io.write(&self.buf[..n], io.output_timeout())?;
        Ok(n)
    }
}
