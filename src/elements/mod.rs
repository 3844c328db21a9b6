//! Built-in pipeline elements.
//!
//! ## Sources
//! - [`MemSource`]: Streams a block of memory into the pipeline
//! - [`raw_source`]: Endpoint fed by the application through a [`RawWriter`]
//!
//! ## Sinks
//! - [`MemSink`]: Collects the stream into memory
//! - [`raw_sink`]: Endpoint drained by the application through a [`RawReader`]
//!
//! ## Transforms
//! - [`Passthrough`]: Forwards bytes unchanged

mod mem;
mod passthrough;
mod raw;

pub use mem::{MemSink, MemSource};
pub use passthrough::Passthrough;
pub use raw::{raw_sink, raw_source, RawReader, RawWriter};
