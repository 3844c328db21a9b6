//! # Streamline
//!
//! A streaming dataflow engine for chains of byte-processing stages,
//! built for pipelines like capture → transform → encode → sink where
//! stages run concurrently and synchronize only through bounded
//! transports.
//!
//! ## Building blocks
//!
//! - [`RingBuffer`](ringbuf::RingBuffer): bounded SPSC byte ring with
//!   blocking, abortable, timeout-bounded I/O
//! - [`FramePool`](framepool::FramePool): bounded pool of fixed-capacity
//!   frames handed between producer and consumer in two phases
//! - [`Port`](port::Port): one transport facade over ring, pool and
//!   callback variants
//! - [`Element`](element::Element): a named stage wrapping a
//!   [`Processor`](element::Processor), its ports and a task thread
//! - [`Pipeline`](pipeline::Pipeline): registry and bulk lifecycle for a
//!   chain of elements
//! - [`EventBus`](event::EventBus): bounded status/progress queue from
//!   the stages to the controller
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use streamline::prelude::*;
//! use streamline::elements::{MemSink, MemSource, Passthrough};
//!
//! let bus = EventBus::new(32)?;
//! let mut pipeline = Pipeline::new("player");
//! pipeline.set_listener(bus.clone());
//! pipeline.register(Element::new("s", MemSource::from_vec(data), ElementConfig::default())?, "src")?;
//! pipeline.register(Element::new("t", Passthrough::new(), ElementConfig::default())?, "thru")?;
//! pipeline.register(Element::new("k", MemSink::new(), ElementConfig::default())?, "sink")?;
//! pipeline.link(&["src", "thru", "sink"])?;
//! pipeline.run()?;
//! // drain `bus` until the sink reports Finished, then:
//! pipeline.stop()?;
//! pipeline.deinit()?;
//! ```
//!
//! Every blocking call takes `timeout: Option<Duration>` where `None`
//! means wait forever, and every blocked caller is woken by `abort`, so
//! teardown never hangs on a stalled stage.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod framepool;
pub mod pipeline;
pub mod port;
pub mod ringbuf;

mod timeout;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::element::{Element, ElementConfig, ElementIo, ElementState, Processor};
    pub use crate::error::{Error, Result};
    pub use crate::event::{ElementStatus, Event, EventBus, EventPayload};
    pub use crate::pipeline::{Pipeline, PipelineState};
    pub use crate::port::{Port, PortKind};
}

pub use error::{Error, Result};
