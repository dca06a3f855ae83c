//! Port trait definitions.
//!
//! Async trait interfaces that adapters implement:
//! - `Worker`: agent CLI subprocess invocation
//! - `EventSink`: the append-only observability stream
//!
//! These contracts keep the services independent of specific CLI binaries
//! and sink formats.

pub mod events;
pub mod worker;

pub use events::{Event, EventLevel, EventSink, NullEventSink};
pub use worker::{Worker, WorkerError, WorkerReply, WorkerRequest, WorkerResult};
