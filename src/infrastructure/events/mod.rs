//! Event stream persistence.

pub mod jsonl;

pub use jsonl::JsonlEventSink;
