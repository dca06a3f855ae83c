//! Adapters for external programs.

pub mod workers;

pub use workers::{ClaudeWorker, CodexWorker, MockWorker, ScriptedReply, WorkerRegistry};
