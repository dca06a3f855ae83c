//! Services layer: the orchestration and execution engine.

pub mod dispatcher;
pub mod memory_composer;
pub mod outbox;
pub mod routing;
pub mod swarm;
pub mod team_chain;

pub use dispatcher::QueueDispatcher;
pub use outbox::{DeliveryStyle, Outbox};
pub use routing::RouteDecision;
pub use swarm::{SwarmEngine, SwarmError};
pub use team_chain::{ChainExecutor, ChainOutcome, ChainStep};
