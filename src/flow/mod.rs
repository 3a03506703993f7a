//! Actor execution engine.
//!
//! A flow is a tree of actors. Containers group children; inside a
//! container, standalone actors come first and the remaining members form a
//! chain (source → transformers → sink) that the executor drives token by
//! token:
//!
//! ```text
//! Flow "ingest"
//! ├── QueueSetup      (standalone, publishes QueueRegistry)
//! ├── ForLoop         (source)
//! ├── Sequence "prep"
//! │   ├── Tokenize    (transformer)
//! │   └── Script      (transformer)
//! └── EnQueue         (sink, looks up QueueRegistry)
//! ```
//!
//! Shared collaborators are found by walking up the tree: the closest
//! ancestor scope that publishes one of the requested type wins.

pub mod actor;
pub mod actors;
pub mod capability;
pub mod contract;
pub mod executor;
pub mod id;
pub mod stop;
pub mod token;
pub mod tree;

pub use actor::{Actor, ActorOptions, ActorState, OutputBuffer, SetupContext};
pub use capability::{CapabilityRegistry, Collaborator};
pub use contract::{ActorRole, TypeContract};
pub use executor::{EngineState, ExecutionStats, FlowBuilder, FlowExecutor, StopHandle, SuppressedError};
pub use id::NodeId;
pub use stop::StopToken;
pub use token::{Failure, Payload, PayloadType, Token};
pub use tree::{ActorTree, ContainerKind, Topology};
