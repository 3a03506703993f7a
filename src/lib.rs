//! # ratflow: actor flows and supervised pipelines
//!
//! Two layers:
//!
//! - **Flow engine** (`flow`): a tree of typed actors (sources, transformers,
//!   sinks, standalones) driven token by token by a cooperative executor.
//!   Shared collaborators are discovered by walking up the tree.
//! - **Pipelines** (`rats`): receiver and transmitter threads joined by a
//!   queue bridge with a pluggable backpressure guard, run under a
//!   supervisor that pauses, resumes, stops and reports on them.
//!
//! Cancellation is cooperative everywhere: blocking waits check a shared
//! stop token at least once per tick. Errors are values (`FlowError`).
//!
//! ## Configuration
//!
//! Settings are read from TOML or JSON. Without an explicit path the platform
//! config directory under `dev.hxyulin.ratflow` is used; see [`config`].
//!
//! ## Example
//!
//! ```ignore
//! use ratflow::flow::{actors::*, FlowBuilder};
//!
//! let out = Collector::new("out");
//! let items = out.handle();
//! let mut flow = FlowBuilder::new("flow")
//!     .add(ForLoop::new("n", 0, 3))
//!     .add(Script::new("square", "value * value"))
//!     .add(out)
//!     .build()?;
//! flow.run()?;
//! assert_eq!(items.lock().unwrap().len(), 3);
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod rats;

// Re-export commonly used types
pub use config::{AppConfig, QueueSettings, RatSettings, SupervisorSettings};
pub use error::{FlowError, Result, ResultExt};
pub use flow::{Actor, ActorTree, FlowBuilder, FlowExecutor, Payload, PayloadType, StopToken, Token};
pub use rats::{QueueBridge, Rat, RatState, StatusTable, Supervisor, SupervisorHandle};
