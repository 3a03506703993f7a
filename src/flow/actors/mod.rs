//! Built-in actors.

pub mod control;
pub mod queues;
pub mod script;
pub mod sinks;
pub mod sources;
pub mod transformers;

pub use control::{ChangeRatState, RatAction, RatsHost};
pub use queues::{EnQueue, QueueSetup};
pub use script::Script;
pub use sinks::{Collector, LogSink};
pub use sources::{Constants, ForLoop};
pub use transformers::{Increment, PassThrough, Tokenize};
