//! Supervised producer/consumer pipelines ("rats").
//!
//! A rat couples a receiver and a transmitter through a queue bridge, each
//! on its own thread, optionally with an actor chain applied between them:
//!
//! ```text
//! receiver thread:    receive → actors → guard → QueueBridge
//! transmitter thread:                            QueueBridge → transmit
//! ```
//!
//! The `Supervisor` owns every rat of a flow and is the only place their
//! state changes: start, pause, resume, stop and status. The control
//! bridge exposes the same operations over channels.

pub mod bridge;
pub mod endpoint;
pub mod guard;
pub mod inputs;
pub mod outputs;
pub mod queue;
pub mod rat;
pub mod status;
pub mod supervisor;

pub use bridge::{ControlBridge, ControlCommand, ControlReply, ControlServer, ControlServerHandle};
pub use endpoint::{RatReceiver, RatTransmitter};
pub use guard::{EnqueueGuard, MaxSize, PassThrough};
pub use queue::{QueueBridge, QueueRegistry};
pub use rat::{Rat, RatEvent, RatEventKind, RatStats};
pub use status::{PipelineStatus, StatusTable, STATUS_COLUMNS};
pub use supervisor::{DenyInteractiveStops, StopConfirmation, Supervisor, SupervisorHandle};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supervisor-visible state of one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatState {
    /// No threads running.
    Stopped,
    Running,
    /// Threads parked, not terminated.
    Paused,
}

impl fmt::Display for RatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RatState::Stopped => "stopped",
            RatState::Running => "running",
            RatState::Paused => "paused",
        };
        f.write_str(s)
    }
}
