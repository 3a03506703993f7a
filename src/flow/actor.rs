//! The actor contract.
//!
//! An actor is driven through `setup → (input → execute → output*)* →
//! wrap_up → clean_up` by the execution engine. Outputs are pulled, not
//! pushed: after every `execute` the engine drains `output()` until
//! `has_pending_output()` is false before it hands the actor another input.

use crate::error::{FlowError, Result};
use crate::flow::capability::{CapabilityRegistry, Collaborator};
use crate::flow::contract::TypeContract;
use crate::flow::id::NodeId;
use crate::flow::stop::StopToken;
use crate::flow::token::Token;
use crate::flow::tree::Topology;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of one actor, tracked by the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorState {
    Created,
    SetUp,
    Running,
    Stopped,
    WrappedUp,
}

impl ActorState {
    /// Whether `execute` may be called in this state.
    pub fn can_execute(self) -> bool {
        matches!(self, ActorState::SetUp | ActorState::Running)
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActorState::Created => "created",
            ActorState::SetUp => "set up",
            ActorState::Running => "running",
            ActorState::Stopped => "stopped",
            ActorState::WrappedUp => "wrapped up",
        };
        f.write_str(s)
    }
}

/// Per-node flags consulted by the engine, not by the actor itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorOptions {
    /// Excluded from set-up, chains and execution.
    pub skip: bool,
    /// Escalate execution errors and halt the whole tree.
    pub stop_flow_on_error: bool,
    /// Suppressed errors are not logged.
    pub silent: bool,
}

impl ActorOptions {
    pub fn skipped() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    pub fn halting() -> Self {
        Self {
            stop_flow_on_error: true,
            ..Self::default()
        }
    }
}

/// What an actor can see while setting up.
pub struct SetupContext<'a> {
    pub(crate) topology: &'a Topology,
    pub(crate) node: NodeId,
    pub(crate) stop: StopToken,
}

impl<'a> SetupContext<'a> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Full dotted path of the actor being set up.
    pub fn path(&self) -> &str {
        self.topology.path(self.node)
    }

    /// Stop token for this actor; stopped when the actor or any ancestor is.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Resolve the closest collaborator of type `T` among this actor's ancestors.
    pub fn lookup<T: Collaborator>(&self) -> Result<Arc<T>> {
        self.topology.closest::<T>(self.node)
    }
}

/// The uniform contract for standalone, source, transformer and sink actors.
///
/// Every method but `name`, `contract` and `execute` has a default, so a
/// simple actor only implements what its role needs.
pub trait Actor: Send {
    /// Name of this actor, unique among its siblings.
    fn name(&self) -> &str;

    /// Role and payload types.
    fn contract(&self) -> TypeContract;

    /// Publish shared collaborators at this actor's tree node. Called once
    /// when the actor is inserted into the tree.
    fn publish(&self, _registry: &mut CapabilityRegistry) {}

    /// Validate configuration and resolve collaborators. Must tolerate being
    /// called again for a fresh run.
    fn setup(&mut self, _ctx: &SetupContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Store a token for the next `execute`. Only transformers and sinks
    /// receive input; the engine has already checked the payload type.
    fn input(&mut self, token: Token) -> Result<()> {
        Err(FlowError::UnhandledData {
            actor: self.name().to_string(),
            found: token.payload_type(),
        })
    }

    /// Perform one unit of work.
    fn execute(&mut self) -> Result<()>;

    fn has_pending_output(&self) -> bool {
        false
    }

    /// Next buffered output, oldest first.
    fn output(&mut self) -> Option<Token> {
        None
    }

    /// Hook for interrupting external waits. The engine has already raised
    /// the actor's stop token when this is called.
    fn stop_execution(&mut self) {}

    /// Release per-run resources.
    fn wrap_up(&mut self) {}

    /// Release permanent resources.
    fn clean_up(&mut self) {}

    /// Whether this actor needs a human in the loop.
    fn is_interactive(&self) -> bool {
        false
    }
}

/// Bounded queue of pending outputs owned by a multi-output actor.
#[derive(Debug)]
pub struct OutputBuffer {
    pending: VecDeque<Token>,
    capacity: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl OutputBuffer {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, token: Token) -> Result<()> {
        if self.pending.len() >= self.capacity {
            return Err(FlowError::Execution(format!(
                "output buffer exceeded {} pending tokens",
                self.capacity
            )));
        }
        self.pending.push_back(token);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Token> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
