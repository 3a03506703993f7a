//! Flow executor: drives one actor tree.
//!
//! State machine: `Idle → SettingUp → Iterating → WrappingUp → Idle | Failed`.
//!
//! Each run:
//! 1. Set up every active node top-down, resolving collaborators.
//! 2. Validate chain order and type compatibility.
//! 3. Execute standalones, then pull tokens lazily from the root source and
//!    walk each one through the rest of the chain, draining every actor's
//!    pending outputs before it receives its next input.
//! 4. Wrap up every actor exactly once, children before parents.
//!
//! The executor is single-threaded. Other threads interact with it only
//! through `StopHandle`s.

use crate::error::{FlowError, Result};
use crate::flow::actor::{Actor, ActorOptions, ActorState};
use crate::flow::contract::{compatible, describe, ActorRole, TypeContract};
use crate::flow::id::NodeId;
use crate::flow::stop::StopToken;
use crate::flow::token::Token;
use crate::flow::tree::ActorTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    SettingUp,
    Iterating,
    WrappingUp,
    Failed,
}

/// Counters accumulated over the executor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub activations: u64,
    pub tokens_emitted: u64,
    pub suppressed_errors: u64,
}

/// Thread-safe handle for stopping an executor, or one subtree of it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: StopToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_stopped()
    }
}

/// An actor error that was logged and absorbed rather than escalated.
#[derive(Debug)]
pub struct SuppressedError {
    pub path: String,
    pub error: FlowError,
}

pub struct FlowExecutor {
    tree: ActorTree,
    state: EngineState,
    stop: StopToken,
    /// True between a successful `setup` and the next `wrap_up`.
    ready: bool,
    stats: ExecutionStats,
    suppressed: Vec<SuppressedError>,
    failure: Option<String>,
}

impl FlowExecutor {
    pub fn new(tree: ActorTree) -> Self {
        Self {
            tree,
            state: EngineState::Idle,
            stop: StopToken::new(),
            ready: false,
            stats: ExecutionStats::default(),
            suppressed: Vec::new(),
            failure: None,
        }
    }

    pub fn tree(&self) -> &ActorTree {
        &self.tree
    }

    /// Mutable access for building; changes take effect at the next `setup`.
    pub fn tree_mut(&mut self) -> &mut ActorTree {
        self.ready = false;
        &mut self.tree
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Message of the error that put the executor into `Failed`.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_interactive(&self) -> bool {
        self.tree.is_interactive()
    }

    /// Contract of the root chain, as seen by whatever feeds `process`.
    pub fn contract(&self) -> Option<TypeContract> {
        self.tree.topology().contract_of(NodeId::ROOT)
    }

    /// Handle that stops the whole tree.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
        }
    }

    /// Handle that stops one subtree. Tokens are re-derived by `setup`, so
    /// take this after set-up.
    pub fn stop_handle_for(&self, node: NodeId) -> Option<StopHandle> {
        self.tree.stop_token(node).map(|token| StopHandle { token })
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Errors absorbed since the last call, oldest first.
    pub fn take_suppressed(&mut self) -> Vec<SuppressedError> {
        std::mem::take(&mut self.suppressed)
    }

    // ── Lifecycle ──

    /// Set up every active node and validate the chains.
    pub fn setup(&mut self) -> Result<()> {
        self.state = EngineState::SettingUp;
        self.ready = false;
        self.failure = None;
        self.suppressed.clear();
        if self.stop.is_stopped() {
            self.stop = StopToken::new();
        }
        self.tree.reset_stop_tokens(&self.stop);

        let order = self.tree.topology().subtree(NodeId::ROOT);
        for id in order {
            if self.tree.topology().is_skipped(id) {
                continue;
            }
            if let Err(err) = self.tree.setup_node(id) {
                let path = self.tree.topology().path(id).to_string();
                return self.fail(err.at(path));
            }
        }
        if let Err(err) = self.validate_chains() {
            return self.fail(err);
        }

        self.ready = true;
        self.state = EngineState::Idle;
        tracing::debug!(
            flow = %self.tree.topology().path(NodeId::ROOT),
            nodes = self.tree.len(),
            "Flow set up"
        );
        Ok(())
    }

    /// Run standalones, then drive the root source until it is exhausted or
    /// the flow is stopped.
    pub fn execute(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.state = EngineState::Iterating;
        match self.iterate() {
            Ok(()) => {
                self.state = EngineState::Idle;
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Walk one externally supplied token through the root chain and return
    /// whatever falls out of its end. Used when a receiver feeds the chain.
    pub fn process(&mut self, token: Token) -> Result<Vec<Token>> {
        self.ensure_ready()?;
        self.state = EngineState::Iterating;
        let chain = self.tree.topology().chain(NodeId::ROOT);
        let mut out = Vec::new();
        match self.forward(&chain, 0, token, &mut out) {
            Ok(()) => {
                self.state = EngineState::Idle;
                Ok(out)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Raise the stop flag for the whole tree and notify every actor.
    pub fn stop(&mut self) {
        self.stop.stop();
        self.stop_node(NodeId::ROOT);
    }

    /// Raise the stop flag of `node` and call `stop_execution` on every
    /// actor in its subtree.
    pub fn stop_node(&mut self, node: NodeId) {
        if let Some(token) = self.tree.stop_token(node) {
            token.stop();
        }
        for id in self.tree.topology().subtree(node) {
            self.notify_stop(id);
        }
    }

    /// Wrap up every actor that has not been wrapped up yet, children first.
    pub fn wrap_up(&mut self) {
        self.state = EngineState::WrappingUp;
        let order = self.tree.topology().subtree(NodeId::ROOT);
        for &id in &order {
            if self.tree.is_stopped(id) {
                self.notify_stop(id);
            }
        }
        for &id in order.iter().rev() {
            if matches!(self.tree.state(id), Some(ActorState::WrappedUp) | None) {
                continue;
            }
            if let Some(actor) = self.tree.actor_mut(id) {
                actor.wrap_up();
            }
            self.tree.set_state(id, ActorState::WrappedUp);
        }
        self.ready = false;
        self.state = if self.failure.is_some() {
            EngineState::Failed
        } else {
            EngineState::Idle
        };
    }

    /// Release permanent resources of every actor.
    pub fn clean_up(&mut self) {
        let order = self.tree.topology().subtree(NodeId::ROOT);
        for id in order.into_iter().rev() {
            if let Some(actor) = self.tree.actor_mut(id) {
                actor.clean_up();
            }
        }
    }

    /// `setup`, `execute`, then `wrap_up` regardless of the outcome.
    pub fn run(&mut self) -> Result<()> {
        let result = self.setup().and_then(|_| self.execute());
        self.wrap_up();
        result
    }

    // ── Internals ──

    fn ensure_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(FlowError::Config(format!(
                "Flow '{}' executed before a successful setup",
                self.tree.topology().path(NodeId::ROOT)
            )))
        }
    }

    fn fail<T>(&mut self, err: FlowError) -> Result<T> {
        self.state = EngineState::Failed;
        self.failure = Some(err.to_string());
        Err(err)
    }

    fn notify_stop(&mut self, id: NodeId) {
        if !matches!(self.tree.state(id), Some(ActorState::SetUp | ActorState::Running)) {
            return;
        }
        if let Some(actor) = self.tree.actor_mut(id) {
            actor.stop_execution();
        }
        self.tree.set_state(id, ActorState::Stopped);
    }

    fn validate_chains(&self) -> Result<()> {
        let topo = self.tree.topology();
        for container in topo.subtree(NodeId::ROOT) {
            let node = match topo.get(container) {
                Some(node) if node.is_container() && !topo.is_skipped(container) => node,
                _ => continue,
            };
            let chain = topo.chain(container);
            let mut previous: Option<(NodeId, TypeContract)> = None;
            for (pos, &member) in chain.iter().enumerate() {
                let contract = topo.contract_of(member).ok_or_else(|| {
                    FlowError::Config(format!("Container '{}' has no chain members", topo.path(member)))
                })?;
                match contract.role {
                    ActorRole::Source if container != NodeId::ROOT || pos != 0 => {
                        return Err(FlowError::Config(format!(
                            "Source '{}' must head the root chain",
                            topo.path(member)
                        )));
                    }
                    ActorRole::Sink if pos + 1 != chain.len() => {
                        return Err(FlowError::Config(format!(
                            "Sink '{}' must end its chain in '{}'",
                            topo.path(member),
                            node.path
                        )));
                    }
                    ActorRole::Standalone => {
                        return Err(FlowError::Config(format!(
                            "Container '{}' holds a complete chain and cannot be nested",
                            topo.path(member)
                        )));
                    }
                    _ => {}
                }
                if let Some((prev_id, prev)) = previous {
                    if !compatible(prev.produces, contract.accepts) {
                        return Err(FlowError::Incompatible(format!(
                            "{} {} not compatible with {} {}",
                            topo.path(prev_id),
                            describe(prev.produces),
                            topo.path(member),
                            describe(contract.accepts)
                        )));
                    }
                }
                previous = Some((member, contract));
            }
        }
        Ok(())
    }

    fn iterate(&mut self) -> Result<()> {
        let order = self.tree.topology().subtree(NodeId::ROOT);
        for id in order {
            if self.stop.is_stopped() {
                return Ok(());
            }
            let standalone = self
                .tree
                .topology()
                .get(id)
                .is_some_and(|n| n.is_standalone());
            if standalone && !self.tree.topology().is_skipped(id) {
                self.activate(id, None)?;
            }
        }

        let chain = self.tree.topology().chain(NodeId::ROOT);
        let Some(&head) = chain.first() else {
            return Ok(());
        };
        let head_is_source = self
            .tree
            .topology()
            .contract_of(head)
            .is_some_and(|c| c.role == ActorRole::Source);
        if !head_is_source || !self.activate(head, None)? {
            return Ok(());
        }

        let mut tail = Vec::new();
        while !self.stop.is_stopped() {
            let Some(token) = self.next_output(head) else {
                break;
            };
            self.forward(&chain, 1, token, &mut tail)?;
            if !tail.is_empty() {
                tracing::trace!(count = tail.len(), "Tokens left the root chain unconsumed");
                tail.clear();
            }
        }
        Ok(())
    }

    /// Push `token` into `chain[pos]` and everything after it. Outputs are
    /// drained depth-first, in emission order; whatever leaves the end of
    /// the chain is appended to `tail`.
    fn forward(
        &mut self,
        chain: &[NodeId],
        pos: usize,
        token: Token,
        tail: &mut Vec<Token>,
    ) -> Result<()> {
        let Some(&member) = chain.get(pos) else {
            tail.push(token);
            return Ok(());
        };
        if self.stop.is_stopped() || self.tree.is_stopped(member) {
            return Ok(());
        }

        let is_container = self
            .tree
            .topology()
            .get(member)
            .is_some_and(|n| n.is_container());
        if is_container {
            let inner = self.tree.topology().chain(member);
            let mut produced = Vec::new();
            self.forward(&inner, 0, token, &mut produced)?;
            for out in produced {
                self.forward(chain, pos + 1, out, tail)?;
            }
            return Ok(());
        }

        if !self.activate(member, Some(token))? {
            self.discard_outputs(member);
            return Ok(());
        }
        while !self.stop.is_stopped() {
            let Some(out) = self.next_output(member) else {
                break;
            };
            self.forward(chain, pos + 1, out, tail)?;
        }
        Ok(())
    }

    /// One `input` + `execute` cycle. `Ok(false)` means the actor failed
    /// and the error was absorbed.
    fn activate(&mut self, id: NodeId, input: Option<Token>) -> Result<bool> {
        if self.tree.is_stopped(id) {
            return Ok(false);
        }
        let path = self.tree.topology().path(id).to_string();
        let state = self.tree.state(id).unwrap_or(ActorState::Created);
        if !state.can_execute() {
            return Err(FlowError::Config(format!(
                "'{}' executed while {}",
                path, state
            )));
        }
        let contract = self
            .tree
            .topology()
            .contract_of(id)
            .ok_or_else(|| FlowError::Config(format!("'{}' has no contract", path)))?;

        self.tree.set_state(id, ActorState::Running);
        self.stats.activations += 1;
        let outcome = match self.tree.actor_mut(id) {
            Some(actor) => run_actor(actor, &path, contract, input),
            None => Err(FlowError::Config(format!("'{}' is not an actor", path))),
        };
        match outcome {
            Ok(()) => Ok(true),
            Err(err) => self.absorb_or_escalate(id, path, err),
        }
    }

    fn absorb_or_escalate(&mut self, id: NodeId, path: String, err: FlowError) -> Result<bool> {
        if err.is_stop() {
            return Ok(false);
        }
        let options = self
            .tree
            .topology()
            .get(id)
            .map(|n| n.options)
            .unwrap_or_default();
        if options.stop_flow_on_error {
            self.stop.stop();
            return Err(err.at(path));
        }
        if !options.silent {
            tracing::error!(actor = %path, "{}", err);
        }
        self.stats.suppressed_errors += 1;
        self.suppressed.push(SuppressedError { path, error: err });
        Ok(false)
    }

    fn next_output(&mut self, id: NodeId) -> Option<Token> {
        let actor = self.tree.actor_mut(id)?;
        if !actor.has_pending_output() {
            return None;
        }
        let token = actor.output()?;
        self.stats.tokens_emitted += 1;
        Some(token.stamped(self.tree.topology().path(id)))
    }

    fn discard_outputs(&mut self, id: NodeId) {
        if let Some(actor) = self.tree.actor_mut(id) {
            while actor.has_pending_output() {
                if actor.output().is_none() {
                    break;
                }
            }
        }
    }
}

fn run_actor(
    actor: &mut dyn Actor,
    path: &str,
    contract: TypeContract,
    input: Option<Token>,
) -> Result<()> {
    if let Some(token) = input {
        if !contract.accepts_type(token.payload_type()) {
            return Err(FlowError::UnhandledData {
                actor: path.to_string(),
                found: token.payload_type(),
            });
        }
        actor.input(token)?;
    }
    actor.execute()
}

/// Convenience builder for flat flows: every actor goes under the root.
pub struct FlowBuilder {
    tree: ActorTree,
    error: Option<FlowError>,
}

impl FlowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            tree: ActorTree::new(name),
            error: None,
        }
    }

    pub fn add(self, actor: impl Actor + 'static) -> Self {
        self.add_with(actor, ActorOptions::default())
    }

    pub fn add_with(mut self, actor: impl Actor + 'static, options: ActorOptions) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.tree.add_actor(NodeId::ROOT, Box::new(actor), options) {
                self.error = Some(err);
            }
        }
        self
    }

    /// The first insertion error, if any, otherwise an executor over the tree.
    pub fn build(self) -> Result<FlowExecutor> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(FlowExecutor::new(self.tree)),
        }
    }
}
