//! Actors that host and steer supervised pipelines from inside a flow.

use crate::config::SupervisorSettings;
use crate::error::{FlowError, Result};
use crate::flow::actor::{Actor, SetupContext};
use crate::flow::capability::CapabilityRegistry;
use crate::flow::contract::TypeContract;
use crate::flow::stop::StopToken;
use crate::flow::token::{PayloadType, Token};
use crate::rats::rat::Rat;
use crate::rats::supervisor::{Supervisor, SupervisorHandle};
use crate::rats::RatState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

static ANY: &[PayloadType] = &[PayloadType::Any];

/// Retry interval while the supervisor is busy.
const LOCK_RETRY: Duration = Duration::from_millis(5);

/// Standalone owning a supervisor for the flow it sits in.
///
/// Registers its rats on set-up, starts the continuous ones on execute and
/// shuts all of them down on wrap-up. Publishes a [`SupervisorHandle`].
pub struct RatsHost {
    name: String,
    handle: SupervisorHandle,
    pending: Vec<Rat>,
}

impl RatsHost {
    pub fn new(name: impl Into<String>, settings: SupervisorSettings) -> Self {
        Self {
            name: name.into(),
            handle: SupervisorHandle::new(Supervisor::new(settings)),
            pending: Vec::new(),
        }
    }

    pub fn with_rat(mut self, rat: Rat) -> Self {
        self.pending.push(rat);
        self
    }

    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }
}

impl Actor for RatsHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::standalone()
    }

    fn publish(&self, registry: &mut CapabilityRegistry) {
        registry.provide(Arc::new(self.handle.clone()));
    }

    fn setup(&mut self, _ctx: &SetupContext<'_>) -> Result<()> {
        for rat in self.pending.drain(..) {
            self.handle.register(rat)?;
        }
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        let started = self.handle.start_all()?;
        tracing::info!(host = %self.name, ?started, "Pipelines started");
        Ok(())
    }

    fn wrap_up(&mut self) {
        self.handle.shutdown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatAction {
    Pause,
    Resume,
}

/// Pauses or resumes named pipelines whenever a token passes, then
/// forwards the token. Pipelines already in the requested state, or
/// stopped, are left alone.
///
/// Works in a flow next to a [`RatsHost`] as well as inside the actor chain
/// of a pipeline supervised by the same handle. Targets are checked at
/// set-up when the supervisor is free, and on every execute otherwise.
pub struct ChangeRatState {
    name: String,
    action: RatAction,
    targets: Vec<String>,
    supervisor: Option<Arc<SupervisorHandle>>,
    stop: StopToken,
    current: Option<Token>,
    pending: Option<Token>,
}

impl ChangeRatState {
    pub fn new(name: impl Into<String>, action: RatAction) -> Self {
        Self {
            name: name.into(),
            action,
            targets: Vec::new(),
            supervisor: None,
            stop: StopToken::new(),
            current: None,
            pending: None,
        }
    }

    pub fn target(mut self, rat: impl Into<String>) -> Self {
        self.targets.push(rat.into());
        self
    }

    fn check_targets(&self, sup: &Supervisor) -> Result<()> {
        match self.targets.iter().find(|t| sup.rat(t).is_none()) {
            Some(missing) => Err(FlowError::Config(format!(
                "'{}' targets unknown pipeline '{}'",
                self.name, missing
            ))),
            None => Ok(()),
        }
    }
}

impl Actor for ChangeRatState {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::transformer(ANY, ANY)
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        if self.targets.is_empty() {
            return Err(FlowError::Config(format!("'{}' has no target pipelines", self.name)));
        }
        let supervisor = ctx.lookup::<SupervisorHandle>()?;
        // Held when the supervisor itself is setting up or starting our pipeline
        match supervisor.try_lock() {
            Some(sup) => self.check_targets(&sup)?,
            None => tracing::debug!(actor = %self.name, "Supervisor busy, targets checked on execute"),
        }
        self.stop = ctx.stop_token();
        self.supervisor = Some(supervisor);
        Ok(())
    }

    fn input(&mut self, token: Token) -> Result<()> {
        self.current = Some(token);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        let Some(token) = self.current.take() else {
            return Ok(());
        };
        let supervisor = self
            .supervisor
            .as_ref()
            .ok_or_else(|| FlowError::Config(format!("'{}' is not set up", self.name)))?;
        let mut sup = supervisor.lock_until_stopped(&self.stop, LOCK_RETRY)?;
        self.check_targets(&sup)?;
        for target in &self.targets {
            match (self.action, sup.state(target)?) {
                (RatAction::Pause, RatState::Running) => sup.pause(target)?,
                (RatAction::Resume, RatState::Paused) => sup.resume(target)?,
                (action, state) => {
                    tracing::debug!(rat = %target, ?action, %state, "State change not needed");
                }
            }
        }
        drop(sup);
        self.pending = Some(token);
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.pending.is_some()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.take()
    }
}
