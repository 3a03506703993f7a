//! Pipeline supervisor.
//!
//! Owns every rat of one flow and is the only place their state changes.
//! Each supervisor is an explicit object (no process-wide singleton), so
//! several flows can run side by side in one process.

use crate::config::{InitialState, SupervisorSettings};
use crate::error::{FlowError, Result};
use crate::flow::capability::Collaborator;
use crate::flow::stop::StopToken;
use crate::rats::rat::{Rat, RatEvent, RatEventKind, RatStats};
use crate::rats::status::{PipelineStatus, StatusTable};
use crate::rats::RatState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

/// Asked before a bulk stop touches a pipeline that needs a human in the loop.
#[cfg_attr(test, mockall::automock)]
pub trait StopConfirmation: Send + Sync {
    fn confirm_stop(&self, rat: &str) -> bool;
}

/// Never confirms; interactive pipelines survive bulk stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyInteractiveStops;

impl StopConfirmation for DenyInteractiveStops {
    fn confirm_stop(&self, _rat: &str) -> bool {
        false
    }
}

pub struct Supervisor {
    settings: SupervisorSettings,
    rats: Vec<Rat>,
    events_tx: Sender<RatEvent>,
    events_rx: Receiver<RatEvent>,
    stop: StopToken,
    confirmation: Box<dyn StopConfirmation>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            settings,
            rats: Vec::new(),
            events_tx,
            events_rx,
            stop: StopToken::new(),
            confirmation: Box::new(DenyInteractiveStops),
        }
    }

    pub fn with_confirmation(mut self, confirmation: impl StopConfirmation + 'static) -> Self {
        self.confirmation = Box::new(confirmation);
        self
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn flow_id(&self) -> &str {
        &self.settings.flow_id
    }

    /// Set up `rat` (unless it already is) and take ownership of it. Names
    /// are unique per supervisor.
    pub fn register(&mut self, mut rat: Rat) -> Result<()> {
        if self.rats.iter().any(|r| r.name() == rat.name()) {
            return Err(FlowError::DuplicateName(rat.name().to_string()));
        }
        if !rat.is_set_up() {
            setup_rat(&mut rat)?;
        }
        tracing::debug!(flow = %self.settings.flow_id, rat = %rat.name(), "Pipeline registered");
        self.rats.push(rat);
        Ok(())
    }

    /// Stop (if needed) and hand back the rat called `name`.
    pub fn deregister(&mut self, name: &str) -> Result<Rat> {
        let index = self.index_of(name)?;
        let mut rat = self.rats.remove(index);
        if rat.state() != RatState::Stopped {
            rat.stop()?;
        }
        Ok(rat)
    }

    pub fn names(&self) -> Vec<String> {
        self.rats.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.rats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rats.is_empty()
    }

    pub fn rat(&self, name: &str) -> Option<&Rat> {
        self.rats.iter().find(|r| r.name() == name)
    }

    pub fn state(&mut self, name: &str) -> Result<RatState> {
        self.reap();
        Ok(self.get(name)?.state())
    }

    pub fn stats(&self, name: &str) -> Result<RatStats> {
        Ok(self.get(name)?.stats())
    }

    pub fn last_error(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name)?.last_error().map(str::to_string))
    }

    /// Start a stopped pipeline in its configured initial state.
    pub fn start(&mut self, name: &str) -> Result<()> {
        self.reap();
        let index = self.index_of(name)?;
        let paused = self.rats[index].settings().initial_state == InitialState::Paused;
        let events = self.events_tx.clone();
        self.rats[index].start(paused, events, &self.stop)
    }

    /// Start every stopped continuous pipeline. Manual pipelines are left
    /// alone. Returns the names started.
    pub fn start_all(&mut self) -> Result<Vec<String>> {
        self.reap();
        let mut started = Vec::new();
        for rat in &mut self.rats {
            if rat.is_manual() || rat.state() != RatState::Stopped || rat.is_leaked() {
                continue;
            }
            let paused = rat.settings().initial_state == InitialState::Paused;
            rat.start(paused, self.events_tx.clone(), &self.stop)?;
            started.push(rat.name().to_string());
        }
        Ok(started)
    }

    /// Valid only from `Running`.
    pub fn pause(&mut self, name: &str) -> Result<()> {
        self.reap();
        self.get_mut(name)?.pause()
    }

    /// Valid only from `Paused`.
    pub fn resume(&mut self, name: &str) -> Result<()> {
        self.reap();
        self.get_mut(name)?.resume()
    }

    /// Valid from `Running` or `Paused`; joins both threads.
    pub fn stop(&mut self, name: &str) -> Result<()> {
        self.reap();
        let rat = self.get_mut(name)?;
        if !rat.is_stoppable() {
            return Err(FlowError::NotStoppable(name.to_string()));
        }
        rat.stop()
    }

    /// Pause every running pausable pipeline.
    pub fn pause_all(&mut self) -> Result<Vec<String>> {
        self.reap();
        let mut affected = Vec::new();
        for rat in &mut self.rats {
            if rat.state() == RatState::Running && rat.is_pausable() {
                rat.pause()?;
                affected.push(rat.name().to_string());
            }
        }
        Ok(affected)
    }

    pub fn resume_all(&mut self) -> Result<Vec<String>> {
        self.reap();
        let mut affected = Vec::new();
        for rat in &mut self.rats {
            if rat.state() == RatState::Paused {
                rat.resume()?;
                affected.push(rat.name().to_string());
            }
        }
        Ok(affected)
    }

    /// Stop every stoppable pipeline. Interactive ones are stopped only
    /// when the confirmation approves. Keeps going past individual
    /// failures and reports the first one.
    pub fn stop_all(&mut self) -> Result<Vec<String>> {
        self.reap();
        let mut affected = Vec::new();
        let mut first_error = None;
        for rat in &mut self.rats {
            if rat.state() == RatState::Stopped || !rat.is_stoppable() {
                continue;
            }
            if rat.is_interactive() && !self.confirmation.confirm_stop(rat.name()) {
                tracing::info!(rat = %rat.name(), "Interactive pipeline kept running");
                continue;
            }
            match rat.stop() {
                Ok(()) => affected.push(rat.name().to_string()),
                Err(err) => {
                    tracing::error!(rat = %rat.name(), "Stop failed: {}", err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(affected),
        }
    }

    /// Snapshot of every pipeline, after collecting finished ones.
    pub fn status(&mut self) -> StatusTable {
        self.reap();
        let rows = self
            .rats
            .iter()
            .filter(|r| r.settings().show_in_control)
            .map(|r| {
                let state = r.state();
                PipelineStatus {
                    id: self.settings.flow_id.clone(),
                    name: r.name().to_string(),
                    pausable: r.is_pausable(),
                    paused: state == RatState::Paused,
                    stoppable: r.is_stoppable(),
                    stopped: state == RatState::Stopped,
                    interactive: r.is_interactive(),
                }
            })
            .collect();
        StatusTable::new(rows)
    }

    /// Handle pending thread events: a finished or failed pipeline is
    /// joined and marked stopped. Returns the number of events handled.
    pub fn reap(&mut self) -> usize {
        let events: Vec<RatEvent> = self.events_rx.try_iter().collect();
        let mut handled = 0;
        for event in events {
            let Some(rat) = self.rats.iter_mut().find(|r| r.name() == event.rat) else {
                continue;
            };
            if rat.run() != event.run || rat.state() == RatState::Stopped {
                continue;
            }
            if let RatEventKind::Failed(message) = &event.kind {
                rat.set_last_error(message.clone());
            }
            if let Err(err) = rat.stop() {
                tracing::warn!(rat = %rat.name(), "Join after {:?} failed: {}", event.kind, err);
            }
            handled += 1;
        }
        handled
    }

    /// Flow teardown: stop every pipeline, interactive ones included, and
    /// release their resources.
    pub fn shutdown(&mut self) {
        self.stop.stop();
        for rat in &mut self.rats {
            if let Err(err) = rat.shutdown() {
                tracing::warn!(rat = %rat.name(), "Shutdown failed: {}", err);
            }
        }
        self.stop = StopToken::new();
        let _ = self.events_rx.try_iter().count();
        tracing::debug!(flow = %self.settings.flow_id, "Supervisor shut down");
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.rats
            .iter()
            .position(|r| r.name() == name)
            .ok_or_else(|| FlowError::UnknownPipeline(name.to_string()))
    }

    fn get(&self, name: &str) -> Result<&Rat> {
        self.index_of(name).map(|i| &self.rats[i])
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Rat> {
        let index = self.index_of(name)?;
        Ok(&mut self.rats[index])
    }
}

fn setup_rat(rat: &mut Rat) -> Result<()> {
    rat.setup()
        .map_err(|e| e.with_context(format!("pipeline '{}'", rat.name())))
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Shared, thread-safe access to a supervisor. Published to the actor tree
/// as a collaborator and served by the control server.
#[derive(Clone)]
pub struct SupervisorHandle {
    inner: Arc<Mutex<Supervisor>>,
}

impl Collaborator for SupervisorHandle {}

impl SupervisorHandle {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(supervisor)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Supervisor> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` while another caller holds the supervisor, including the
    /// calling thread itself.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Supervisor>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Lock, retrying every `retry` until `stop` is raised.
    ///
    /// Pipeline threads must use this instead of [`lock`](Self::lock): the
    /// supervisor may hold its lock while it joins them.
    pub fn lock_until_stopped(
        &self,
        stop: &StopToken,
        retry: Duration,
    ) -> Result<MutexGuard<'_, Supervisor>> {
        loop {
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }
            if !stop.sleep(retry, retry) {
                return Err(FlowError::Stopped);
            }
        }
    }

    /// Sets the rat up before taking the lock, so its actors may look at
    /// this supervisor during set-up.
    pub fn register(&self, mut rat: Rat) -> Result<()> {
        setup_rat(&mut rat)?;
        self.lock().register(rat)
    }

    pub fn start(&self, name: &str) -> Result<()> {
        self.lock().start(name)
    }

    pub fn start_all(&self) -> Result<Vec<String>> {
        self.lock().start_all()
    }

    pub fn pause(&self, name: &str) -> Result<()> {
        self.lock().pause(name)
    }

    pub fn resume(&self, name: &str) -> Result<()> {
        self.lock().resume(name)
    }

    pub fn stop(&self, name: &str) -> Result<()> {
        self.lock().stop(name)
    }

    pub fn pause_all(&self) -> Result<Vec<String>> {
        self.lock().pause_all()
    }

    pub fn resume_all(&self) -> Result<Vec<String>> {
        self.lock().resume_all()
    }

    pub fn stop_all(&self) -> Result<Vec<String>> {
        self.lock().stop_all()
    }

    pub fn status(&self) -> StatusTable {
        self.lock().status()
    }

    pub fn state(&self, name: &str) -> Result<RatState> {
        self.lock().state(name)
    }

    pub fn shutdown(&self) {
        self.lock().shutdown()
    }
}
