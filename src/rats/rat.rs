//! One supervised pipeline: a receiver thread and a transmitter thread
//! joined by a queue bridge.
//!
//! The receiver thread receives, runs the optional actor chain and admits
//! results through the queue's guard. The transmitter thread drains the
//! queue. Both park at a shared pause gate before every admission and every
//! drain, and both observe one stop token at least once per tick.

use crate::config::{RatMode, RatSettings};
use crate::error::{FlowError, Result};
use crate::flow::contract::{compatible, describe};
use crate::flow::executor::{FlowExecutor, StopHandle};
use crate::flow::stop::StopToken;
use crate::flow::token::{Failure, Payload, PayloadType, Token};
use crate::rats::endpoint::{RatReceiver, RatTransmitter};
use crate::rats::queue::QueueBridge;
use crate::rats::RatState;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Poll interval of the bounded join in `stop`.
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Notification from a pipeline thread to its supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatEvent {
    pub rat: String,
    /// Run the event belongs to; events of earlier runs are stale.
    pub run: u64,
    pub kind: RatEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatEventKind {
    /// The receiver is exhausted and the queue drained.
    Finished,
    /// A thread stopped the pipeline because of an error.
    Failed(String),
}

#[derive(Debug, Default)]
struct RatCounters {
    received: AtomicU64,
    transmitted: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of a pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RatStats {
    pub received: u64,
    pub transmitted: u64,
    pub failed: u64,
    pub queued: usize,
}

/// Parks both threads while paused.
#[derive(Debug)]
struct PauseGate {
    paused: Mutex<bool>,
    changed: Condvar,
}

impl PauseGate {
    fn new(paused: bool) -> Self {
        Self {
            paused: Mutex::new(paused),
            changed: Condvar::new(),
        }
    }

    fn set(&self, paused: bool) {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner) = paused;
        self.changed.notify_all();
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake(&self) {
        self.changed.notify_all();
    }

    /// Block while paused. Returns `false` once `stop` is raised.
    fn wait(&self, stop: &StopToken, tick: Duration) -> bool {
        let mut paused = self.paused.lock().unwrap_or_else(PoisonError::into_inner);
        while *paused {
            if stop.is_stopped() {
                return false;
            }
            paused = self
                .changed
                .wait_timeout(paused, tick)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        !stop.is_stopped()
    }
}

/// State shared by the two threads of one run.
struct Shared {
    name: String,
    run: u64,
    settings: RatSettings,
    stop: StopToken,
    actor_stop: Option<StopHandle>,
    gate: PauseGate,
    queue: Arc<QueueBridge>,
    receiver_done: AtomicBool,
    counters: Arc<RatCounters>,
    events: Sender<RatEvent>,
    flow_errors: Option<Arc<QueueBridge>>,
    send_errors: Option<Arc<QueueBridge>>,
}

impl Shared {
    fn halt(&self) {
        self.stop.stop();
        if let Some(actors) = &self.actor_stop {
            actors.stop();
        }
        self.gate.wake();
        self.queue.wake_all();
    }

    fn report_failure(&self, err: &FlowError) {
        tracing::error!(rat = %self.name, "Pipeline failed: {}", err);
        self.halt();
        let _ = self.events.send(RatEvent {
            rat: self.name.clone(),
            run: self.run,
            kind: RatEventKind::Failed(err.to_string()),
        });
    }

    /// Count a failed item and park it on `target` as a failure token.
    fn record(&self, target: Option<&Arc<QueueBridge>>, payload: Payload, message: String, origin: &str) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let Some(queue) = target else { return };
        let failure = Token::new(Failure::new(payload, message, origin));
        if let Err(err) = queue.push(failure, Duration::ZERO) {
            tracing::warn!(rat = %self.name, queue = %queue.name(), "Dropped failure record: {}", err);
        }
    }
}

struct ReceiverHalf {
    receiver: Box<dyn RatReceiver>,
    actors: Option<FlowExecutor>,
}

struct Running {
    shared: Arc<Shared>,
    receiver: JoinHandle<ReceiverHalf>,
    transmitter: JoinHandle<Box<dyn RatTransmitter>>,
}

/// A receiver and a transmitter, with an optional actor chain between them.
///
/// Components live in the rat while it is stopped and move into the
/// threads while it runs.
pub struct Rat {
    name: String,
    settings: RatSettings,
    receiver: Option<Box<dyn RatReceiver>>,
    actors: Option<FlowExecutor>,
    transmitter: Option<Box<dyn RatTransmitter>>,
    flow_errors: Option<Arc<QueueBridge>>,
    send_errors: Option<Arc<QueueBridge>>,
    supports_pause: bool,
    interactive: bool,
    counters: Arc<RatCounters>,
    running: Option<Running>,
    set_up: bool,
    leaked: bool,
    runs: u64,
    last_error: Option<String>,
}

impl Rat {
    pub fn new(
        name: impl Into<String>,
        receiver: impl RatReceiver + 'static,
        transmitter: impl RatTransmitter + 'static,
    ) -> Self {
        let supports_pause = receiver.supports_pause() && transmitter.supports_pause();
        let interactive = receiver.is_interactive() || transmitter.is_interactive();
        Self {
            name: name.into(),
            settings: RatSettings::default(),
            receiver: Some(Box::new(receiver)),
            actors: None,
            transmitter: Some(Box::new(transmitter)),
            flow_errors: None,
            send_errors: None,
            supports_pause,
            interactive,
            counters: Arc::default(),
            running: None,
            set_up: false,
            leaked: false,
            runs: 0,
            last_error: None,
        }
    }

    /// Run `actors` on every received token. Their root chain must start
    /// with a transformer and must not end in a sink.
    pub fn with_actors(mut self, actors: FlowExecutor) -> Self {
        self.interactive |= actors.is_interactive();
        self.actors = Some(actors);
        self.set_up = false;
        self
    }

    pub fn with_settings(mut self, settings: RatSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Queue receiving a failure token for every item the actor chain
    /// rejected.
    pub fn with_flow_error_queue(mut self, queue: Arc<QueueBridge>) -> Self {
        self.flow_errors = Some(queue);
        self
    }

    /// Queue receiving a failure token for every item the transmitter
    /// rejected.
    pub fn with_send_error_queue(mut self, queue: Arc<QueueBridge>) -> Self {
        self.send_errors = Some(queue);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &RatSettings {
        &self.settings
    }

    pub fn state(&self) -> RatState {
        match &self.running {
            None => RatState::Stopped,
            Some(running) if running.shared.gate.is_paused() => RatState::Paused,
            Some(_) => RatState::Running,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.settings.mode == RatMode::Manual
    }

    /// Manual pipelines and pipelines with an end that cannot be suspended
    /// are not pausable.
    pub fn is_pausable(&self) -> bool {
        self.supports_pause && !self.is_manual()
    }

    pub fn is_stoppable(&self) -> bool {
        self.settings.stoppable
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// True after a stop timed out; the pipeline cannot be restarted.
    pub fn is_leaked(&self) -> bool {
        self.leaked
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn set_last_error(&mut self, message: String) {
        self.last_error = Some(message);
    }

    pub fn is_set_up(&self) -> bool {
        self.set_up
    }

    /// Number of the current (or last) run, starting at 1.
    pub fn run(&self) -> u64 {
        self.runs
    }

    pub fn stats(&self) -> RatStats {
        RatStats {
            received: self.counters.received.load(Ordering::Relaxed),
            transmitted: self.counters.transmitted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queued: self.running.as_ref().map_or(0, |r| r.shared.queue.size()),
        }
    }

    /// Validate both ends and the actor chain, and check that the types
    /// line up from receiver to transmitter.
    pub fn setup(&mut self) -> Result<()> {
        let (Some(receiver), Some(transmitter)) = (self.receiver.as_mut(), self.transmitter.as_mut())
        else {
            return Err(FlowError::Config(format!(
                "Pipeline '{}' cannot be set up while its components are in use",
                self.name
            )));
        };
        receiver
            .setup()
            .map_err(|e| e.with_context(format!("receiver '{}'", receiver.name())))?;
        transmitter
            .setup()
            .map_err(|e| e.with_context(format!("transmitter '{}'", transmitter.name())))?;

        let received = [receiver.produces()];
        let mut produced: &[PayloadType] = &received;
        if let Some(actors) = self.actors.as_mut() {
            actors.setup()?;
            let contract = actors.contract().ok_or_else(|| {
                FlowError::Config(format!("Actor chain of pipeline '{}' is empty", self.name))
            })?;
            if !contract.role.takes_input() || !contract.role.gives_output() {
                return Err(FlowError::Config(format!(
                    "Actor chain of pipeline '{}' must take input and give output",
                    self.name
                )));
            }
            if !compatible(produced, contract.accepts) {
                return Err(FlowError::Incompatible(format!(
                    "Receiver {} {} not compatible with actors {}",
                    receiver.name(),
                    describe(produced),
                    describe(contract.accepts)
                )));
            }
            produced = contract.produces;
        }
        if !compatible(produced, transmitter.accepts()) {
            return Err(FlowError::Incompatible(format!(
                "{} not compatible with transmitter {} {}",
                describe(produced),
                transmitter.name(),
                describe(transmitter.accepts())
            )));
        }

        self.set_up = true;
        Ok(())
    }

    /// Spawn both threads. `paused` starts them parked at the pause gate.
    /// Valid only from `Stopped`.
    pub fn start(&mut self, paused: bool, events: Sender<RatEvent>, parent: &StopToken) -> Result<()> {
        if self.running.is_some() {
            return Err(FlowError::InvalidState {
                name: self.name.clone(),
                expected: "stopped",
                actual: self.state(),
            });
        }
        if self.leaked {
            return Err(FlowError::Config(format!(
                "Pipeline '{}' leaked threads on its last stop and cannot be restarted",
                self.name
            )));
        }
        if !self.set_up {
            self.setup()?;
        }
        let (Some(receiver), Some(transmitter)) = (self.receiver.as_mut(), self.transmitter.as_mut())
        else {
            return Err(FlowError::Config(format!(
                "Pipeline '{}' lost its components",
                self.name
            )));
        };
        if let Some(actors) = self.actors.as_mut() {
            if !actors.is_ready() {
                actors.setup()?;
            }
            actors.execute()?;
        }
        receiver.init_reception()?;
        transmitter.init_transmission()?;

        self.runs += 1;
        let shared = Arc::new(Shared {
            name: self.name.clone(),
            run: self.runs,
            settings: self.settings.clone(),
            stop: parent.child(),
            actor_stop: self.actors.as_ref().map(FlowExecutor::stop_handle),
            gate: PauseGate::new(paused),
            queue: Arc::new(QueueBridge::from_settings(
                format!("{}.queue", self.name),
                &self.settings.queue,
            )),
            receiver_done: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
            events,
            flow_errors: self.flow_errors.clone(),
            send_errors: self.send_errors.clone(),
        });

        let half = ReceiverHalf {
            receiver: self.receiver.take().ok_or_else(|| FlowError::Config("receiver missing".into()))?,
            actors: self.actors.take(),
        };
        let transmitter = self
            .transmitter
            .take()
            .ok_or_else(|| FlowError::Config("transmitter missing".into()))?;

        let receiver = thread::Builder::new()
            .name(format!("rat-{}-rx", self.name))
            .spawn({
                let shared = Arc::clone(&shared);
                move || receive_loop(&shared, half)
            })?;
        let transmitter = match thread::Builder::new()
            .name(format!("rat-{}-tx", self.name))
            .spawn({
                let shared = Arc::clone(&shared);
                move || transmit_loop(&shared, transmitter)
            }) {
            Ok(handle) => handle,
            Err(err) => {
                shared.halt();
                if let Ok(half) = receiver.join() {
                    self.receiver = Some(half.receiver);
                    self.actors = half.actors;
                }
                return Err(err.into());
            }
        };

        tracing::info!(rat = %self.name, run = self.runs, paused, "Pipeline started");
        self.running = Some(Running {
            shared,
            receiver,
            transmitter,
        });
        Ok(())
    }

    /// Park both threads. Valid only from `Running`.
    pub fn pause(&mut self) -> Result<()> {
        if !self.is_pausable() {
            return Err(FlowError::NotPausable(self.name.clone()));
        }
        match &self.running {
            Some(running) if !running.shared.gate.is_paused() => {
                running.shared.gate.set(true);
                tracing::info!(rat = %self.name, "Pipeline paused");
                Ok(())
            }
            _ => Err(FlowError::InvalidState {
                name: self.name.clone(),
                expected: "running",
                actual: self.state(),
            }),
        }
    }

    /// Unpark both threads. Valid only from `Paused`.
    pub fn resume(&mut self) -> Result<()> {
        match &self.running {
            Some(running) if running.shared.gate.is_paused() => {
                running.shared.gate.set(false);
                tracing::info!(rat = %self.name, "Pipeline resumed");
                Ok(())
            }
            _ => Err(FlowError::InvalidState {
                name: self.name.clone(),
                expected: "paused",
                actual: self.state(),
            }),
        }
    }

    /// Signal stop, join both threads within the stop timeout and release
    /// the queue. Valid from `Running` or `Paused`.
    pub fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Err(FlowError::InvalidState {
                name: self.name.clone(),
                expected: "running or paused",
                actual: RatState::Stopped,
            });
        };
        self.halt(running)
    }

    /// Stop if running, then release the actors' permanent resources.
    pub fn shutdown(&mut self) -> Result<()> {
        let result = match self.running.take() {
            Some(running) => self.halt(running),
            None => Ok(()),
        };
        if let Some(actors) = self.actors.as_mut() {
            actors.clean_up();
        }
        result
    }

    fn halt(&mut self, running: Running) -> Result<()> {
        let Running {
            shared,
            receiver,
            transmitter,
        } = running;
        shared.halt();

        let timeout = self.settings.stop_timeout();
        let warn_every = self.settings.stop_warning_interval();
        let started = Instant::now();
        let mut next_warning = warn_every;
        while !(receiver.is_finished() && transmitter.is_finished()) {
            let waited = started.elapsed();
            if waited >= timeout {
                self.leaked = true;
                tracing::error!(
                    rat = %self.name,
                    waited_ms = waited.as_millis() as u64,
                    "Pipeline threads did not stop in time, leaking them"
                );
                return Err(FlowError::Execution(format!(
                    "Pipeline '{}' did not stop within {:?}",
                    self.name, timeout
                )));
            }
            if waited >= next_warning {
                tracing::warn!(
                    rat = %self.name,
                    waited_ms = waited.as_millis() as u64,
                    "Still waiting for pipeline threads to stop"
                );
                next_warning += warn_every;
            }
            thread::sleep(JOIN_POLL.min(timeout - waited));
        }

        match receiver.join() {
            Ok(half) => {
                self.receiver = Some(half.receiver);
                self.actors = half.actors;
            }
            Err(_) => {
                self.set_up = false;
                self.last_error = Some("receiver thread panicked".into());
                tracing::error!(rat = %self.name, "Receiver thread panicked");
            }
        }
        match transmitter.join() {
            Ok(transmitter) => self.transmitter = Some(transmitter),
            Err(_) => {
                self.set_up = false;
                self.last_error = Some("transmitter thread panicked".into());
                tracing::error!(rat = %self.name, "Transmitter thread panicked");
            }
        }

        let dropped = shared.queue.drain().len();
        tracing::info!(rat = %self.name, dropped, "Pipeline stopped");
        Ok(())
    }
}

impl Drop for Rat {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            if let Err(err) = self.halt(running) {
                tracing::warn!(rat = %self.name, "Stop on drop failed: {}", err);
            }
        }
    }
}

fn receive_loop(shared: &Shared, mut half: ReceiverHalf) -> ReceiverHalf {
    let tick = shared.settings.tick();
    let delay = shared.settings.queue.retrieval_delay();
    let ReceiverHalf { receiver, actors } = &mut half;

    'run: while shared.gate.wait(&shared.stop, tick) {
        if receiver.is_exhausted() {
            break;
        }
        if let Err(err) = receiver.receive(&shared.stop) {
            if err.is_stop() {
                break;
            }
            let err = err.with_context(format!("receiver '{}'", receiver.name()));
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            if shared.settings.stop_on_error {
                shared.report_failure(&err);
                break;
            }
            tracing::warn!(rat = %shared.name, "Receive failed: {}", err);
            if !shared.stop.sleep(tick, tick) {
                break;
            }
            continue;
        }

        while let Some(token) = receiver.output() {
            shared.counters.received.fetch_add(1, Ordering::Relaxed);
            let token = token.stamped(receiver.name());
            let items = match actors.as_mut() {
                None => vec![token],
                Some(actors) => {
                    let payload = token.payload().clone();
                    let result = actors.process(token);
                    for suppressed in actors.take_suppressed() {
                        shared.record(
                            shared.flow_errors.as_ref(),
                            payload.clone(),
                            suppressed.error.to_string(),
                            &suppressed.path,
                        );
                    }
                    match result {
                        Ok(items) => items,
                        Err(err) if err.is_stop() => break 'run,
                        Err(err) => {
                            shared.record(shared.flow_errors.as_ref(), payload, err.to_string(), &shared.name);
                            shared.report_failure(&err);
                            break 'run;
                        }
                    }
                }
            };

            for item in items {
                if !shared.gate.wait(&shared.stop, tick) {
                    break 'run;
                }
                match shared.queue.enqueue(item, delay, &shared.stop) {
                    Ok(()) => {}
                    Err(err) if err.is_stop() => break 'run,
                    Err(err) => {
                        tracing::warn!(rat = %shared.name, "Enqueue failed: {}", err);
                        shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                        if shared.settings.stop_on_error {
                            shared.report_failure(&err);
                            break 'run;
                        }
                    }
                }
            }
        }

        if let Some(interval) = receiver.poll_interval() {
            if !shared.stop.sleep(interval, tick) {
                break;
            }
        }
    }

    if let Some(actors) = actors.as_mut() {
        actors.wrap_up();
    }
    receiver.wrap_up();
    shared.receiver_done.store(true, Ordering::Release);
    shared.queue.wake_all();
    half
}

fn transmit_loop(shared: &Shared, mut transmitter: Box<dyn RatTransmitter>) -> Box<dyn RatTransmitter> {
    let tick = shared.settings.tick();

    while shared.gate.wait(&shared.stop, tick) {
        if !transmitter.can_input() {
            if !shared.stop.sleep(tick, tick) {
                break;
            }
            continue;
        }
        let Some(token) = shared.queue.dequeue_timeout(tick, &shared.stop) else {
            if shared.receiver_done.load(Ordering::Acquire) && shared.queue.is_empty() {
                if !shared.stop.is_stopped() {
                    tracing::info!(rat = %shared.name, "Pipeline finished");
                    let _ = shared.events.send(RatEvent {
                        rat: shared.name.clone(),
                        run: shared.run,
                        kind: RatEventKind::Finished,
                    });
                }
                break;
            }
            continue;
        };

        let payload = token.shared_payload();
        match transmitter.transmit(token, &shared.stop) {
            Ok(()) => {
                shared.counters.transmitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) if err.is_stop() => break,
            Err(err) => {
                let err = err.with_context(format!("transmitter '{}'", transmitter.name()));
                shared.record(
                    shared.send_errors.as_ref(),
                    (*payload).clone(),
                    err.to_string(),
                    transmitter.name(),
                );
                if shared.settings.stop_on_error {
                    shared.report_failure(&err);
                    break;
                }
                tracing::warn!(rat = %shared.name, "Transmit failed: {}", err);
            }
        }
    }

    transmitter.wrap_up();
    transmitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::actors::transformers::Increment;
    use crate::flow::executor::FlowBuilder;
    use crate::rats::inputs::{ListInput, Ticker};
    use crate::rats::outputs::{CollectOutput, Discard};
    use crossbeam_channel::{unbounded, Receiver};

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn fast_settings() -> RatSettings {
        RatSettings {
            tick_ms: 10,
            ..RatSettings::default()
        }
    }

    fn events() -> (Sender<RatEvent>, Receiver<RatEvent>) {
        unbounded()
    }

    /// Ignores the stop token for a long time.
    struct Stubborn;

    impl RatTransmitter for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn accepts(&self) -> &'static [PayloadType] {
            &[PayloadType::Any]
        }

        fn transmit(&mut self, _token: Token, _stop: &StopToken) -> Result<()> {
            thread::sleep(Duration::from_millis(400));
            Ok(())
        }
    }

    #[test]
    fn test_finite_pipeline_delivers_and_finishes() {
        let output = CollectOutput::new("collect");
        let collected = output.handle();
        let input = ListInput::new("list", vec![Payload::Int(1), Payload::Int(2), Payload::Int(3)]);
        let mut rat = Rat::new("copy", input, output).with_settings(fast_settings());
        let (tx, rx) = events();

        rat.start(false, tx, &StopToken::new()).unwrap();
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.kind, RatEventKind::Finished);
        assert_eq!(event.run, 1);
        rat.stop().unwrap();

        let values: Vec<i64> = collected
            .lock()
            .unwrap()
            .iter()
            .filter_map(|t| t.payload().as_int())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(rat.stats().transmitted, 3);
        assert_eq!(rat.state(), RatState::Stopped);
    }

    #[test]
    fn test_actor_chain_runs_between_ends() {
        let output = CollectOutput::new("collect");
        let collected = output.handle();
        let actors = FlowBuilder::new("chain").add(Increment::new("inc")).build().unwrap();
        let mut rat = Rat::new("inc", ListInput::new("list", vec![Payload::Int(1)]), output)
            .with_actors(actors)
            .with_settings(fast_settings());
        let (tx, rx) = events();
        rat.start(false, tx, &StopToken::new()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rat.stop().unwrap();
        assert_eq!(collected.lock().unwrap()[0].payload(), &Payload::Int(2));
    }

    #[test]
    fn test_incompatible_actor_chain_rejected() {
        let actors = FlowBuilder::new("chain").add(Increment::new("inc")).build().unwrap();
        let mut rat = Rat::new("bad", ListInput::new("list", vec![Payload::from("x")]), Discard::new())
            .with_actors(actors);
        assert!(matches!(rat.setup(), Err(FlowError::Incompatible(_))));
    }

    #[test]
    fn test_pause_and_resume_state_machine() {
        let mut rat = Rat::new("tick", Ticker::new("tick", Duration::from_millis(5)), Discard::new())
            .with_settings(fast_settings());
        let (tx, _rx) = events();

        assert!(matches!(rat.pause(), Err(FlowError::InvalidState { .. })));
        rat.start(false, tx, &StopToken::new()).unwrap();
        assert!(matches!(rat.resume(), Err(FlowError::InvalidState { expected: "paused", .. })));
        assert_eq!(rat.state(), RatState::Running);

        rat.pause().unwrap();
        assert_eq!(rat.state(), RatState::Paused);
        assert!(matches!(rat.pause(), Err(FlowError::InvalidState { expected: "running", .. })));
        assert_eq!(rat.state(), RatState::Paused);

        rat.resume().unwrap();
        assert_eq!(rat.state(), RatState::Running);
        rat.stop().unwrap();
        assert!(matches!(rat.stop(), Err(FlowError::InvalidState { .. })));
    }

    #[test]
    fn test_paused_pipeline_delivers_nothing() {
        let output = CollectOutput::new("collect");
        let collected = output.handle();
        let mut rat = Rat::new("tick", Ticker::new("tick", Duration::from_millis(2)), output)
            .with_settings(fast_settings());
        let (tx, _rx) = events();
        rat.start(true, tx, &StopToken::new()).unwrap();
        assert_eq!(rat.state(), RatState::Paused);
        thread::sleep(Duration::from_millis(50));
        assert!(collected.lock().unwrap().is_empty());

        rat.resume().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !collected.lock().unwrap().is_empty()));
        rat.stop().unwrap();
    }

    #[test]
    fn test_manual_pipeline_not_pausable() {
        let mut rat = Rat::new("manual", Ticker::new("tick", Duration::from_millis(5)), Discard::new())
            .with_settings(RatSettings {
                tick_ms: 10,
                ..RatSettings::manual()
            });
        let (tx, _rx) = events();
        rat.start(false, tx, &StopToken::new()).unwrap();
        assert!(matches!(rat.pause(), Err(FlowError::NotPausable(_))));
        rat.stop().unwrap();
    }

    #[test]
    fn test_restart_after_stop() {
        let output = CollectOutput::new("collect");
        let collected = output.handle();
        let mut rat = Rat::new("again", ListInput::new("list", vec![Payload::Int(7)]), output)
            .with_settings(fast_settings());
        for run in 1..=2 {
            let (tx, rx) = events();
            rat.start(false, tx, &StopToken::new()).unwrap();
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().run, run);
            rat.stop().unwrap();
        }
        assert_eq!(collected.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stop_timeout_leaks_and_blocks_restart() {
        let mut rat = Rat::new("slow", ListInput::new("list", vec![Payload::Int(1)]), Stubborn)
            .with_settings(RatSettings {
                tick_ms: 5,
                stop_timeout_ms: 50,
                stop_warning_interval_ms: 10,
                ..RatSettings::default()
            });
        let (tx, _rx) = events();
        rat.start(false, tx, &StopToken::new()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || rat.stats().queued == 0));
        thread::sleep(Duration::from_millis(20));

        assert!(rat.stop().is_err());
        assert!(rat.is_leaked());
        assert_eq!(rat.state(), RatState::Stopped);
        let (tx, _rx) = events();
        assert!(rat.start(false, tx, &StopToken::new()).is_err());
    }

    #[test]
    fn test_parent_stop_reaches_threads() {
        let parent = StopToken::new();
        let mut rat = Rat::new("tick", Ticker::new("tick", Duration::from_millis(5)), Discard::new())
            .with_settings(fast_settings());
        let (tx, rx) = events();
        rat.start(false, tx, &parent).unwrap();
        parent.stop();
        thread::sleep(Duration::from_millis(50));
        // a stop is not a finish
        assert!(rx.try_recv().is_err());
        rat.stop().unwrap();
    }
}
