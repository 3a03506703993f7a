//! Built-in receivers.

use crate::error::{FlowError, Result};
use crate::flow::stop::{StopToken, DEFAULT_STOP_TICK};
use crate::flow::token::{Payload, PayloadType, Token};
use crate::rats::endpoint::RatReceiver;
use crate::rats::queue::QueueBridge;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Polls a shared queue, typically filled by another pipeline or an
/// enqueue actor.
pub struct DeQueue {
    name: String,
    queue: Arc<QueueBridge>,
    wait: Duration,
    pending: Option<Token>,
}

impl DeQueue {
    pub fn new(name: impl Into<String>, queue: Arc<QueueBridge>) -> Self {
        Self {
            name: name.into(),
            queue,
            wait: DEFAULT_STOP_TICK,
            pending: None,
        }
    }

    /// Longest single wait for an item before `receive` returns empty-handed.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait.max(Duration::from_millis(1));
        self
    }
}

impl RatReceiver for DeQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn produces(&self) -> PayloadType {
        PayloadType::Any
    }

    fn init_reception(&mut self) -> Result<()> {
        self.pending = None;
        Ok(())
    }

    fn receive(&mut self, stop: &StopToken) -> Result<()> {
        self.pending = self.queue.dequeue_timeout(self.wait, stop);
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.pending.is_some()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.take()
    }
}

/// Emits an increasing counter every `interval`, optionally `limit` times.
pub struct Ticker {
    name: String,
    interval: Duration,
    limit: Option<u64>,
    emitted: u64,
    pending: Option<Token>,
}

impl Ticker {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            limit: None,
            emitted: 0,
            pending: None,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl RatReceiver for Ticker {
    fn name(&self) -> &str {
        &self.name
    }

    fn produces(&self) -> PayloadType {
        PayloadType::Int
    }

    fn init_reception(&mut self) -> Result<()> {
        self.emitted = 0;
        self.pending = None;
        Ok(())
    }

    fn receive(&mut self, _stop: &StopToken) -> Result<()> {
        if self.limit.is_some_and(|l| self.emitted >= l) {
            return Ok(());
        }
        self.pending = Some(Token::new(self.emitted as i64));
        self.emitted += 1;
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.pending.is_some()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.take()
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    fn is_exhausted(&self) -> bool {
        self.pending.is_none() && self.limit.is_some_and(|l| self.emitted >= l)
    }
}

/// Replays a fixed list of payloads, one per `receive`.
pub struct ListInput {
    name: String,
    items: Vec<Payload>,
    produces: PayloadType,
    interval: Option<Duration>,
    next: usize,
    pending: Option<Token>,
}

impl ListInput {
    pub fn new(name: impl Into<String>, items: Vec<Payload>) -> Self {
        let produces = match items.first().map(Payload::payload_type) {
            Some(first) if items.iter().all(|p| p.payload_type() == first) => first,
            _ => PayloadType::Any,
        };
        Self {
            name: name.into(),
            items,
            produces,
            interval: None,
            next: 0,
            pending: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }
}

impl RatReceiver for ListInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn produces(&self) -> PayloadType {
        self.produces
    }

    fn init_reception(&mut self) -> Result<()> {
        self.next = 0;
        self.pending = None;
        Ok(())
    }

    fn receive(&mut self, _stop: &StopToken) -> Result<()> {
        if let Some(item) = self.items.get(self.next) {
            self.pending = Some(Token::new(item.clone()));
            self.next += 1;
        }
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.pending.is_some()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.take()
    }

    fn poll_interval(&self) -> Option<Duration> {
        self.interval
    }

    fn is_exhausted(&self) -> bool {
        self.pending.is_none() && self.next >= self.items.len()
    }
}

/// Runs an external program and emits each line of its standard output.
///
/// While the program runs, the stop token is checked every tick; a stop
/// kills the process.
pub struct Exec {
    name: String,
    program: String,
    args: Vec<String>,
    repeat_every: Option<Duration>,
    tick: Duration,
    runs: u64,
    pending: VecDeque<Token>,
}

impl Exec {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            repeat_every: None,
            tick: DEFAULT_STOP_TICK,
            runs: 0,
            pending: VecDeque::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Run the program again `interval` after each run finishes.
    pub fn repeat_every(mut self, interval: Duration) -> Self {
        self.repeat_every = Some(interval);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }
}

impl RatReceiver for Exec {
    fn name(&self) -> &str {
        &self.name
    }

    fn produces(&self) -> PayloadType {
        PayloadType::Text
    }

    fn setup(&mut self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(FlowError::Config(format!("'{}' has no program to run", self.name)));
        }
        Ok(())
    }

    fn init_reception(&mut self) -> Result<()> {
        self.runs = 0;
        self.pending.clear();
        Ok(())
    }

    fn receive(&mut self, stop: &StopToken) -> Result<()> {
        self.runs += 1;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FlowError::Execution(format!("'{}' has no stdout", self.program)));
        };

        let (line_tx, line_rx) = crossbeam_channel::unbounded::<String>();
        let reader = std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

        loop {
            if stop.is_stopped() {
                kill_and_reap(&mut child, reader);
                return Err(FlowError::Stopped);
            }
            let exited = match child.try_wait() {
                Ok(exited) => exited,
                Err(err) => {
                    kill_and_reap(&mut child, reader);
                    return Err(err.into());
                }
            };
            if let Some(status) = exited {
                let _ = reader.join();
                self.pending.extend(line_rx.try_iter().map(Token::new));
                if !status.success() {
                    return Err(FlowError::Execution(format!(
                        "'{}' exited with {}",
                        self.program, status
                    )));
                }
                return Ok(());
            }
            if let Ok(line) = line_rx.recv_timeout(self.tick) {
                self.pending.push_back(Token::new(line));
            }
        }
    }

    fn has_pending_output(&self) -> bool {
        !self.pending.is_empty()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.pop_front()
    }

    fn poll_interval(&self) -> Option<Duration> {
        self.repeat_every
    }

    fn is_exhausted(&self) -> bool {
        self.repeat_every.is_none() && self.runs > 0 && self.pending.is_empty()
    }
}

/// Kill `child`, wait for it and join its output reader.
fn kill_and_reap(child: &mut Child, reader: JoinHandle<()>) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = reader.join();
}
