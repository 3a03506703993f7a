//! Built-in transmitters.

use crate::error::{FlowError, Result};
use crate::flow::stop::{StopToken, DEFAULT_STOP_TICK};
use crate::flow::token::{PayloadType, Token};
use crate::rats::endpoint::RatTransmitter;
use crate::rats::queue::QueueBridge;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

static ANY: &[PayloadType] = &[PayloadType::Any];

/// Hands tokens to another queue through that queue's guard, so a slow
/// downstream pipeline throttles this one.
pub struct EnQueueOutput {
    name: String,
    queue: Arc<QueueBridge>,
    delay: Duration,
}

impl EnQueueOutput {
    pub fn new(name: impl Into<String>, queue: Arc<QueueBridge>) -> Self {
        Self {
            name: name.into(),
            queue,
            delay: Duration::ZERO,
        }
    }

    /// Items become retrievable `delay` after admission.
    pub fn with_retrieval_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl RatTransmitter for EnQueueOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &'static [PayloadType] {
        ANY
    }

    fn transmit(&mut self, token: Token, stop: &StopToken) -> Result<()> {
        self.queue.enqueue(token, self.delay, stop)
    }
}

/// Shared list of collected tokens.
pub type Collected = Arc<Mutex<Vec<Token>>>;

/// Appends every token to a shared list, optionally taking `delay` per item.
pub struct CollectOutput {
    name: String,
    items: Collected,
    delay: Option<Duration>,
}

impl CollectOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Collected::default(),
            delay: None,
        }
    }

    /// Simulate a slow destination.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn handle(&self) -> Collected {
        Arc::clone(&self.items)
    }
}

impl RatTransmitter for CollectOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &'static [PayloadType] {
        ANY
    }

    fn transmit(&mut self, token: Token, stop: &StopToken) -> Result<()> {
        if let Some(delay) = self.delay {
            if !stop.sleep(delay, DEFAULT_STOP_TICK) {
                return Err(FlowError::Stopped);
            }
        }
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token);
        Ok(())
    }
}

/// Logs every token at info level, optionally taking `delay` per item.
pub struct LogOutput {
    name: String,
    delay: Option<Duration>,
}

impl LogOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay).filter(|d| !d.is_zero());
        self
    }
}

impl RatTransmitter for LogOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &'static [PayloadType] {
        ANY
    }

    fn transmit(&mut self, token: Token, stop: &StopToken) -> Result<()> {
        if let Some(delay) = self.delay {
            if !stop.sleep(delay, DEFAULT_STOP_TICK) {
                return Err(FlowError::Stopped);
            }
        }
        tracing::info!(
            transmitter = %self.name,
            origin = token.origin().unwrap_or("-"),
            "{}",
            token.payload()
        );
        Ok(())
    }
}

/// Drops everything, counting what it dropped.
#[derive(Default)]
pub struct Discard {
    dropped: u64,
}

impl Discard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl RatTransmitter for Discard {
    fn name(&self) -> &str {
        "discard"
    }

    fn accepts(&self) -> &'static [PayloadType] {
        ANY
    }

    fn transmit(&mut self, _token: Token, _stop: &StopToken) -> Result<()> {
        self.dropped += 1;
        Ok(())
    }

    fn wrap_up(&mut self) {
        if self.dropped > 0 {
            tracing::debug!(dropped = self.dropped, "Discarded tokens");
        }
    }
}

/// Predicate deciding whether a [`Switch`] case takes a token.
pub type Condition = Box<dyn Fn(&Token) -> bool + Send>;

/// Routes each token to the case of the first condition it satisfies.
/// Tokens no condition matches are dropped and counted.
///
/// Conditions and cases pair up by position, so their numbers must match.
pub struct Switch {
    name: String,
    conditions: Vec<Condition>,
    cases: Vec<Box<dyn RatTransmitter>>,
    unmatched: u64,
}

impl Switch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            cases: Vec::new(),
            unmatched: 0,
        }
    }

    /// Add a condition together with the transmitter it selects.
    pub fn case(
        self,
        condition: impl Fn(&Token) -> bool + Send + 'static,
        output: impl RatTransmitter + 'static,
    ) -> Self {
        self.condition(condition).output(output)
    }

    pub fn condition(mut self, condition: impl Fn(&Token) -> bool + Send + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn output(mut self, output: impl RatTransmitter + 'static) -> Self {
        self.cases.push(Box::new(output));
        self
    }

    /// Tokens dropped because no condition matched.
    pub fn unmatched(&self) -> u64 {
        self.unmatched
    }
}

impl RatTransmitter for Switch {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &'static [PayloadType] {
        ANY
    }

    fn setup(&mut self) -> Result<()> {
        if self.conditions.len() != self.cases.len() {
            return Err(FlowError::Config(format!(
                "Number of conditions and cases differ: {} != {}",
                self.conditions.len(),
                self.cases.len()
            )));
        }
        for (i, case) in self.cases.iter_mut().enumerate() {
            case.setup()
                .map_err(|e| e.with_context(format!("case #{}", i + 1)))?;
        }
        Ok(())
    }

    fn init_transmission(&mut self) -> Result<()> {
        self.unmatched = 0;
        for case in &mut self.cases {
            case.init_transmission()?;
        }
        Ok(())
    }

    fn can_input(&self) -> bool {
        self.cases.iter().all(|c| c.can_input())
    }

    fn transmit(&mut self, token: Token, stop: &StopToken) -> Result<()> {
        let Some(index) = self.conditions.iter().position(|c| c(&token)) else {
            self.unmatched += 1;
            tracing::debug!(transmitter = %self.name, "No condition matched");
            return Ok(());
        };
        tracing::trace!(transmitter = %self.name, case = index + 1, "Condition matched");
        self.cases[index]
            .transmit(token, stop)
            .map_err(|e| e.with_context(format!("case #{}", index + 1)))
    }

    fn supports_pause(&self) -> bool {
        self.cases.iter().all(|c| c.supports_pause())
    }

    fn is_interactive(&self) -> bool {
        self.cases.iter().any(|c| c.is_interactive())
    }

    fn wrap_up(&mut self) {
        for case in &mut self.cases {
            case.wrap_up();
        }
        if self.unmatched > 0 {
            tracing::debug!(transmitter = %self.name, unmatched = self.unmatched, "Dropped unmatched tokens");
        }
    }
}
