//! Queue actors: publish named queues and feed them from a chain.

use crate::config::QueueSettings;
use crate::error::{FlowError, Result};
use crate::flow::actor::{Actor, SetupContext};
use crate::flow::capability::CapabilityRegistry;
use crate::flow::contract::TypeContract;
use crate::flow::stop::StopToken;
use crate::flow::token::{PayloadType, Token};
use crate::rats::queue::{QueueBridge, QueueRegistry};
use std::sync::Arc;
use std::time::Duration;

static ANY: &[PayloadType] = &[PayloadType::Any];

/// Standalone that publishes a [`QueueRegistry`] to its scope and creates
/// the declared queues in it.
pub struct QueueSetup {
    name: String,
    registry: Arc<QueueRegistry>,
    queues: Vec<(String, QueueSettings)>,
}

impl QueueSetup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: Arc::new(QueueRegistry::new()),
            queues: Vec::new(),
        }
    }

    pub fn with_queue(mut self, name: impl Into<String>, settings: QueueSettings) -> Self {
        self.queues.push((name.into(), settings));
        self
    }

    /// The published registry, for wiring receivers outside the tree.
    pub fn registry(&self) -> Arc<QueueRegistry> {
        Arc::clone(&self.registry)
    }
}

impl Actor for QueueSetup {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::standalone()
    }

    fn publish(&self, registry: &mut CapabilityRegistry) {
        registry.provide(Arc::clone(&self.registry));
    }

    fn setup(&mut self, _ctx: &SetupContext<'_>) -> Result<()> {
        for (name, settings) in &self.queues {
            if name.is_empty() {
                return Err(FlowError::Config(format!("'{}' declares a queue without a name", self.name)));
            }
            self.registry.get_or_create(name, settings);
        }
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        for name in self.registry.names() {
            if let Some(queue) = self.registry.get(&name) {
                tracing::debug!(queue = %name, size = queue.size(), "Queue ready");
            }
        }
        Ok(())
    }

    /// Drain every queue; a re-run starts from empty queues.
    fn wrap_up(&mut self) {
        for name in self.registry.names() {
            if let Some(queue) = self.registry.get(&name) {
                let dropped = queue.drain().len();
                if dropped > 0 {
                    tracing::info!(queue = %name, dropped, "Queue drained");
                }
            }
        }
    }

    fn clean_up(&mut self) {
        self.registry.clear();
    }
}

/// Sink admitting every token into a named queue of the closest registry.
/// The queue's guard applies; a blocked admission observes the stop flag.
pub struct EnQueue {
    name: String,
    queue_name: String,
    delay: Duration,
    queue: Option<Arc<QueueBridge>>,
    stop: StopToken,
    current: Option<Token>,
}

impl EnQueue {
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_name: queue.into(),
            delay: Duration::ZERO,
            queue: None,
            stop: StopToken::new(),
            current: None,
        }
    }

    pub fn with_retrieval_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Actor for EnQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::sink(ANY)
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        let registry = ctx.lookup::<QueueRegistry>()?;
        self.queue = Some(registry.require(&self.queue_name)?);
        self.stop = ctx.stop_token();
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
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| FlowError::Config(format!("'{}' is not set up", self.name)))?;
        queue.enqueue(token, self.delay, &self.stop)
    }

    fn stop_execution(&mut self) {
        if let Some(queue) = &self.queue {
            queue.wake_all();
        }
    }

    fn wrap_up(&mut self) {
        self.current = None;
    }
}
