//! Sink actors.

use crate::error::Result;
use crate::flow::actor::{Actor, SetupContext};
use crate::flow::contract::TypeContract;
use crate::flow::token::{PayloadType, Token};
use std::sync::{Arc, Mutex, PoisonError};

static ANY: &[PayloadType] = &[PayloadType::Any];

/// Appends every token to a shared list.
pub struct Collector {
    name: String,
    items: Arc<Mutex<Vec<Token>>>,
    current: Option<Token>,
    /// Drop what was collected by an earlier run on set-up.
    reset_on_setup: bool,
}

impl Collector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Arc::default(),
            current: None,
            reset_on_setup: false,
        }
    }

    pub fn resetting(mut self) -> Self {
        self.reset_on_setup = true;
        self
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<Token>>> {
        Arc::clone(&self.items)
    }
}

impl Actor for Collector {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::sink(ANY)
    }

    fn setup(&mut self, _ctx: &SetupContext<'_>) -> Result<()> {
        if self.reset_on_setup {
            self.items.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
        Ok(())
    }

    fn input(&mut self, token: Token) -> Result<()> {
        self.current = Some(token);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        if let Some(token) = self.current.take() {
            self.items
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(token);
        }
        Ok(())
    }
}

/// Logs every token at info level, with its provenance.
pub struct LogSink {
    name: String,
    current: Option<Token>,
    count: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: None,
            count: 0,
        }
    }
}

impl Actor for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::sink(ANY)
    }

    fn input(&mut self, token: Token) -> Result<()> {
        self.current = Some(token);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        if let Some(token) = self.current.take() {
            self.count += 1;
            let path: Vec<&str> = token.provenance().iter().map(|s| s.as_ref()).collect();
            tracing::info!(sink = %self.name, path = %path.join(" > "), "{}", token.payload());
        }
        Ok(())
    }

    fn wrap_up(&mut self) {
        tracing::debug!(sink = %self.name, count = self.count, "Log sink done");
        self.count = 0;
    }
}
