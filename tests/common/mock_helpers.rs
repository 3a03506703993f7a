//! Mock actors, transmitters and collaborators for integration tests

use mockall::mock;
use ratflow::error::{FlowError, Result};
use ratflow::flow::contract::only;
use ratflow::flow::{Actor, SetupContext, TypeContract};
use ratflow::rats::{RatTransmitter, StopConfirmation};
use ratflow::{PayloadType, StopToken, Token};
use std::sync::{Arc, Mutex};

mock! {
    pub Confirmation {}

    impl StopConfirmation for Confirmation {
        fn confirm_stop(&self, rat: &str) -> bool;
    }
}

/// Shared, ordered record of lifecycle calls
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn entries(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Integer transformer that records every lifecycle call it receives
pub struct Probe {
    name: String,
    log: EventLog,
    fail_setup: bool,
    fail_on: Option<i64>,
    current: Option<Token>,
    pending: Option<Token>,
}

impl Probe {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_setup: false,
            fail_on: None,
            current: None,
            pending: None,
        }
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// Fail the unit of work for `value`
    pub fn failing_on(mut self, value: i64) -> Self {
        self.fail_on = Some(value);
        self
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl Actor for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::transformer(only(PayloadType::Int), only(PayloadType::Int))
    }

    fn setup(&mut self, _ctx: &SetupContext<'_>) -> Result<()> {
        self.record(format!("setup:{}", self.name));
        if self.fail_setup {
            return Err(FlowError::Config("probe refused to set up".to_string()));
        }
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
        let value = token.payload().as_int().unwrap_or_default();
        self.record(format!("execute:{}:{}", self.name, value));
        if self.fail_on == Some(value) {
            return Err(FlowError::Execution(format!("probe rejects {}", value)));
        }
        self.pending = Some(token);
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.pending.is_some()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.take()
    }

    fn wrap_up(&mut self) {
        self.record(format!("wrap_up:{}", self.name));
    }
}

/// Transmitter that needs a human in the loop; drops what it gets
pub struct InteractiveOutput;

impl RatTransmitter for InteractiveOutput {
    fn name(&self) -> &str {
        "prompt"
    }

    fn accepts(&self) -> &'static [PayloadType] {
        only(PayloadType::Any)
    }

    fn transmit(&mut self, _token: Token, _stop: &StopToken) -> Result<()> {
        Ok(())
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

/// Transmitter that rejects odd integers and keeps the even ones
pub struct EvenOnlyOutput {
    kept: Arc<Mutex<Vec<i64>>>,
}

impl EvenOnlyOutput {
    pub fn new() -> (Self, Arc<Mutex<Vec<i64>>>) {
        let kept = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                kept: Arc::clone(&kept),
            },
            kept,
        )
    }
}

impl RatTransmitter for EvenOnlyOutput {
    fn name(&self) -> &str {
        "even-only"
    }

    fn accepts(&self) -> &'static [PayloadType] {
        only(PayloadType::Int)
    }

    fn transmit(&mut self, token: Token, _stop: &StopToken) -> Result<()> {
        let value = token.payload().as_int().unwrap_or_default();
        if value % 2 != 0 {
            return Err(FlowError::Execution(format!("odd value {}", value)));
        }
        self.kept.lock().unwrap().push(value);
        Ok(())
    }
}
