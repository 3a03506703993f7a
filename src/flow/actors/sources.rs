//! Source actors.

use crate::error::{FlowError, Result};
use crate::flow::actor::{Actor, SetupContext};
use crate::flow::contract::{only, TypeContract};
use crate::flow::stop::StopToken;
use crate::flow::token::{Payload, PayloadType, Token};

static INTS: &[PayloadType] = &[PayloadType::Int];

/// Lazily emits the integers of `[start, end)` in steps of `step`.
/// A negative step counts down.
pub struct ForLoop {
    name: String,
    start: i64,
    end: i64,
    step: i64,
    next: i64,
    stop: StopToken,
}

impl ForLoop {
    pub fn new(name: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            step: 1,
            next: end,
            stop: StopToken::new(),
        }
    }

    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }
}

impl Actor for ForLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::source(INTS)
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        if self.step == 0 {
            return Err(FlowError::Config(format!("'{}' has a zero step", self.name)));
        }
        self.stop = ctx.stop_token();
        self.next = self.end;
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        self.next = self.start;
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        if self.step > 0 {
            self.next < self.end
        } else {
            self.next > self.end
        }
    }

    fn output(&mut self) -> Option<Token> {
        if !self.has_pending_output() {
            return None;
        }
        let value = self.next;
        self.next = self.next.saturating_add(self.step);
        Some(Token::new(value))
    }
}

/// Emits a fixed list of payloads on every activation.
pub struct Constants {
    name: String,
    values: Vec<Payload>,
    produces: &'static [PayloadType],
    next: usize,
}

impl Constants {
    pub fn new(name: impl Into<String>, values: Vec<Payload>) -> Self {
        let produces = match values.first().map(Payload::payload_type) {
            Some(first) if values.iter().all(|v| v.payload_type() == first) => only(first),
            _ => only(PayloadType::Any),
        };
        let next = values.len();
        Self {
            name: name.into(),
            values,
            produces,
            next,
        }
    }
}

impl Actor for Constants {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::source(self.produces)
    }

    fn execute(&mut self) -> Result<()> {
        self.next = 0;
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.next < self.values.len()
    }

    fn output(&mut self) -> Option<Token> {
        let value = self.values.get(self.next)?.clone();
        self.next += 1;
        Some(Token::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(actor: &mut dyn Actor) -> Vec<Payload> {
        let mut out = Vec::new();
        while actor.has_pending_output() {
            out.extend(actor.output().map(|t| t.payload().clone()));
        }
        out
    }

    #[test]
    fn test_for_loop_counts_up_and_down() {
        let mut up = ForLoop::new("up", 0, 3);
        up.execute().unwrap();
        assert_eq!(drain(&mut up), vec![Payload::Int(0), Payload::Int(1), Payload::Int(2)]);

        let mut down = ForLoop::new("down", 3, 0).with_step(-2);
        down.execute().unwrap();
        assert_eq!(drain(&mut down), vec![Payload::Int(3), Payload::Int(1)]);
    }

    #[test]
    fn test_for_loop_stops_early() {
        let stop = StopToken::new();
        let mut numbers = ForLoop::new("n", 0, i64::MAX);
        numbers.stop = stop.clone();
        numbers.execute().unwrap();
        assert!(numbers.output().is_some());
        stop.stop();
        assert!(!numbers.has_pending_output());
    }

    #[test]
    fn test_constants_contract_and_replay() {
        let mut constants = Constants::new("c", vec![Payload::from("a"), Payload::from("b")]);
        assert_eq!(constants.contract().produces, &[PayloadType::Text]);
        assert!(!constants.has_pending_output());
        constants.execute().unwrap();
        assert_eq!(drain(&mut constants).len(), 2);
        constants.execute().unwrap();
        assert_eq!(drain(&mut constants).len(), 2);

        let mixed = Constants::new("m", vec![Payload::Int(1), Payload::Bool(true)]);
        assert_eq!(mixed.contract().produces, &[PayloadType::Any]);
    }
}
