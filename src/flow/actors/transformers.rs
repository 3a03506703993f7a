//! Transformer actors.

use crate::error::{FlowError, Result};
use crate::flow::actor::{Actor, OutputBuffer};
use crate::flow::contract::TypeContract;
use crate::flow::token::{PayloadType, Token};

static ANY: &[PayloadType] = &[PayloadType::Any];
static INTS: &[PayloadType] = &[PayloadType::Int];
static TEXT: &[PayloadType] = &[PayloadType::Text];

/// Forwards every token unchanged.
pub struct PassThrough {
    name: String,
    pending: Option<Token>,
    held: Option<Token>,
}

impl PassThrough {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: None,
            held: None,
        }
    }
}

impl Actor for PassThrough {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::transformer(ANY, ANY)
    }

    fn input(&mut self, token: Token) -> Result<()> {
        self.held = Some(token);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        self.pending = self.held.take();
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.pending.is_some()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.take()
    }

    fn wrap_up(&mut self) {
        self.pending = None;
        self.held = None;
    }
}

/// Splits text into pieces, one output per non-empty piece.
pub struct Tokenize {
    name: String,
    /// `None` splits on whitespace.
    separator: Option<char>,
    current: Option<Token>,
    pending: OutputBuffer,
}

impl Tokenize {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            separator: None,
            current: None,
            pending: OutputBuffer::default(),
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = Some(separator);
        self
    }
}

impl Actor for Tokenize {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::transformer(TEXT, TEXT)
    }

    fn input(&mut self, token: Token) -> Result<()> {
        self.current = Some(token);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        let Some(token) = self.current.take() else {
            return Ok(());
        };
        let text = token.payload().as_str().unwrap_or_default();
        let pieces: Vec<&str> = match self.separator {
            Some(sep) => text.split(sep).map(str::trim).collect(),
            None => text.split_whitespace().collect(),
        };
        for piece in pieces.into_iter().filter(|p| !p.is_empty()) {
            self.pending.push(token.derive(piece))?;
        }
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        !self.pending.is_empty()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.pop()
    }

    fn wrap_up(&mut self) {
        self.pending.clear();
    }
}

/// Adds a constant to integers. Overflow is an execution error.
pub struct Increment {
    name: String,
    by: i64,
    current: Option<Token>,
    pending: Option<Token>,
}

impl Increment {
    pub fn new(name: impl Into<String>) -> Self {
        Self::by(name, 1)
    }

    pub fn by(name: impl Into<String>, by: i64) -> Self {
        Self {
            name: name.into(),
            by,
            current: None,
            pending: None,
        }
    }
}

impl Actor for Increment {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::transformer(INTS, INTS)
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
        let next = value
            .checked_add(self.by)
            .ok_or_else(|| FlowError::Execution(format!("{} + {} overflows", value, self.by)))?;
        self.pending = Some(token.derive(next));
        Ok(())
    }

    fn has_pending_output(&self) -> bool {
        self.pending.is_some()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::token::Payload;

    fn run(actor: &mut dyn Actor, token: Token) -> Result<Vec<Payload>> {
        actor.input(token)?;
        actor.execute()?;
        let mut out = Vec::new();
        while let Some(token) = actor.output() {
            out.push(token.payload().clone());
        }
        Ok(out)
    }

    #[test]
    fn test_pass_through() {
        let mut actor = PassThrough::new("p");
        assert_eq!(run(&mut actor, Token::new(true)).unwrap(), vec![Payload::Bool(true)]);
    }

    #[test]
    fn test_tokenize_whitespace_and_separator() {
        let mut words = Tokenize::new("words");
        let out = run(&mut words, Token::new("  the quick\tfox ")).unwrap();
        assert_eq!(out, vec![Payload::from("the"), Payload::from("quick"), Payload::from("fox")]);

        let mut fields = Tokenize::new("fields").with_separator(',');
        let out = run(&mut fields, Token::new("a, b,,c")).unwrap();
        assert_eq!(out, vec![Payload::from("a"), Payload::from("b"), Payload::from("c")]);
    }

    #[test]
    fn test_tokenize_keeps_provenance() {
        let mut words = Tokenize::new("words");
        words.input(Token::new("a b").stamped("reader")).unwrap();
        words.execute().unwrap();
        assert_eq!(words.output().unwrap().origin(), Some("reader"));
    }

    #[test]
    fn test_increment_overflow() {
        let mut inc = Increment::by("inc", 2);
        assert_eq!(run(&mut inc, Token::new(40)).unwrap(), vec![Payload::Int(42)]);
        assert!(run(&mut inc, Token::new(i64::MAX)).is_err());
        assert!(!inc.has_pending_output());
    }
}
