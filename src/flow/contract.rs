//! Type contracts for actors.
//!
//! Each actor declares its role and the payload types it accepts and
//! produces via static slices. The engine uses these to validate chains at
//! set-up and to reject mismatched tokens at run time.

use crate::error::{FlowError, Result};
use crate::flow::token::PayloadType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The position an actor may occupy in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Runs once per activation, takes no input, produces no output.
    Standalone,
    /// Head of a chain; produces tokens.
    Source,
    /// Consumes one token, produces zero or more.
    Transformer,
    /// Tail of a chain; consumes tokens.
    Sink,
}

impl ActorRole {
    pub fn takes_input(self) -> bool {
        matches!(self, ActorRole::Transformer | ActorRole::Sink)
    }

    pub fn gives_output(self) -> bool {
        matches!(self, ActorRole::Source | ActorRole::Transformer)
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActorRole::Standalone => "standalone",
            ActorRole::Source => "source",
            ActorRole::Transformer => "transformer",
            ActorRole::Sink => "sink",
        };
        f.write_str(s)
    }
}

/// Static description of an actor's role and payload types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeContract {
    pub role: ActorRole,
    pub accepts: &'static [PayloadType],
    pub produces: &'static [PayloadType],
}

impl TypeContract {
    pub const fn standalone() -> Self {
        Self {
            role: ActorRole::Standalone,
            accepts: &[],
            produces: &[],
        }
    }

    pub const fn source(produces: &'static [PayloadType]) -> Self {
        Self {
            role: ActorRole::Source,
            accepts: &[],
            produces,
        }
    }

    pub const fn transformer(
        accepts: &'static [PayloadType],
        produces: &'static [PayloadType],
    ) -> Self {
        Self {
            role: ActorRole::Transformer,
            accepts,
            produces,
        }
    }

    pub const fn sink(accepts: &'static [PayloadType]) -> Self {
        Self {
            role: ActorRole::Sink,
            accepts,
            produces: &[],
        }
    }

    /// Check the role invariants: producers declare outputs, consumers declare inputs.
    pub fn validate(&self, actor: &str) -> Result<()> {
        if self.role.gives_output() && self.produces.is_empty() {
            return Err(FlowError::Config(format!(
                "{} '{}' declares no produced types",
                self.role, actor
            )));
        }
        if self.role.takes_input() && self.accepts.is_empty() {
            return Err(FlowError::Config(format!(
                "{} '{}' declares no accepted types",
                self.role, actor
            )));
        }
        Ok(())
    }

    /// Whether a token of `ty` may be handed to this actor.
    pub fn accepts_type(&self, ty: PayloadType) -> bool {
        self.accepts.iter().any(|a| a.admits(ty))
    }
}

/// True when some produced type can be consumed. `Any` on either side
/// defers the decision to the run-time check.
pub fn compatible(produces: &[PayloadType], accepts: &[PayloadType]) -> bool {
    produces.iter().any(|&p| {
        p == PayloadType::Any || accepts.iter().any(|&a| a.admits(p))
    })
}

/// Static one-element type list, for contracts decided at construction.
pub fn only(ty: PayloadType) -> &'static [PayloadType] {
    match ty {
        PayloadType::Any => &[PayloadType::Any],
        PayloadType::Bool => &[PayloadType::Bool],
        PayloadType::Int => &[PayloadType::Int],
        PayloadType::Float => &[PayloadType::Float],
        PayloadType::Text => &[PayloadType::Text],
        PayloadType::Bytes => &[PayloadType::Bytes],
        PayloadType::List => &[PayloadType::List],
        PayloadType::Failure => &[PayloadType::Failure],
    }
}

/// Render a type list for error messages, e.g. `[int, text]`.
pub fn describe(types: &[PayloadType]) -> String {
    let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
    format!("[{}]", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    static INTS: &[PayloadType] = &[PayloadType::Int];
    static TEXT: &[PayloadType] = &[PayloadType::Text];
    static ANY: &[PayloadType] = &[PayloadType::Any];

    #[test]
    fn test_transformer_requires_both_sides() {
        assert!(TypeContract::transformer(INTS, INTS).validate("t").is_ok());
        assert!(TypeContract::transformer(&[], INTS).validate("t").is_err());
        assert!(TypeContract::transformer(INTS, &[]).validate("t").is_err());
    }

    #[test]
    fn test_source_and_sink_invariants() {
        assert!(TypeContract::source(&[]).validate("s").is_err());
        assert!(TypeContract::sink(&[]).validate("k").is_err());
        assert!(TypeContract::standalone().validate("x").is_ok());
    }

    #[test]
    fn test_compatibility() {
        assert!(compatible(INTS, INTS));
        assert!(!compatible(INTS, TEXT));
        assert!(compatible(INTS, ANY));
        assert!(compatible(ANY, TEXT));
        assert_eq!(describe(&[PayloadType::Int, PayloadType::Text]), "[int, text]");
    }

    #[test]
    fn test_accepts_type() {
        let contract = TypeContract::sink(ANY);
        assert!(contract.accepts_type(PayloadType::Bytes));
        let contract = TypeContract::sink(TEXT);
        assert!(!contract.accepts_type(PayloadType::Int));
    }
}
