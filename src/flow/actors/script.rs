//! Rhai script transformer.
//!
//! The script sees the incoming payload as `value` and its result becomes
//! the output:
//! - an array fans out into one token per element
//! - `()` filters the token out
//! - anything else becomes a single token
//!
//! ```rhai
//! if value % 2 == 0 { value / 2 } else { () }
//! ```

use crate::error::{FlowError, Result};
use crate::flow::actor::{Actor, OutputBuffer, SetupContext};
use crate::flow::contract::TypeContract;
use crate::flow::token::{Payload, PayloadType, Token};
use rhai::{Array, Dynamic, Engine, Map, Scope, AST};

static ANY: &[PayloadType] = &[PayloadType::Any];

/// Default operation budget of one evaluation. Zero means unlimited.
pub const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;

pub struct Script {
    name: String,
    source: String,
    accepts: &'static [PayloadType],
    produces: &'static [PayloadType],
    max_operations: u64,
    engine: Engine,
    ast: Option<AST>,
    current: Option<Token>,
    pending: OutputBuffer,
}

impl Script {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            accepts: ANY,
            produces: ANY,
            max_operations: DEFAULT_MAX_OPERATIONS,
            engine: Engine::new(),
            ast: None,
            current: None,
            pending: OutputBuffer::default(),
        }
    }

    /// Narrow the declared contract, e.g. so chain validation catches a
    /// script fed with the wrong data.
    pub fn with_types(mut self, accepts: &'static [PayloadType], produces: &'static [PayloadType]) -> Self {
        self.accepts = accepts;
        self.produces = produces;
        self
    }

    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    fn build_engine(&self, ctx: &SetupContext<'_>) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(self.max_operations);
        engine.set_max_string_size(1_000_000);
        engine.set_max_array_size(OutputBuffer::DEFAULT_CAPACITY);
        engine.set_max_map_size(10_000);

        let stop = ctx.stop_token();
        engine.on_progress(move |_| stop.is_stopped().then_some(Dynamic::UNIT));

        let path = ctx.path().to_string();
        engine.on_print(move |text| tracing::info!(script = %path, "{}", text));
        let path = ctx.path().to_string();
        engine.on_debug(move |text, _, pos| tracing::debug!(script = %path, ?pos, "{}", text));
        engine
    }
}

impl Actor for Script {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::transformer(self.accepts, self.produces)
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        let engine = self.build_engine(ctx);
        let ast = engine.compile(&self.source).map_err(|e| {
            FlowError::Config(format!("script '{}' does not compile: {}", self.name, e))
        })?;
        self.engine = engine;
        self.ast = Some(ast);
        self.pending.clear();
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
        let ast = self
            .ast
            .as_ref()
            .ok_or_else(|| FlowError::Config(format!("script '{}' is not set up", self.name)))?;

        let mut scope = Scope::new();
        scope.push_dynamic("value", to_dynamic(token.payload()));
        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, ast)
            .map_err(FlowError::from_rhai_error)?;

        if result.is_unit() {
            return Ok(());
        }
        if result.is_array() {
            let items = result
                .into_array()
                .map_err(|t| FlowError::Script(format!("expected an array, found {}", t)))?;
            for item in items {
                self.pending.push(token.derive(from_dynamic(item)?))?;
            }
            return Ok(());
        }
        self.pending.push(token.derive(from_dynamic(result)?))
    }

    fn has_pending_output(&self) -> bool {
        !self.pending.is_empty()
    }

    fn output(&mut self) -> Option<Token> {
        self.pending.pop()
    }

    fn wrap_up(&mut self) {
        self.current = None;
        self.pending.clear();
    }
}

fn to_dynamic(payload: &Payload) -> Dynamic {
    match payload {
        Payload::Bool(b) => Dynamic::from(*b),
        Payload::Int(i) => Dynamic::from(*i),
        Payload::Float(f) => Dynamic::from(*f),
        Payload::Text(s) => Dynamic::from(s.clone()),
        Payload::Bytes(bytes) => Dynamic::from_blob(bytes.clone()),
        Payload::List(items) => Dynamic::from_array(items.iter().map(to_dynamic).collect::<Array>()),
        Payload::Failure(failure) => {
            let mut map = Map::new();
            map.insert("message".into(), Dynamic::from(failure.message.clone()));
            map.insert("origin".into(), Dynamic::from(failure.origin.clone()));
            map.insert("payload".into(), to_dynamic(&failure.payload));
            Dynamic::from_map(map)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Result<Payload> {
    if let Ok(b) = value.as_bool() {
        return Ok(Payload::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Payload::Int(i));
    }
    if let Ok(f) = value.as_float() {
        return Ok(Payload::Float(f));
    }
    let type_name = value.type_name();
    if value.is_string() {
        return value
            .into_string()
            .map(Payload::Text)
            .map_err(|t| FlowError::Script(format!("expected a string, found {}", t)));
    }
    if value.is_blob() {
        return value
            .into_blob()
            .map(Payload::Bytes)
            .map_err(|t| FlowError::Script(format!("expected a blob, found {}", t)));
    }
    if value.is_array() {
        let items = value
            .into_array()
            .map_err(|t| FlowError::Script(format!("expected an array, found {}", t)))?;
        return items
            .into_iter()
            .map(from_dynamic)
            .collect::<Result<Vec<_>>>()
            .map(Payload::List);
    }
    Err(FlowError::Script(format!(
        "script returned an unsupported {}",
        type_name
    )))
}
