//! Integration tests for the actor execution engine
//!
//! These tests drive whole actor trees through the public API:
//! - Lifecycle ordering and single wrap-up
//! - Depth-first draining of fanned-out outputs
//! - Absorbed versus escalated actor errors
//! - Closest-ancestor collaborator lookup across nested scopes

mod common;

use common::mock_helpers::{entries, EventLog, Probe};
use ratflow::flow::actors::{Collector, Constants, ForLoop, PassThrough, Script, Tokenize};
use ratflow::flow::{
    ActorOptions, Collaborator, ContainerKind, EngineState, NodeId, SetupContext, TypeContract,
};
use ratflow::{Actor, ActorTree, FlowBuilder, FlowError, FlowExecutor, Payload, Result};
use std::sync::{Arc, Mutex};

fn texts(tokens: &[ratflow::Token]) -> Vec<String> {
    tokens
        .iter()
        .filter_map(|t| t.payload().as_str().map(str::to_string))
        .collect()
}

#[test]
fn test_lifecycle_runs_in_order_and_wraps_up_once() {
    let log = EventLog::default();
    let out = Collector::new("out");
    let items = out.handle();
    let mut flow = FlowBuilder::new("flow")
        .add(ForLoop::new("n", 0, 3))
        .add(Probe::new("probe", &log))
        .add(out)
        .build()
        .unwrap();

    flow.run().unwrap();
    flow.wrap_up();

    assert_eq!(
        entries(&log),
        vec![
            "setup:probe",
            "execute:probe:0",
            "execute:probe:1",
            "execute:probe:2",
            "wrap_up:probe",
        ]
    );
    assert_eq!(common::ints(&items.lock().unwrap()), vec![0, 1, 2]);
    assert_eq!(flow.state(), EngineState::Idle);
}

#[test]
fn test_failed_setup_skips_execution_but_wraps_up() {
    let log = EventLog::default();
    let mut flow = FlowBuilder::new("flow")
        .add(ForLoop::new("n", 0, 3))
        .add(Probe::new("probe", &log).failing_setup())
        .add(Collector::new("out"))
        .build()
        .unwrap();

    let err = flow.run().unwrap_err();

    assert!(err.to_string().contains("flow.probe"), "{}", err);
    assert_eq!(entries(&log), vec!["setup:probe", "wrap_up:probe"]);
    assert_eq!(flow.state(), EngineState::Failed);
    assert!(flow.failure().is_some());
}

#[test]
fn test_execute_requires_fresh_setup_after_wrap_up() {
    let mut flow = FlowBuilder::new("flow")
        .add(ForLoop::new("n", 0, 1))
        .add(Collector::new("out"))
        .build()
        .unwrap();

    flow.run().unwrap();
    assert!(matches!(flow.execute(), Err(FlowError::Config(_))));

    flow.setup().unwrap();
    flow.execute().unwrap();
    flow.wrap_up();
}

#[test]
fn test_fan_out_is_drained_before_next_source_token() {
    let out = Collector::new("out");
    let items = out.handle();
    let mut flow = FlowBuilder::new("flow")
        .add(Constants::new(
            "lines",
            vec![Payload::from("a b"), Payload::from("c d e")],
        ))
        .add(Tokenize::new("split"))
        .add(out)
        .build()
        .unwrap();

    flow.run().unwrap();

    assert_eq!(texts(&items.lock().unwrap()), vec!["a", "b", "c", "d", "e"]);
    assert_eq!(flow.stats().suppressed_errors, 0);
}

#[test]
fn test_absorbed_error_moves_on_to_next_token() {
    let log = EventLog::default();
    let out = Collector::new("out");
    let items = out.handle();
    let mut flow = FlowBuilder::new("flow")
        .add(ForLoop::new("n", 0, 3))
        .add(Probe::new("probe", &log).failing_on(1))
        .add(out)
        .build()
        .unwrap();

    flow.run().unwrap();

    assert_eq!(common::ints(&items.lock().unwrap()), vec![0, 2]);
    let suppressed = flow.take_suppressed();
    assert_eq!(suppressed.len(), 1);
    assert_eq!(suppressed[0].path, "flow.probe");
    assert!(matches!(suppressed[0].error, FlowError::Execution(_)));
    assert_eq!(flow.stats().suppressed_errors, 1);
}

#[test]
fn test_halting_actor_stops_whole_flow() {
    let log = EventLog::default();
    let out = Collector::new("out");
    let items = out.handle();
    let mut flow = FlowBuilder::new("flow")
        .add(ForLoop::new("n", 0, 5))
        .add_with(Probe::new("probe", &log).failing_on(1), ActorOptions::halting())
        .add(out)
        .build()
        .unwrap();

    let err = flow.run().unwrap_err();

    assert!(matches!(err, FlowError::Actor { ref path, .. } if path == "flow.probe"));
    assert_eq!(common::ints(&items.lock().unwrap()), vec![0]);
    assert!(flow.is_stopped());
    assert_eq!(entries(&log).last().map(String::as_str), Some("wrap_up:probe"));
}

#[test]
fn test_script_in_nested_sequence() {
    let out = Collector::new("out");
    let items = out.handle();

    let mut tree = ActorTree::new("flow");
    tree.add_actor(NodeId::ROOT, Box::new(ForLoop::new("n", 1, 4)), ActorOptions::default())
        .unwrap();
    let prep = tree
        .add_container(NodeId::ROOT, "prep", ContainerKind::Sequence, ActorOptions::default())
        .unwrap();
    tree.add_actor(prep, Box::new(Script::new("square", "value * value")), ActorOptions::default())
        .unwrap();
    tree.add_actor(prep, Box::new(PassThrough::new("same")), ActorOptions::default())
        .unwrap();
    tree.add_actor(NodeId::ROOT, Box::new(out), ActorOptions::default())
        .unwrap();

    let mut flow = FlowExecutor::new(tree);
    flow.run().unwrap();

    assert_eq!(common::ints(&items.lock().unwrap()), vec![1, 4, 9]);
}

// ── Collaborator lookup ──

#[derive(Debug)]
struct Label(&'static str);

impl Collaborator for Label {}

type Sightings = Arc<Mutex<Vec<(String, &'static str)>>>;

/// Standalone that resolves the closest `Label` during set-up.
struct Finder {
    name: String,
    seen: Sightings,
}

impl Finder {
    fn boxed(name: &str, seen: &Sightings) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            seen: Arc::clone(seen),
        })
    }
}

impl Actor for Finder {
    fn name(&self) -> &str {
        &self.name
    }

    fn contract(&self) -> TypeContract {
        TypeContract::standalone()
    }

    fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<()> {
        let label = ctx.lookup::<Label>()?;
        self.seen.lock().unwrap().push((ctx.path().to_string(), label.0));
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        Ok(())
    }
}

/// flow (root label)
/// ├── top
/// ├── n
/// ├── outer
/// │   ├── shallow
/// │   ├── p1
/// │   └── middle
/// │       └── inner (inner label)
/// │           ├── deep
/// │           └── p3
/// └── out
fn nested_tree(seen: &Sightings, inner_kind: ContainerKind, inner_label: bool) -> ActorTree {
    let opts = ActorOptions::default;
    let mut tree = ActorTree::new("flow");
    tree.provide(NodeId::ROOT, Arc::new(Label("root"))).unwrap();
    tree.add_actor(NodeId::ROOT, Finder::boxed("top", seen), opts()).unwrap();
    tree.add_actor(NodeId::ROOT, Box::new(ForLoop::new("n", 0, 2)), opts())
        .unwrap();

    let outer = tree
        .add_container(NodeId::ROOT, "outer", ContainerKind::Sequence, opts())
        .unwrap();
    tree.add_actor(outer, Finder::boxed("shallow", seen), opts()).unwrap();
    tree.add_actor(outer, Box::new(PassThrough::new("p1")), opts()).unwrap();

    let middle = tree
        .add_container(outer, "middle", ContainerKind::Sequence, opts())
        .unwrap();
    let inner = tree.add_container(middle, "inner", inner_kind, opts()).unwrap();
    if inner_label {
        tree.provide(inner, Arc::new(Label("inner"))).unwrap();
    }
    tree.add_actor(inner, Finder::boxed("deep", seen), opts()).unwrap();
    tree.add_actor(inner, Box::new(PassThrough::new("p3")), opts()).unwrap();

    tree.add_actor(NodeId::ROOT, Box::new(Collector::new("out")), opts())
        .unwrap();
    tree
}

#[test]
fn test_nearest_provider_wins() {
    let seen = Sightings::default();
    let mut flow = FlowExecutor::new(nested_tree(&seen, ContainerKind::Sequence, true));

    flow.setup().unwrap();
    flow.execute().unwrap();
    flow.wrap_up();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("flow.top".to_string(), "root"),
            ("flow.outer.shallow".to_string(), "root"),
            ("flow.outer.middle.inner.deep".to_string(), "inner"),
        ]
    );
}

#[test]
fn test_lookup_climbs_past_plain_sequences() {
    let seen = Sightings::default();
    let mut flow = FlowExecutor::new(nested_tree(&seen, ContainerKind::Sequence, false));

    flow.setup().unwrap();

    let deep = seen
        .lock()
        .unwrap()
        .iter()
        .find(|(path, _)| path.ends_with(".deep"))
        .map(|(_, label)| *label);
    assert_eq!(deep, Some("root"));
}

#[test]
fn test_local_scope_hides_outer_providers() {
    let seen = Sightings::default();
    let mut flow = FlowExecutor::new(nested_tree(&seen, ContainerKind::LocalScope, false));

    let err = flow.setup().unwrap_err();

    assert!(matches!(
        err,
        FlowError::Actor { ref path, ref source }
            if path == "flow.outer.middle.inner.deep"
                && matches!(**source, FlowError::MissingCollaborator { .. })
    ));
}
