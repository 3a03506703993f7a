//! Hierarchical actor tree.
//!
//! Nodes are stored in a flat `Vec` indexed by `NodeId`, with
//! parent/first-child/next-sibling links forming an intrusive tree. Nodes
//! are only ever appended, and always after their parent, so index order is
//! also a valid top-down order.
//!
//! ```text
//! flow                       (Flow container, lookup boundary)
//! +-- flow.queues            (standalone, publishes QueueRegistry)
//! +-- flow.numbers           (source)
//! +-- flow.process           (Sequence container)
//! |   +-- flow.process.inc   (transformer)
//! |   +-- flow.process.log   (sink)
//! ```
//!
//! The structure (`Topology`) is kept apart from the actor instances so an
//! actor can be borrowed mutably while it reads the structure during set-up.

use crate::error::{FlowError, Result};
use crate::flow::actor::{Actor, ActorOptions, ActorState, SetupContext};
use crate::flow::capability::{CapabilityRegistry, Collaborator};
use crate::flow::contract::{ActorRole, TypeContract};
use crate::flow::id::NodeId;
use crate::flow::stop::StopToken;
use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

/// Kinds of container ("handler") nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// The root of a tree.
    Flow,
    /// An ordered chain usable as a transformer or sink.
    Sequence,
    /// A `Sequence` that also ends collaborator lookup.
    LocalScope,
}

impl ContainerKind {
    pub fn is_boundary(self) -> bool {
        matches!(self, ContainerKind::Flow | ContainerKind::LocalScope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Wraps an actor instance; the contract is copied from the actor.
    Actor(TypeContract),
    Container(ContainerKind),
}

/// A single node in the actor tree.
#[derive(Debug)]
pub struct TreeNode {
    pub id: NodeId,
    /// Full dotted path, e.g. `"flow.process.inc"`.
    pub path: String,
    /// Leaf segment only, e.g. `"inc"`.
    pub name: String,
    pub kind: NodeKind,
    pub options: ActorOptions,
    /// Parent node (NodeId::INVALID for the root).
    pub parent: NodeId,
    /// First child (intrusive linked list).
    pub first_child: NodeId,
    /// Next sibling (intrusive linked list).
    pub next_sibling: NodeId,
    /// Depth in the tree (0 for the root).
    pub depth: u16,
    registry: CapabilityRegistry,
}

impl TreeNode {
    pub fn is_container(&self) -> bool {
        matches!(self.kind, NodeKind::Container(_))
    }

    pub fn is_standalone(&self) -> bool {
        matches!(self.kind, NodeKind::Actor(c) if c.role == ActorRole::Standalone)
    }

    fn is_boundary(&self) -> bool {
        matches!(self.kind, NodeKind::Container(k) if k.is_boundary())
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }
}

/// Structure of an actor tree: links, paths and published collaborators.
#[derive(Debug)]
pub struct Topology {
    nodes: Vec<TreeNode>,
    path_index: HashMap<String, NodeId>,
}

impl Topology {
    fn new(root_name: &str) -> Self {
        let root = TreeNode {
            id: NodeId::ROOT,
            path: root_name.to_string(),
            name: root_name.to_string(),
            kind: NodeKind::Container(ContainerKind::Flow),
            options: ActorOptions::default(),
            parent: NodeId::INVALID,
            first_child: NodeId::INVALID,
            next_sibling: NodeId::INVALID,
            depth: 0,
            registry: CapabilityRegistry::new(),
        };
        let mut path_index = HashMap::new();
        path_index.insert(root.path.clone(), NodeId::ROOT);
        Self {
            nodes: vec![root],
            path_index,
        }
    }

    /// Total number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get a node by NodeId (O(1) array index).
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        if id.is_valid() {
            self.nodes.get(id.index())
        } else {
            None
        }
    }

    pub fn path(&self, id: NodeId) -> &str {
        self.get(id).map(|n| n.path.as_str()).unwrap_or("<invalid>")
    }

    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.path_index.get(path).copied()
    }

    pub fn parent(&self, id: NodeId) -> NodeId {
        self.get(id).map(|n| n.parent).unwrap_or(NodeId::INVALID)
    }

    /// Iterate over the children of a node.
    pub fn children(&self, id: NodeId) -> ChildIter<'_> {
        let first = self.get(id).map(|n| n.first_child).unwrap_or(NodeId::INVALID);
        ChildIter {
            topology: self,
            current: first,
        }
    }

    /// The node and all of its descendants, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.get(current).is_none() {
                continue;
            }
            out.push(current);
            let children: Vec<NodeId> = self.children(current).collect();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// True if the node or any ancestor is marked `skip`.
    pub fn is_skipped(&self, id: NodeId) -> bool {
        let mut current = id;
        while let Some(node) = self.get(current) {
            if node.options.skip {
                return true;
            }
            current = node.parent;
        }
        false
    }

    /// Active standalone children of a container, in order.
    pub fn standalones(&self, container: NodeId) -> Vec<NodeId> {
        self.children(container)
            .filter(|&c| self.nodes[c.index()].is_standalone() && !self.nodes[c.index()].options.skip)
            .collect()
    }

    /// Active chain members (sources, transformers, sinks, nested
    /// containers) of a container, in order.
    pub fn chain(&self, container: NodeId) -> Vec<NodeId> {
        self.children(container)
            .filter(|&c| !self.nodes[c.index()].is_standalone() && !self.nodes[c.index()].options.skip)
            .collect()
    }

    /// Effective contract of a node. Containers inherit the accepted types
    /// of their first chain member and the produced types of their last.
    pub fn contract_of(&self, id: NodeId) -> Option<TypeContract> {
        let node = self.get(id)?;
        match node.kind {
            NodeKind::Actor(contract) => Some(contract),
            NodeKind::Container(_) => {
                let chain = self.chain(id);
                let first = self.contract_of(*chain.first()?)?;
                let last = self.contract_of(*chain.last()?)?;
                let role = match (first.role, last.role) {
                    (ActorRole::Source, ActorRole::Sink) => ActorRole::Standalone,
                    (ActorRole::Source, _) => ActorRole::Source,
                    (_, ActorRole::Sink) => ActorRole::Sink,
                    _ => ActorRole::Transformer,
                };
                Some(TypeContract {
                    role,
                    accepts: first.accepts,
                    produces: last.produces,
                })
            }
        }
    }

    /// Collaborators published directly at a node.
    pub fn registry(&self, id: NodeId) -> Option<&CapabilityRegistry> {
        self.get(id).map(|n| &n.registry)
    }

    /// Find the nearest collaborator of type `T` for the node `from`.
    ///
    /// Walks parent links outward. At each ancestor, the ancestor's own
    /// registry is checked first, then its leading standalone children.
    /// The first match wins; the walk ends after a boundary container.
    pub fn closest<T: Collaborator>(&self, from: NodeId) -> Result<Arc<T>> {
        let mut current = from;
        while let Some(node) = self.get(current) {
            let Some(ancestor) = self.get(node.parent) else {
                break;
            };
            if let Some(found) = ancestor.registry.get::<T>() {
                return Ok(found);
            }
            for child in self.children(ancestor.id) {
                let sibling = &self.nodes[child.index()];
                // Standalones always lead, so the first chain member ends the scan
                if !sibling.is_standalone() {
                    break;
                }
                if child == from || sibling.options.skip {
                    continue;
                }
                if let Some(found) = sibling.registry.get::<T>() {
                    return Ok(found);
                }
            }
            if ancestor.is_boundary() {
                break;
            }
            current = ancestor.id;
        }
        Err(FlowError::MissingCollaborator {
            expected: type_name::<T>(),
        })
    }

    fn insert(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        options: ActorOptions,
    ) -> Result<NodeId> {
        let parent_node = self
            .get(parent)
            .ok_or_else(|| FlowError::Config(format!("Unknown parent node {}", parent)))?;
        if !parent_node.is_container() {
            return Err(FlowError::Config(format!(
                "'{}' is not a container and cannot hold '{}'",
                parent_node.path, name
            )));
        }
        if name.is_empty() || name.contains('.') {
            return Err(FlowError::Config(format!(
                "Invalid actor name '{}' (must be non-empty, without '.')",
                name
            )));
        }
        let path = format!("{}.{}", parent_node.path, name);
        if self.path_index.contains_key(&path) {
            return Err(FlowError::DuplicateName(path));
        }

        let standalone = matches!(kind, NodeKind::Actor(c) if c.role == ActorRole::Standalone);
        if standalone {
            if let Some(chain_member) = self
                .children(parent)
                .find(|c| !self.nodes[c.index()].is_standalone())
            {
                return Err(FlowError::Config(format!(
                    "Standalone '{}' must precede '{}'",
                    path,
                    self.path(chain_member)
                )));
            }
        }

        let id = NodeId(self.nodes.len() as u32);
        let depth = parent_node.depth + 1;
        self.nodes.push(TreeNode {
            id,
            path: path.clone(),
            name: name.to_string(),
            kind,
            options,
            parent,
            first_child: NodeId::INVALID,
            next_sibling: NodeId::INVALID,
            depth,
            registry: CapabilityRegistry::new(),
        });
        self.path_index.insert(path, id);

        // Link into parent's child list
        let first = self.nodes[parent.index()].first_child;
        if !first.is_valid() {
            self.nodes[parent.index()].first_child = id;
        } else {
            let mut cur = first;
            loop {
                let next = self.nodes[cur.index()].next_sibling;
                if !next.is_valid() {
                    self.nodes[cur.index()].next_sibling = id;
                    break;
                }
                cur = next;
            }
        }

        Ok(id)
    }
}

/// Iterator over the direct children of a node.
pub struct ChildIter<'a> {
    topology: &'a Topology,
    current: NodeId,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.topology.get(self.current)?;
        let id = self.current;
        self.current = node.next_sibling;
        Some(id)
    }
}

/// Runtime state of one node. Containers have no actor.
struct ActorSlot {
    actor: Option<Box<dyn Actor>>,
    state: ActorState,
    stop: StopToken,
}

/// An actor tree: structure plus the actor instances living in it.
pub struct ActorTree {
    topology: Topology,
    slots: Vec<ActorSlot>,
}

impl ActorTree {
    /// A tree holding only its `Flow` root named `root_name`.
    pub fn new(root_name: &str) -> Self {
        Self {
            topology: Topology::new(root_name),
            slots: vec![ActorSlot {
                actor: None,
                state: ActorState::Created,
                stop: StopToken::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn len(&self) -> usize {
        self.topology.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topology.is_empty()
    }

    /// Insert an actor under `parent`, validating its contract and the
    /// standalones-first ordering, then let it publish its collaborators.
    pub fn add_actor(
        &mut self,
        parent: NodeId,
        actor: Box<dyn Actor>,
        options: ActorOptions,
    ) -> Result<NodeId> {
        let contract = actor.contract();
        contract.validate(actor.name())?;
        let id = self
            .topology
            .insert(parent, actor.name(), NodeKind::Actor(contract), options)?;
        actor.publish(&mut self.topology.nodes[id.index()].registry);
        self.slots.push(ActorSlot {
            actor: Some(actor),
            state: ActorState::Created,
            stop: StopToken::new(),
        });
        Ok(id)
    }

    /// Insert a nested container under `parent`.
    pub fn add_container(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: ContainerKind,
        options: ActorOptions,
    ) -> Result<NodeId> {
        if kind == ContainerKind::Flow {
            return Err(FlowError::Config(format!(
                "Flow container '{}' can only be a tree root",
                name
            )));
        }
        let id = self
            .topology
            .insert(parent, name, NodeKind::Container(kind), options)?;
        self.slots.push(ActorSlot {
            actor: None,
            state: ActorState::Created,
            stop: StopToken::new(),
        });
        Ok(id)
    }

    /// Attach a collaborator directly to a node, typically a container
    /// acting as a shared scope.
    pub fn provide<T: Collaborator>(&mut self, node: NodeId, handle: Arc<T>) -> Result<()> {
        let target = self
            .topology
            .nodes
            .get_mut(node.index())
            .ok_or_else(|| FlowError::Config(format!("Unknown node {}", node)))?;
        target.registry.provide(handle);
        Ok(())
    }

    pub fn state(&self, id: NodeId) -> Option<ActorState> {
        self.slots.get(id.index()).map(|s| s.state)
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: ActorState) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            slot.state = state;
        }
    }

    pub fn stop_token(&self, id: NodeId) -> Option<StopToken> {
        self.slots.get(id.index()).map(|s| s.stop.clone())
    }

    pub fn is_stopped(&self, id: NodeId) -> bool {
        self.slots
            .get(id.index())
            .map(|s| s.stop.is_stopped())
            .unwrap_or(true)
    }

    pub fn actor(&self, id: NodeId) -> Option<&dyn Actor> {
        self.slots.get(id.index()).and_then(|s| s.actor.as_deref())
    }

    pub(crate) fn actor_mut(&mut self, id: NodeId) -> Option<&mut (dyn Actor + 'static)> {
        self.slots
            .get_mut(id.index())
            .and_then(|s| s.actor.as_deref_mut())
    }

    /// True if any active actor needs a human in the loop.
    pub fn is_interactive(&self) -> bool {
        self.slots.iter().enumerate().any(|(i, slot)| {
            !self.topology.is_skipped(NodeId(i as u32))
                && slot.actor.as_ref().is_some_and(|a| a.is_interactive())
        })
    }

    /// Re-derive every node's stop token from `root`, so a stop on any node
    /// reaches its whole subtree.
    pub(crate) fn reset_stop_tokens(&mut self, root: &StopToken) {
        for index in 0..self.slots.len() {
            let parent = self.topology.nodes[index].parent;
            let token = if parent.is_valid() {
                self.slots[parent.index()].stop.child()
            } else {
                root.clone()
            };
            self.slots[index].stop = token;
        }
    }

    /// Run `setup` on the actor at `id` with a context over the tree.
    pub(crate) fn setup_node(&mut self, id: NodeId) -> Result<()> {
        let ActorTree { topology, slots } = self;
        let slot = slots
            .get_mut(id.index())
            .ok_or_else(|| FlowError::Config(format!("Unknown node {}", id)))?;
        if let Some(actor) = slot.actor.as_mut() {
            let ctx = SetupContext {
                topology,
                node: id,
                stop: slot.stop.clone(),
            };
            actor.setup(&ctx)?;
        }
        slot.state = ActorState::SetUp;
        Ok(())
    }
}
