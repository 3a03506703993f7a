//! Typed collaborator registry.
//!
//! Connection-like actors publish shared handles here, keyed by the handle's
//! type. Other actors find them with the tree's closest-ancestor lookup
//! instead of being wired to them explicitly.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Marker for types that may be published as shared collaborators.
///
/// Collaborators are read-mostly after set-up; one that needs concurrent
/// mutation synchronises internally.
pub trait Collaborator: Any + Send + Sync {}

struct Entry {
    type_name: &'static str,
    handle: Arc<dyn Any + Send + Sync>,
}

/// Collaborators published at a single tree node.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: HashMap<TypeId, Entry>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `handle`, replacing any previous collaborator of the same type.
    pub fn provide<T: Collaborator>(&mut self, handle: Arc<T>) {
        self.entries.insert(
            TypeId::of::<T>(),
            Entry {
                type_name: type_name::<T>(),
                handle,
            },
        );
    }

    pub fn get<T: Collaborator>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(&entry.handle).downcast::<T>().ok())
    }

    pub fn contains<T: Collaborator>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Type names of everything published here, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }
}
