//! Graph type registry for loading graphs by type id.
//!
//! Graph documents name their graph type by id; the loader resolves that id
//! through a [`GraphTypeRegistry`] passed in explicitly.
//!
//! # Example
//!
//! ```
//! use gals_sim::registry::{create_default_registry, GraphTypeRegistry};
//! use gals_sim::graphs::chain::chain_graph_type;
//!
//! let mut registry = GraphTypeRegistry::new();
//! registry.register(chain_graph_type().unwrap()).unwrap();
//! assert!(registry.contains("counter_chain"));
//!
//! let defaults = create_default_registry().unwrap();
//! assert!(defaults.get("gals_heat").is_some());
//! ```

use std::collections::HashMap;

use crate::error::{GraphError, GraphResult};
use crate::graph::GraphTypeRef;

/// A registry of graph types keyed by id.
#[derive(Default)]
pub struct GraphTypeRegistry {
    types: HashMap<String, GraphTypeRef>,
}

impl GraphTypeRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a graph type under its id.
    ///
    /// Types are registered once; a second type with the same id is refused.
    pub fn register(&mut self, graph_type: GraphTypeRef) -> GraphResult<()> {
        let id = graph_type.id().to_string();
        if self.types.contains_key(&id) {
            return Err(GraphError::DuplicateGraphType(id));
        }
        self.types.insert(id, graph_type);
        Ok(())
    }

    /// Looks up a graph type.
    pub fn get(&self, id: &str) -> Option<&GraphTypeRef> {
        self.types.get(id)
    }

    /// Looks up a graph type, failing with [`GraphError::UnknownGraphType`].
    pub fn require(&self, id: &str) -> GraphResult<&GraphTypeRef> {
        self.get(id)
            .ok_or_else(|| GraphError::UnknownGraphType(id.to_string()))
    }

    /// Returns true if a type is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registered ids, sorted.
    pub fn type_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.types.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Unregisters a graph type.
    pub fn unregister(&mut self, id: &str) -> bool {
        self.types.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }
}

impl std::fmt::Debug for GraphTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphTypeRegistry")
            .field("registered_types", &self.type_ids())
            .finish()
    }
}

/// Creates a registry holding the built-in graph types.
///
/// Includes:
/// - `gals_heat` - heat diffusion grid
/// - `counter_chain` - bounded counter pipeline
pub fn create_default_registry() -> GraphResult<GraphTypeRegistry> {
    use crate::graphs::{chain_graph_type, heat_graph_type};

    let mut registry = GraphTypeRegistry::new();
    registry.register(heat_graph_type()?)?;
    registry.register(chain_graph_type()?)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::{chain_graph_type, heat_graph_type};

    #[test]
    fn test_registry_basic() {
        let mut registry = GraphTypeRegistry::new();
        assert!(registry.is_empty());

        registry.register(chain_graph_type().unwrap()).unwrap();
        assert!(!registry.is_empty());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("counter_chain"));
    }

    #[test]
    fn test_registry_duplicate() {
        let mut registry = GraphTypeRegistry::new();
        registry.register(chain_graph_type().unwrap()).unwrap();
        let err = registry.register(chain_graph_type().unwrap()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateGraphType("counter_chain".into()));
    }

    #[test]
    fn test_registry_require() {
        let mut registry = GraphTypeRegistry::new();
        registry.register(heat_graph_type().unwrap()).unwrap();

        assert_eq!(registry.require("gals_heat").unwrap().id(), "gals_heat");
        assert_eq!(
            registry.require("nope").unwrap_err(),
            GraphError::UnknownGraphType("nope".into())
        );
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry().unwrap();

        assert!(registry.contains("gals_heat"));
        assert!(registry.contains("counter_chain"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.type_ids(), vec!["counter_chain", "gals_heat"]);
    }

    #[test]
    fn test_registry_unregister() {
        let mut registry = create_default_registry().unwrap();

        assert!(registry.unregister("gals_heat"));
        assert!(!registry.contains("gals_heat"));
        assert!(!registry.unregister("gals_heat")); // Already removed

        registry.clear();
        assert!(registry.is_empty());
    }
}
