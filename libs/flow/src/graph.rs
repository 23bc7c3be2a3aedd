//! The live graph and its topological ordering.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use conflux_id::ComponentId;
use conflux_value::{Block, Value};

use crate::component::Registration;
use crate::module::ModuleDefinition;
use crate::node::Node;

/// Where a module instance finds its definition.
#[derive(Clone)]
pub(crate) enum DefinitionRef {
    /// A `declare` node of the same controller.
    Local(ComponentId),
    /// A definition visible from the enclosing module.
    Inherited(Arc<ModuleDefinition>),
}

/// What a node does when evaluated.
#[derive(Clone)]
pub(crate) enum NodeRole {
    /// A registered component kind.
    Component(Registration),
    /// An instance of a module definition.
    Module {
        registration: Registration,
        definition: DefinitionRef,
    },
    /// A module definition; `imports` are the outer definitions its body
    /// instantiates.
    Declare {
        imports: Vec<(String, DefinitionRef)>,
    },
    /// A module argument.
    Argument,
    /// A module export.
    Export,
}

impl NodeRole {
    /// Nodes are reused across reloads only when their class is unchanged.
    pub(crate) fn class(&self) -> String {
        match self {
            NodeRole::Component(registration) => format!("component:{}", registration.kind()),
            NodeRole::Module { registration, .. } => format!("module:{}", registration.kind()),
            NodeRole::Declare { .. } => "declare".to_string(),
            NodeRole::Argument => "argument".to_string(),
            NodeRole::Export => "export".to_string(),
        }
    }

    pub(crate) fn registration(&self) -> Option<&Registration> {
        match self {
            NodeRole::Component(registration) | NodeRole::Module { registration, .. } => {
                Some(registration)
            }
            _ => None,
        }
    }
}

/// A node together with the block and edges of the current generation.
pub(crate) struct GraphEntry {
    pub node: Arc<Node>,
    pub role: NodeRole,
    pub block: Block,
    /// Indices of producer nodes.
    pub dependencies: Vec<usize>,
    /// Indices of consumer nodes.
    pub dependents: Vec<usize>,
    /// Removed producers whose last exports are still read.
    pub tombstones: Vec<ComponentId>,
}

/// One generation of the component graph.
///
/// Entries are stored in evaluation order, so every dependency has a lower
/// index than its dependents.
pub(crate) struct Graph {
    pub generation: u64,
    pub entries: Vec<GraphEntry>,
    pub index: HashMap<ComponentId, usize>,
    /// Exports retained from removed nodes that are still referenced.
    pub tombstones: HashMap<ComponentId, Value>,
}

impl Graph {
    pub(crate) fn empty() -> Self {
        Self {
            generation: 0,
            entries: Vec::new(),
            index: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, id: &ComponentId) -> Option<&GraphEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.entries.iter().map(|e| &e.node)
    }
}

/// Result of sorting a dependency graph.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TopoOrder {
    Sorted(Vec<usize>),
    /// Nodes left over after sorting; every one of them is on or behind a cycle.
    Cycle(Vec<usize>),
}

/// Kahn's algorithm over a dense arena.
///
/// `edges` are `(producer, consumer)` pairs. Among nodes that are ready at the
/// same time the lowest index (declaration order) goes first.
pub(crate) fn topological_sort(len: usize, edges: &[(usize, usize)]) -> TopoOrder {
    let mut in_degree = vec![0usize; len];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); len];
    for &(producer, consumer) in edges {
        in_degree[consumer] += 1;
        consumers[producer].push(consumer);
    }

    let mut ready: BTreeSet<usize> = (0..len).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(len);

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &c in &consumers[i] {
            in_degree[c] -= 1;
            if in_degree[c] == 0 {
                ready.insert(c);
            }
        }
    }

    if order.len() == len {
        TopoOrder::Sorted(order)
    } else {
        TopoOrder::Cycle((0..len).filter(|&i| in_degree[i] > 0).collect())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chain_sorted_regardless_of_declaration_order() {
        // 0 = C, 1 = B, 2 = A with B <- A and C <- B.
        let order = topological_sort(3, &[(2, 1), (1, 0)]);
        assert_eq!(order, TopoOrder::Sorted(vec![2, 1, 0]));
    }

    #[test]
    fn test_ties_broken_by_declaration_order() {
        let order = topological_sort(4, &[(3, 0)]);
        assert_eq!(order, TopoOrder::Sorted(vec![1, 2, 3, 0]));
    }

    #[test]
    fn test_cycle_reported() {
        let order = topological_sort(3, &[(0, 1), (1, 0), (1, 2)]);
        assert_eq!(order, TopoOrder::Cycle(vec![0, 1, 2]));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        assert_eq!(topological_sort(2, &[(1, 1)]), TopoOrder::Cycle(vec![1]));
    }

    proptest! {
        #[test]
        fn prop_sorted_order_respects_every_edge(
            len in 1usize..20,
            raw in proptest::collection::vec((0usize..20, 0usize..20), 0..40),
        ) {
            // Only forward edges, so the graph is acyclic by construction.
            let edges: Vec<(usize, usize)> = raw
                .into_iter()
                .map(|(a, b)| (a % len, b % len))
                .filter(|(a, b)| a < b)
                .collect();

            let TopoOrder::Sorted(order) = topological_sort(len, &edges) else {
                panic!("acyclic graph reported a cycle");
            };
            prop_assert_eq!(order.len(), len);

            let mut position = vec![0; len];
            for (pos, &node) in order.iter().enumerate() {
                position[node] = pos;
            }
            for (producer, consumer) in edges {
                prop_assert!(position[producer] < position[consumer]);
            }
        }
    }
}
