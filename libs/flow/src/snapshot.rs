//! Serializable views of the live graph.

use chrono::{DateTime, Utc};
use conflux_id::{ComponentId, ModulePath, NodePath};
use conflux_value::Value;
use serde::Serialize;

use crate::graph::Graph;
use crate::{Health, NodePhase};

/// The live graph at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub generation: u64,
    /// Module qualifiers of the controller; empty for the root.
    pub module: String,
    /// Nodes in evaluation order.
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: ComponentId,
    pub path: NodePath,
    pub kind: String,
    pub health: Health,
    pub phase: NodePhase,
    pub arguments: Value,
    pub exports: Value,
    pub last_evaluated: Option<DateTime<Utc>>,
    pub dependencies: Vec<ComponentId>,
}

impl GraphSnapshot {
    pub(crate) fn capture(module: &ModulePath, graph: &Graph) -> Self {
        let nodes = graph
            .entries
            .iter()
            .map(|entry| {
                let node = &entry.node;
                NodeSnapshot {
                    id: node.id().clone(),
                    path: node.path().clone(),
                    kind: node.kind().to_string(),
                    health: node.health(),
                    phase: node.phase(),
                    arguments: node.arguments(),
                    exports: node.exports(),
                    last_evaluated: node.last_evaluated(),
                    dependencies: entry
                        .dependencies
                        .iter()
                        .map(|&j| graph.entries[j].node.id().clone())
                        .collect(),
                }
            })
            .collect();

        Self {
            generation: graph.generation,
            module: module.to_string(),
            nodes,
        }
    }

    /// Looks a node up by its rendered id, e.g. `local.tick.a`.
    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id.to_string() == id)
    }
}
