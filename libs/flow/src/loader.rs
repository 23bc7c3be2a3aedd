//! Compiles a block tree into a candidate graph.
//!
//! Loading never touches the live graph. Every problem is collected into one
//! [`ConfigErrors`] report; the caller swaps the candidate in only when the
//! report is empty.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use conflux_id::{ComponentId, ModulePath};
use conflux_service::ServiceRegistry;
use conflux_value::{stdlib, Block, Traversal, Value};

use crate::component::ComponentRegistry;
use crate::controller::ControllerContext;
use crate::graph::{topological_sort, DefinitionRef, Graph, GraphEntry, NodeRole, TopoOrder};
use crate::module::{self, ModuleDefinition, ARGUMENT, DECLARE, EXPORT};
use crate::node::Node;
use crate::{ConfigError, ConfigErrors};

/// Attributes understood by `argument` blocks.
const ARGUMENT_ATTRIBUTES: [&str; 3] = ["optional", "default", "comment"];

/// Attributes understood by `export` blocks.
const EXPORT_ATTRIBUTES: [&str; 1] = ["value"];

/// Inputs to a load that come from the controller.
pub(crate) struct LoadContext<'a> {
    pub context: &'a ControllerContext,
    pub module_path: &'a ModulePath,
    pub in_module: bool,
    pub inherited: &'a BTreeMap<String, Arc<ModuleDefinition>>,
}

impl LoadContext<'_> {
    fn registry(&self) -> &ComponentRegistry {
        &self.context.registry
    }

    fn services(&self) -> &ServiceRegistry {
        self.context.host.registry()
    }
}

/// A validated graph ready to be swapped in.
pub(crate) struct Candidate {
    pub graph: Graph,
    pub added: Vec<ComponentId>,
    pub updated: Vec<ComponentId>,
    pub removed: Vec<Arc<Node>>,
    /// Service configuration blocks, in declaration order.
    pub services: Vec<Block>,
}

struct Pending {
    id: ComponentId,
    role: NodeRole,
    block: Block,
}

/// Builds a candidate graph from `blocks`, reusing nodes of `previous`.
pub(crate) fn load(
    ctx: &LoadContext<'_>,
    blocks: Vec<Block>,
    previous: &Graph,
) -> Result<Candidate, ConfigErrors> {
    let mut errors = ConfigErrors::new();

    let local_declares: BTreeMap<String, ComponentId> = blocks
        .iter()
        .filter(|b| b.kind() == DECLARE)
        .filter_map(|b| {
            let label = b.label.as_deref()?;
            let id = ComponentId::new(&b.name, Some(label)).ok()?;
            Some((label.to_string(), id))
        })
        .collect();
    let local_bodies: HashMap<&str, &[Block]> = blocks
        .iter()
        .filter(|b| b.kind() == DECLARE)
        .filter_map(|b| Some((b.label.as_deref()?, b.blocks.as_slice())))
        .collect();

    let definition_ref = |name: &str| -> Option<DefinitionRef> {
        if let Some(id) = local_declares.get(name) {
            return Some(DefinitionRef::Local(id.clone()));
        }
        ctx.inherited
            .get(name)
            .map(|def| DefinitionRef::Inherited(Arc::clone(def)))
    };

    // Classify blocks.
    let mut pending: Vec<Pending> = Vec::with_capacity(blocks.len());
    let mut seen: HashSet<ComponentId> = HashSet::new();
    let mut services: Vec<Block> = Vec::new();
    let mut seen_services: HashSet<String> = HashSet::new();

    for block in &blocks {
        let kind = block.kind();
        let id = match ComponentId::new(&block.name, block.label.as_deref()) {
            Ok(id) => id,
            Err(source) => {
                errors.push(ConfigError::InvalidIdentifier {
                    block: kind,
                    source,
                });
                continue;
            }
        };

        let role = match kind.as_str() {
            DECLARE | ARGUMENT | EXPORT => {
                if block.label.is_none() {
                    errors.push(ConfigError::MissingLabel { kind });
                    continue;
                }
                match kind.as_str() {
                    DECLARE => NodeRole::Declare {
                        imports: module::external_instantiations(&block.blocks)
                            .iter()
                            .filter_map(|name| Some((name.clone(), definition_ref(name)?)))
                            .collect(),
                    },
                    _ if !ctx.in_module => {
                        errors.push(ConfigError::OutsideModule { kind });
                        continue;
                    }
                    ARGUMENT => NodeRole::Argument,
                    _ => NodeRole::Export,
                }
            }
            _ if ctx.services().by_config_type(&kind).is_some() => {
                if ctx.in_module {
                    errors.push(ConfigError::ServiceInModule { kind });
                } else if !seen_services.insert(kind.clone()) {
                    errors.push(ConfigError::DuplicateService { kind });
                } else {
                    services.push(block.clone());
                }
                continue;
            }
            _ if block.name.len() == 1 && definition_ref(&kind).is_some() => {
                let Some(definition) = definition_ref(&kind) else {
                    continue;
                };
                if block.label.is_none() {
                    errors.push(ConfigError::MissingLabel { kind });
                    continue;
                }
                NodeRole::Module {
                    registration: module::registration(&kind, ctx.context.clone()),
                    definition,
                }
            }
            _ => match ctx.registry().get(&kind) {
                Some(registration) => NodeRole::Component(registration.clone()),
                None => {
                    errors.push(ConfigError::UnknownKind { kind });
                    continue;
                }
            },
        };

        if !seen.insert(id.clone()) {
            errors.push(ConfigError::DuplicateNode { id: id.to_string() });
            continue;
        }

        pending.push(Pending {
            id,
            role,
            block: block.clone(),
        });
    }

    check_conflicting_identities(&pending, &mut errors);
    for p in &pending {
        check_attributes(p, &local_bodies, &mut errors);
    }

    // Resolve references.
    let by_segments: HashMap<Vec<&str>, usize> = pending
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.segments().collect(), i))
        .collect();
    let by_id: HashMap<&ComponentId, usize> =
        pending.iter().enumerate().map(|(i, p)| (&p.id, i)).collect();

    let mut removed_exports: HashMap<ComponentId, Value> = previous
        .tombstones
        .iter()
        .filter(|(id, _)| !seen.contains(*id))
        .map(|(id, v)| (id.clone(), v.clone()))
        .collect();
    for entry in &previous.entries {
        if !seen.contains(entry.node.id()) {
            removed_exports.insert(entry.node.id().clone(), entry.node.exports());
        }
    }
    let removed_by_segments: HashMap<Vec<&str>, &ComponentId> = removed_exports
        .keys()
        .map(|id| (id.segments().collect(), id))
        .collect();

    let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); pending.len()];
    let mut tombstones: Vec<Vec<ComponentId>> = vec![Vec::new(); pending.len()];

    for (i, p) in pending.iter().enumerate() {
        // A declare body is resolved inside each instance, not here.
        let references = match p.role {
            NodeRole::Declare { .. } => Vec::new(),
            _ => p.block.references(),
        };
        for traversal in references {
            if stdlib::is_builtin(traversal.root()) {
                continue;
            }
            if let Some(j) = longest_prefix(&by_segments, traversal) {
                dependencies[i].insert(j);
            } else if let Some(id) = longest_prefix(&removed_by_segments, traversal) {
                if !tombstones[i].contains(id) {
                    tombstones[i].push(id.clone());
                }
            } else {
                errors.push(ConfigError::UnresolvedReference {
                    id: p.id.to_string(),
                    reference: traversal.to_string(),
                });
            }
        }

        let definitions: Vec<&DefinitionRef> = match &p.role {
            NodeRole::Module { definition, .. } => vec![definition],
            NodeRole::Declare { imports } => imports.iter().map(|(_, d)| d).collect(),
            _ => Vec::new(),
        };
        for definition in definitions {
            if let DefinitionRef::Local(declare) = definition {
                if let Some(&j) = by_id.get(declare) {
                    dependencies[i].insert(j);
                }
            }
        }
    }

    let edges: Vec<(usize, usize)> = dependencies
        .iter()
        .enumerate()
        .flat_map(|(consumer, producers)| producers.iter().map(move |&p| (p, consumer)))
        .collect();

    let order = match topological_sort(pending.len(), &edges) {
        TopoOrder::Sorted(order) => order,
        TopoOrder::Cycle(remaining) => {
            errors.push(ConfigError::Cycle {
                nodes: remaining.iter().map(|&i| pending[i].id.to_string()).collect(),
            });
            Vec::new()
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    // Assemble the candidate.
    let mut position = vec![0usize; pending.len()];
    for (pos, &i) in order.iter().enumerate() {
        position[i] = pos;
    }

    let mut slots: Vec<Option<Pending>> = pending.into_iter().map(Some).collect();
    let mut graph = Graph::empty();
    let mut added = Vec::new();
    let mut updated = Vec::new();
    let mut reused: HashSet<ComponentId> = HashSet::new();

    for &i in &order {
        let Some(p) = slots[i].take() else {
            continue;
        };

        let node = match previous.get(&p.id) {
            Some(entry) if entry.role.class() == p.role.class() => {
                updated.push(p.id.clone());
                reused.insert(p.id.clone());
                Arc::clone(&entry.node)
            }
            _ => {
                added.push(p.id.clone());
                let exports = p
                    .role
                    .registration()
                    .map(|r| r.exports().clone())
                    .unwrap_or(Value::Null);
                Arc::new(Node::new(
                    p.id.clone(),
                    ctx.module_path.node(p.id.clone()),
                    exports,
                ))
            }
        };

        let deps: Vec<usize> = dependencies[i].iter().map(|&j| position[j]).collect();
        for id in &tombstones[i] {
            if let Some(exports) = removed_exports.get(id) {
                graph.tombstones.insert(id.clone(), exports.clone());
            }
        }

        graph.index.insert(p.id.clone(), graph.entries.len());
        graph.entries.push(GraphEntry {
            node,
            role: p.role,
            block: p.block,
            dependencies: deps,
            dependents: Vec::new(),
            tombstones: std::mem::take(&mut tombstones[i]),
        });
    }

    for consumer in 0..graph.entries.len() {
        for producer in graph.entries[consumer].dependencies.clone() {
            graph.entries[producer].dependents.push(consumer);
        }
    }

    let removed = previous
        .entries
        .iter()
        .filter(|e| !reused.contains(e.node.id()))
        .map(|e| Arc::clone(&e.node))
        .collect();

    Ok(Candidate {
        graph,
        added,
        updated,
        removed,
        services,
    })
}

/// Index of the node named by the longest prefix of `traversal`.
fn longest_prefix<T: Copy>(index: &HashMap<Vec<&str>, T>, traversal: &Traversal) -> Option<T> {
    let segments: Vec<&str> = traversal.segments().iter().map(String::as_str).collect();
    (1..=segments.len())
        .rev()
        .find_map(|len| index.get(&segments[..len]).copied())
}

/// Reports nodes whose identity is a strict prefix of another node's.
fn check_conflicting_identities(pending: &[Pending], errors: &mut ConfigErrors) {
    let mut ids: Vec<Vec<&str>> = pending.iter().map(|p| p.id.segments().collect()).collect();
    ids.sort();
    for pair in ids.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if b.len() > a.len() && b.starts_with(a) {
            errors.push(ConfigError::ConflictingIdentity {
                id: b.join("."),
                other: a.join("."),
            });
        }
    }
}

/// Static checks of a block's attributes against what its role accepts.
fn check_attributes(p: &Pending, local_bodies: &HashMap<&str, &[Block]>, errors: &mut ConfigErrors) {
    let id = p.id.to_string();

    let mut names = HashSet::new();
    for attr in &p.block.attributes {
        if !names.insert(attr.name.as_str()) {
            errors.push(ConfigError::DuplicateAttribute {
                id: id.clone(),
                attribute: attr.name.clone(),
            });
        }
    }

    match &p.role {
        NodeRole::Component(registration) => {
            let Value::Object(zero) = registration.arguments() else {
                return;
            };
            for attr in &p.block.attributes {
                let Some(expected) = zero.get(&attr.name) else {
                    errors.push(ConfigError::UnknownAttribute {
                        id: id.clone(),
                        attribute: attr.name.clone(),
                    });
                    continue;
                };
                let Some(actual) = attr.value.as_constant() else {
                    continue;
                };
                if !expected.is_null()
                    && !actual.is_null()
                    && expected.type_name() != actual.type_name()
                {
                    errors.push(ConfigError::TypeMismatch {
                        id: id.clone(),
                        attribute: attr.name.clone(),
                        expected: expected.type_name(),
                        actual: actual.type_name(),
                    });
                }
            }
            for nested in &p.block.blocks {
                let name = nested.kind();
                if !zero.contains_key(&name) {
                    errors.push(ConfigError::UnknownAttribute {
                        id: id.clone(),
                        attribute: name,
                    });
                }
            }
        }
        NodeRole::Module { definition, .. } => {
            let module = p.id.kind();
            let declared = match definition {
                DefinitionRef::Local(_) => local_bodies
                    .get(module.as_str())
                    .map(|body| module::argument_names(body))
                    .unwrap_or_default(),
                DefinitionRef::Inherited(def) => def.argument_names(),
            };
            for attr in &p.block.attributes {
                if !declared.contains(&attr.name) {
                    errors.push(ConfigError::UnknownArgument {
                        id: id.clone(),
                        module: module.clone(),
                        argument: attr.name.clone(),
                    });
                }
            }
        }
        NodeRole::Argument | NodeRole::Export => {
            let allowed: &[&str] = if matches!(p.role, NodeRole::Argument) {
                &ARGUMENT_ATTRIBUTES
            } else {
                &EXPORT_ATTRIBUTES
            };
            for attr in &p.block.attributes {
                if !allowed.contains(&attr.name.as_str()) {
                    errors.push(ConfigError::UnknownAttribute {
                        id: id.clone(),
                        attribute: attr.name.clone(),
                    });
                }
            }
        }
        NodeRole::Declare { .. } => {}
    }
}
