//! Evaluation waves.
//!
//! A wave walks dirty nodes in graph order. Every node sees the exports its
//! dependencies hold at that moment; synchronous nodes (arguments, exports,
//! declares) publish during the wave, so their dependents join the same wave.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use conflux_value::{Capsule, Scope, Value};
use tracing::{debug, warn};

use crate::component::{ComponentOptions, ExportsHandle, Registration};
use crate::controller::Inner;
use crate::graph::{DefinitionRef, Graph, GraphEntry, NodeRole};
use crate::module::{self, ModuleDefinition};
use crate::{EvaluationError, Health, HealthType};

impl Inner {
    /// Evaluates `dirty` and everything downstream whose inputs change.
    pub(crate) fn evaluate_wave(&self, graph: &Graph, mut dirty: BTreeSet<usize>) {
        let mut evaluated = 0usize;

        while let Some(i) = dirty.pop_first() {
            let entry = &graph.entries[i];
            let changed = self.evaluate_entry(graph, entry);
            let flipped = entry.node.refresh_failing();
            if changed || flipped {
                dirty.extend(entry.dependents.iter().copied());
            }
            evaluated += 1;
        }

        self.report_module_exports(graph);
        debug!(module = %self.module_path, evaluated, "Evaluation wave finished");
    }

    /// Evaluates one node. Returns true if its exports changed.
    fn evaluate_entry(&self, graph: &Graph, entry: &GraphEntry) -> bool {
        let node = &entry.node;
        node.set_degraded(degraded_reason(graph, entry));

        let scope = dependency_scope(graph, entry);
        match self.evaluate_role(graph, entry, &scope) {
            Ok(changed) => {
                node.set_evaluated(Health::healthy("component evaluated"));
                changed
            }
            Err(e) => {
                warn!(node_id = %node.path(), error = %e, "Failed to evaluate node");
                node.set_evaluated(Health::unhealthy(format!("failed to evaluate: {e}")));
                false
            }
        }
    }

    fn evaluate_role(
        &self,
        graph: &Graph,
        entry: &GraphEntry,
        scope: &Scope,
    ) -> Result<bool, EvaluationError> {
        let node = &entry.node;

        match &entry.role {
            NodeRole::Component(registration) => {
                let body = entry.block.evaluate_body(scope)?;
                let args = registration.arguments().clone().merge(body);
                self.apply_component(entry, registration, args)
            }
            NodeRole::Module {
                registration,
                definition,
            } => {
                let definition = resolve_definition(graph, definition)?;
                let arguments = entry.block.evaluate_body(scope)?;
                let args = module::instance_arguments(arguments, definition);
                self.apply_component(entry, registration, args)
            }
            NodeRole::Declare { imports } => {
                let mut resolved = BTreeMap::new();
                for (name, definition) in imports {
                    resolved.insert(name.clone(), resolve_definition(graph, definition)?);
                }

                let current = node
                    .exports()
                    .as_capsule()
                    .and_then(|c| c.downcast::<ModuleDefinition>());
                let unchanged =
                    current.is_some_and(|def| def.is_same(&entry.block.blocks, &resolved));

                node.mark_ready();
                if unchanged {
                    return Ok(false);
                }

                let name = node.id().label().unwrap_or_default();
                let definition = ModuleDefinition::new(name, entry.block.blocks.clone(), resolved);
                Ok(node.set_exports(Value::Capsule(Capsule::new(definition))))
            }
            NodeRole::Argument => {
                let name = node.id().label().unwrap_or_default();
                let provided = self
                    .module
                    .as_ref()
                    .and_then(|m| m.arguments.read().get(name).cloned());

                let value = match (provided, entry.block.attribute("default")) {
                    (Some(value), _) => value,
                    (None, Some(default)) => default.evaluate(scope)?,
                    (None, None) => {
                        let optional = match entry.block.attribute("optional") {
                            Some(expr) => expr.evaluate(scope)?.as_bool().unwrap_or(false),
                            None => false,
                        };
                        if !optional {
                            return Err(EvaluationError::MissingArgument(name.to_string()));
                        }
                        Value::Null
                    }
                };

                node.mark_ready();
                Ok(node.set_exports(Value::from_pairs([("value", value)])))
            }
            NodeRole::Export => {
                let value = match entry.block.attribute("value") {
                    Some(expr) => expr.evaluate(scope)?,
                    None => Value::Null,
                };
                node.mark_ready();
                Ok(node.set_exports(Value::from_pairs([("value", value)])))
            }
        }
    }

    /// Delivers arguments to a component node, constructing and starting it
    /// on its first successful evaluation.
    ///
    /// Returns true if the constructor already published new exports.
    fn apply_component(
        &self,
        entry: &GraphEntry,
        registration: &Registration,
        args: Value,
    ) -> Result<bool, EvaluationError> {
        let node = &entry.node;
        if node.is_started() {
            node.apply_arguments(args);
            return Ok(false);
        }

        let options = ComponentOptions {
            id: node.id().clone(),
            path: node.path().clone(),
            data_path: self
                .context
                .options
                .data_path
                .join(node.path().to_string()),
            exports: ExportsHandle::new(Arc::clone(node), self.queue.clone()),
            host: self.context.host.clone(),
        };
        let before = node.exports();
        let component = registration.build(options, args.clone())?;

        node.apply_arguments(args);
        node.start(component, self.queue.clone());
        Ok(node.exports() != before)
    }

    /// Hands the values of the export nodes to the enclosing module instance.
    fn report_module_exports(&self, graph: &Graph) {
        let Some(module) = &self.module else {
            return;
        };

        let exports: BTreeMap<String, Value> = graph
            .entries
            .iter()
            .filter(|e| matches!(e.role, NodeRole::Export))
            .filter_map(|e| {
                let label = e.node.id().label()?.to_string();
                let value = e.node.exports().get("value").cloned().unwrap_or_default();
                Some((label, value))
            })
            .collect();
        let exports = Value::Object(exports);

        {
            let mut last = module.last_exports.lock();
            if last.as_ref() == Some(&exports) {
                return;
            }
            *last = Some(exports.clone());
        }
        (module.on_exports)(exports);
    }
}

/// The scope a node's expressions see: stdlib plus every dependency's exports
/// at its identifier path.
fn dependency_scope(graph: &Graph, entry: &GraphEntry) -> Scope {
    let mut scope = Scope::with_stdlib();
    for &j in &entry.dependencies {
        let dep = &graph.entries[j].node;
        let path: Vec<&str> = dep.id().segments().collect();
        scope.insert(&path, dep.exports());
    }
    for id in &entry.tombstones {
        if let Some(exports) = graph.tombstones.get(id) {
            let path: Vec<&str> = id.segments().collect();
            scope.insert(&path, exports.clone());
        }
    }
    scope
}

/// Why a node is degraded, if it is.
fn degraded_reason(graph: &Graph, entry: &GraphEntry) -> Option<Health> {
    if let Some(id) = entry.tombstones.first() {
        return Some(Health::new(
            HealthType::Degraded,
            format!("dependency {id} was removed"),
        ));
    }
    entry
        .dependencies
        .iter()
        .map(|&j| &graph.entries[j].node)
        .find(|dep| dep.is_failing())
        .map(|dep| {
            Health::new(
                HealthType::Degraded,
                format!("dependency {} is unhealthy", dep.id()),
            )
        })
}

fn resolve_definition(
    graph: &Graph,
    definition: &DefinitionRef,
) -> Result<Arc<ModuleDefinition>, EvaluationError> {
    match definition {
        DefinitionRef::Inherited(def) => Ok(Arc::clone(def)),
        DefinitionRef::Local(id) => graph
            .get(id)
            .and_then(|entry| entry.node.exports().as_capsule()?.downcast::<ModuleDefinition>())
            .ok_or_else(|| EvaluationError::MissingDefinition(id.label().unwrap_or_default().to_string())),
    }
}
