//! Module definitions and module instances.
//!
//! A `declare "name" { ... }` block defines a module. Every block named after
//! a visible definition instantiates it: the instance is a component whose
//! arguments carry the caller's argument values and the definition itself,
//! and which drives an isolated child controller built from the definition's
//! body.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conflux_id::ModuleId;
use conflux_value::{Block, Value};
use tracing::info;

use crate::controller::{Controller, ControllerContext};
use crate::{Component, ComponentError, ComponentOptions, Registration, RunContext};

/// Block names with special meaning inside configuration bodies.
pub(crate) const DECLARE: &str = "declare";
pub(crate) const ARGUMENT: &str = "argument";
pub(crate) const EXPORT: &str = "export";

/// The body of a `declare` block plus the outer definitions it uses.
pub struct ModuleDefinition {
    name: String,
    blocks: Vec<Block>,
    imports: BTreeMap<String, Arc<ModuleDefinition>>,
}

impl ModuleDefinition {
    pub(crate) fn new(
        name: &str,
        blocks: Vec<Block>,
        imports: BTreeMap<String, Arc<ModuleDefinition>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            blocks,
            imports,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Labels of the definition's `argument` blocks.
    pub fn argument_names(&self) -> BTreeSet<String> {
        argument_names(&self.blocks)
    }

    /// Outer definitions visible to instances of this module.
    pub(crate) fn imports(&self) -> &BTreeMap<String, Arc<ModuleDefinition>> {
        &self.imports
    }

    /// True if this definition has the same body and the very same imports.
    pub(crate) fn is_same(
        &self,
        blocks: &[Block],
        imports: &BTreeMap<String, Arc<ModuleDefinition>>,
    ) -> bool {
        self.blocks == blocks
            && self.imports.len() == imports.len()
            && self
                .imports
                .iter()
                .zip(imports)
                .all(|((a, da), (b, db))| a == b && Arc::ptr_eq(da, db))
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("blocks", &self.blocks.len())
            .field("imports", &self.imports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Labels of the `argument` blocks in a module body.
pub(crate) fn argument_names(body: &[Block]) -> BTreeSet<String> {
    body.iter()
        .filter(|b| b.kind() == ARGUMENT)
        .filter_map(|b| b.label.clone())
        .collect()
}

/// Names a module body instantiates without declaring them itself.
///
/// Nested `declare` bodies are included, minus the names declared alongside
/// them.
pub(crate) fn external_instantiations(body: &[Block]) -> BTreeSet<String> {
    let local: BTreeSet<&str> = body
        .iter()
        .filter(|b| b.kind() == DECLARE)
        .filter_map(|b| b.label.as_deref())
        .collect();

    let mut out = BTreeSet::new();
    for block in body {
        match block.kind().as_str() {
            DECLARE => out.extend(external_instantiations(&block.blocks)),
            ARGUMENT | EXPORT => {}
            _ if block.name.len() == 1 => {
                out.insert(block.name[0].clone());
            }
            _ => {}
        }
    }
    out.retain(|name| !local.contains(name.as_str()));
    out
}

/// Registration used for instances of the module definition `name`.
pub(crate) fn registration(name: &str, context: ControllerContext) -> Registration {
    Registration::new(name, move |options, args| {
        let module = ModuleComponent::build(context.clone(), options, args)?;
        Ok(Arc::new(module) as Arc<dyn Component>)
    })
    .with_exports(Value::object())
}

/// Builds the arguments of a module instance node.
pub(crate) fn instance_arguments(arguments: Value, definition: Arc<ModuleDefinition>) -> Value {
    Value::from_pairs([
        ("arguments", arguments),
        (
            "definition",
            Value::Capsule(conflux_value::Capsule::from_arc(definition)),
        ),
    ])
}

fn decode_arguments(args: &Value) -> Result<(Value, Arc<ModuleDefinition>), ComponentError> {
    let definition = args
        .get("definition")
        .and_then(Value::as_capsule)
        .and_then(|c| c.downcast::<ModuleDefinition>())
        .ok_or_else(|| ComponentError::failed("module definition missing from arguments"))?;
    let arguments = args.get("arguments").cloned().unwrap_or_else(Value::object);
    Ok((arguments, definition))
}

/// A running module instance.
pub(crate) struct ModuleComponent {
    controller: Controller,
    grace: Duration,
}

impl ModuleComponent {
    fn build(
        context: ControllerContext,
        options: ComponentOptions,
        args: Value,
    ) -> Result<Self, ComponentError> {
        let (arguments, definition) = decode_arguments(&args)?;
        let instance = options
            .id
            .label()
            .ok_or_else(|| ComponentError::failed("module instances require a label"))?;
        let module_id = ModuleId::new(definition.name(), instance)
            .map_err(|e| ComponentError::failed(e.to_string()))?;
        let path = options.path.modules().child(module_id);
        let grace = context.options.shutdown_grace;

        let exports = options.exports.clone();
        let controller = Controller::new_module(
            context,
            path,
            arguments,
            definition.imports().clone(),
            move |value| exports.publish(value),
        );
        let summary = controller.load_now(definition.blocks().to_vec())?;

        info!(
            module = %controller.module_path(),
            nodes = summary.added.len(),
            "Loaded module instance"
        );

        Ok(Self { controller, grace })
    }
}

#[async_trait]
impl Component for ModuleComponent {
    async fn run(&self, ctx: RunContext) -> Result<(), ComponentError> {
        self.controller.run(ctx.shutdown.clone()).await;
        let report = self.controller.shutdown(self.grace).await;
        info!(
            module = %self.controller.module_path(),
            stopped = report.stopped,
            abandoned = report.abandoned.len(),
            "Module instance stopped"
        );
        Ok(())
    }

    async fn update(&self, args: Value) -> Result<(), ComponentError> {
        let (arguments, definition) = decode_arguments(&args)?;
        self.controller
            .set_module_inputs(arguments, definition.imports().clone());
        self.controller.reload(definition.blocks().to_vec()).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
