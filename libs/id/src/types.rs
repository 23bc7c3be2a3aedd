//! Typed identities for graph nodes, module instances, and tasks.

use std::fmt;

use crate::{define_id, IdError};

// =============================================================================
// Generated IDs
// =============================================================================

define_id!(
    /// One spawned node task.
    TaskId,
    "task"
);
define_id!(
    /// One reload of a controller, used to correlate its log lines.
    ReloadId,
    "rld"
);

// =============================================================================
// Identifiers
// =============================================================================

/// Validates a single name segment or label.
///
/// Identifiers start with an ASCII letter or underscore and continue with
/// ASCII letters, digits, or underscores.
pub fn validate_identifier(value: &str) -> Result<(), IdError> {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return Err(IdError::Empty);
    };

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(IdError::InvalidIdentifier {
            value: value.to_string(),
            reason: "must start with a letter or underscore",
        });
    }

    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_')) {
        return Err(IdError::InvalidIdentifier {
            value: value.to_string(),
            reason: "may only contain letters, digits, and underscores",
        });
    }

    Ok(())
}

// =============================================================================
// Component ID
// =============================================================================

/// Identity of a block within one controller.
///
/// `local.tick "a"` has name `["local", "tick"]` and label `a`, and renders
/// as `local.tick.a`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId {
    name: Vec<String>,
    label: Option<String>,
}

impl ComponentId {
    /// Creates a component ID, validating every segment.
    pub fn new<S: AsRef<str>>(name: &[S], label: Option<&str>) -> Result<Self, IdError> {
        if name.is_empty() {
            return Err(IdError::MissingName);
        }

        let name = name
            .iter()
            .map(|segment| -> Result<String, IdError> {
                validate_identifier(segment.as_ref())?;
                Ok(segment.as_ref().to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(label) = label {
            validate_identifier(label)?;
        }

        Ok(Self {
            name,
            label: label.map(str::to_string),
        })
    }

    /// Kind of the block, i.e. the dotted name without the label.
    pub fn kind(&self) -> String {
        self.name.join(".")
    }

    /// Name segments of the block.
    pub fn name(&self) -> &[String] {
        &self.name
    }

    /// Label of the block, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// All segments, name first and label last.
    ///
    /// These are the identifiers an expression uses to reference the block.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name
            .iter()
            .map(String::as_str)
            .chain(self.label.as_deref())
    }

    /// Number of segments including the label.
    pub fn len(&self) -> usize {
        self.name.len() + usize::from(self.label.is_some())
    }

    /// Component IDs always have at least one segment.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true if `traversal` starts with every segment of this ID.
    pub fn is_prefix_of<S: AsRef<str>>(&self, traversal: &[S]) -> bool {
        traversal.len() >= self.len()
            && self
                .segments()
                .zip(traversal)
                .all(|(a, b)| a == b.as_ref())
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name.join("."))?;
        if let Some(label) = &self.label {
            write!(f, ".{label}")?;
        }
        Ok(())
    }
}

impl serde::Serialize for ComponentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Module identities
// =============================================================================

/// A module instance, keyed by (definition, instance key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId {
    definition: String,
    instance: String,
}

impl ModuleId {
    /// Creates a module ID.
    pub fn new(definition: &str, instance: &str) -> Result<Self, IdError> {
        validate_identifier(definition)?;
        validate_identifier(instance)?;
        Ok(Self {
            definition: definition.to_string(),
            instance: instance.to_string(),
        })
    }

    /// The module definition this instance was created from.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// The instance key.
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.definition, self.instance)
    }
}

/// Chain of module instances from the root controller inwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModulePath(Vec<ModuleId>);

impl ModulePath {
    /// The root controller's path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns true for the root controller.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of a module instance nested inside this one.
    #[must_use]
    pub fn child(&self, module: ModuleId) -> Self {
        let mut modules = self.0.clone();
        modules.push(module);
        Self(modules)
    }

    /// Fully-qualified path of a node in this module.
    pub fn node(&self, id: ComponentId) -> NodePath {
        NodePath {
            modules: self.clone(),
            id,
        }
    }

    /// Module instances from outermost to innermost.
    pub fn modules(&self) -> &[ModuleId] {
        &self.0
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, module) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{module}")?;
        }
        Ok(())
    }
}

/// Globally unique path of a node: module qualifiers plus component ID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePath {
    modules: ModulePath,
    id: ComponentId,
}

impl NodePath {
    /// Module qualifiers of the node.
    pub fn modules(&self) -> &ModulePath {
        &self.modules
    }

    /// Controller-local ID of the node.
    pub fn id(&self) -> &ComponentId {
        &self.id
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.modules.is_root() {
            write!(f, "{}/", self.modules)?;
        }
        write!(f, "{}", self.id)
    }
}

impl serde::Serialize for NodePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_task_id_roundtrip() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("task_"));
        assert!(id.timestamp_ms() > 0);
    }

    #[rstest]
    #[case("task_01HV4Z2WQXKJNM8GPQY6VBKC3D")]
    #[case("rld01HV4Z2WQXKJNM8GPQY6VBKC3D")]
    #[case("rld_not-a-ulid")]
    #[case("")]
    fn test_reload_id_rejects_malformed(#[case] raw: &str) {
        let result: Result<ReloadId, _> = raw.parse();
        assert!(
            matches!(result, Err(IdError::Malformed { prefix: "rld", .. })),
            "{raw:?}"
        );
    }

    #[test]
    fn test_task_id_json_roundtrip() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[rstest]
    #[case("tick", true)]
    #[case("_private", true)]
    #[case("scrape_2", true)]
    #[case("2fast", false)]
    #[case("with-dash", false)]
    #[case("dotted.name", false)]
    #[case("", false)]
    fn test_validate_identifier(#[case] value: &str, #[case] valid: bool) {
        assert_eq!(validate_identifier(value).is_ok(), valid, "{value:?}");
    }

    #[test]
    fn test_component_id_display() {
        let id = ComponentId::new(&["local", "tick"], Some("a")).unwrap();
        assert_eq!(id.to_string(), "local.tick.a");
        assert_eq!(id.kind(), "local.tick");
        assert_eq!(id.label(), Some("a"));
        assert_eq!(id.len(), 3);

        let unlabeled = ComponentId::new(&["logging"], None).unwrap();
        assert_eq!(unlabeled.to_string(), "logging");
    }

    #[test]
    fn test_component_id_rejects_empty_name() {
        let name: [&str; 0] = [];
        assert_eq!(ComponentId::new(&name, None), Err(IdError::MissingName));
    }

    #[test]
    fn test_component_id_prefix_match() {
        let id = ComponentId::new(&["local", "tick"], Some("a")).unwrap();
        assert!(id.is_prefix_of(&["local", "tick", "a", "count"]));
        assert!(id.is_prefix_of(&["local", "tick", "a"]));
        assert!(!id.is_prefix_of(&["local", "tick"]));
        assert!(!id.is_prefix_of(&["local", "tick", "b", "count"]));
    }

    #[test]
    fn test_node_path_display() {
        let id = ComponentId::new(&["testing", "sum"], Some("total")).unwrap();
        assert_eq!(ModulePath::root().node(id.clone()).to_string(), "testing.sum.total");

        let path = ModulePath::root()
            .child(ModuleId::new("math", "a").unwrap())
            .child(ModuleId::new("inner", "x").unwrap());
        assert_eq!(path.node(id).to_string(), "math.a/inner.x/testing.sum.total");
    }

    proptest! {
        #[test]
        fn prop_valid_segments_roundtrip_through_display(
            name in proptest::collection::vec("[a-z_][a-z0-9_]{0,8}", 1..4),
            label in proptest::option::of("[a-z_][a-z0-9_]{0,8}"),
        ) {
            let id = ComponentId::new(&name, label.as_deref()).unwrap();
            let rendered = id.to_string();
            let split: Vec<&str> = rendered.split('.').collect();
            prop_assert_eq!(split.len(), id.len());
            prop_assert!(id.is_prefix_of(&split));
        }
    }
}
