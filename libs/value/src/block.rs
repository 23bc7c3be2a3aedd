//! The parsed configuration block tree.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{Expr, Scope, Traversal, Value, ValueError};

/// A single `name = expr` assignment inside a block body.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Expr,
}

/// One block of the configuration tree, e.g. `local.tick "a" { ... }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: Vec<String>,
    pub label: Option<String>,
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

impl Block {
    /// Creates an empty block from a dotted name.
    pub fn new(name: &str, label: Option<&str>) -> Self {
        Self {
            name: name.split('.').map(str::to_string).collect(),
            label: label.map(str::to_string),
            attributes: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attr(mut self, name: &str, value: Expr) -> Self {
        self.attributes.push(Attribute {
            name: name.to_string(),
            value,
        });
        self
    }

    /// Adds a nested block.
    #[must_use]
    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    /// The dotted block name without its label.
    pub fn kind(&self) -> String {
        self.name.join(".")
    }

    pub fn attribute(&self, name: &str) -> Option<&Expr> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    /// Every traversal read by the body, including nested blocks.
    pub fn references(&self) -> Vec<&Traversal> {
        let mut out: Vec<&Traversal> = self
            .attributes
            .iter()
            .flat_map(|a| a.value.references())
            .collect();
        for nested in &self.blocks {
            out.extend(nested.references());
        }
        out
    }

    /// Evaluates the body into an object.
    ///
    /// Attributes become keys. Nested blocks are grouped by name into arrays
    /// of their own evaluated bodies.
    pub fn evaluate_body(&self, scope: &Scope) -> Result<Value, ValueError> {
        let mut out = BTreeMap::new();
        for attr in &self.attributes {
            let value = attr
                .value
                .evaluate(scope)
                .map_err(|e| annotate(&attr.name, e))?;
            out.insert(attr.name.clone(), value);
        }

        for nested in &self.blocks {
            let body = nested.evaluate_body(scope)?;
            let entry = out
                .entry(nested.kind())
                .or_insert_with(|| Value::Array(Vec::new()));
            match entry {
                Value::Array(items) => items.push(body),
                other => *other = Value::Array(vec![body]),
            }
        }

        Ok(Value::Object(out))
    }

    /// Decodes one block from its JSON encoding.
    pub fn from_json(json: &serde_json::Value) -> Result<Block, ValueError> {
        let raw = RawBlock::deserialize(json)?;
        raw.try_into()
    }
}

fn annotate(attribute: &str, err: ValueError) -> ValueError {
    match err {
        ValueError::TypeMismatch {
            path,
            expected,
            actual,
        } => ValueError::TypeMismatch {
            path: format!("{attribute}: {path}"),
            expected,
            actual,
        },
        other => other,
    }
}

/// Decodes a configuration file holding the JSON block-tree encoding.
///
/// The document is either an array of blocks or an object with a `blocks`
/// array.
pub fn parse_config(source: &str) -> Result<Vec<Block>, ValueError> {
    let doc: serde_json::Value = serde_json::from_str(source)?;
    let blocks = match &doc {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => match map.get("blocks") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(ValueError::InvalidSyntax(
                    "expected a top-level \"blocks\" array".to_string(),
                ))
            }
        },
        _ => {
            return Err(ValueError::InvalidSyntax(
                "expected an array of blocks".to_string(),
            ))
        }
    };
    blocks.iter().map(Block::from_json).collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBlock {
    name: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

impl TryFrom<RawBlock> for Block {
    type Error = ValueError;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        if raw.name.is_empty() || raw.name.split('.').any(str::is_empty) {
            return Err(ValueError::InvalidSyntax(format!(
                "invalid block name {:?}",
                raw.name
            )));
        }

        let attributes = raw
            .attributes
            .iter()
            .map(|(name, value)| {
                Ok(Attribute {
                    name: name.clone(),
                    value: Expr::from_json(value)?,
                })
            })
            .collect::<Result<Vec<_>, ValueError>>()?;

        let blocks = raw
            .blocks
            .into_iter()
            .map(Block::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Block {
            name: raw.name.split('.').map(str::to_string).collect(),
            label: raw.label,
            attributes,
            blocks,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
