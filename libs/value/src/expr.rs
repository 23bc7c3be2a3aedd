//! Parsed expressions.

use std::fmt;

use crate::{Scope, Value, ValueError};

/// A dotted chain of identifiers, e.g. `local.tick.a.count`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Traversal(Vec<String>);

impl Traversal {
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parses `a.b.c`.
    pub fn parse(dotted: &str) -> Result<Self, ValueError> {
        if dotted.is_empty() || dotted.split('.').any(str::is_empty) {
            return Err(ValueError::InvalidSyntax(format!(
                "invalid reference {dotted:?}"
            )));
        }
        Ok(Self::new(dotted.split('.')))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The first identifier of the traversal.
    pub fn root(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for Traversal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// An expression as produced by the configuration parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Reference(Traversal),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Call { callee: Box<Expr>, args: Vec<Expr> },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Reference expression from a dotted path, without validation.
    pub fn reference(dotted: &str) -> Self {
        Expr::Reference(Traversal::new(dotted.split('.')))
    }

    pub fn call(function: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(Expr::reference(function)),
            args,
        }
    }

    /// Every traversal the expression reads, in source order.
    pub fn references(&self) -> Vec<&Traversal> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Traversal>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(t) => out.push(t),
            Expr::Array(items) => items.iter().for_each(|e| e.collect_references(out)),
            Expr::Object(fields) => fields.iter().for_each(|(_, e)| e.collect_references(out)),
            Expr::Call { callee, args } => {
                callee.collect_references(out);
                args.iter().for_each(|e| e.collect_references(out));
            }
        }
    }

    /// The expression's value if it can be computed without any scope.
    pub fn as_constant(&self) -> Option<Value> {
        match self {
            Expr::Literal(v) => Some(v.clone()),
            Expr::Reference(_) | Expr::Call { .. } => None,
            Expr::Array(items) => items
                .iter()
                .map(Expr::as_constant)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Expr::Object(fields) => fields
                .iter()
                .map(|(k, e)| e.as_constant().map(|v| (k.clone(), v)))
                .collect::<Option<_>>()
                .map(Value::Object),
        }
    }

    /// Evaluates the expression against `scope`.
    pub fn evaluate(&self, scope: &Scope) -> Result<Value, ValueError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Reference(t) => scope.lookup(t),
            Expr::Array(items) => items
                .iter()
                .map(|e| e.evaluate(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Object(fields) => fields
                .iter()
                .map(|(k, e)| Ok((k.clone(), e.evaluate(scope)?)))
                .collect::<Result<_, ValueError>>()
                .map(Value::Object),
            Expr::Call { callee, args } => {
                let target = callee.evaluate(scope)?;
                let Value::Function(func) = target else {
                    return Err(ValueError::NotCallable(callee.describe()));
                };
                let args = args
                    .iter()
                    .map(|e| e.evaluate(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                func.call(&args)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Expr::Reference(t) => t.to_string(),
            Expr::Literal(v) => v.to_string(),
            _ => "expression".to_string(),
        }
    }

    /// Decodes the JSON encoding of an expression.
    ///
    /// Plain JSON is a literal, `{"$ref": "a.b"}` is a reference, and
    /// `{"$call": "name", "args": [...]}` is a function call. Objects and
    /// arrays that contain references or calls become composite expressions.
    pub fn from_json(json: &serde_json::Value) -> Result<Expr, ValueError> {
        match json {
            serde_json::Value::Object(map) => {
                if let Some(target) = map.get("$ref") {
                    let dotted = target.as_str().ok_or_else(|| {
                        ValueError::InvalidSyntax("$ref must be a string".to_string())
                    })?;
                    if map.len() != 1 {
                        return Err(ValueError::InvalidSyntax(
                            "$ref objects may not carry other keys".to_string(),
                        ));
                    }
                    return Ok(Expr::Reference(Traversal::parse(dotted)?));
                }
                if let Some(name) = map.get("$call") {
                    let name = name.as_str().ok_or_else(|| {
                        ValueError::InvalidSyntax("$call must be a string".to_string())
                    })?;
                    let args = match map.get("args") {
                        None => Vec::new(),
                        Some(serde_json::Value::Array(items)) => items
                            .iter()
                            .map(Expr::from_json)
                            .collect::<Result<Vec<_>, _>>()?,
                        Some(_) => {
                            return Err(ValueError::InvalidSyntax(
                                "$call args must be an array".to_string(),
                            ))
                        }
                    };
                    return Ok(Expr::Call {
                        callee: Box::new(Expr::Reference(Traversal::parse(name)?)),
                        args,
                    });
                }
                let fields = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Expr::from_json(v)?)))
                    .collect::<Result<Vec<_>, ValueError>>()?;
                Ok(fold(Expr::Object(fields)))
            }
            serde_json::Value::Array(items) => {
                let items = items
                    .iter()
                    .map(Expr::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(fold(Expr::Array(items)))
            }
            scalar => Ok(Expr::Literal(Value::from_json(scalar.clone()))),
        }
    }
}

/// Collapses composite expressions without references into literals.
fn fold(expr: Expr) -> Expr {
    match expr.as_constant() {
        Some(value) => Expr::Literal(value),
        None => expr,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_references_in_source_order() {
        let expr = Expr::from_json(&json!({
            "$call": "concat",
            "args": [{"$ref": "a.b"}, [{"$ref": "c.d.e"}]]
        }))
        .unwrap();

        let refs: Vec<String> = expr.references().iter().map(|t| t.to_string()).collect();
        assert_eq!(refs, vec!["concat", "a.b", "c.d.e"]);
    }

    #[test]
    fn test_literal_objects_fold() {
        let expr = Expr::from_json(&json!({"a": [1, 2], "b": "x"})).unwrap();
        assert!(matches!(expr, Expr::Literal(Value::Object(_))));
    }

    #[test]
    fn test_evaluate_reference_and_call() {
        let mut scope = Scope::with_stdlib();
        scope.insert(&["local", "tick", "a"], Value::from_pairs([("count", Value::from(3))]));

        let expr = Expr::from_json(&json!({
            "$call": "length",
            "args": [{"$call": "concat", "args": [[1, 2], [{"$ref": "local.tick.a.count"}]]}]
        }))
        .unwrap();
        assert_eq!(expr.evaluate(&scope), Ok(Value::from(3)));
    }

    #[test]
    fn test_call_on_non_function() {
        let mut scope = Scope::new();
        scope.insert(&["x"], Value::from(1));
        let expr = Expr::call("x", vec![]);
        assert_eq!(
            expr.evaluate(&scope),
            Err(ValueError::NotCallable("x".to_string()))
        );
    }

    #[test]
    fn test_invalid_reference_syntax() {
        assert!(Expr::from_json(&json!({"$ref": "a..b"})).is_err());
        assert!(Expr::from_json(&json!({"$ref": 1})).is_err());
        assert!(Expr::from_json(&json!({"$ref": "a", "extra": 1})).is_err());
    }
}
