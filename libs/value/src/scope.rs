//! Identifier scope used to evaluate expressions.

use std::collections::BTreeMap;

use crate::{stdlib, Traversal, Value, ValueError};

/// The identifiers visible to an expression.
///
/// A scope is a tree of objects: inserting `["local", "tick", "a"]` makes the
/// value reachable as `local.tick.a`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    root: BTreeMap<String, Value>,
}

impl Scope {
    /// An empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope holding only the standard library functions.
    pub fn with_stdlib() -> Self {
        let mut scope = Self::new();
        for func in stdlib::functions() {
            scope
                .root
                .insert(func.name().to_string(), Value::Function(func));
        }
        scope
    }

    /// Makes `value` visible at `path`, creating intermediate objects.
    ///
    /// A non-object value found along the path is replaced by an object.
    pub fn insert<S: AsRef<str>>(&mut self, path: &[S], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        let mut current = &mut self.root;
        for segment in parents {
            let entry = current
                .entry(segment.as_ref().to_string())
                .or_insert_with(Value::object);
            if !matches!(entry, Value::Object(_)) {
                *entry = Value::object();
            }
            current = match entry {
                Value::Object(next) => next,
                _ => return,
            };
        }
        current.insert(last.as_ref().to_string(), value);
    }

    /// Returns true if `name` is a top-level identifier in this scope.
    pub fn contains(&self, name: &str) -> bool {
        self.root.contains_key(name)
    }

    /// Resolves a traversal to a value.
    pub fn lookup(&self, traversal: &Traversal) -> Result<Value, ValueError> {
        let mut segments = traversal.segments().iter();
        let Some(first) = segments.next() else {
            return Err(ValueError::UnknownIdentifier(String::new()));
        };

        let mut current = self
            .root
            .get(first)
            .ok_or_else(|| ValueError::UnknownIdentifier(first.clone()))?;
        let mut path = first.clone();

        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment).ok_or_else(|| ValueError::MissingKey {
                    path: path.clone(),
                    key: segment.clone(),
                })?,
                other => {
                    return Err(ValueError::type_mismatch(
                        path,
                        "object",
                        other.type_name(),
                    ))
                }
            };
            path.push('.');
            path.push_str(segment);
        }

        Ok(current.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup_nested() {
        let mut scope = Scope::new();
        scope.insert(&["local", "tick", "a"], Value::from_pairs([("count", Value::from(1))]));
        scope.insert(&["local", "tick", "b"], Value::from_pairs([("count", Value::from(2))]));

        let a = scope.lookup(&Traversal::parse("local.tick.a.count").unwrap());
        let b = scope.lookup(&Traversal::parse("local.tick.b.count").unwrap());
        assert_eq!(a, Ok(Value::from(1)));
        assert_eq!(b, Ok(Value::from(2)));
        assert!(scope.contains("local"));
    }

    #[test]
    fn test_lookup_errors() {
        let mut scope = Scope::new();
        scope.insert(&["a"], Value::from_pairs([("n", Value::from(1))]));

        assert_eq!(
            scope.lookup(&Traversal::parse("missing").unwrap()),
            Err(ValueError::UnknownIdentifier("missing".to_string()))
        );
        assert_eq!(
            scope.lookup(&Traversal::parse("a.m").unwrap()),
            Err(ValueError::MissingKey {
                path: "a".to_string(),
                key: "m".to_string()
            })
        );
        assert!(matches!(
            scope.lookup(&Traversal::parse("a.n.deeper").unwrap()),
            Err(ValueError::TypeMismatch { expected: "object", actual: "number", .. })
        ));
    }

    #[test]
    fn test_stdlib_is_visible() {
        let scope = Scope::with_stdlib();
        for name in stdlib::NAMES {
            assert!(scope.contains(name), "{name}");
        }
    }
}
