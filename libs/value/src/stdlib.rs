//! Functions available to every expression.

use crate::{Function, Value, ValueError};

/// Names of the standard library functions.
pub const NAMES: [&str; 3] = ["concat", "coalesce", "length"];

/// Returns true if `name` refers to a standard library function.
///
/// References to these names never create graph edges.
pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// All standard library functions.
pub fn functions() -> Vec<Function> {
    vec![
        Function::new("concat", concat),
        Function::new("coalesce", coalesce),
        Function::new("length", length),
    ]
}

/// Concatenates arrays, or strings when every argument is a string.
fn concat(args: &[Value]) -> Result<Value, ValueError> {
    if !args.is_empty() && args.iter().all(|a| matches!(a, Value::String(_))) {
        let joined: String = args.iter().filter_map(Value::as_str).collect();
        return Ok(Value::String(joined));
    }

    let mut out = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        match arg {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => {
                return Err(ValueError::Call {
                    function: "concat".to_string(),
                    message: format!("argument {i} is {}, expected array", other.type_name()),
                })
            }
        }
    }
    Ok(Value::Array(out))
}

/// First argument that is neither null nor empty.
fn coalesce(args: &[Value]) -> Result<Value, ValueError> {
    let found = args.iter().find(|v| match v {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    });
    Ok(found.cloned().unwrap_or(Value::Null))
}

fn length(args: &[Value]) -> Result<Value, ValueError> {
    let [value] = args else {
        return Err(ValueError::Call {
            function: "length".to_string(),
            message: format!("expected 1 argument, got {}", args.len()),
        });
    };

    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        other => {
            return Err(ValueError::Call {
                function: "length".to_string(),
                message: format!("{} has no length", other.type_name()),
            })
        }
    };
    Ok(Value::from(len as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn arr(items: &[i64]) -> Value {
        Value::Array(items.iter().map(|n| Value::from(*n)).collect())
    }

    #[test]
    fn test_concat_arrays_and_strings() {
        assert_eq!(concat(&[arr(&[1]), arr(&[2, 3])]), Ok(arr(&[1, 2, 3])));
        assert_eq!(
            concat(&[Value::from("ab"), Value::from("c")]),
            Ok(Value::from("abc"))
        );
        assert!(concat(&[arr(&[1]), Value::from(2)]).is_err());
    }

    #[rstest]
    #[case(vec![Value::Null, Value::from(""), Value::from("x")], Value::from("x"))]
    #[case(vec![Value::Null, Value::from(0)], Value::from(0))]
    #[case(vec![Value::Null], Value::Null)]
    #[case(vec![], Value::Null)]
    fn test_coalesce(#[case] args: Vec<Value>, #[case] expected: Value) {
        assert_eq!(coalesce(&args), Ok(expected));
    }

    #[rstest]
    #[case(Value::from("héllo"), 5)]
    #[case(arr(&[1, 2]), 2)]
    #[case(Value::Null, 0)]
    fn test_length(#[case] value: Value, #[case] expected: u64) {
        assert_eq!(length(&[value]), Ok(Value::from(expected)));
    }

    #[test]
    fn test_length_arity() {
        assert!(length(&[]).is_err());
        assert!(length(&[Value::from(true)]).is_err());
    }
}
