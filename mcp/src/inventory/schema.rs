//! Structural argument checks against a tool's input schema.
//!
//! Only required fields and top-level primitive types are checked. Anything
//! deeper (formats, nested objects, `oneOf`) is left to the server.

use serde_json::{Map, Value};

use super::types::required_fields;

/// Every violation of `schema` by `arguments`; empty when the call may proceed.
pub fn validate_arguments(schema: &Value, arguments: &Map<String, Value>) -> Vec<String> {
    let mut violations: Vec<String> = required_fields(schema)
        .into_iter()
        .filter(|field| !arguments.contains_key(field))
        .map(|field| format!("missing required field '{}'", field))
        .collect();

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return violations;
    };

    for (name, value) in arguments {
        let Some(declared) = properties.get(name).and_then(|p| p.get("type")) else {
            continue;
        };
        let allowed: Vec<&str> = match declared {
            Value::String(t) => vec![t.as_str()],
            Value::Array(types) => types.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        if allowed.is_empty() || allowed.iter().any(|t| matches_type(t, value)) {
            continue;
        }
        violations.push(format!(
            "field '{}' must be of type {}, got {}",
            name,
            allowed.join(" or "),
            type_name(value)
        ));
    }

    violations
}

fn matches_type(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keywords are the server's business.
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pull_request_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "title": {"type": "string"},
                "head": {"type": "string"},
                "base": {"type": "string"},
                "draft": {"type": "boolean"},
                "reviewers": {"type": ["array", "null"]},
                "priority": {"type": "integer"}
            },
            "required": ["owner", "repo", "title", "head", "base"]
        })
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_arguments() {
        let violations = validate_arguments(
            &pull_request_schema(),
            &args(json!({
                "owner": "acme", "repo": "api", "title": "Fix bug",
                "head": "fix-123", "base": "main", "draft": false
            })),
        );
        assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn test_missing_required_field() {
        let violations = validate_arguments(
            &pull_request_schema(),
            &args(json!({"owner": "acme", "repo": "api", "title": "Fix bug", "head": "fix-123"})),
        );
        assert_eq!(violations, vec!["missing required field 'base'"]);
    }

    #[test]
    fn test_wrong_primitive_type() {
        let violations = validate_arguments(
            &pull_request_schema(),
            &args(json!({
                "owner": "acme", "repo": "api", "title": "Fix", "head": "h", "base": "b",
                "draft": "yes"
            })),
        );
        assert_eq!(
            violations,
            vec!["field 'draft' must be of type boolean, got string"]
        );
    }

    #[test]
    fn test_type_union_and_integral_floats() {
        let schema = pull_request_schema();
        let base = json!({"owner": "a", "repo": "r", "title": "t", "head": "h", "base": "b"});

        let mut with_null = args(base.clone());
        with_null.insert("reviewers".into(), Value::Null);
        with_null.insert("priority".into(), json!(2.0));
        assert!(validate_arguments(&schema, &with_null).is_empty());

        let mut fractional = args(base);
        fractional.insert("priority".into(), json!(2.5));
        assert_eq!(
            validate_arguments(&schema, &fractional),
            vec!["field 'priority' must be of type integer, got number"]
        );
    }

    #[test]
    fn test_unknown_fields_and_schemaless_tools_pass() {
        assert!(validate_arguments(&json!({}), &args(json!({"anything": 1}))).is_empty());
        assert!(validate_arguments(
            &json!({"properties": {"q": {"type": "custom"}}}),
            &args(json!({"q": 1}))
        )
        .is_empty());
    }
}
