//! 工具参数校验：JSON Schema 子集
//!
//! 覆盖 type / required / properties 三项，递归校验嵌套对象；
//! 与 schemars 生成的 schema 兼容（多余的 $schema、title、format 等键被忽略）。

use serde_json::Value;

/// 按 schema 子集校验 value，失败时返回人类可读的错误描述
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(ty) = schema.get("type").and_then(|t| t.as_str()) {
        check_type(ty, value, path)?;
    }

    if value.is_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for name in required.iter().filter_map(|n| n.as_str()) {
                if value.get(name).is_none() {
                    return Err(format!("{}: missing required field '{}'", path, name));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (name, sub_schema) in props {
                if let Some(sub_value) = value.get(name) {
                    validate_at(sub_schema, sub_value, &format!("{}.{}", path, name))?;
                }
            }
        }
    }

    Ok(())
}

fn check_type(expected: &str, value: &Value, path: &str) -> Result<(), String> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        // 未知类型标签不做判定
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "{}: expected {}, got {}",
            path,
            expected,
            type_name(value)
        ))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    #[test]
    fn test_valid_args_pass() {
        let schema = search_schema();
        assert!(validate(&schema, &json!({"query": "rust"})).is_ok());
        assert!(validate(&schema, &json!({"query": "rust", "limit": 5})).is_ok());
    }

    #[test]
    fn test_missing_required_rejected() {
        let schema = search_schema();
        let err = validate(&schema, &json!({"limit": 5})).unwrap_err();
        assert!(err.contains("query"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let schema = search_schema();
        let err = validate(&schema, &json!({"query": 42})).unwrap_err();
        assert!(err.contains("expected string"));
        let err = validate(&schema, &json!({"query": "x", "limit": "many"})).unwrap_err();
        assert!(err.contains("expected integer"));
    }

    #[test]
    fn test_nested_objects_validated() {
        let schema = json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": { "lang": { "type": "string" } },
                    "required": ["lang"]
                }
            },
            "required": ["filter"]
        });
        assert!(validate(&schema, &json!({"filter": {"lang": "en"}})).is_ok());
        assert!(validate(&schema, &json!({"filter": {}})).is_err());
    }

    #[test]
    fn test_schemars_output_accepted() {
        use schemars::{schema_for, JsonSchema};

        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct Args {
            text: String,
        }

        let schema = serde_json::to_value(schema_for!(Args)).expect("schema");
        assert!(validate(&schema, &json!({"text": "hi"})).is_ok());
        assert!(validate(&schema, &json!({})).is_err());
    }
}
