//! 能力入参 JSON Schema
//!
//! 由 schemars 从入参类型生成，jsonschema 编译一次后用于校验原始 JSON；
//! 被拒绝的入参永远到不了处理函数。

use std::sync::Arc;

use jsonschema::JSONSchema;
use schemars::{schema_for, JsonSchema};
use serde_json::Value;

#[derive(Clone)]
pub struct InputSchema {
    schema: Value,
    compiled: Result<Arc<JSONSchema>, String>,
}

impl std::fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSchema").field("schema", &self.schema).finish()
    }
}

impl InputSchema {
    pub fn of<T: JsonSchema>() -> Self {
        let schema = serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null);
        Self::from_value(schema)
    }

    pub fn from_value(schema: Value) -> Self {
        let compiled = JSONSchema::compile(&schema)
            .map(Arc::new)
            .map_err(|e| format!("invalid schema: {e}"));
        Self { schema, compiled }
    }

    pub fn as_json(&self) -> &Value {
        &self.schema
    }

    /// 校验入参；失败时列出全部违规项
    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        let compiled = self.compiled.as_ref().map_err(Clone::clone)?;
        if let Err(errors) = compiled.validate(instance) {
            let messages = errors.map(|e| e.to_string()).collect::<Vec<_>>();
            return Err(format!("input does not match schema: {}", messages.join("; ")));
        }
        Ok(())
    }
}

/// 无参能力的入参：只接受 null 或 {}
pub fn check_empty_input(instance: &Value) -> Result<(), String> {
    match instance {
        Value::Null => Ok(()),
        Value::Object(map) if map.is_empty() => Ok(()),
        other => Err(format!("capability takes no input, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase", deny_unknown_fields)]
    struct Sample {
        session_id: String,
        #[schemars(range(min = 0, max = 4))]
        value: f64,
        note: Option<String>,
    }

    #[test]
    fn test_accepts_matching_input() {
        let schema = InputSchema::of::<Sample>();
        assert!(schema.validate(&json!({"sessionId": "s1", "value": 3})).is_ok());
        assert!(schema.validate(&json!({"sessionId": "s1", "value": 3, "note": null})).is_ok());
    }

    #[test]
    fn test_rejects_shape_errors() {
        let schema = InputSchema::of::<Sample>();
        assert!(schema.validate(&json!({"value": 3})).is_err());
        assert!(schema.validate(&json!({"sessionId": 1, "value": 3})).is_err());
        assert!(schema.validate(&json!({"sessionId": "s1", "value": 9})).is_err());
        assert!(schema.validate(&json!({"sessionId": "s1", "value": 1, "extra": true})).is_err());
        assert!(schema.validate(&json!("s1")).is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(check_empty_input(&Value::Null).is_ok());
        assert!(check_empty_input(&json!({})).is_ok());
        assert!(check_empty_input(&json!({"a": 1})).is_err());
        assert!(check_empty_input(&json!([])).is_err());
    }
}
