//! Typed tool parameters
//!
//! A [`ToolSchema`] lists the parameters a tool accepts. Raw JSON arguments
//! coming from the model are checked against it (required fields, types,
//! allowed values, defaults) and handed to the handler as [`ToolArgs`], so
//! handlers never poke at untyped maps.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }

    /// Check `value` against this type. Integers written as whole floats
    /// (`5.0`) are normalised to integers.
    fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (ParamType::String, v @ Value::String(_)) => Some(v),
            (ParamType::Boolean, v @ Value::Bool(_)) => Some(v),
            (ParamType::Object, v @ Value::Object(_)) => Some(v),
            (ParamType::Array, v @ Value::Array(_)) => Some(v),
            (ParamType::Number, v @ Value::Number(_)) => Some(v),
            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Some(Value::Number(n))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| json!(f as i64))
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
            default: None,
            allowed: Vec::new(),
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = values.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// JSON Schema object describing the parameters.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.params {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(spec.kind.as_str()));
            prop.insert("description".into(), json!(spec.description));
            if let Some(default) = &spec.default {
                prop.insert("default".into(), default.clone());
            }
            if !spec.allowed.is_empty() {
                prop.insert("enum".into(), json!(spec.allowed));
            }
            properties.insert(spec.name.clone(), Value::Object(prop));
            if spec.required {
                required.push(spec.name.clone());
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Parse a raw JSON argument string and validate it.
    pub fn parse_arguments(&self, raw: &str) -> EngineResult<ToolArgs> {
        let value = if raw.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| EngineError::InvalidArguments(e.to_string()))?
        };
        self.validate(value)
    }

    pub fn validate(&self, args: Value) -> EngineResult<ToolArgs> {
        let mut map = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EngineError::InvalidArguments(format!(
                    "expected a JSON object, got {}",
                    other
                )))
            }
        };

        for spec in &self.params {
            match map.remove(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let value = spec.kind.coerce(value).ok_or_else(|| {
                        EngineError::InvalidArguments(format!(
                            "parameter '{}' must be of type {}",
                            spec.name,
                            spec.kind.as_str()
                        ))
                    })?;
                    if !spec.allowed.is_empty() {
                        let ok = value
                            .as_str()
                            .map(|s| spec.allowed.iter().any(|a| a == s))
                            .unwrap_or(false);
                        if !ok {
                            return Err(EngineError::InvalidArguments(format!(
                                "parameter '{}' must be one of: {}",
                                spec.name,
                                spec.allowed.join(", ")
                            )));
                        }
                    }
                    map.insert(spec.name.clone(), value);
                }
                None => {
                    if let Some(default) = &spec.default {
                        map.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        return Err(EngineError::InvalidArguments(format!(
                            "missing required parameter '{}'",
                            spec.name
                        )));
                    }
                }
            }
        }
        Ok(ToolArgs(map))
    }
}

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> EngineResult<&str> {
        self.opt_str(name).ok_or_else(|| missing(name))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> EngineResult<i64> {
        self.opt_i64(name).ok_or_else(|| missing(name))
    }

    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> EngineResult<f64> {
        self.0.get(name).and_then(Value::as_f64).ok_or_else(|| missing(name))
    }

    pub fn bool(&self, name: &str) -> EngineResult<bool> {
        self.0.get(name).and_then(Value::as_bool).ok_or_else(|| missing(name))
    }

    /// Deserialize into a tool's own input struct.
    pub fn parse<T: DeserializeOwned>(&self) -> EngineResult<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| EngineError::InvalidArguments(e.to_string()))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn missing(name: &str) -> EngineError {
    EngineError::InvalidArguments(format!("missing parameter '{}'", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_schema() -> ToolSchema {
        ToolSchema::new()
            .param(ParamSpec::required("query", ParamType::String, "Search text"))
            .param(ParamSpec::optional("top_k", ParamType::Integer, "Result count").with_default(json!(5)))
            .param(
                ParamSpec::optional("method", ParamType::String, "HTTP method")
                    .with_allowed(["GET", "POST"]),
            )
    }

    #[test]
    fn test_defaults_and_coercion() {
        let args = search_schema()
            .parse_arguments(r#"{"query": "sky"}"#)
            .unwrap();
        assert_eq!(args.str("query").unwrap(), "sky");
        assert_eq!(args.i64("top_k").unwrap(), 5);
        assert!(args.opt_str("method").is_none());

        let args = search_schema().validate(json!({"query": "sky", "top_k": 3.0})).unwrap();
        assert_eq!(args.i64("top_k").unwrap(), 3);
    }

    #[test]
    fn test_rejections() {
        let schema = search_schema();
        let err = schema.validate(json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Invalid arguments: missing required parameter 'query'");

        let err = schema.validate(json!({"query": 1})).unwrap_err();
        assert!(err.to_string().contains("must be of type string"));

        let err = schema.validate(json!({"query": "x", "top_k": 2.5})).unwrap_err();
        assert!(err.to_string().contains("integer"));

        let err = schema.validate(json!({"query": "x", "method": "PUT"})).unwrap_err();
        assert!(err.to_string().contains("one of: GET, POST"));

        assert!(schema.parse_arguments("{not json").is_err());
        assert!(schema.validate(json!([1, 2])).is_err());
    }

    #[test]
    fn test_json_schema_shape() {
        let schema = search_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["properties"]["top_k"]["default"], 5);
        assert_eq!(schema["properties"]["method"]["enum"], json!(["GET", "POST"]));
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn test_parse_into_struct() {
        #[derive(Deserialize)]
        struct Input {
            query: String,
            top_k: usize,
        }
        let args = search_schema().validate(json!({"query": "q"})).unwrap();
        let input: Input = args.parse().unwrap();
        assert_eq!(input.query, "q");
        assert_eq!(input.top_k, 5);
    }
}
