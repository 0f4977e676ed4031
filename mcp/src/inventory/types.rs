//! Core types for the tool index.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::transport::RemoteTool;

/// Unique tool identifier: `server/tool`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolKey {
    pub server: String,
    pub tool: String,
}

impl ToolKey {
    pub fn new(server: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            tool: tool.into(),
        }
    }

    /// Parse from "server/tool" format.
    pub fn parse(s: &str) -> Option<Self> {
        let (server, tool) = s.split_once('/')?;
        if server.is_empty() || tool.is_empty() {
            return None;
        }
        Some(Self::new(server, tool))
    }
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.tool)
    }
}

/// Indexed metadata for one tool. Replaced wholesale on rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRecord {
    pub server: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    pub built_at: DateTime<Utc>,
}

fn empty_object_schema() -> Value {
    Value::Object(Map::new())
}

impl ToolRecord {
    pub fn from_remote(server: &str, tool: &RemoteTool, built_at: DateTime<Utc>) -> Self {
        Self {
            server: server.to_string(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
            built_at,
        }
    }

    pub fn key(&self) -> ToolKey {
        ToolKey::new(&self.server, &self.name)
    }

    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.input_schema.get("properties").and_then(Value::as_object)
    }

    /// Parameter names in schema order.
    pub fn param_names(&self) -> Vec<&str> {
        self.properties()
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Names listed in the schema's `required` array.
    pub fn required_params(&self) -> Vec<String> {
        required_fields(&self.input_schema)
    }

    /// One-line parameter overview, e.g. `Required: owner, repo; Optional: body`.
    pub fn params_summary(&self) -> String {
        let required = self.required_params();
        let optional: Vec<&str> = self
            .param_names()
            .into_iter()
            .filter(|p| !required.iter().any(|r| r == p))
            .collect();

        match (required.is_empty(), optional.is_empty()) {
            (true, true) => "No parameters".to_string(),
            (false, true) => format!("Required: {}", required.join(", ")),
            (true, false) => format!("Optional: {}", optional.join(", ")),
            (false, false) => format!(
                "Required: {}; Optional: {}",
                required.join(", "),
                optional.join(", ")
            ),
        }
    }

    /// Placeholder arguments covering every required parameter.
    pub fn example_arguments(&self) -> Map<String, Value> {
        let props = self.properties();
        self.required_params()
            .into_iter()
            .map(|name| {
                let placeholder = props
                    .and_then(|p| p.get(&name))
                    .map(|schema| placeholder_for(&name, schema))
                    .unwrap_or_else(|| Value::String(format!("<{}>", name)));
                (name, placeholder)
            })
            .collect()
    }

    /// Ready-to-edit command line invoking this tool.
    pub fn example_call(&self) -> String {
        let args = Value::Object(self.example_arguments()).to_string();
        format!(
            "mcpl call {} {} '{}'",
            self.server,
            self.name,
            args.replace('\'', "'\\''")
        )
    }
}

pub(crate) fn required_fields(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn placeholder_for(name: &str, schema: &Value) -> Value {
    if let Some(default) = schema.get("default") {
        return default.clone();
    }
    if let Some(first) = schema
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|e| e.first())
    {
        return first.clone();
    }

    let declared = match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    };
    match declared {
        Some("integer") | Some("number") => Value::from(0),
        Some("boolean") => Value::Bool(true),
        Some("array") => Value::Array(Vec::new()),
        Some("object") => Value::Object(Map::new()),
        _ => Value::String(format!("<{}>", name)),
    }
}
