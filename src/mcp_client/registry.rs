//! Capability registry — the provider's tool catalog.
//!
//! Provides:
//! - One-shot discovery via `tools/list`, replacing the catalog wholesale
//! - Lookup by tool name
//! - Pre-dispatch validation of call arguments against the input schema
//! - A printable catalog listing

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use super::errors::McpError;
use super::transport::{extract_result, Connection};
use super::types::{InvocationId, ListToolsResult, ToolDescriptor};

// ─── Argument Validation ─────────────────────────────────────────────────────

/// Result of checking call arguments against a tool's input schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentCheck {
    Valid,
    UnknownTool,
    Invalid { reason: String },
}

impl ArgumentCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, ArgumentCheck::Valid)
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// The discovered tool catalog.
///
/// The catalog sits behind an `Arc` and is swapped in one assignment, so a
/// snapshot taken before re-discovery stays internally consistent.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// `tool_name → definition`, ordered by name for stable listings.
    catalog: Arc<BTreeMap<String, ToolDescriptor>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the full catalog from the provider and replace the cached one.
    ///
    /// An empty catalog is valid. On error the previous catalog is kept.
    /// Every failure, including the provider going away mid-exchange, is
    /// reported as `DiscoveryFailed`.
    pub async fn discover(
        &mut self,
        connection: &Connection,
        timeout: Duration,
    ) -> Result<usize, McpError> {
        let name = connection.server_name().to_string();
        let discovery_failed = |reason: String| McpError::DiscoveryFailed {
            name: name.clone(),
            reason,
        };

        let response = connection
            .request(InvocationId::next(), "tools/list", None, timeout)
            .await
            .map_err(|e| match e {
                McpError::ConnectionLost { reason, .. } => {
                    discovery_failed(format!("provider went away during tools/list: {reason}"))
                }
                other => discovery_failed(other.to_string()),
            })?;

        let result = extract_result(response).map_err(|e| discovery_failed(e.to_string()))?;
        let listed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| discovery_failed(format!("malformed tools/list payload: {e}")))?;

        self.replace_catalog(listed.tools)
            .map_err(discovery_failed)?;

        tracing::info!(server = %name, tools = self.len(), names = ?self.tool_names(), "catalog discovered");
        Ok(self.len())
    }

    /// Replace the catalog with `tools`, or leave it untouched if the new
    /// catalog is malformed.
    pub fn replace_catalog(&mut self, tools: Vec<ToolDescriptor>) -> Result<(), String> {
        let mut next = BTreeMap::new();
        for tool in tools {
            if tool.name.trim().is_empty() {
                return Err("tool with empty name".into());
            }
            if !tool.input_schema.is_object() {
                return Err(format!(
                    "tool '{}' has a non-object inputSchema",
                    tool.name
                ));
            }
            if next.contains_key(&tool.name) {
                return Err(format!("duplicate tool name '{}'", tool.name));
            }
            next.insert(tool.name.clone(), tool);
        }
        self.catalog = Arc::new(next);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Option<&ToolDescriptor> {
        self.catalog.get(name)
    }

    /// Return all tool names, sorted.
    pub fn tool_names(&self) -> Vec<&str> {
        self.catalog.keys().map(|k| k.as_str()).collect()
    }

    /// Return all tool definitions, sorted by name.
    pub fn all_tools(&self) -> Vec<&ToolDescriptor> {
        self.catalog.values().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// One line per tool: name, description, parameter names.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "(provider advertises no tools)".to_string();
        }
        self.catalog
            .values()
            .map(|tool| {
                let params = tool.parameter_names();
                if params.is_empty() {
                    format!("  - {}: {}", tool.name, tool.description)
                } else {
                    format!(
                        "  - {}: {}\n    Parameters: {}",
                        tool.name,
                        tool.description,
                        params.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Check call arguments against the tool's input schema.
    ///
    /// Covers the parts of JSON Schema that tool catalogs actually use at
    /// the top level: `type`, `required`, property `type`s, `enum`, and
    /// `additionalProperties: false`. Nested schemas are left to the provider.
    pub fn validate_arguments(&self, tool_name: &str, arguments: &Map<String, Value>) -> ArgumentCheck {
        let Some(tool) = self.lookup(tool_name) else {
            return ArgumentCheck::UnknownTool;
        };
        match check_object(&tool.input_schema, arguments) {
            Ok(()) => ArgumentCheck::Valid,
            Err(reason) => ArgumentCheck::Invalid { reason },
        }
    }
}

fn check_object(schema: &Value, arguments: &Map<String, Value>) -> Result<(), String> {
    if let Some(root_type) = schema.get("type") {
        if !type_matches(root_type, &Value::Object(Map::new())) {
            return Err(format!("schema root type {root_type} does not accept an object"));
        }
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !arguments.contains_key(field) {
                return Err(format!("missing required field: '{field}'"));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        let declared: HashSet<&str> = properties
            .map(|p| p.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default();
        if let Some(extra) = arguments.keys().find(|k| !declared.contains(k.as_str())) {
            return Err(format!("unexpected field: '{extra}'"));
        }
    }

    let Some(properties) = properties else {
        return Ok(());
    };

    for (field, value) in arguments {
        let Some(prop) = properties.get(field) else {
            continue;
        };
        if let Some(expected) = prop.get("type") {
            if !type_matches(expected, value) {
                return Err(format!(
                    "field '{field}' should be {expected}, got {}",
                    json_type_name(value)
                ));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                return Err(format!("field '{field}' must be one of {}", Value::Array(allowed.clone())));
            }
        }
    }

    Ok(())
}

/// `expected` is a JSON Schema `type`: a string or a list of strings.
fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .any(|n| single_type_matches(n, value)),
        _ => true,
    }
}

fn single_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keywords are not ours to enforce.
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
