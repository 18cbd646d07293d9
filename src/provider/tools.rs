//! Tools served by the example provider.

use serde_json::{json, Map, Value};

use super::expr::{evaluate, format_number};
use crate::mcp_client::{ContentBlock, ToolDescriptor};

pub const WEATHER_TOOL: &str = "get-weather";
pub const CALCULATE_TOOL: &str = "calculate";

/// Result of running one tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: String) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    fn error(text: String) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            is_error: true,
        }
    }
}

/// Why a call could not be run at all. Maps to a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq)]
pub enum CallRejection {
    UnknownTool(String),
    InvalidParams(String),
}

/// The catalog advertised in `tools/list`.
pub fn catalog() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: WEATHER_TOOL.to_string(),
            description: "Get the current weather for a location".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The location to get weather for"
                    }
                },
                "required": ["location"]
            }),
        },
        ToolDescriptor {
            name: CALCULATE_TOOL.to_string(),
            description: "Perform a simple calculation".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The mathematical expression to evaluate"
                    }
                },
                "required": ["expression"]
            }),
        },
    ]
}

/// Run a tool by name.
pub fn call(name: &str, arguments: &Map<String, Value>) -> Result<ToolOutput, CallRejection> {
    match name {
        WEATHER_TOOL => {
            let location = string_arg(arguments, "location")?;
            // Canned report; no weather service behind it.
            Ok(ToolOutput::ok(format!(
                "It's currently sunny and 72°F in {location}"
            )))
        }
        CALCULATE_TOOL => {
            let expression = string_arg(arguments, "expression")?;
            Ok(match evaluate(expression) {
                Ok(value) => ToolOutput::ok(format!(
                    "The result of {expression} is {}",
                    format_number(value)
                )),
                Err(e) => ToolOutput::error(format!("Error evaluating expression: {e}")),
            })
        }
        other => Err(CallRejection::UnknownTool(other.to_string())),
    }
}

fn string_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, CallRejection> {
    match arguments.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(CallRejection::InvalidParams(format!("'{key}' must be a string"))),
        None => Err(CallRejection::InvalidParams(format!("missing required argument '{key}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_catalog_is_valid_for_registry() {
        let mut registry = crate::mcp_client::ToolRegistry::new();
        registry.replace_catalog(catalog()).unwrap();
        assert_eq!(registry.tool_names(), vec![CALCULATE_TOOL, WEATHER_TOOL]);
    }

    #[test]
    fn test_weather() {
        let out = call(WEATHER_TOOL, &args(json!({"location": "New York"}))).unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content, vec![ContentBlock::text("It's currently sunny and 72°F in New York")]);
    }

    #[test]
    fn test_calculate() {
        let out = call(CALCULATE_TOOL, &args(json!({"expression": "15 + 25"}))).unwrap();
        assert_eq!(out.content, vec![ContentBlock::text("The result of 15 + 25 is 40")]);
    }

    #[test]
    fn test_calculate_error_is_tool_error() {
        let out = call(CALCULATE_TOOL, &args(json!({"expression": "1 / 0"}))).unwrap();
        assert!(out.is_error);
        assert_eq!(out.content, vec![ContentBlock::text("Error evaluating expression: division by zero")]);
    }

    #[test]
    fn test_rejections() {
        assert_eq!(
            call("notes", &Map::new()).unwrap_err(),
            CallRejection::UnknownTool("notes".into())
        );
        assert!(matches!(
            call(WEATHER_TOOL, &Map::new()).unwrap_err(),
            CallRejection::InvalidParams(_)
        ));
        assert!(matches!(
            call(CALCULATE_TOOL, &args(json!({"expression": 42}))).unwrap_err(),
            CallRejection::InvalidParams(_)
        ));
    }
}
