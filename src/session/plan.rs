//! Which tools a session calls, and with what arguments.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp_client::{InvocationRequest, ToolRegistry};

/// One planned tool call, as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl PlannedCall {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

/// Calls made when the config does not name any.
pub fn default_plan() -> Vec<PlannedCall> {
    vec![
        PlannedCall::new("calculate", serde_json::json!({ "expression": "15 + 25" })),
        PlannedCall::new("get-weather", serde_json::json!({ "location": "New York" })),
    ]
}

/// Turn the plan into invocation requests, skipping tools the provider
/// does not advertise. Argument checks are left to the correlator.
pub fn select_invocations(plan: &[PlannedCall], registry: &ToolRegistry) -> Vec<InvocationRequest> {
    plan.iter()
        .filter(|call| {
            let advertised = registry.lookup(&call.tool).is_some();
            if !advertised {
                tracing::info!(tool = %call.tool, "skipping planned call: tool not advertised");
            }
            advertised
        })
        .map(|call| InvocationRequest::new(call.tool.clone(), call.arguments.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::ToolDescriptor;

    fn registry_with(names: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .replace_catalog(
                names
                    .iter()
                    .map(|n| ToolDescriptor {
                        name: n.to_string(),
                        description: String::new(),
                        input_schema: serde_json::json!({"type": "object"}),
                    })
                    .collect(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_default_plan() {
        let plan = default_plan();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].tool, "calculate");
        assert_eq!(plan[0].arguments["expression"], "15 + 25");
        assert_eq!(plan[1].arguments["location"], "New York");
    }

    #[test]
    fn test_unadvertised_tools_are_skipped() {
        let registry = registry_with(&["calculate"]);
        let requests = select_invocations(&default_plan(), &registry);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tool_name, "calculate");
    }

    #[test]
    fn test_each_request_gets_a_distinct_id() {
        let registry = registry_with(&["calculate", "get-weather"]);
        let requests = select_invocations(&default_plan(), &registry);
        assert_eq!(requests.len(), 2);
        assert_ne!(requests[0].invocation_id, requests[1].invocation_id);
    }

    #[test]
    fn test_empty_catalog_selects_nothing() {
        let requests = select_invocations(&default_plan(), &ToolRegistry::new());
        assert!(requests.is_empty());
    }
}
