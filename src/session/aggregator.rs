//! Context aggregator — folds successful tool results into the system
//! context handed to the reasoning backend.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::mcp_client::InvocationOutcome;

/// Prompt text placed before the rendered evidence.
const PREAMBLE: &str = "You are an AI assistant with access to various tools through the Model Context Protocol (MCP).";

/// Prompt text placed after the rendered evidence.
const CLOSING: &str = "Use this information to provide helpful and accurate responses to the user's questions.";

/// One successful tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceEntry {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub rendered_result: String,
    pub completed_at: DateTime<Utc>,
}

impl EvidenceEntry {
    fn render(&self) -> String {
        // serde_json's Map keeps keys sorted, so this is canonical.
        let params = serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".to_string());
        format!(
            "Tool: {}\nParameters: {}\nResult: {}",
            self.tool_name, params, self.rendered_result
        )
    }
}

/// Append-only evidence list for one session.
#[derive(Debug, Default)]
pub struct ContextAggregator {
    evidence: Vec<EvidenceEntry>,
    failures: Vec<(String, String)>,
}

impl ContextAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome. Only successes become evidence; failures are
    /// logged and kept for the session report.
    pub fn record(&mut self, outcome: &InvocationOutcome, tool_name: &str, arguments: &Map<String, Value>) {
        match outcome {
            InvocationOutcome::Success { .. } => {
                self.evidence.push(EvidenceEntry {
                    tool_name: tool_name.to_string(),
                    arguments: arguments.clone(),
                    rendered_result: outcome.rendered_text(),
                    completed_at: Utc::now(),
                });
            }
            InvocationOutcome::Failure { message } => {
                tracing::warn!(tool = tool_name, message = %message, "tool failure excluded from context");
                self.failures.push((tool_name.to_string(), message.clone()));
            }
        }
    }

    pub fn evidence(&self) -> &[EvidenceEntry] {
        &self.evidence
    }

    /// `(tool, message)` for every failed call, in record order.
    pub fn failures(&self) -> &[(String, String)] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.evidence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evidence.is_empty()
    }

    /// Evidence in append order, blocks separated by a blank line.
    pub fn render(&self) -> String {
        self.evidence
            .iter()
            .map(EvidenceEntry::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Full system prompt for the backend.
    pub fn system_prompt(&self) -> String {
        if self.evidence.is_empty() {
            return format!(
                "{PREAMBLE}\nNo tool results are available for this request.\n\n{CLOSING}"
            );
        }
        format!(
            "{PREAMBLE}\nYou have executed the following tools and received these results:\n\n{}\n\n{CLOSING}",
            self.render()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::ContentBlock;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn success(text: &str) -> InvocationOutcome {
        InvocationOutcome::Success {
            content: vec![ContentBlock::text(text)],
        }
    }

    #[test]
    fn test_render_template() {
        let mut agg = ContextAggregator::new();
        agg.record(
            &success("The result of 15 + 25 is 40"),
            "calculate",
            &args(serde_json::json!({"expression": "15 + 25"})),
        );
        assert_eq!(
            agg.render(),
            "Tool: calculate\nParameters: {\"expression\":\"15 + 25\"}\nResult: The result of 15 + 25 is 40"
        );
    }

    #[test]
    fn test_failures_are_not_evidence() {
        let mut agg = ContextAggregator::new();
        agg.record(&InvocationOutcome::failure("timeout"), "get-weather", &Map::new());
        agg.record(&success("ok"), "calculate", &Map::new());

        assert_eq!(agg.len(), 1);
        assert!(!agg.render().contains("timeout"));
        assert_eq!(agg.failures(), &[("get-weather".to_string(), "timeout".to_string())]);
    }

    #[test]
    fn test_render_keeps_append_order_and_is_idempotent() {
        let mut agg = ContextAggregator::new();
        agg.record(&success("second finished first"), "b", &Map::new());
        agg.record(&success("then this"), "a", &Map::new());

        let first = agg.render();
        assert_eq!(first, agg.render());
        let b = first.find("Tool: b").unwrap();
        let a = first.find("Tool: a").unwrap();
        assert!(b < a);
        assert!(first.contains("\n\nTool: a"));
    }

    #[test]
    fn test_arguments_serialized_with_sorted_keys() {
        let mut agg = ContextAggregator::new();
        agg.record(&success("x"), "t", &args(serde_json::json!({"z": 1, "a": [true, null]})));
        assert!(agg.render().contains("Parameters: {\"a\":[true,null],\"z\":1}"));
    }

    #[test]
    fn test_empty_evidence() {
        let agg = ContextAggregator::new();
        assert_eq!(agg.render(), "");
        let prompt = agg.system_prompt();
        assert!(prompt.starts_with(PREAMBLE));
        assert!(prompt.contains("No tool results are available"));
    }

    #[test]
    fn test_system_prompt_wraps_evidence() {
        let mut agg = ContextAggregator::new();
        agg.record(&success("It's currently sunny and 72°F in New York"), "get-weather", &Map::new());
        let prompt = agg.system_prompt();
        assert!(prompt.contains("received these results:\n\nTool: get-weather"));
        assert!(prompt.ends_with(CLOSING));
    }
}
