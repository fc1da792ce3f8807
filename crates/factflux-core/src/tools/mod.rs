//! Callable tools an agent may offer to its model.

mod deep_research;

pub use deep_research::{DEEP_RESEARCH_TOOL, DeepResearchArgs, DeepResearchTool};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::events::EventCollector;
use crate::llm::ToolSpec;

/// Result of a tool invocation. `payload` is always returned to the model;
/// `failure` marks invocations that did not produce usable data.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub payload: Value,
    pub failure: Option<String>,
}

impl ToolOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            failure: None,
        }
    }

    pub fn failed(payload: Value, reason: impl Into<String>) -> Self {
        Self {
            payload,
            failure: Some(reason.into()),
        }
    }

    /// Generic error payload for invocations that never reached the tool.
    pub fn rejected(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::failed(json!({ "success": false, "error": reason }), reason)
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Execute with decoded JSON arguments. Tools report failures through
    /// [`ToolOutput`] rather than erroring.
    async fn invoke(&self, arguments: Value, progress: &EventCollector) -> ToolOutput;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tools bound to one agent, keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}
