//! Agent runtime: an explicit generate / invoke-tool loop around a [`LanguageModel`].
//!
//! The model decides whether to answer or to call a tool. The loop tolerates the
//! usual ways that decision goes wrong (timeouts, unknown tools, malformed
//! arguments, empty answers) and bounds the number of turns.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::FactFluxError;
use crate::config::AgentSettings;
use crate::events::EventCollector;
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, ToolCall};
use crate::tools::{ToolOutput, ToolSet};

/// Static definition of an agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: String,
    pub tools: ToolSet,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            tools: ToolSet::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }
}

/// Record of one tool call made during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool: String,
    pub failure: Option<String>,
}

/// Output of a completed agent run.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub output: String,
    pub turns: usize,
    pub tool_invocations: Vec<ToolInvocation>,
}

impl AgentRun {
    /// `Some(last error)` when `tool` was called at least once and never succeeded.
    pub fn tool_never_succeeded(&self, tool: &str) -> Option<String> {
        let mut calls = self
            .tool_invocations
            .iter()
            .filter(|invocation| invocation.tool == tool)
            .peekable();
        calls.peek()?;

        let mut last_error = None;
        for call in calls {
            match &call.failure {
                None => return None,
                Some(error) => last_error = Some(error.clone()),
            }
        }
        last_error
    }
}

pub struct Agent {
    config: AgentConfig,
    model: Arc<dyn LanguageModel>,
    settings: AgentSettings,
}

impl Agent {
    pub fn new(config: AgentConfig, model: Arc<dyn LanguageModel>, settings: AgentSettings) -> Self {
        Self {
            config,
            model,
            settings,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[instrument(name = "agent.run", skip(self, input, progress), fields(agent = %self.config.name))]
    pub async fn run(
        &self,
        input: &str,
        progress: &EventCollector,
    ) -> Result<AgentRun, FactFluxError> {
        let specs = self.config.tools.specs();
        let mut messages = vec![ChatMessage::User(input.to_string())];
        let mut invocations = Vec::new();

        for turn in 1..=self.settings.max_turns {
            let request = CompletionRequest {
                agent: self.config.name.clone(),
                instructions: self.config.instructions.clone(),
                messages: messages.clone(),
                tools: specs.clone(),
            };

            let completion = self.generate(request).await?;
            debug!(
                turn,
                tool_calls = completion.tool_calls.len(),
                "model turn completed"
            );

            if completion.tool_calls.is_empty() {
                let output = completion.final_text().ok_or_else(|| {
                    FactFluxError::malformed(&self.config.name, "model returned an empty answer")
                })?;
                info!(turn, output_chars = output.len(), "agent produced final answer");
                return Ok(AgentRun {
                    output: output.to_string(),
                    turns: turn,
                    tool_invocations: invocations,
                });
            }

            messages.push(ChatMessage::Assistant {
                content: completion.content.clone(),
                tool_calls: completion.tool_calls.clone(),
            });

            for call in &completion.tool_calls {
                let output = self.dispatch(call, progress).await;
                invocations.push(ToolInvocation {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    failure: output.failure.clone(),
                });
                messages.push(ChatMessage::Tool {
                    call_id: call.id.clone(),
                    content: output.payload.to_string(),
                });
            }
        }

        Err(FactFluxError::TurnLimitExceeded {
            agent: self.config.name.clone(),
            max_turns: self.settings.max_turns,
        })
    }

    async fn generate(
        &self,
        request: CompletionRequest,
    ) -> Result<crate::llm::Completion, FactFluxError> {
        if self.settings.turn_timeout_secs == 0 {
            return self.model.complete(request).await;
        }
        match timeout(self.settings.turn_timeout(), self.model.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(FactFluxError::AgentTimeout {
                agent: self.config.name.clone(),
                seconds: self.settings.turn_timeout_secs,
            }),
        }
    }

    async fn dispatch(&self, call: &ToolCall, progress: &EventCollector) -> ToolOutput {
        progress.emit_tool_invoked(&self.config.name, &call.name);

        let output = match self.config.tools.get(&call.name) {
            None => {
                warn!(tool = %call.name, "model requested an unknown tool");
                ToolOutput::rejected(format!(
                    "unknown tool `{}`; available tools: {:?}",
                    call.name,
                    self.config.tools.names()
                ))
            }
            Some(tool) => match parse_arguments(&call.arguments) {
                Ok(arguments) => tool.invoke(arguments, progress).await,
                Err(reason) => {
                    warn!(tool = %call.name, %reason, "model sent malformed tool arguments");
                    ToolOutput::rejected(reason)
                }
            },
        };

        progress.emit_tool_completed(&self.config.name, &call.name, output.failure.clone());
        output
    }
}

fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw).map_err(|err| format!("arguments are not valid JSON: {err}"))
}
