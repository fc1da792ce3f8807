use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};

use super::{ChatMessage, Completion, CompletionRequest, LanguageModel, ToolCall, ToolSpec};
use crate::security::SecretValue;
use crate::FactFluxError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: SecretValue,
    pub model: String,
    pub base_url: Option<String>,
}

impl OpenAiConfig {
    pub fn new(api_key: SecretValue, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    fn endpoint(&self) -> String {
        let base = self
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

/// Chat-completions client with native function calling.
pub struct OpenAiChatModel {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> Result<Self, FactFluxError> {
        let client = Client::builder()
            .user_agent(concat!("factflux/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| FactFluxError::Llm(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

fn to_wire_messages(request: &CompletionRequest) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(WireMessage {
        role: "system",
        content: Some(request.instructions.clone()),
        tool_calls: None,
        tool_call_id: None,
    });

    for message in &request.messages {
        let wire = match message {
            ChatMessage::User(text) => WireMessage {
                role: "user",
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => WireMessage {
                role: "assistant",
                content: content.clone(),
                tool_calls: (!tool_calls.is_empty()).then(|| {
                    tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.clone(),
                            kind: function_kind(),
                            function: WireFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect()
                }),
                tool_call_id: None,
            },
            ChatMessage::Tool { call_id, content } => WireMessage {
                role: "tool",
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            },
        };
        messages.push(wire);
    }
    messages
}

fn to_wire_tools(tools: &[ToolSpec]) -> Vec<WireTool<'_>> {
    tools
        .iter()
        .map(|tool| WireTool {
            kind: "function",
            function: WireFunctionSpec {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.parameters,
            },
        })
        .collect()
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    #[instrument(name = "llm.openai", skip(self, request), fields(agent = %request.agent, model = %self.config.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, FactFluxError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: to_wire_messages(&request),
            tools: to_wire_tools(&request.tools),
        };

        debug!(
            messages = body.messages.len(),
            tools = body.tools.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(self.config.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| FactFluxError::Llm(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "chat completion rejected");
            return Err(FactFluxError::Llm(format!(
                "API error {status}: {}",
                error_text.trim()
            )));
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|err| FactFluxError::Llm(format!("invalid response body: {err}")))?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FactFluxError::Llm("response missing choices".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect::<Vec<_>>();

        debug!(tool_calls = tool_calls.len(), "chat completion received");

        Ok(Completion {
            content: choice.message.content,
            tool_calls,
        })
    }
}
