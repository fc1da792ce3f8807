//! FactFlux core: a two-stage research pipeline built on `graph_flow`.
//!
//! A research agent gathers material through the `deep_research` tool (backed by a
//! deep-research web service), then an elaboration agent rewrites the resulting
//! report into a richer version. Both agents talk to an OpenAI-compatible model.

pub mod agent;
pub mod agents;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod metrics;
pub mod report;
pub mod research;
pub mod security;
pub mod tasks;
pub mod telemetry;
pub mod tools;
pub mod trace;
pub mod workflow;

pub use agent::{Agent, AgentConfig, AgentRun, ToolInvocation};
pub use agents::{
    ELABORATION_AGENT, RESEARCH_AGENT, build_elaboration_input, elaboration_agent_config,
    research_agent_config,
};
pub use config::{AgentSettings, Config, ConfigLoader, LlmConfig, LoggingConfig, ResearchConfig};
pub use error::{FactFluxError, Result};
pub use events::{EventCollector, ProgressEvent, Stage};
pub use llm::{
    ChatMessage, Completion, CompletionRequest, LanguageModel, OpenAiChatModel, OpenAiConfig,
    ToolCall, ToolSpec,
};
pub use metrics::{init_metrics_from_env, record_pipeline_metrics, record_tool_metrics};
pub use report::{report_file_name, write_report};
pub use research::{
    FirecrawlClient, FirecrawlConfig, ResearchBackend, ResearchData, ResearchQuery,
    ResearchResult, Source,
};
pub use security::{CredentialInputs, Credentials, SecretValue, redact};
pub use tasks::{ELABORATION_TASK_ID, RESEARCH_TASK_ID};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use tools::{DEEP_RESEARCH_TOOL, DeepResearchTool, Tool, ToolOutput, ToolSet};
pub use trace::{TraceCollector, TraceEvent};
pub use workflow::{
    BackendFactory, LiveBackends, PipelineBackends, ResearchOutcome, ResearchPipeline,
    SessionRequest, run_session, run_session_with_id,
};
