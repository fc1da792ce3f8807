use std::sync::Arc;
use std::time::Instant;

use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::FactFluxError;
use crate::agent::Agent;
use crate::agents::{elaboration_agent_config, research_agent_config};
use crate::config::Config;
use crate::events::EventCollector;
use crate::llm::{LanguageModel, OpenAiChatModel, OpenAiConfig};
use crate::metrics::record_pipeline_metrics;
use crate::research::{FirecrawlClient, FirecrawlConfig, ResearchBackend};
use crate::security::{CredentialInputs, Credentials};
use crate::tasks::{ElaborationTask, FailureSlot, ResearchTask, keys};
use crate::tools::DeepResearchTool;
use crate::trace::{TraceCollector, TraceEvent};

/// A request to run one research session, before validation.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub topic: String,
    pub credentials: CredentialInputs,
}

impl SessionRequest {
    pub fn new(topic: impl Into<String>, credentials: CredentialInputs) -> Self {
        Self {
            topic: topic.into(),
            credentials,
        }
    }

    /// Preflight: returns the trimmed topic and validated credentials, or the
    /// reason the run must not start.
    pub fn validate(&self, config: &Config) -> Result<(String, Credentials), FactFluxError> {
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(FactFluxError::InvalidInput(
                "research topic must not be empty".into(),
            ));
        }
        let credentials = self.credentials.resolve(config.credential_names())?;
        Ok((topic.to_string(), credentials))
    }
}

/// The external clients one pipeline run talks to.
#[derive(Clone)]
pub struct PipelineBackends {
    pub model: Arc<dyn LanguageModel>,
    pub research: Arc<dyn ResearchBackend>,
}

/// Builds the clients for a run once credentials have been validated.
pub trait BackendFactory: Send + Sync {
    fn build(
        &self,
        credentials: &Credentials,
        config: &Config,
    ) -> Result<PipelineBackends, FactFluxError>;
}

/// OpenAI chat completions plus Firecrawl deep research.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveBackends;

impl BackendFactory for LiveBackends {
    fn build(
        &self,
        credentials: &Credentials,
        config: &Config,
    ) -> Result<PipelineBackends, FactFluxError> {
        let model = OpenAiChatModel::new(
            OpenAiConfig::new(credentials.llm_api_key.clone(), config.llm.model.clone())
                .with_base_url(config.llm.base_url.clone()),
        )?;
        let research = FirecrawlClient::new(FirecrawlConfig::from_research_config(
            credentials.research_api_key.clone(),
            &config.research,
        ))?;
        Ok(PipelineBackends {
            model: Arc::new(model),
            research: Arc::new(research),
        })
    }
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutcome {
    pub session_id: String,
    pub topic: String,
    pub initial_report: String,
    pub enhanced_report: String,
    pub trace_events: Vec<TraceEvent>,
    pub duration_ms: u64,
}

impl ResearchOutcome {
    /// The run timeline as a numbered markdown list.
    pub fn explain_markdown(&self) -> String {
        TraceCollector::from_events(self.trace_events.clone()).render_markdown()
    }
}

/// Research agent followed by elaboration agent, wired as a two-task graph.
pub struct ResearchPipeline {
    config: Config,
    backends: PipelineBackends,
    progress: EventCollector,
}

struct RunGraph {
    graph: Arc<Graph>,
    start_task: String,
    failure: FailureSlot,
}

impl ResearchPipeline {
    pub fn new(config: Config, backends: PipelineBackends) -> Self {
        Self {
            config,
            backends,
            progress: EventCollector::disabled(),
        }
    }

    pub fn with_progress(mut self, progress: EventCollector) -> Self {
        self.progress = progress;
        self
    }

    /// Fresh agents, tasks and graph for every run; nothing is shared between runs.
    fn build_graph(&self) -> RunGraph {
        let failure = FailureSlot::new();
        let tool = Arc::new(DeepResearchTool::new(self.backends.research.clone()));

        let researcher = Arc::new(Agent::new(
            research_agent_config(tool, &self.config.research),
            self.backends.model.clone(),
            self.config.agent.clone(),
        ));
        let elaborator = Arc::new(Agent::new(
            elaboration_agent_config(),
            self.backends.model.clone(),
            self.config.agent.clone(),
        ));

        let research_task = Arc::new(ResearchTask::new(
            researcher,
            self.progress.clone(),
            failure.clone(),
        ));
        let elaboration_task = Arc::new(ElaborationTask::new(
            elaborator,
            self.progress.clone(),
            failure.clone(),
        ));

        let graph = GraphBuilder::new("factflux_research")
            .add_task(research_task.clone())
            .add_task(elaboration_task.clone())
            .add_edge(research_task.id(), elaboration_task.id())
            .set_start_task(research_task.id())
            .build();

        RunGraph {
            graph: Arc::new(graph),
            start_task: research_task.id().to_string(),
            failure,
        }
    }

    pub async fn run(&self, topic: &str) -> Result<ResearchOutcome, FactFluxError> {
        self.run_with_session_id(topic, Uuid::new_v4().to_string())
            .await
    }

    #[instrument(name = "pipeline.run", skip(self), fields(session_id = %session_id))]
    pub async fn run_with_session_id(
        &self,
        topic: &str,
        session_id: String,
    ) -> Result<ResearchOutcome, FactFluxError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(FactFluxError::InvalidInput(
                "research topic must not be empty".into(),
            ));
        }

        let started = Instant::now();
        let result = self.execute(topic, &session_id).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                record_pipeline_metrics("success", duration_ms);
                info!(%topic, duration_ms, "research pipeline completed");
            }
            Err(err) => {
                record_pipeline_metrics("failure", duration_ms);
                warn!(%topic, duration_ms, error = %err, "research pipeline failed");
            }
        }

        result.map(|(initial_report, enhanced_report, trace_events)| ResearchOutcome {
            session_id,
            topic: topic.to_string(),
            initial_report,
            enhanced_report,
            trace_events,
            duration_ms,
        })
    }

    async fn execute(
        &self,
        topic: &str,
        session_id: &str,
    ) -> Result<(String, String, Vec<TraceEvent>), FactFluxError> {
        let run_graph = self.build_graph();
        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(run_graph.graph.clone(), storage.clone());

        let session = Session::new_from_task(session_id.to_string(), &run_graph.start_task);
        session.context.set(keys::TOPIC, topic.to_string()).await;
        storage
            .save(session)
            .await
            .map_err(|err| FactFluxError::Pipeline(format!("failed to persist session: {err}")))?;

        loop {
            let result = runner
                .run(session_id)
                .await
                .map_err(|err| FactFluxError::Pipeline(format!("graph execution failure: {err}")))?;

            if let Some(err) = run_graph.failure.take().await {
                return Err(err);
            }

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => return Err(FactFluxError::Pipeline(message)),
            }
        }

        let session = storage
            .get(session_id)
            .await
            .map_err(|err| FactFluxError::Pipeline(format!("failed to reload session: {err}")))?
            .ok_or_else(|| FactFluxError::Pipeline("session missing after execution".into()))?;

        let initial_report: String = session
            .context
            .get(keys::INITIAL_REPORT)
            .await
            .ok_or_else(|| FactFluxError::Pipeline("no initial report recorded".into()))?;
        let enhanced_report: String = session
            .context
            .get(keys::ENHANCED_REPORT)
            .await
            .ok_or_else(|| FactFluxError::Pipeline("no enhanced report recorded".into()))?;
        let trace_events: Vec<TraceEvent> =
            session.context.get(keys::TRACE).await.unwrap_or_default();

        Ok((initial_report, enhanced_report, trace_events))
    }

    /// Enhanced report for `topic`: research first, then elaboration.
    pub async fn run_research_process(&self, topic: &str) -> Result<String, FactFluxError> {
        self.run(topic).await.map(|outcome| outcome.enhanced_report)
    }
}

/// Preflight, build clients, run. No client is constructed when preflight fails.
pub async fn run_session(
    request: &SessionRequest,
    config: &Config,
    factory: &dyn BackendFactory,
    progress: EventCollector,
) -> Result<ResearchOutcome, FactFluxError> {
    run_session_with_id(request, config, factory, progress, Uuid::new_v4().to_string()).await
}

pub async fn run_session_with_id(
    request: &SessionRequest,
    config: &Config,
    factory: &dyn BackendFactory,
    progress: EventCollector,
    session_id: String,
) -> Result<ResearchOutcome, FactFluxError> {
    let (topic, credentials) = request.validate(config)?;
    let backends = factory.build(&credentials, config)?;
    ResearchPipeline::new(config.clone(), backends)
        .with_progress(progress)
        .run_with_session_id(&topic, session_id)
        .await
}
