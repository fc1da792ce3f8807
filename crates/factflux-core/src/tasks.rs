use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use graph_flow::{Context, NextAction, Task, TaskResult};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::FactFluxError;
use crate::agent::Agent;
use crate::agents::build_elaboration_input;
use crate::events::{EventCollector, Stage};
use crate::tools::DEEP_RESEARCH_TOOL;
use crate::trace::{TraceCollector, TraceEvent};

pub const RESEARCH_TASK_ID: &str = "researcher";
pub const ELABORATION_TASK_ID: &str = "elaborator";

/// Session context keys shared by the tasks and the pipeline.
pub mod keys {
    pub const TOPIC: &str = "topic";
    pub const INITIAL_REPORT: &str = "report.initial";
    pub const ENHANCED_REPORT: &str = "report.enhanced";
    pub const TRACE: &str = "trace.events";
}

/// Holds the typed error of the task that stopped the run.
///
/// A failing task records its error here and ends the graph; the pipeline takes
/// it back out after the runner returns.
#[derive(Clone, Default)]
pub struct FailureSlot(Arc<Mutex<Option<FactFluxError>>>);

impl FailureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    async fn store(&self, err: FactFluxError) {
        let mut slot = self.0.lock().await;
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub async fn take(&self) -> Option<FactFluxError> {
        self.0.lock().await.take()
    }
}

async fn record_trace(context: &Context, task_id: &str, message: impl Into<String>) {
    let events: Vec<TraceEvent> = context.get(keys::TRACE).await.unwrap_or_default();
    let mut collector = TraceCollector::from_events(events);
    collector.record(task_id, message);
    context.set(keys::TRACE, collector.into_events()).await;
}

async fn stop_with(
    failure: &FailureSlot,
    context: &Context,
    task_id: &str,
    err: FactFluxError,
) -> graph_flow::Result<TaskResult> {
    error!(task = task_id, error = %err, "task failed; ending run");
    record_trace(context, task_id, format!("failed: {err}")).await;
    let message = err.to_string();
    failure.store(err).await;
    Ok(TaskResult::new(Some(message), NextAction::End))
}

/// Runs the research agent on the topic and stores the initial report.
pub struct ResearchTask {
    agent: Arc<Agent>,
    progress: EventCollector,
    failure: FailureSlot,
}

impl ResearchTask {
    pub fn new(agent: Arc<Agent>, progress: EventCollector, failure: FailureSlot) -> Self {
        Self {
            agent,
            progress,
            failure,
        }
    }
}

#[async_trait]
impl Task for ResearchTask {
    fn id(&self) -> &str {
        RESEARCH_TASK_ID
    }

    #[instrument(name = "task.research", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let topic: String = context.get(keys::TOPIC).await.unwrap_or_default();
        self.progress.emit_stage_started(Stage::Research);
        let started = Instant::now();

        let run = match self.agent.run(&topic, &self.progress).await {
            Ok(run) => run,
            Err(err) => return stop_with(&self.failure, &context, RESEARCH_TASK_ID, err).await,
        };

        if let Some(last_error) = run.tool_never_succeeded(DEEP_RESEARCH_TOOL) {
            warn!(%last_error, "every deep_research call failed");
            let err = FactFluxError::ResearchUnavailable(last_error);
            return stop_with(&self.failure, &context, RESEARCH_TASK_ID, err).await;
        }

        let tool_calls = run.tool_invocations.len();
        let report_chars = run.output.len();
        context.set(keys::INITIAL_REPORT, run.output).await;
        record_trace(
            &context,
            RESEARCH_TASK_ID,
            format!("initial report ready ({report_chars} chars, {tool_calls} tool calls)"),
        )
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        self.progress
            .emit_stage_finished(Stage::Research, elapsed, report_chars);
        info!(%topic, report_chars, tool_calls, "research stage completed");

        Ok(TaskResult::new(
            Some(format!("Initial research completed for \"{topic}\"")),
            NextAction::ContinueAndExecute,
        ))
    }
}

/// Runs the elaboration agent over the initial report.
pub struct ElaborationTask {
    agent: Arc<Agent>,
    progress: EventCollector,
    failure: FailureSlot,
}

impl ElaborationTask {
    pub fn new(agent: Arc<Agent>, progress: EventCollector, failure: FailureSlot) -> Self {
        Self {
            agent,
            progress,
            failure,
        }
    }
}

#[async_trait]
impl Task for ElaborationTask {
    fn id(&self) -> &str {
        ELABORATION_TASK_ID
    }

    #[instrument(name = "task.elaboration", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let topic: String = context.get(keys::TOPIC).await.unwrap_or_default();
        let Some(initial_report) = context.get::<String>(keys::INITIAL_REPORT).await else {
            let err = FactFluxError::Pipeline("initial report missing from session".into());
            return stop_with(&self.failure, &context, ELABORATION_TASK_ID, err).await;
        };

        self.progress.emit_stage_started(Stage::Elaboration);
        let started = Instant::now();

        let input = build_elaboration_input(&topic, &initial_report);
        let run = match self.agent.run(&input, &self.progress).await {
            Ok(run) => run,
            Err(err) => return stop_with(&self.failure, &context, ELABORATION_TASK_ID, err).await,
        };

        let report_chars = run.output.len();
        context.set(keys::ENHANCED_REPORT, run.output).await;
        record_trace(
            &context,
            ELABORATION_TASK_ID,
            format!("enhanced report ready ({report_chars} chars)"),
        )
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        self.progress
            .emit_stage_finished(Stage::Elaboration, elapsed, report_chars);
        info!(report_chars, "elaboration stage completed");

        Ok(TaskResult::new(
            Some("Enhanced report prepared".to_string()),
            NextAction::End,
        ))
    }
}
