use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use factflux_core::{
    BackendFactory, ChatMessage, Completion, CompletionRequest, Config, ConfigLoader,
    CredentialInputs,
    Credentials, DEEP_RESEARCH_TOOL, ELABORATION_AGENT, ELABORATION_TASK_ID, EventCollector,
    FactFluxError, LanguageModel, PipelineBackends, ProgressEvent, RESEARCH_AGENT,
    RESEARCH_TASK_ID, ResearchBackend, ResearchData, ResearchPipeline, ResearchQuery,
    SessionRequest, Source, Stage, run_session,
};
use serde_json::{Value, json};

const TOPIC: &str = "Latest developments in AI";

/// Plays both agents: the researcher calls `deep_research` once and turns the result
/// into a cited report; the elaborator keeps every section and appends new ones.
#[derive(Default)]
struct ScriptedModel {
    calls: Mutex<Vec<String>>,
    skip_tool: bool,
    empty_elaboration: bool,
}

impl ScriptedModel {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn research_turn(&self, request: &CompletionRequest) -> Completion {
        let tool_result = request.messages.iter().find_map(|message| match message {
            ChatMessage::Tool { content, .. } => Some(content.clone()),
            _ => None,
        });

        match tool_result {
            None if self.skip_tool => Completion::text("## Overview\nAnswered from memory."),
            None => {
                let topic = match &request.messages[0] {
                    ChatMessage::User(text) => text.clone(),
                    other => panic!("unexpected first message {other:?}"),
                };
                let instructions = &request.instructions;
                Completion::tool_call(
                    "call_1",
                    DEEP_RESEARCH_TOOL,
                    json!({
                        "query": topic,
                        "max_depth": knob(instructions, "max_depth"),
                        "time_limit": knob(instructions, "time_limit"),
                        "max_urls": knob(instructions, "max_urls"),
                    }),
                )
            }
            Some(raw) => {
                let payload: Value = serde_json::from_str(&raw).unwrap();
                if payload["success"] != true {
                    return Completion::text(format!(
                        "## Overview\nResearch failed: {}",
                        payload["error"]
                    ));
                }
                let sources = payload["sources"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|source| format!("- {}", source["url"].as_str().unwrap()))
                    .collect::<Vec<_>>()
                    .join("\n");
                Completion::text(format!(
                    "## Overview\n{}\n\n## Key Findings\n- Models keep improving\n\n## Sources\n{sources}",
                    payload["final_analysis"].as_str().unwrap()
                ))
            }
        }
    }

    fn elaboration_turn(&self, request: &CompletionRequest) -> Completion {
        if self.empty_elaboration {
            return Completion::text("");
        }
        let input = match &request.messages[0] {
            ChatMessage::User(text) => text.clone(),
            other => panic!("unexpected first message {other:?}"),
        };
        let start = input.find("INITIAL RESEARCH REPORT:\n").unwrap() + "INITIAL RESEARCH REPORT:\n".len();
        let end = input.find("\n\nPlease enhance").unwrap();
        let initial = &input[start..end];
        Completion::text(format!(
            "{initial}\n\n## Case Studies\nA hospital deployed diagnostic models.\n\n## Future Outlook\nExpect wider adoption."
        ))
    }
}

/// Reads `* name: value` from the agent instructions, the way a compliant model would.
fn knob(instructions: &str, name: &str) -> u32 {
    let marker = format!("{name}: ");
    let start = instructions.find(&marker).expect("knob missing from instructions") + marker.len();
    instructions[start..]
        .split_whitespace()
        .next()
        .and_then(|value| value.parse().ok())
        .expect("knob value is not a number")
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, FactFluxError> {
        self.calls.lock().unwrap().push(request.agent.clone());
        match request.agent.as_str() {
            RESEARCH_AGENT => Ok(self.research_turn(&request)),
            ELABORATION_AGENT => Ok(self.elaboration_turn(&request)),
            other => panic!("unknown agent {other}"),
        }
    }
}

struct RecordingBackend {
    queries: Mutex<Vec<ResearchQuery>>,
    fail_with: Option<String>,
}

impl RecordingBackend {
    fn ok() -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    fn count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl ResearchBackend for RecordingBackend {
    async fn deep_research(
        &self,
        query: &ResearchQuery,
        progress: &EventCollector,
    ) -> Result<ResearchData, FactFluxError> {
        self.queries.lock().unwrap().push(query.clone());
        progress.emit_activity("search", format!("Searching for {}", query.query), Some(1));
        if let Some(message) = &self.fail_with {
            return Err(FactFluxError::Research(message.clone()));
        }
        Ok(ResearchData {
            final_analysis: "X".to_string(),
            sources: vec![
                Source::new("https://a.example"),
                Source::new("https://b.example"),
                Source::new("https://c.example"),
            ],
        })
    }
}

struct MockFactory {
    model: Arc<ScriptedModel>,
    backend: Arc<RecordingBackend>,
    builds: AtomicUsize,
}

impl MockFactory {
    fn new(model: ScriptedModel, backend: RecordingBackend) -> Self {
        Self {
            model: Arc::new(model),
            backend: Arc::new(backend),
            builds: AtomicUsize::new(0),
        }
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl BackendFactory for MockFactory {
    fn build(
        &self,
        _credentials: &Credentials,
        _config: &Config,
    ) -> Result<PipelineBackends, FactFluxError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(PipelineBackends {
            model: self.model.clone(),
            research: self.backend.clone(),
        })
    }
}

fn full_credentials() -> CredentialInputs {
    CredentialInputs::new(Some("sk-test".into()), Some("fc-test".into()))
}

fn position_of(events: &[ProgressEvent], predicate: impl Fn(&ProgressEvent) -> bool) -> usize {
    events
        .iter()
        .position(|event| predicate(event))
        .expect("event missing")
}

fn headers(report: &str) -> Vec<&str> {
    report.lines().filter(|line| line.starts_with('#')).collect()
}

#[tokio::test]
async fn latest_developments_in_ai_scenario() {
    let factory = MockFactory::new(ScriptedModel::default(), RecordingBackend::ok());
    let (collector, mut receiver) = EventCollector::new();
    let request = SessionRequest::new(TOPIC, full_credentials());

    let outcome = run_session(&request, &Config::default(), &factory, collector)
        .await
        .expect("pipeline should succeed");

    assert_eq!(outcome.topic, TOPIC);
    for url in ["https://a.example", "https://b.example", "https://c.example"] {
        assert!(outcome.initial_report.contains(url), "missing {url}");
    }
    assert!(!outcome.enhanced_report.is_empty());
    assert_ne!(outcome.enhanced_report, outcome.initial_report);
    assert!(outcome.enhanced_report.len() > outcome.initial_report.len());
    for header in headers(&outcome.initial_report) {
        assert!(
            outcome.enhanced_report.contains(header),
            "enhanced report dropped {header}"
        );
    }

    assert_eq!(factory.builds(), 1);
    assert_eq!(factory.backend.count(), 1);
    assert_eq!(
        factory.backend.queries.lock().unwrap()[0],
        ResearchQuery::new(TOPIC)
    );
    assert_eq!(
        factory.model.calls(),
        vec![RESEARCH_AGENT, RESEARCH_AGENT, ELABORATION_AGENT]
    );

    let task_ids: Vec<_> = outcome
        .trace_events
        .iter()
        .map(|event| event.task_id.as_str())
        .collect();
    assert_eq!(task_ids, vec![RESEARCH_TASK_ID, ELABORATION_TASK_ID]);
    let explain = outcome.explain_markdown();
    let research_line = explain
        .find(&format!("1. {RESEARCH_TASK_ID}: "))
        .expect("research step in explain output");
    let elaboration_line = explain
        .find(&format!("2. {ELABORATION_TASK_ID}: "))
        .expect("elaboration step in explain output");
    assert!(research_line < elaboration_line, "{explain}");

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    let research_started = position_of(&events, |event| {
        matches!(event, ProgressEvent::StageStarted { stage: Stage::Research, .. })
    });
    let activity = position_of(&events, |event| matches!(event, ProgressEvent::Activity { .. }));
    let research_finished = position_of(&events, |event| {
        matches!(event, ProgressEvent::StageFinished { stage: Stage::Research, .. })
    });
    let elaboration_started = position_of(&events, |event| {
        matches!(event, ProgressEvent::StageStarted { stage: Stage::Elaboration, .. })
    });
    assert!(research_started < activity);
    assert!(activity < research_finished);
    assert!(research_finished < elaboration_started);
}

#[tokio::test]
async fn missing_credential_never_builds_clients() {
    let factory = MockFactory::new(ScriptedModel::default(), RecordingBackend::ok());
    let request = SessionRequest::new(TOPIC, CredentialInputs::new(None, Some("fc-test".into())));

    let err = run_session(&request, &Config::default(), &factory, EventCollector::disabled())
        .await
        .unwrap_err();

    assert!(matches!(err, FactFluxError::MissingSecret(ref name) if name == "OPENAI_API_KEY"));
    assert_eq!(factory.builds(), 0);
    assert!(factory.model.calls().is_empty());
    assert_eq!(factory.backend.count(), 0);
}

#[tokio::test]
async fn empty_topic_is_not_started() {
    let factory = MockFactory::new(ScriptedModel::default(), RecordingBackend::ok());
    let request = SessionRequest::new("  \n", full_credentials());

    let err = run_session(&request, &Config::default(), &factory, EventCollector::disabled())
        .await
        .unwrap_err();

    assert!(matches!(err, FactFluxError::InvalidInput(_)));
    assert_eq!(factory.builds(), 0);
    assert!(factory.model.calls().is_empty());
}

#[tokio::test]
async fn failing_research_service_stops_before_elaboration() {
    let factory = MockFactory::new(
        ScriptedModel::default(),
        RecordingBackend::failing("API error 401 Unauthorized: invalid token"),
    );
    let request = SessionRequest::new(TOPIC, full_credentials());

    let err = run_session(&request, &Config::default(), &factory, EventCollector::disabled())
        .await
        .unwrap_err();

    match err {
        FactFluxError::ResearchUnavailable(message) => assert!(message.contains("401")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(factory.backend.count(), 1);
    assert!(!factory.model.calls().contains(&ELABORATION_AGENT.to_string()));
}

#[tokio::test]
async fn answer_without_tool_call_is_accepted() {
    let model = ScriptedModel {
        skip_tool: true,
        ..ScriptedModel::default()
    };
    let backend = Arc::new(RecordingBackend::ok());
    let pipeline = ResearchPipeline::new(
        Config::default(),
        PipelineBackends {
            model: Arc::new(model),
            research: backend.clone(),
        },
    );

    let enhanced = pipeline.run_research_process(TOPIC).await.unwrap();

    assert!(enhanced.contains("## Overview"));
    assert!(enhanced.contains("## Case Studies"));
    assert_eq!(backend.count(), 0);
}

#[tokio::test]
async fn elaboration_failure_is_not_masked_by_initial_report() {
    let model = ScriptedModel {
        empty_elaboration: true,
        ..ScriptedModel::default()
    };
    let pipeline = ResearchPipeline::new(
        Config::default(),
        PipelineBackends {
            model: Arc::new(model),
            research: Arc::new(RecordingBackend::ok()),
        },
    );

    let err = pipeline.run(TOPIC).await.unwrap_err();
    assert!(matches!(
        err,
        FactFluxError::MalformedOutput { ref agent, .. } if agent == ELABORATION_AGENT
    ));
}

#[tokio::test]
async fn configured_research_limits_reach_the_tool() {
    let config = ConfigLoader::from_toml("[research]\nmax_depth = 5\ntime_limit_secs = 60\nmax_urls = 25")
        .expect("config should parse");
    let backend = Arc::new(RecordingBackend::ok());
    let pipeline = ResearchPipeline::new(
        config,
        PipelineBackends {
            model: Arc::new(ScriptedModel::default()),
            research: backend.clone(),
        },
    );

    pipeline.run(TOPIC).await.expect("pipeline should succeed");

    let queries = backend.queries.lock().unwrap();
    assert_eq!(queries.len(), 1);
    assert_eq!(
        (queries[0].max_depth, queries[0].time_limit, queries[0].max_urls),
        (5, 60, 25)
    );
}
