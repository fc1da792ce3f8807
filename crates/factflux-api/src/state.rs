use crate::config::AppConfig;
use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use factflux_core::{
    BackendFactory, Config, CredentialInputs, EventCollector, FactFluxError, ProgressEvent,
    ResearchOutcome, SessionRequest, TraceEvent, redact, run_session_with_id,
};
use serde::Serialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{self as stream, Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    session_service: Arc<SessionService>,
    auth_token: Option<Arc<String>>,
}

impl AppState {
    pub fn new(config: &AppConfig, factory: Arc<dyn BackendFactory>) -> Self {
        let service = SessionService::new(
            config.pipeline.clone(),
            factory,
            config.max_concurrency,
        )
        .with_retention(SessionRetention {
            ttl: config.session_ttl,
            max_finished: config.max_finished_sessions,
        });

        Self {
            session_service: Arc::new(service),
            auth_token: config
                .auth_token
                .as_ref()
                .map(|token| Arc::new(token.to_string())),
        }
    }

    pub fn session_service(&self) -> Arc<SessionService> {
        self.session_service.clone()
    }

    pub fn auth_token(&self) -> Option<Arc<String>> {
        self.auth_token.clone()
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.session_service.metrics()
    }
}

/// Runs research sessions in the background, bounded by a semaphore.
///
/// Every progress event is kept in the session's history so a stream opened
/// late still sees the whole run. Finished sessions are pruned according to
/// [`SessionRetention`] whenever a new session starts.
#[derive(Clone)]
pub struct SessionService {
    config: Arc<Config>,
    factory: Arc<dyn BackendFactory>,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    retention: SessionRetention,
    sessions: Arc<DashMap<String, SessionEntry>>,
}

/// How long finished sessions are kept. Queued and running sessions are never pruned.
#[derive(Clone, Copy, Debug)]
pub struct SessionRetention {
    pub ttl: Duration,
    pub max_finished: usize,
}

impl Default for SessionRetention {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_finished: 256,
        }
    }
}

struct SessionEntry {
    topic: String,
    created_at: DateTime<Utc>,
    finished_at: Option<Instant>,
    record: SessionRecord,
    history: Vec<SessionEvent>,
    // Dropped once the session finishes, which ends every open stream.
    sender: Option<broadcast::Sender<SessionEvent>>,
}

#[derive(Debug)]
enum SessionRecord {
    Queued,
    Running,
    Completed(Arc<ResearchOutcome>),
    Failed(String),
}

/// Body of a start request; keys fall back to the server's environment.
#[derive(Clone, Default)]
pub struct StartRequest {
    pub topic: String,
    pub openai_api_key: Option<String>,
    pub firecrawl_api_key: Option<String>,
}

impl SessionService {
    pub fn new(config: Config, factory: Arc<dyn BackendFactory>, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            config: Arc::new(config),
            factory,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            retention: SessionRetention::default(),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn with_retention(mut self, retention: SessionRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Validates the request and queues the run. Preflight failures are
    /// returned here and never create a session.
    pub fn start_session(&self, request: StartRequest) -> Result<String, FactFluxError> {
        let credentials = CredentialInputs::new(request.openai_api_key, request.firecrawl_api_key)
            .or(self.config.credentials_from_env());
        let session_request = SessionRequest::new(request.topic, credentials);
        let (topic, _) = session_request.validate(&self.config)?;
        self.prune_finished();

        let session_id = Uuid::new_v4().to_string();
        let (sender, _rx) = broadcast::channel(64);
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                topic: topic.clone(),
                created_at: Utc::now(),
                finished_at: None,
                record: SessionRecord::Queued,
                history: Vec::new(),
                sender: Some(sender),
            },
        );
        publish(&self.sessions, &session_id, SessionEvent::started(&topic));
        info!(session_id = %session_id, %topic, "session queued");

        let service = self.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            service.execute(id, session_request).await;
        });

        Ok(session_id)
    }

    async fn execute(&self, session_id: String, request: SessionRequest) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                self.finish(&session_id, Err(err.to_string()));
                return;
            }
        };
        if let Some(mut entry) = self.sessions.get_mut(&session_id) {
            entry.record = SessionRecord::Running;
        }

        let (collector, mut receiver) = EventCollector::new();
        let sessions = self.sessions.clone();
        let forward_id = session_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                publish(&sessions, &forward_id, SessionEvent::progress(event));
            }
        });

        let result = run_session_with_id(
            &request,
            &self.config,
            self.factory.as_ref(),
            collector,
            session_id.clone(),
        )
        .await;
        drop(permit);
        // The collector is gone with the run, so the forwarder drains and exits.
        let _ = forwarder.await;

        match result {
            Ok(outcome) => {
                info!(session_id = %session_id, duration_ms = outcome.duration_ms, "session completed");
                self.finish(&session_id, Ok(Arc::new(outcome)));
            }
            Err(err) => {
                let message = redact(&err.to_string());
                error!(session_id = %session_id, error = %message, "session failed");
                self.finish(&session_id, Err(message));
            }
        }
    }

    fn finish(&self, session_id: &str, result: Result<Arc<ResearchOutcome>, String>) {
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return;
        };
        let event = match &result {
            Ok(outcome) => SessionEvent::completed(outcome),
            Err(message) => SessionEvent::error(message),
        };
        entry.record = match result {
            Ok(outcome) => SessionRecord::Completed(outcome),
            Err(message) => SessionRecord::Failed(message),
        };
        entry.finished_at = Some(Instant::now());
        entry.history.push(event.clone());
        if let Some(sender) = entry.sender.take() {
            let _ = sender.send(event);
        }
    }

    /// Drops finished sessions older than the TTL, then the oldest finished
    /// ones beyond `max_finished`.
    fn prune_finished(&self) {
        let ttl = self.retention.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            entry
                .finished_at
                .is_none_or(|finished| finished.elapsed() < ttl)
        });

        let mut finished: Vec<(Instant, String)> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.finished_at.map(|at| (at, entry.key().clone())))
            .collect();
        if finished.len() > self.retention.max_finished {
            finished.sort();
            let excess = finished.len() - self.retention.max_finished;
            for (_, session_id) in finished.into_iter().take(excess) {
                self.sessions.remove(&session_id);
            }
        }

        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            debug!(pruned, remaining = self.sessions.len(), "pruned finished sessions");
        }
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions
            .get(session_id)
            .map(|entry| SessionStatus::from_entry(session_id, entry.value()))
    }

    pub fn list(&self) -> Vec<SessionStatus> {
        let mut sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| SessionStatus::from_entry(entry.key(), entry.value()))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn outcome(&self, session_id: &str) -> Option<Arc<ResearchOutcome>> {
        self.sessions
            .get(session_id)
            .and_then(|entry| match &entry.record {
                SessionRecord::Completed(outcome) => Some(outcome.clone()),
                _ => None,
            })
    }

    /// Replays the session's history, then follows it live until it finishes.
    pub fn event_stream(&self, session_id: &str) -> Option<SseStream> {
        let entry = self.sessions.get(session_id)?;
        // History and subscription are taken under the same entry lock that
        // `publish` holds while sending, so no event is missed or repeated.
        let history = entry.history.clone();
        let live = entry.sender.as_ref().map(|sender| sender.subscribe());
        drop(entry);

        let replay = stream::iter(
            history
                .into_iter()
                .map(|event| Result::<Event, Infallible>::Ok(event.into_sse_event())),
        );

        let Some(rx) = live else {
            return Some(Box::pin(replay) as SseStream);
        };
        let live = BroadcastStream::new(rx).filter_map(|event| match event {
            Ok(event) => Some(Result::<Event, Infallible>::Ok(event.into_sse_event())),
            Err(err) => {
                warn!(error = %err, "session event stream lagged");
                None
            }
        });
        Some(Box::pin(replay.chain(live)) as SseStream)
    }

    pub fn metrics(&self) -> SessionMetrics {
        let running_sessions = self
            .sessions
            .iter()
            .filter(|entry| matches!(entry.record, SessionRecord::Running))
            .count();
        SessionMetrics {
            max_concurrency: self.max_concurrency,
            available_permits: self.semaphore.available_permits(),
            running_sessions,
            total_sessions: self.sessions.len(),
        }
    }
}

fn publish(sessions: &DashMap<String, SessionEntry>, session_id: &str, event: SessionEvent) {
    if let Some(mut entry) = sessions.get_mut(session_id) {
        entry.history.push(event.clone());
        if let Some(sender) = &entry.sender {
            let _ = sender.send(event);
        }
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[derive(Clone, Debug, Serialize)]
pub struct SessionMetrics {
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub running_sessions: usize,
    pub total_sessions: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub topic: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhanced_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace_events: Vec<TraceEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatus {
    fn from_entry(session_id: &str, entry: &SessionEntry) -> Self {
        let mut status = Self {
            session_id: session_id.to_string(),
            topic: entry.topic.clone(),
            state: SessionState::Queued,
            created_at: entry.created_at,
            initial_report: None,
            enhanced_report: None,
            duration_ms: None,
            trace_events: Vec::new(),
            error: None,
        };
        match &entry.record {
            SessionRecord::Queued => {}
            SessionRecord::Running => status.state = SessionState::Running,
            SessionRecord::Completed(outcome) => {
                status.state = SessionState::Completed;
                status.initial_report = Some(outcome.initial_report.clone());
                status.enhanced_report = Some(outcome.enhanced_report.clone());
                status.duration_ms = Some(outcome.duration_ms);
                status.trace_events = outcome.trace_events.clone();
            }
            SessionRecord::Failed(message) => {
                status.state = SessionState::Failed;
                status.error = Some(message.clone());
            }
        }
        status
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_chars: Option<usize>,
}

impl SessionEvent {
    pub fn started(topic: &str) -> Self {
        Self {
            kind: SessionEventKind::Started,
            message: Some(format!("researching \"{topic}\"")),
            progress: None,
            report_chars: None,
        }
    }

    pub fn progress(event: ProgressEvent) -> Self {
        Self {
            kind: SessionEventKind::Progress,
            message: Some(event.display_line()),
            progress: Some(event),
            report_chars: None,
        }
    }

    pub fn completed(outcome: &ResearchOutcome) -> Self {
        Self {
            kind: SessionEventKind::Completed,
            message: Some(format!("session completed in {} ms", outcome.duration_ms)),
            progress: None,
            report_chars: Some(outcome.enhanced_report.chars().count()),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            kind: SessionEventKind::Error,
            message: Some(format!("session failed: {message}")),
            progress: None,
            report_chars: None,
        }
    }

    pub fn into_sse_event(self) -> Event {
        let data = serde_json::to_string(&self).unwrap_or_else(|_| {
            serde_json::json!({
                "kind": SessionEventKind::Error,
                "message": "failed to serialize session event",
            })
            .to_string()
        });

        Event::default().event(self.kind.as_str()).data(data)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Started,
    Progress,
    Completed,
    Error,
}

impl SessionEventKind {
    fn as_str(&self) -> &'static str {
        match self {
            SessionEventKind::Started => "started",
            SessionEventKind::Progress => "progress",
            SessionEventKind::Completed => "completed",
            SessionEventKind::Error => "error",
        }
    }
}
