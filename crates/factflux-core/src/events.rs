//! Progress notifications emitted while a research run is in flight.
//!
//! Stages, tool invocations and research-service activities all flow through an
//! [`EventCollector`]; surfaces (CLI, HTTP stream) drain the receiving end. Delivery is
//! best-effort: a closed receiver never fails the run.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Pipeline stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Elaboration,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Research => "research",
            Stage::Elaboration => "elaboration",
        }
    }
}

/// A progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A pipeline stage started.
    StageStarted { timestamp: u64, stage: Stage },
    /// A pipeline stage produced its report.
    StageFinished {
        timestamp: u64,
        stage: Stage,
        duration_ms: u64,
        report_chars: usize,
    },
    /// An agent invoked one of its tools.
    ToolInvoked {
        timestamp: u64,
        agent: String,
        tool: String,
    },
    /// A tool returned; `error` is set when the tool reported a failure.
    ToolCompleted {
        timestamp: u64,
        agent: String,
        tool: String,
        error: Option<String>,
    },
    /// Activity reported by the external research service.
    Activity {
        timestamp: u64,
        kind: String,
        message: String,
        depth: Option<u32>,
    },
}

impl ProgressEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            ProgressEvent::StageStarted { timestamp, .. }
            | ProgressEvent::StageFinished { timestamp, .. }
            | ProgressEvent::ToolInvoked { timestamp, .. }
            | ProgressEvent::ToolCompleted { timestamp, .. }
            | ProgressEvent::Activity { timestamp, .. } => *timestamp,
        }
    }

    /// One-line rendering used by terminal surfaces, `[type] message`.
    pub fn display_line(&self) -> String {
        match self {
            ProgressEvent::StageStarted { stage, .. } => {
                format!("[stage] {} started", stage.as_str())
            }
            ProgressEvent::StageFinished {
                stage, duration_ms, ..
            } => format!("[stage] {} finished in {duration_ms}ms", stage.as_str()),
            ProgressEvent::ToolInvoked { agent, tool, .. } => {
                format!("[tool] {agent} -> {tool}")
            }
            ProgressEvent::ToolCompleted {
                tool, error: None, ..
            } => format!("[tool] {tool} completed"),
            ProgressEvent::ToolCompleted {
                tool,
                error: Some(error),
                ..
            } => format!("[tool] {tool} failed: {error}"),
            ProgressEvent::Activity { kind, message, .. } => format!("[{kind}] {message}"),
        }
    }
}

/// Sending half of the progress channel.
#[derive(Clone, Default)]
pub struct EventCollector {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A collector that drops every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit_stage_started(&self, stage: Stage) {
        self.emit(ProgressEvent::StageStarted {
            timestamp: current_timestamp(),
            stage,
        });
    }

    pub fn emit_stage_finished(&self, stage: Stage, duration_ms: u64, report_chars: usize) {
        self.emit(ProgressEvent::StageFinished {
            timestamp: current_timestamp(),
            stage,
            duration_ms,
            report_chars,
        });
    }

    pub fn emit_tool_invoked(&self, agent: &str, tool: &str) {
        self.emit(ProgressEvent::ToolInvoked {
            timestamp: current_timestamp(),
            agent: agent.to_string(),
            tool: tool.to_string(),
        });
    }

    pub fn emit_tool_completed(&self, agent: &str, tool: &str, error: Option<String>) {
        self.emit(ProgressEvent::ToolCompleted {
            timestamp: current_timestamp(),
            agent: agent.to_string(),
            tool: tool.to_string(),
            error,
        });
    }

    pub fn emit_activity(
        &self,
        kind: impl Into<String>,
        message: impl Into<String>,
        depth: Option<u32>,
    ) {
        self.emit(ProgressEvent::Activity {
            timestamp: current_timestamp(),
            kind: kind.into(),
            message: message.into(),
            depth,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.send(event) {
            tracing::debug!(error = %e, "progress receiver closed; dropping event");
        }
    }
}

/// Current Unix timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_collector() {
        let (collector, mut receiver) = EventCollector::new();

        collector.emit_stage_started(Stage::Research);
        collector.emit_activity("search", "Searching for sources", Some(1));

        match receiver.recv().await.unwrap() {
            ProgressEvent::StageStarted { stage, .. } => assert_eq!(stage, Stage::Research),
            other => panic!("expected StageStarted, got {other:?}"),
        }
        let activity = receiver.recv().await.unwrap();
        assert_eq!(activity.display_line(), "[search] Searching for sources");
    }

    #[test]
    fn disabled_collector_is_silent() {
        let collector = EventCollector::disabled();
        collector.emit_stage_started(Stage::Elaboration);
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (collector, receiver) = EventCollector::new();
        drop(receiver);
        collector.emit_tool_invoked("research_agent", "deep_research");
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = ProgressEvent::ToolCompleted {
            timestamp: 1,
            agent: "research_agent".into(),
            tool: "deep_research".into(),
            error: Some("quota exceeded".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_completed");
        assert_eq!(value["error"], "quota exceeded");
        assert_eq!(event.display_line(), "[tool] deep_research failed: quota exceeded");
    }
}
