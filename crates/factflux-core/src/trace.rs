use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One step of a run's timeline, keyed by the graph task that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub task_id: String,
    pub message: String,
    pub timestamp_ms: u128,
}

impl TraceEvent {
    pub fn new(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            task_id: task_id.into(),
            message: message.into(),
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn from_events(events: Vec<TraceEvent>) -> Self {
        Self { events }
    }

    pub fn record(&mut self, task_id: impl Into<String>, message: impl Into<String>) {
        self.events.push(TraceEvent::new(task_id, message));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Numbered markdown list of the recorded steps.
    pub fn render_markdown(&self) -> String {
        if self.events.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Run Trace\n");
        for (idx, event) in self.events.iter().enumerate() {
            let _ = writeln!(output, "{}. {}: {}", idx + 1, event.task_id, event.message);
        }
        output
    }
}
