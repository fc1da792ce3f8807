use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use super::{Tool, ToolOutput};
use crate::events::EventCollector;
use crate::metrics::record_tool_metrics;
use crate::research::{ResearchBackend, ResearchQuery, ResearchResult};

pub const DEEP_RESEARCH_TOOL: &str = "deep_research";

/// Arguments as the model sends them.
#[derive(Debug, Clone, Deserialize)]
pub struct DeepResearchArgs {
    pub query: String,
    pub max_depth: u32,
    pub time_limit: u32,
    pub max_urls: u32,
}

impl From<DeepResearchArgs> for ResearchQuery {
    fn from(args: DeepResearchArgs) -> Self {
        ResearchQuery::new(args.query).with_limits(args.max_depth, args.time_limit, args.max_urls)
    }
}

/// Web deep research through a [`ResearchBackend`]. Never propagates errors: every
/// failure, a panicking backend included, is folded into [`ResearchResult::Failure`].
pub struct DeepResearchTool {
    backend: Arc<dyn ResearchBackend>,
}

impl DeepResearchTool {
    pub fn new(backend: Arc<dyn ResearchBackend>) -> Self {
        Self { backend }
    }

    #[instrument(name = "tool.deep_research", skip(self, query, progress), fields(query = %query.query, max_depth = query.max_depth, time_limit = query.time_limit, max_urls = query.max_urls))]
    pub async fn deep_research(
        &self,
        query: &ResearchQuery,
        progress: &EventCollector,
    ) -> ResearchResult {
        if let Err(err) = query.validate() {
            warn!(error = %err, "rejecting deep research request");
            record_tool_metrics(DEEP_RESEARCH_TOOL, "invalid", 0);
            return ResearchResult::failure(err.to_string());
        }

        let started = Instant::now();
        let call = AssertUnwindSafe(self.backend.deep_research(query, progress));
        let result = match call.catch_unwind().await {
            Ok(Ok(data)) => {
                info!(sources_count = data.sources.len(), "deep research succeeded");
                ResearchResult::success(data)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "deep research failed");
                ResearchResult::failure(err.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!(%reason, "research backend panicked");
                ResearchResult::failure(format!("research backend panicked: {reason}"))
            }
        };

        let status = if result.is_success() {
            "success"
        } else {
            "failure"
        };
        record_tool_metrics(
            DEEP_RESEARCH_TOOL,
            status,
            started.elapsed().as_millis() as u64,
        );
        result
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl Tool for DeepResearchTool {
    fn name(&self) -> &str {
        DEEP_RESEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Perform comprehensive web research using a deep research service that \
         searches, crawls and synthesizes multiple sources."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The research question or topic"
                },
                "max_depth": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum crawl depth"
                },
                "time_limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Time budget in seconds"
                },
                "max_urls": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of URLs to analyze"
                }
            },
            "required": ["query", "max_depth", "time_limit", "max_urls"],
            "additionalProperties": false
        })
    }

    async fn invoke(&self, arguments: Value, progress: &EventCollector) -> ToolOutput {
        let result = match serde_json::from_value::<DeepResearchArgs>(arguments) {
            Ok(args) => self.deep_research(&args.into(), progress).await,
            Err(err) => {
                warn!(error = %err, "malformed deep_research arguments");
                record_tool_metrics(DEEP_RESEARCH_TOOL, "invalid", 0);
                ResearchResult::failure(format!("invalid arguments: {err}"))
            }
        };

        match result.error() {
            Some(error) => ToolOutput::failed(result.to_value(), error),
            None => ToolOutput::ok(result.to_value()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FactFluxError;
    use crate::events::ProgressEvent;
    use crate::research::{ResearchData, Source};
    use std::sync::Mutex;

    struct FakeBackend {
        outcome: Result<ResearchData, String>,
        seen: Mutex<Vec<ResearchQuery>>,
    }

    impl FakeBackend {
        fn ok() -> Self {
            Self {
                outcome: Ok(ResearchData {
                    final_analysis: "X".into(),
                    sources: vec![
                        Source::new("https://a.example"),
                        Source::new("https://b.example"),
                        Source::new("https://c.example"),
                    ],
                }),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                outcome: Err(message.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ResearchBackend for FakeBackend {
        async fn deep_research(
            &self,
            query: &ResearchQuery,
            progress: &EventCollector,
        ) -> Result<ResearchData, FactFluxError> {
            self.seen.lock().unwrap().push(query.clone());
            progress.emit_activity("search", "searching", Some(1));
            self.outcome
                .clone()
                .map_err(FactFluxError::Research)
        }
    }

    #[tokio::test]
    async fn success_reports_sources_count() {
        let backend = Arc::new(FakeBackend::ok());
        let tool = DeepResearchTool::new(backend.clone());
        let (collector, mut receiver) = EventCollector::new();

        let output = tool
            .invoke(
                json!({"query": "Latest developments in AI", "max_depth": 3, "time_limit": 180, "max_urls": 10}),
                &collector,
            )
            .await;

        assert!(!output.is_failure());
        assert_eq!(output.payload["success"], true);
        assert_eq!(output.payload["final_analysis"], "X");
        assert_eq!(output.payload["sources_count"], 3);
        assert_eq!(backend.seen.lock().unwrap()[0].max_urls, 10);
        assert!(matches!(
            receiver.try_recv().unwrap(),
            ProgressEvent::Activity { .. }
        ));
    }

    #[tokio::test]
    async fn backend_error_becomes_failure_result() {
        let tool = DeepResearchTool::new(Arc::new(FakeBackend::failing("401 Unauthorized")));
        let result = tool
            .deep_research(
                &ResearchQuery::new("Latest developments in AI"),
                &EventCollector::disabled(),
            )
            .await;

        assert!(!result.is_success());
        let error = result.error().unwrap();
        assert!(error.contains("401 Unauthorized"), "{error}");
    }

    struct PanickingBackend;

    #[async_trait]
    impl ResearchBackend for PanickingBackend {
        async fn deep_research(
            &self,
            _query: &ResearchQuery,
            _progress: &EventCollector,
        ) -> Result<ResearchData, FactFluxError> {
            panic!("index out of bounds");
        }
    }

    #[tokio::test]
    async fn backend_panic_becomes_failure_result() {
        let tool = DeepResearchTool::new(Arc::new(PanickingBackend));

        let output = tool
            .invoke(
                json!({"query": "ai", "max_depth": 3, "time_limit": 180, "max_urls": 10}),
                &EventCollector::disabled(),
            )
            .await;

        assert!(output.is_failure());
        assert_eq!(output.payload["success"], false);
        let error = output.payload["error"].as_str().unwrap();
        assert!(error.contains("panicked: index out of bounds"), "{error}");
    }

    #[tokio::test]
    async fn malformed_arguments_never_reach_backend() {
        let backend = Arc::new(FakeBackend::ok());
        let tool = DeepResearchTool::new(backend.clone());

        let output = tool
            .invoke(json!({"query": "ai"}), &EventCollector::disabled())
            .await;

        assert!(output.is_failure());
        assert_eq!(output.payload["success"], false);
        assert!(!output.payload["error"].as_str().unwrap().is_empty());
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_limits_are_rejected() {
        let backend = Arc::new(FakeBackend::ok());
        let tool = DeepResearchTool::new(backend.clone());

        let output = tool
            .invoke(
                json!({"query": "ai", "max_depth": 0, "time_limit": 180, "max_urls": 10}),
                &EventCollector::disabled(),
            )
            .await;

        assert!(output.is_failure());
        assert!(backend.seen.lock().unwrap().is_empty());
    }
}
