//! Deep-research service boundary.

mod firecrawl;

pub use firecrawl::{FirecrawlClient, FirecrawlConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::FactFluxError;
use crate::events::EventCollector;

pub const DEFAULT_MAX_DEPTH: u32 = 3;
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 180;
pub const DEFAULT_MAX_URLS: u32 = 10;

/// Parameters of one deep-research request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub query: String,
    pub max_depth: u32,
    /// Time budget in seconds.
    pub time_limit: u32,
    pub max_urls: u32,
}

impl ResearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_depth: DEFAULT_MAX_DEPTH,
            time_limit: DEFAULT_TIME_LIMIT_SECS,
            max_urls: DEFAULT_MAX_URLS,
        }
    }

    pub fn with_limits(mut self, max_depth: u32, time_limit: u32, max_urls: u32) -> Self {
        self.max_depth = max_depth;
        self.time_limit = time_limit;
        self.max_urls = max_urls;
        self
    }

    pub fn validate(&self) -> Result<(), FactFluxError> {
        if self.query.trim().is_empty() {
            return Err(FactFluxError::InvalidInput(
                "research query must not be empty".into(),
            ));
        }
        if self.max_depth == 0 || self.time_limit == 0 || self.max_urls == 0 {
            return Err(FactFluxError::InvalidInput(
                "max_depth, time_limit and max_urls must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A source consulted by the research service. Unknown fields are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Source {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            description: None,
            extra: Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// What a backend returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchData {
    pub final_analysis: String,
    pub sources: Vec<Source>,
}

/// Outcome of the deep research tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchResult {
    Success {
        final_analysis: String,
        sources: Vec<Source>,
        sources_count: usize,
    },
    Failure {
        error: String,
    },
}

impl ResearchResult {
    pub fn success(data: ResearchData) -> Self {
        let sources_count = data.sources.len();
        Self::Success {
            final_analysis: data.final_analysis,
            sources: data.sources,
            sources_count,
        }
    }

    /// Failure with a guaranteed non-empty message.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "deep research failed without an error message".to_string()
        } else {
            error
        };
        Self::Failure { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failure { error } => Some(error),
            Self::Success { .. } => None,
        }
    }

    /// JSON shape handed back to the model.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success {
                final_analysis,
                sources,
                sources_count,
            } => json!({
                "success": true,
                "final_analysis": final_analysis,
                "sources_count": sources_count,
                "sources": sources,
            }),
            Self::Failure { error } => json!({
                "success": false,
                "error": error,
            }),
        }
    }
}

/// External deep-research service. Implementations forward service activity to
/// `progress` while the request is in flight.
#[async_trait]
pub trait ResearchBackend: Send + Sync {
    async fn deep_research(
        &self,
        query: &ResearchQuery,
        progress: &EventCollector,
    ) -> Result<ResearchData, FactFluxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_recommended_limits() {
        let query = ResearchQuery::new("Latest developments in AI");
        assert_eq!(query.max_depth, 3);
        assert_eq!(query.time_limit, 180);
        assert_eq!(query.max_urls, 10);
        assert!(query.validate().is_ok());
    }

    #[test]
    fn rejects_blank_query_and_zero_limits() {
        assert!(ResearchQuery::new("  ").validate().is_err());
        assert!(
            ResearchQuery::new("ai")
                .with_limits(3, 0, 10)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn success_counts_sources() {
        let result = ResearchResult::success(ResearchData {
            final_analysis: "X".into(),
            sources: vec![Source::new("https://a"), Source::new("https://b")],
        });
        let value = result.to_value();
        assert_eq!(value["success"], true);
        assert_eq!(value["sources_count"], 2);
        assert_eq!(value["sources"][1]["url"], "https://b");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn failure_never_has_empty_error() {
        let result = ResearchResult::failure("");
        assert!(!result.is_success());
        assert!(!result.error().unwrap().is_empty());
        let value = result.to_value();
        assert_eq!(value["success"], false);
    }

    #[test]
    fn source_preserves_unknown_fields() {
        let source: Source = serde_json::from_value(json!({
            "url": "https://example.com",
            "title": "Example",
            "favicon": "https://example.com/favicon.ico"
        }))
        .unwrap();
        assert_eq!(source.title.as_deref(), Some("Example"));
        assert_eq!(source.extra["favicon"], "https://example.com/favicon.ico");
        let back = serde_json::to_value(&source).unwrap();
        assert_eq!(back["favicon"], "https://example.com/favicon.ico");
    }
}
