use std::path::PathBuf;

use thiserror::Error;

/// Core error type for FactFlux.
#[derive(Debug, Error)]
pub enum FactFluxError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("missing credential: {0}")]
    MissingSecret(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("language model error: {0}")]
    Llm(String),
    #[error("agent `{agent}` produced unusable output: {reason}")]
    MalformedOutput { agent: String, reason: String },
    #[error("agent `{agent}` timed out after {seconds}s waiting for the model")]
    AgentTimeout { agent: String, seconds: u64 },
    #[error("agent `{agent}` exceeded {max_turns} turns without a final answer")]
    TurnLimitExceeded { agent: String, max_turns: usize },
    #[error("research backend error: {0}")]
    Research(String),
    #[error("deep research unavailable: {0}")]
    ResearchUnavailable(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FactFluxError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn malformed(agent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedOutput {
            agent: agent.into(),
            reason: reason.into(),
        }
    }

    /// Preflight failures are raised before any external call is attempted.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::MissingSecret(_) | Self::InvalidInput(_) | Self::InvalidConfiguration(_)
        )
    }
}

pub type Result<T, E = FactFluxError> = std::result::Result<T, E>;
