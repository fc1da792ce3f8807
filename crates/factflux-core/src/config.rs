use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::security::{CredentialInputs, optional_env};
use crate::FactFluxError;

const DEFAULT_CONFIG_PATH: &str = "factflux.toml";
const CONFIG_PATH_ENV: &str = "FACTFLUX_CONFIG";
const SUPPORTED_LLM_PROVIDER: &str = "openai";
const SUPPORTED_RESEARCH_PROVIDER: &str = "firecrawl";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Credential values discoverable from the environment variables named in config.
    pub fn credentials_from_env(&self) -> CredentialInputs {
        CredentialInputs::new(
            optional_env(&self.llm.api_key_env).map(|s| s.expose().to_string()),
            optional_env(&self.research.api_key_env).map(|s| s.expose().to_string()),
        )
    }

    /// Names used to label missing credentials in errors.
    pub fn credential_names(&self) -> (&str, &str) {
        (&self.llm.api_key_env, &self.research.api_key_env)
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `FACTFLUX_CONFIG` environment variable.
    /// 3. `factflux.toml` in the current working directory.
    ///
    /// Only the implicit default file may be absent; built-in defaults are used then.
    pub fn load(path: Option<PathBuf>) -> Result<Config, FactFluxError> {
        let (candidate, explicit) = resolve_path(path);
        if !explicit && !candidate.exists() {
            let config = Config::default();
            Self::validate(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&candidate)
            .map_err(|err| FactFluxError::config_io(candidate.clone(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Config, FactFluxError> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| FactFluxError::InvalidConfiguration(err.to_string()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &Config) -> Result<(), FactFluxError> {
        if !config.llm.provider.eq_ignore_ascii_case(SUPPORTED_LLM_PROVIDER) {
            return Err(FactFluxError::InvalidConfiguration(format!(
                "unsupported llm.provider `{}` (expected `{SUPPORTED_LLM_PROVIDER}`)",
                config.llm.provider
            )));
        }
        if !config
            .research
            .provider
            .eq_ignore_ascii_case(SUPPORTED_RESEARCH_PROVIDER)
        {
            return Err(FactFluxError::InvalidConfiguration(format!(
                "unsupported research.provider `{}` (expected `{SUPPORTED_RESEARCH_PROVIDER}`)",
                config.research.provider
            )));
        }
        if config.llm.api_key_env.trim().is_empty() {
            return Err(FactFluxError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.research.api_key_env.trim().is_empty() {
            return Err(FactFluxError::InvalidConfiguration(
                "research.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.llm.model.trim().is_empty() {
            return Err(FactFluxError::InvalidConfiguration(
                "llm.model must not be empty".into(),
            ));
        }
        if config.research.max_depth == 0
            || config.research.time_limit_secs == 0
            || config.research.max_urls == 0
        {
            return Err(FactFluxError::InvalidConfiguration(
                "research.max_depth, research.time_limit_secs and research.max_urls must be positive"
                    .into(),
            ));
        }
        if config.agent.max_turns == 0 {
            return Err(FactFluxError::InvalidConfiguration(
                "agent.max_turns must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV)
        && !from_env.trim().is_empty()
    {
        return (PathBuf::from(from_env), true);
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_provider")]
    pub provider: String,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    #[serde(default = "LlmConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl LlmConfig {
    fn default_provider() -> String {
        "openai".to_string()
    }

    fn default_model() -> String {
        "gpt-4o".to_string()
    }

    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            model: Self::default_model(),
            api_key_env: Self::default_api_key_env(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchConfig {
    #[serde(default = "ResearchConfig::default_provider")]
    pub provider: String,
    #[serde(default = "ResearchConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "ResearchConfig::default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "ResearchConfig::default_time_limit_secs")]
    pub time_limit_secs: u32,
    #[serde(default = "ResearchConfig::default_max_urls")]
    pub max_urls: u32,
    #[serde(default = "ResearchConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "ResearchConfig::default_poll_grace_secs")]
    pub poll_grace_secs: u64,
}

impl ResearchConfig {
    fn default_provider() -> String {
        "firecrawl".to_string()
    }

    fn default_api_key_env() -> String {
        "FIRECRAWL_API_KEY".to_string()
    }

    const fn default_max_depth() -> u32 {
        3
    }

    const fn default_time_limit_secs() -> u32 {
        180
    }

    const fn default_max_urls() -> u32 {
        10
    }

    const fn default_poll_interval_ms() -> u64 {
        2_000
    }

    const fn default_poll_grace_secs() -> u64 {
        60
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            api_key_env: Self::default_api_key_env(),
            base_url: None,
            max_depth: Self::default_max_depth(),
            time_limit_secs: Self::default_time_limit_secs(),
            max_urls: Self::default_max_urls(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            poll_grace_secs: Self::default_poll_grace_secs(),
        }
    }
}

/// Limits applied to every agent's generate / tool loop.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "AgentSettings::default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "AgentSettings::default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

impl AgentSettings {
    const fn default_max_turns() -> usize {
        8
    }

    const fn default_turn_timeout_secs() -> u64 {
        300
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: Self::default_max_turns(),
            turn_timeout_secs: Self::default_turn_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ConfigLoader::from_toml("").expect("defaults should validate");
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.research.api_key_env, "FIRECRAWL_API_KEY");
        assert_eq!(config.research.max_depth, 3);
        assert_eq!(config.research.time_limit_secs, 180);
        assert_eq!(config.research.max_urls, 10);
        assert_eq!(config.research.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn parses_overrides() {
        let raw = r#"
            [llm]
            model = "gpt-4o-mini"
            base_url = "http://localhost:9000/v1"

            [research]
            max_urls = 25
            poll_interval_ms = 500

            [agent]
            max_turns = 3
        "#;
        let config = ConfigLoader::from_toml(raw).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.base_url.as_deref(), Some("http://localhost:9000/v1"));
        assert_eq!(config.research.max_urls, 25);
        assert_eq!(config.agent.max_turns, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_zero_research_knobs() {
        let err = ConfigLoader::from_toml("[research]\nmax_depth = 0\n").unwrap_err();
        assert!(matches!(err, FactFluxError::InvalidConfiguration(_)));
    }

    #[test]
    fn rejects_blank_key_env() {
        let err = ConfigLoader::from_toml("[llm]\napi_key_env = \"  \"\n").unwrap_err();
        assert!(err.to_string().contains("llm.api_key_env"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = ConfigLoader::from_toml("[research]\nprovider = \"tavily\"\n").unwrap_err();
        assert!(err.to_string().contains("research.provider"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/factflux.toml")))
            .unwrap_err();
        assert!(matches!(err, FactFluxError::ConfigIo { .. }));
    }
}
