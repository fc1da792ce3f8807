use anyhow::{Context, Result};
use factflux_core::{Config, ConfigLoader};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub listen_addr: String,
    pub max_concurrency: usize,
    pub auth_token: Option<String>,
    /// Finished sessions older than this are dropped.
    pub session_ttl: Duration,
    /// Upper bound on finished sessions kept in memory.
    pub max_finished_sessions: usize,
    pub pipeline: Config,
}

impl AppConfig {
    const DEFAULT_LISTEN_ADDR: &'static str = "0.0.0.0:8080";
    const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
    const DEFAULT_MAX_FINISHED_SESSIONS: usize = 256;

    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("FACTFLUX_API_ADDR")
            .unwrap_or_else(|_| Self::DEFAULT_LISTEN_ADDR.to_string());

        let max_concurrency = env::var("FACTFLUX_API_MAX_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|nz| nz.get())
                    .unwrap_or(4)
            });

        let auth_token = env::var("FACTFLUX_API_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let session_ttl = env::var("FACTFLUX_API_SESSION_TTL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(Self::DEFAULT_SESSION_TTL_SECS));

        let max_finished_sessions = env::var("FACTFLUX_API_MAX_SESSIONS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(Self::DEFAULT_MAX_FINISHED_SESSIONS);

        let pipeline =
            ConfigLoader::load(None).context("failed to load pipeline configuration")?;

        Ok(Self {
            listen_addr,
            max_concurrency,
            auth_token,
            session_ttl,
            max_finished_sessions,
            pipeline,
        })
    }

    /// Local defaults: loopback address, two concurrent sessions, no auth.
    pub fn local(pipeline: Config) -> Self {
        Self {
            listen_addr: "127.0.0.1:0".into(),
            max_concurrency: 2,
            auth_token: None,
            session_ttl: Duration::from_secs(Self::DEFAULT_SESSION_TTL_SECS),
            max_finished_sessions: Self::DEFAULT_MAX_FINISHED_SESSIONS,
            pipeline,
        }
    }
}
