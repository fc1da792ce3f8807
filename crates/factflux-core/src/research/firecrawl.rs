use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::{ResearchBackend, ResearchData, ResearchQuery, Source};
use crate::FactFluxError;
use crate::config::ResearchConfig;
use crate::events::EventCollector;
use crate::security::SecretValue;

const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

#[derive(Debug, Clone)]
pub struct FirecrawlConfig {
    pub api_key: SecretValue,
    pub base_url: String,
    pub poll_interval: Duration,
    /// Extra wall time allowed beyond the query's own time limit before giving up.
    pub poll_grace: Duration,
    /// Upper bound on any single HTTP request.
    pub request_timeout: Duration,
}

impl FirecrawlConfig {
    pub fn new(api_key: SecretValue) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(2),
            poll_grace: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_research_config(api_key: SecretValue, config: &ResearchConfig) -> Self {
        Self {
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            poll_interval: config.poll_interval(),
            poll_grace: Duration::from_secs(config.poll_grace_secs),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_grace(mut self, grace: Duration) -> Self {
        self.poll_grace = grace;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Firecrawl deep-research client: starts a job, then polls it to completion.
pub struct FirecrawlClient {
    client: Client,
    config: FirecrawlConfig,
}

impl FirecrawlClient {
    pub fn new(config: FirecrawlConfig) -> Result<Self, FactFluxError> {
        let client = Client::builder()
            .user_agent(concat!("factflux/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| {
                FactFluxError::Research(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self { client, config })
    }

    async fn start_job(&self, query: &ResearchQuery) -> Result<String, FactFluxError> {
        let body = StartRequest {
            query: &query.query,
            max_depth: query.max_depth,
            time_limit: query.time_limit,
            max_urls: query.max_urls,
        };

        let response = self
            .client
            .post(self.config.url("/v1/deep-research"))
            .bearer_auth(self.config.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|err| FactFluxError::Research(format!("request failed: {err}")))?;

        let started: StartResponse = decode(response).await?;
        match (started.success, started.id) {
            (true, Some(id)) => Ok(id),
            (_, _) => Err(FactFluxError::Research(
                started
                    .error
                    .unwrap_or_else(|| "deep research job was not accepted".to_string()),
            )),
        }
    }

    async fn poll_status(&self, id: &str) -> Result<StatusResponse, FactFluxError> {
        let response = self
            .client
            .get(self.config.url(&format!("/v1/deep-research/{id}")))
            .bearer_auth(self.config.api_key.expose())
            .send()
            .await
            .map_err(|err| FactFluxError::Research(format!("status request failed: {err}")))?;
        decode(response).await
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, FactFluxError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(FactFluxError::Research(format!(
            "API error {status}: {}",
            text.trim()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| FactFluxError::Research(format!("invalid response body: {err}")))
}

impl FirecrawlClient {
    /// Starts the job and polls until it completes or fails.
    async fn run_job(
        &self,
        query: &ResearchQuery,
        progress: &EventCollector,
    ) -> Result<ResearchData, FactFluxError> {
        let id = self.start_job(query).await?;
        info!(job_id = %id, "deep research job started");

        let mut seen_activities = 0usize;

        loop {
            let status = self.poll_status(&id).await?;

            let activities = status.activities();
            if activities.len() > seen_activities {
                for activity in &activities[seen_activities..] {
                    progress.emit_activity(
                        activity.kind.clone(),
                        activity.message.clone(),
                        activity.depth,
                    );
                }
                seen_activities = activities.len();
            }

            match status.status.as_deref() {
                Some("completed") => {
                    let data = status.data.unwrap_or_default();
                    let final_analysis = data.final_analysis.unwrap_or_default();
                    if final_analysis.trim().is_empty() {
                        return Err(FactFluxError::Research(
                            "deep research completed without an analysis".into(),
                        ));
                    }
                    info!(
                        job_id = %id,
                        sources_count = data.sources.len(),
                        "deep research job completed"
                    );
                    return Ok(ResearchData {
                        final_analysis,
                        sources: data.sources,
                    });
                }
                Some("failed") | Some("cancelled") => {
                    let reason = status
                        .error
                        .unwrap_or_else(|| "deep research job failed".to_string());
                    warn!(job_id = %id, %reason, "deep research job failed");
                    return Err(FactFluxError::Research(reason));
                }
                other => {
                    debug!(job_id = %id, status = ?other, "deep research in progress");
                }
            }

            sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl ResearchBackend for FirecrawlClient {
    /// The whole job, requests included, is bounded by `time_limit + poll_grace`.
    #[instrument(name = "research.firecrawl", skip(self, query, progress), fields(query = %query.query))]
    async fn deep_research(
        &self,
        query: &ResearchQuery,
        progress: &EventCollector,
    ) -> Result<ResearchData, FactFluxError> {
        query.validate()?;

        let budget = Duration::from_secs(u64::from(query.time_limit)) + self.config.poll_grace;
        match timeout(budget, self.run_job(query, progress)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(budget_secs = budget.as_secs(), "deep research deadline reached");
                Err(FactFluxError::Research(format!(
                    "deep research did not finish within {}s",
                    budget.as_secs()
                )))
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    query: &'a str,
    max_depth: u32,
    time_limit: u32,
    max_urls: u32,
}

#[derive(Deserialize)]
struct StartResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<StatusData>,
    #[serde(default)]
    activities: Option<Vec<Activity>>,
    #[serde(default)]
    error: Option<String>,
}

impl StatusResponse {
    fn activities(&self) -> &[Activity] {
        if let Some(activities) = &self.activities {
            return activities;
        }
        self.data
            .as_ref()
            .map(|data| data.activities.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    #[serde(default)]
    final_analysis: Option<String>,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    activities: Vec<Activity>,
}

#[derive(Deserialize)]
struct Activity {
    #[serde(rename = "type", default = "Activity::default_kind")]
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    depth: Option<u32>,
}

impl Activity {
    fn default_kind() -> String {
        "activity".to_string()
    }
}
