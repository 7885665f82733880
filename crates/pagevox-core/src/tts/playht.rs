//! Play.ai dialog API client.
//!
//! Submission POSTs one page of text and returns the provider's job id; the
//! job is then polled via GET until `output.status` goes terminal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TtsError;

use super::{JobStatus, SynthesisRequest, TtsClient};

const DEFAULT_API_URL: &str = "https://api.play.ai/api/v1/tts";
const PROVIDER_MODEL: &str = "PlayDialog";

/// Credentials and endpoint for the Play.ai API.
#[derive(Debug, Clone)]
pub struct PlayHtConfig {
    pub api_url: String,
    pub api_key: String,
    pub user_id: String,
}

impl PlayHtConfig {
    /// Read credentials from `PLAYHT_API_KEY` and `PLAYHT_USER_ID`.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_url: std::env::var("PLAYHT_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into()),
            api_key: std::env::var("PLAYHT_API_KEY")
                .map_err(|_| anyhow::anyhow!("PLAYHT_API_KEY not set"))?,
            user_id: std::env::var("PLAYHT_USER_ID")
                .map_err(|_| anyhow::anyhow!("PLAYHT_USER_ID not set"))?,
        })
    }
}

/// reqwest-backed [`TtsClient`] for Play.ai.
pub struct PlayHtClient {
    client: reqwest::Client,
    config: PlayHtConfig,
}

impl PlayHtClient {
    pub fn new(config: PlayHtConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    model: &'static str,
    text: &'a str,
    voice: &'a str,
    speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    output: StatusOutput,
}

#[derive(Debug, Deserialize)]
struct StatusOutput {
    status: String,
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl TtsClient for PlayHtClient {
    async fn submit(&self, request: &SynthesisRequest) -> Result<String, TtsError> {
        let body = SubmitBody {
            model: PROVIDER_MODEL,
            text: &request.text,
            voice: &request.voice_id,
            speed: request.speed,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("AUTHORIZATION", &self.config.api_key)
            .header("X-USER-ID", &self.config.user_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(TtsError::Rejected(format!("{status}: {detail}")));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| TtsError::Rejected(format!("malformed submit response: {e}")))?;

        tracing::debug!(job_id = %submitted.id, "Synthesis job submitted");
        Ok(submitted.id)
    }

    async fn query_status(&self, job_id: &str) -> Result<JobStatus, TtsError> {
        let url = format!("{}/{}", self.config.api_url, job_id);
        let response = self
            .client
            .get(&url)
            .header("AUTHORIZATION", &self.config.api_key)
            .header("X-USER-ID", &self.config.user_id)
            .send()
            .await
            .map_err(|e| TtsError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TtsError::Unavailable(format!(
                "status query returned {}",
                response.status()
            )));
        }

        let status: StatusResponse = response
            .json()
            .await
            .map_err(|e| TtsError::Unavailable(format!("malformed status response: {e}")))?;

        match status.output.status.as_str() {
            "COMPLETED" => match status.output.url {
                Some(url) => Ok(JobStatus::Completed { url }),
                // Completed without a URL is unusable; treat as failed.
                None => Ok(JobStatus::Failed {
                    error: "provider reported completion without an audio url".to_string(),
                }),
            },
            "FAILED" => Ok(JobStatus::Failed {
                error: status
                    .output
                    .error
                    .unwrap_or_else(|| "provider reported failure".to_string()),
            }),
            _ => Ok(JobStatus::Pending),
        }
    }
}
