//! Speech synthesis provider interface.
//!
//! Synthesis is an external asynchronous job: submission returns a handle,
//! and the handle is polled until the provider reports a terminal state.

mod playht;

pub use playht::{PlayHtClient, PlayHtConfig};

use async_trait::async_trait;

use crate::error::TtsError;
use crate::model::SynthesisParams;

/// One page of text to synthesize.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub temperature: Option<f64>,
    pub speed: f64,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, params: &SynthesisParams) -> Self {
        Self {
            text: text.into(),
            voice_id: params.voice_id.clone(),
            temperature: params.temperature,
            speed: params.speed,
        }
    }
}

/// Provider-side state of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Still rendering; query again next cycle.
    Pending,
    /// Rendered audio is available at `url`.
    Completed { url: String },
    /// The provider gave up on this job.
    Failed { error: String },
}

/// Client for the external synthesis service.
#[async_trait]
pub trait TtsClient: Send + Sync {
    /// Submit one page for synthesis; returns the provider's job handle.
    async fn submit(&self, request: &SynthesisRequest) -> Result<String, TtsError>;

    /// Query the state of a previously submitted job.
    async fn query_status(&self, job_id: &str) -> Result<JobStatus, TtsError>;
}
