//! Document and page records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Generate a fresh document id.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle status shared by text extraction and audio generation.
///
/// Text extraction moves `pending -> completed` or `pending -> failed`.
/// Audio generation moves `pending -> processing -> completed` or
/// `-> failed`, and `failed -> processing` only through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Terminal states for completion aggregation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Synthesis parameters chosen at upload time and reused for retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisParams {
    pub voice_id: String,
    /// Sampling temperature, `[0, 2]` when present.
    pub temperature: Option<f64>,
    /// Playback speed, `[0.1, 5]`.
    pub speed: f64,
}

impl SynthesisParams {
    /// Validate parameter bounds.
    ///
    /// The HTTP layer calls this before handing work to the engine; the
    /// engine itself trusts its contract boundary and does not re-validate.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(EngineError::Validation(
                    "temperature must be between 0 and 2".to_string(),
                ));
            }
        }
        if !(0.1..=5.0).contains(&self.speed) {
            return Err(EngineError::Validation(
                "speed must be between 0.1 and 5".to_string(),
            ));
        }
        Ok(())
    }
}

/// One page of a document.
///
/// Identified by `(document_id, page_number)`; page numbers are 1-based and
/// contiguous in segmentation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
    pub audio_url: Option<String>,
    pub text_extraction_status: ProcessingStatus,
    pub audio_generation_status: ProcessingStatus,
    /// Handle of the in-flight synthesis job, present iff the page is
    /// `processing`.
    pub job_id: Option<String>,
    pub error: Option<String>,
}

impl Page {
    /// Empty page record created at document initialization.
    pub fn new(page_number: u32) -> Self {
        Self {
            page_number,
            text: String::new(),
            audio_url: None,
            text_extraction_status: ProcessingStatus::Pending,
            audio_generation_status: ProcessingStatus::Pending,
            job_id: None,
            error: None,
        }
    }
}

/// A document being rendered to audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner: String,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub params: SynthesisParams,
    pub total_pages: u32,
    /// Pages whose audio completed successfully. Never exceeds `total_pages`.
    /// Backs the completion guard.
    pub processed_pages: u32,
    /// Set when every page's audio completed successfully. A failed page
    /// keeps this false until a retry brings the page to `completed`.
    pub processing_complete: bool,
    pub pages: Vec<Page>,
}

/// Summary row for the owner's document listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub voice_id: String,
    pub total_pages: u32,
    pub processed_pages: u32,
    pub processing_complete: bool,
}

/// Per-page status slice exposed to the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageStatusView {
    pub page_number: u32,
    pub text_extraction_status: ProcessingStatus,
    pub audio_generation_status: ProcessingStatus,
    pub audio_url: Option<String>,
    pub error: Option<String>,
}

/// Answer to a processing-status query: the completion flag plus a
/// percentage for coarse display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatusView {
    pub processing_complete: bool,
    pub progress: f64,
}

impl ProcessingStatusView {
    pub fn from_document(doc: &Document) -> Self {
        let progress = if doc.total_pages == 0 {
            if doc.processing_complete { 100.0 } else { 0.0 }
        } else {
            f64::from(doc.processed_pages) / f64::from(doc.total_pages) * 100.0
        };
        Self {
            processing_complete: doc.processing_complete,
            progress,
        }
    }
}

/// Answer to a file-progress query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProgress {
    pub total_pages: u32,
    pub processed_pages: u32,
    pub processing_complete: bool,
    pub pages: Vec<PageStatusView>,
}

impl FileProgress {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            total_pages: doc.total_pages,
            processed_pages: doc.processed_pages,
            processing_complete: doc.processing_complete,
            pages: doc
                .pages
                .iter()
                .map(|p| PageStatusView {
                    page_number: p.page_number,
                    text_extraction_status: p.text_extraction_status,
                    audio_generation_status: p.audio_generation_status,
                    audio_url: p.audio_url.clone(),
                    error: p.error.clone(),
                })
                .collect(),
        }
    }
}
