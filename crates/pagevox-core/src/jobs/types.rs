//! Queue job types for the orchestration pipeline.

use crate::model::SynthesisParams;

/// A document handed to the dispatch worker pool.
#[derive(Debug, Clone)]
pub struct ProcessJob {
    pub document_id: String,
    pub owner: String,
    /// Segmented page units in page-number order (1-based position).
    pub page_units: Vec<String>,
    pub params: SynthesisParams,
}

/// Ephemeral association between a page and its live synthesis job handle.
/// Held in a polling scope for the lifetime of one polling cycle set;
/// recreated on retry.
#[derive(Debug, Clone)]
pub struct PageJob {
    pub page_number: u32,
    pub job_id: String,
}
