//! Pagevox Core - Per-document text-to-speech job orchestration
//!
//! This crate contains the processing engine that turns an uploaded
//! document's text into per-page audio:
//! - Page segmentation on blank-line boundaries
//! - Concurrent dispatch of external synthesis jobs (Play.ai dialog API)
//! - Fixed-interval polling of outstanding jobs, per document
//! - Completion aggregation with an exactly-once completion flag
//! - Per-page retry and progress broadcast
//!
//! The HTTP/API layer, authentication, and file storage live elsewhere; this
//! crate exposes the engine they call into.

pub mod config;
pub mod error;
pub mod jobs;
pub mod model;
pub mod progress;
pub mod segment;
pub mod store;
pub mod tts;
pub mod voices;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use config::Config;
pub use error::{EngineError, StoreError, TtsError};
pub use jobs::JobOrchestrator;
pub use model::{
    new_document_id, Document, DocumentSummary, FileProgress, Page, PageStatusView,
    ProcessingStatus, ProcessingStatusView, SynthesisParams,
};
pub use progress::{NoOpSink, ProgressBroadcaster, ProgressEvent, ProgressPhase, ProgressSink};
pub use segment::segment_pages;
pub use store::{DocumentShell, DocumentStore, MemoryStore, PageUpdate};
pub use tts::{JobStatus, PlayHtClient, PlayHtConfig, SynthesisRequest, TtsClient};
pub use voices::{available_voices, Voice};

/// Engine root shared across API handlers.
///
/// Owns the store, the synthesis client, the in-process progress broadcaster,
/// and the job orchestrator wired between them.
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    broadcaster: ProgressBroadcaster,
    orchestrator: JobOrchestrator,
}

impl Engine {
    pub fn new(store: Arc<dyn DocumentStore>, tts: Arc<dyn TtsClient>, config: Config) -> Self {
        let broadcaster = ProgressBroadcaster::new();
        let orchestrator = JobOrchestrator::new(
            store.clone(),
            tts,
            Arc::new(broadcaster.clone()),
            config,
        );
        Self {
            store,
            broadcaster,
            orchestrator,
        }
    }

    /// Engine backed by the in-memory store.
    pub fn in_memory(tts: Arc<dyn TtsClient>, config: Config) -> Self {
        Self::new(Arc::new(MemoryStore::new()), tts, config)
    }

    /// Accept an uploaded document's extracted text and start processing it.
    ///
    /// Validates the synthesis parameters, creates the document record,
    /// segments the text into pages, and hands the document to the
    /// orchestrator. Returns the new document id; processing continues in the
    /// background and is observed through [`Engine::subscribe_progress`] and
    /// the status queries.
    pub async fn create_document(
        &self,
        owner: &str,
        file_name: &str,
        text: &str,
        params: SynthesisParams,
    ) -> Result<String, EngineError> {
        params.validate()?;

        let id = new_document_id();
        self.store
            .create_document_shell(DocumentShell {
                id: id.clone(),
                owner: owner.to_string(),
                file_name: file_name.to_string(),
                params: params.clone(),
            })
            .await?;
        tracing::info!(doc_id = %id, file_name = %file_name, "Document created");

        let page_units = segment_pages(text);
        self.orchestrator
            .start_processing(&id, owner, page_units, params)
            .await?;
        Ok(id)
    }

    /// Subscribe to progress events for one document.
    pub fn subscribe_progress(
        &self,
        owner: &str,
        document_id: &str,
    ) -> mpsc::Receiver<ProgressEvent> {
        self.broadcaster.subscribe(owner, document_id)
    }

    /// Drop a progress subscription.
    pub fn unsubscribe_progress(&self, owner: &str, document_id: &str) {
        self.broadcaster.unsubscribe(owner, document_id);
    }

    /// Re-dispatch a single failed page. See [`JobOrchestrator::retry_page`].
    pub async fn retry_page(
        &self,
        document_id: &str,
        page_number: u32,
        owner: &str,
    ) -> Result<(), EngineError> {
        self.orchestrator
            .retry_page(document_id, page_number, owner)
            .await
    }

    /// Full per-page status for one document.
    pub async fn get_file_progress(
        &self,
        document_id: &str,
        owner: &str,
    ) -> Result<FileProgress, EngineError> {
        self.orchestrator.get_file_progress(document_id, owner).await
    }

    /// Coarse completion status for one document.
    pub async fn processing_status(
        &self,
        document_id: &str,
        owner: &str,
    ) -> Result<ProcessingStatusView, EngineError> {
        self.orchestrator.processing_status(document_id, owner).await
    }

    /// All documents for an owner, newest first.
    pub async fn list_documents(&self, owner: &str) -> Result<Vec<DocumentSummary>, EngineError> {
        self.orchestrator.list_documents(owner).await
    }

    /// Delete a document and stop any in-flight work on it.
    pub async fn delete_document(&self, document_id: &str, owner: &str) -> Result<(), EngineError> {
        self.orchestrator.delete_document(document_id, owner).await
    }

    /// Stop all background work. Also happens on drop.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }
}
