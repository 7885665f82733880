//! Per-document job orchestration.
//!
//! Control flow:
//!
//! ```text
//! start_processing()
//!       │  writes total + pending page records
//!       ▼
//!  dispatch queue ──► worker pool ──► one synthesis job per page
//!                                          │
//!                                          ▼
//!                                   polling scope (per document)
//!                                          │  fixed interval
//!                                          ▼
//!                            page completed / failed, counters,
//!                            progress events, completion flag
//!
//! retry_page() re-enters at dispatch for one page and gets its own
//! single-page polling scope.
//! ```
//!
//! The store is the single source of truth for page state; polling scopes
//! hold only the ephemeral job-handle associations.

mod poller;
mod types;
mod workers;

pub use types::{PageJob, ProcessJob};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::EngineError;
use crate::model::{
    DocumentSummary, FileProgress, Page, ProcessingStatusView, SynthesisParams,
};
use crate::progress::{ProgressEvent, ProgressPhase, ProgressSink};
use crate::store::{DocumentStore, PageUpdate};
use crate::tts::{SynthesisRequest, TtsClient};

use poller::{spawn_poll_scope, PollContext, PollerRegistry};
use workers::{spawn_dispatch_workers, SharedReceiver};

/// Supervises every document's journey from segmented text to rendered
/// audio: dispatch, polling, retry, completion detection, and progress
/// broadcast.
pub struct JobOrchestrator {
    store: Arc<dyn DocumentStore>,
    tts: Arc<dyn TtsClient>,
    progress: Arc<dyn ProgressSink>,
    config: Config,
    process_tx: mpsc::UnboundedSender<ProcessJob>,
    registry: PollerRegistry,
    cancel: CancellationToken,
}

impl JobOrchestrator {
    /// Create the orchestrator and spawn its dispatch worker pool.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tts: Arc<dyn TtsClient>,
        progress: Arc<dyn ProgressSink>,
        config: Config,
    ) -> Self {
        let cancel = CancellationToken::new();
        let registry = PollerRegistry::new(cancel.child_token());

        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let ctx = PollContext {
            store: store.clone(),
            tts: tts.clone(),
            progress: progress.clone(),
            interval: config.poll_interval,
        };
        spawn_dispatch_workers(
            config.dispatch_workers,
            SharedReceiver::new(process_rx),
            ctx,
            registry.clone(),
        );

        tracing::info!(
            workers = config.dispatch_workers,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "Job orchestrator started"
        );

        Self {
            store,
            tts,
            progress,
            config,
            process_tx,
            registry,
            cancel,
        }
    }

    /// Begin processing a document whose shell already exists in the store.
    ///
    /// `page_units` come from [`crate::segment::segment_pages`]; parameter
    /// bounds were validated by the caller. Writes the page records, then
    /// enqueues the document for dispatch. A zero-page document completes
    /// immediately and never reaches the queue.
    pub async fn start_processing(
        &self,
        document_id: &str,
        owner: &str,
        page_units: Vec<String>,
        params: SynthesisParams,
    ) -> Result<(), EngineError> {
        // Existence and ownership check before any mutation.
        self.store.get_document(document_id, owner).await?;

        let total = page_units.len() as u32;
        let pages: Vec<Page> = (1..=total).map(Page::new).collect();
        self.store.set_pages(document_id, pages).await?;

        if page_units.is_empty() {
            if self.store.set_completion_flag(document_id).await? {
                tracing::info!(doc_id = %document_id, "Zero-page document complete");
            }
            self.progress.publish(
                owner,
                document_id,
                ProgressEvent {
                    phase: ProgressPhase::Audio,
                    completed_pages: 0,
                    total_pages: 0,
                    page_number: None,
                    completed_job_ids: Some(Vec::new()),
                },
            );
            return Ok(());
        }

        self.process_tx
            .send(ProcessJob {
                document_id: document_id.to_string(),
                owner: owner.to_string(),
                page_units,
                params,
            })
            .map_err(|_| EngineError::Precondition("dispatch queue is closed".to_string()))?;
        Ok(())
    }

    /// Re-dispatch a single failed page without disturbing its siblings.
    ///
    /// The page must currently be `failed`; otherwise this returns a
    /// precondition error and mutates nothing. A successful re-submission
    /// starts a fresh single-page polling scope, which re-evaluates document
    /// completion when the page resolves.
    pub async fn retry_page(
        &self,
        document_id: &str,
        page_number: u32,
        owner: &str,
    ) -> Result<(), EngineError> {
        let doc = self.store.get_document(document_id, owner).await?;
        let page = doc
            .pages
            .iter()
            .find(|p| p.page_number == page_number)
            .ok_or(EngineError::NotFound)?;
        let text = page.text.clone();

        // The failed -> processing transition is atomic in the store, so
        // concurrent retries of the same page admit exactly one caller.
        if !self.store.begin_page_retry(document_id, page_number).await? {
            return Err(EngineError::Precondition(format!(
                "page {page_number} is not failed, only failed pages can be retried"
            )));
        }

        let request = SynthesisRequest::new(text, &doc.params);
        match self.tts.submit(&request).await {
            Ok(job_id) => {
                self.store
                    .update_page_fields(
                        document_id,
                        page_number,
                        PageUpdate::job_submitted(job_id.clone()),
                    )
                    .await?;
                tracing::info!(
                    doc_id = %document_id,
                    page = page_number,
                    job_id = %job_id,
                    "Page retry submitted"
                );

                let ctx = PollContext {
                    store: self.store.clone(),
                    tts: self.tts.clone(),
                    progress: self.progress.clone(),
                    interval: self.config.poll_interval,
                };
                let cancel = self.registry.acquire(document_id);
                spawn_poll_scope(
                    ctx,
                    self.registry.clone(),
                    owner.to_string(),
                    document_id.to_string(),
                    vec![PageJob {
                        page_number,
                        job_id,
                    }],
                    cancel,
                );
                Ok(())
            }
            Err(e) => {
                // Revert to failed with the new error; reported through the
                // status surface, not to the caller.
                tracing::error!(
                    doc_id = %document_id,
                    page = page_number,
                    error = %e,
                    "Page retry submission failed"
                );
                self.store
                    .update_page_fields(
                        document_id,
                        page_number,
                        PageUpdate::audio_failed(e.to_string()),
                    )
                    .await?;
                self.progress.publish(
                    owner,
                    document_id,
                    ProgressEvent {
                        phase: ProgressPhase::Audio,
                        completed_pages: doc.processed_pages,
                        total_pages: doc.total_pages,
                        page_number: Some(page_number),
                        completed_job_ids: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// Full per-page status for one document.
    pub async fn get_file_progress(
        &self,
        document_id: &str,
        owner: &str,
    ) -> Result<FileProgress, EngineError> {
        let doc = self.store.get_document(document_id, owner).await?;
        Ok(FileProgress::from_document(&doc))
    }

    /// Coarse completion status for one document.
    pub async fn processing_status(
        &self,
        document_id: &str,
        owner: &str,
    ) -> Result<ProcessingStatusView, EngineError> {
        let doc = self.store.get_document(document_id, owner).await?;
        Ok(ProcessingStatusView::from_document(&doc))
    }

    /// All documents for an owner, newest first.
    pub async fn list_documents(&self, owner: &str) -> Result<Vec<DocumentSummary>, EngineError> {
        Ok(self.store.list_documents(owner).await?)
    }

    /// Delete a document and tear down its polling scopes.
    ///
    /// In-flight cycles that already passed the cancellation check observe
    /// the record's disappearance as not-found and end silently.
    pub async fn delete_document(&self, document_id: &str, owner: &str) -> Result<(), EngineError> {
        self.store.delete_document(document_id, owner).await?;
        self.registry.cancel_document(document_id);
        tracing::info!(doc_id = %document_id, "Document deleted");
        Ok(())
    }

    /// Stop all polling scopes. Dispatch workers stop when the orchestrator
    /// is dropped and the queue closes.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        tracing::info!("Job orchestrator shutdown requested");
    }
}

impl Drop for JobOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::TtsError;
    use crate::model::{Document, ProcessingStatus};
    use crate::segment::segment_pages;
    use crate::store::{DocumentShell, MemoryStore};
    use crate::tts::JobStatus;

    /// Scripted synthesis provider. Outcomes are keyed by page text so tests
    /// can decide each page's fate before job ids exist.
    #[derive(Default)]
    struct ScriptedTts {
        counter: AtomicU32,
        fail_submit: Mutex<HashSet<String>>,
        outcomes: Mutex<HashMap<String, JobStatus>>,
        job_texts: Mutex<HashMap<String, String>>,
        submissions: Mutex<Vec<String>>,
    }

    impl ScriptedTts {
        fn fail_submission_of(&self, text: &str) {
            self.fail_submit.lock().unwrap().insert(text.to_string());
        }

        fn allow_submission_of(&self, text: &str) {
            self.fail_submit.lock().unwrap().remove(text);
        }

        fn set_outcome(&self, text: &str, status: JobStatus) {
            self.outcomes
                .lock()
                .unwrap()
                .insert(text.to_string(), status);
        }

        fn clear_outcome(&self, text: &str) {
            self.outcomes.lock().unwrap().remove(text);
        }

        fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TtsClient for ScriptedTts {
        async fn submit(&self, request: &SynthesisRequest) -> Result<String, TtsError> {
            if self.fail_submit.lock().unwrap().contains(&request.text) {
                return Err(TtsError::Rejected("provider refused the text".to_string()));
            }
            let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
            let job_id = format!("job-{n}");
            self.job_texts
                .lock()
                .unwrap()
                .insert(job_id.clone(), request.text.clone());
            self.submissions.lock().unwrap().push(request.text.clone());
            Ok(job_id)
        }

        async fn query_status(&self, job_id: &str) -> Result<JobStatus, TtsError> {
            let text = self
                .job_texts
                .lock()
                .unwrap()
                .get(job_id)
                .cloned()
                .ok_or_else(|| TtsError::Unavailable("unknown job".to_string()))?;
            let scripted = self.outcomes.lock().unwrap().get(&text).cloned();
            Ok(scripted.unwrap_or(JobStatus::Completed {
                url: format!("https://audio.test/{job_id}.mp3"),
            }))
        }
    }

    /// Captures published events for assertions.
    #[derive(Default)]
    struct CaptureSink {
        events: Mutex<Vec<(String, ProgressEvent)>>,
    }

    impl ProgressSink for CaptureSink {
        fn publish(&self, _owner: &str, document_id: &str, event: ProgressEvent) {
            self.events
                .lock()
                .unwrap()
                .push((document_id.to_string(), event));
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        tts: Arc<ScriptedTts>,
        sink: Arc<CaptureSink>,
        orchestrator: JobOrchestrator,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn harness() -> Harness {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let tts = Arc::new(ScriptedTts::default());
        let sink = Arc::new(CaptureSink::default());
        let config = Config {
            poll_interval: Duration::from_millis(10),
            dispatch_workers: 2,
        };
        let orchestrator = JobOrchestrator::new(
            store.clone() as Arc<dyn DocumentStore>,
            tts.clone() as Arc<dyn TtsClient>,
            sink.clone() as Arc<dyn ProgressSink>,
            config,
        );
        Harness {
            store,
            tts,
            sink,
            orchestrator,
        }
    }

    fn params() -> SynthesisParams {
        SynthesisParams {
            voice_id: "voice-1".to_string(),
            temperature: Some(0.8),
            speed: 1.0,
        }
    }

    async fn seed(store: &MemoryStore, id: &str, owner: &str) {
        store
            .create_document_shell(DocumentShell {
                id: id.to_string(),
                owner: owner.to_string(),
                file_name: "book.pdf".to_string(),
                params: params(),
            })
            .await
            .unwrap();
    }

    /// Poll the store until `pred` holds or a deadline passes.
    async fn wait_for<F>(store: &MemoryStore, id: &str, owner: &str, pred: F) -> Document
    where
        F: Fn(&Document) -> bool,
    {
        for _ in 0..500 {
            if let Ok(doc) = store.get_document(id, owner).await {
                if pred(&doc) {
                    return doc;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within deadline");
    }

    fn page<'a>(doc: &'a Document, n: u32) -> &'a crate::model::Page {
        doc.pages.iter().find(|p| p.page_number == n).unwrap()
    }

    #[tokio::test]
    async fn three_pages_all_complete() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;

        let units = segment_pages("One\n\nTwo\n\nThree");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();

        let doc = wait_for(&h.store, "d1", "alice", |d| d.processing_complete).await;
        assert_eq!(doc.total_pages, 3);
        assert_eq!(doc.processed_pages, 3);
        for n in 1..=3 {
            let p = page(&doc, n);
            assert_eq!(p.text_extraction_status, ProcessingStatus::Completed);
            assert_eq!(p.audio_generation_status, ProcessingStatus::Completed);
            assert!(p.audio_url.as_deref().unwrap().starts_with("https://"));
            assert!(p.job_id.is_none());
            assert!(p.error.is_none());
        }

        // Events: extraction per page, audio per page transition, and the
        // per-cycle snapshots. Counts never exceed the total.
        let events = h.sink.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|(_, e)| e.phase == ProgressPhase::Extraction && e.page_number.is_some()));
        assert!(events
            .iter()
            .any(|(_, e)| e.phase == ProgressPhase::Audio && e.page_number.is_some()));
        assert!(events
            .iter()
            .any(|(_, e)| e.completed_job_ids.is_some()));
        assert!(events.iter().all(|(_, e)| e.completed_pages <= 3));
        drop(events);

        // The finished polling scope released its registry entry.
        for _ in 0..100 {
            if h.orchestrator.registry.tracked_documents() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.orchestrator.registry.tracked_documents(), 0);
    }

    #[tokio::test]
    async fn failed_page_blocks_completion() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;
        h.tts.set_outcome(
            "Two",
            JobStatus::Failed {
                error: "render failed".to_string(),
            },
        );

        let units = segment_pages("One\n\nTwo\n\nThree");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();

        let doc = wait_for(&h.store, "d1", "alice", |d| {
            d.processed_pages == 2
                && page_status(d, 2) == ProcessingStatus::Failed
        })
        .await;

        assert_eq!(doc.total_pages, 3);
        assert!(!doc.processing_complete);
        let failed = page(&doc, 2);
        assert!(!failed.error.as_deref().unwrap().is_empty());
        assert!(failed.job_id.is_none());
        assert_eq!(page(&doc, 1).audio_generation_status, ProcessingStatus::Completed);
        assert_eq!(page(&doc, 3).audio_generation_status, ProcessingStatus::Completed);
    }

    fn page_status(doc: &Document, n: u32) -> ProcessingStatus {
        doc.pages
            .iter()
            .find(|p| p.page_number == n)
            .map(|p| p.audio_generation_status)
            .unwrap_or(ProcessingStatus::Pending)
    }

    #[tokio::test]
    async fn retry_completes_document() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;
        h.tts.set_outcome(
            "Two",
            JobStatus::Failed {
                error: "render failed".to_string(),
            },
        );

        let units = segment_pages("One\n\nTwo\n\nThree");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();
        wait_for(&h.store, "d1", "alice", |d| {
            d.processed_pages == 2 && page_status(d, 2) == ProcessingStatus::Failed
        })
        .await;

        // The provider recovers; the retried job completes.
        h.tts.clear_outcome("Two");
        h.orchestrator.retry_page("d1", 2, "alice").await.unwrap();

        let doc = wait_for(&h.store, "d1", "alice", |d| d.processing_complete).await;
        assert_eq!(doc.processed_pages, 3);
        let retried = page(&doc, 2);
        assert_eq!(retried.audio_generation_status, ProcessingStatus::Completed);
        assert!(retried.audio_url.is_some());
        assert!(retried.error.is_none());
    }

    #[tokio::test]
    async fn concurrent_retries_admit_one_caller() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;
        h.tts.set_outcome(
            "Two",
            JobStatus::Failed {
                error: "render failed".to_string(),
            },
        );

        let units = segment_pages("One\n\nTwo");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();
        wait_for(&h.store, "d1", "alice", |d| {
            d.processed_pages == 1 && page_status(d, 2) == ProcessingStatus::Failed
        })
        .await;

        h.tts.clear_outcome("Two");
        let (r1, r2) = tokio::join!(
            h.orchestrator.retry_page("d1", 2, "alice"),
            h.orchestrator.retry_page("d1", 2, "alice"),
        );

        // Exactly one caller wins the failed -> processing transition; the
        // loser gets the precondition error and submits nothing.
        let results = [r1, r2];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(EngineError::Precondition(_)))));

        let doc = wait_for(&h.store, "d1", "alice", |d| d.processing_complete).await;
        assert_eq!(doc.processed_pages, doc.total_pages);
        assert_eq!(doc.processed_pages, 2);
        // Two initial submissions plus one winning retry.
        assert_eq!(h.tts.submission_count(), 3);
    }

    #[tokio::test]
    async fn retry_requires_failed_page() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;

        let units = segment_pages("One\n\nTwo");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();
        wait_for(&h.store, "d1", "alice", |d| d.processing_complete).await;

        let before = h.orchestrator.get_file_progress("d1", "alice").await.unwrap();

        // Completed page: precondition violation, nothing mutated.
        let result = h.orchestrator.retry_page("d1", 1, "alice").await;
        assert!(matches!(result, Err(EngineError::Precondition(_))));

        let after = h.orchestrator.get_file_progress("d1", "alice").await.unwrap();
        assert_eq!(
            serde_json::to_value(&before).unwrap(),
            serde_json::to_value(&after).unwrap()
        );

        // Missing page and wrong owner are not-found.
        assert!(matches!(
            h.orchestrator.retry_page("d1", 99, "alice").await,
            Err(EngineError::NotFound)
        ));
        assert!(matches!(
            h.orchestrator.retry_page("d1", 1, "mallory").await,
            Err(EngineError::NotFound)
        ));
    }

    #[tokio::test]
    async fn zero_page_document_completes_immediately() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;

        let units = segment_pages("   \n\n \n\n");
        assert!(units.is_empty());
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();

        // No waiting: completion was set before start_processing returned.
        let progress = h.orchestrator.get_file_progress("d1", "alice").await.unwrap();
        assert!(progress.processing_complete);
        assert_eq!(progress.total_pages, 0);
        assert_eq!(h.tts.submission_count(), 0);

        let status = h.orchestrator.processing_status("d1", "alice").await.unwrap();
        assert!(status.processing_complete);
        assert_eq!(status.progress, 100.0);
    }

    #[tokio::test]
    async fn submission_failure_is_isolated_to_one_page() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;
        h.tts.fail_submission_of("Two");

        let units = segment_pages("One\n\nTwo\n\nThree");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();

        let doc = wait_for(&h.store, "d1", "alice", |d| {
            d.processed_pages == 2 && page_status(d, 2) == ProcessingStatus::Failed
        })
        .await;

        assert!(!doc.processing_complete);
        let failed = page(&doc, 2);
        assert_eq!(failed.text_extraction_status, ProcessingStatus::Completed);
        assert!(failed.error.as_deref().unwrap().contains("rejected"));
        // Text is durable before submission, so retry can re-use it.
        assert_eq!(failed.text, "Two");
    }

    #[tokio::test]
    async fn retry_resubmission_failure_reverts_page() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;
        h.tts.fail_submission_of("Two");

        let units = segment_pages("One\n\nTwo");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();
        wait_for(&h.store, "d1", "alice", |d| {
            d.processed_pages == 1 && page_status(d, 2) == ProcessingStatus::Failed
        })
        .await;

        // Provider still refuses: retry succeeds as a call but the page
        // reverts to failed with the fresh error.
        h.orchestrator.retry_page("d1", 2, "alice").await.unwrap();
        let doc = wait_for(&h.store, "d1", "alice", |d| {
            page_status(d, 2) == ProcessingStatus::Failed
        })
        .await;
        assert!(!doc.processing_complete);

        // Provider recovers: second retry completes the document.
        h.tts.allow_submission_of("Two");
        h.orchestrator.retry_page("d1", 2, "alice").await.unwrap();
        let doc = wait_for(&h.store, "d1", "alice", |d| d.processing_complete).await;
        assert_eq!(doc.processed_pages, 2);
    }

    #[tokio::test]
    async fn delete_tears_down_polling() {
        let h = harness();
        seed(&h.store, "d1", "alice").await;
        // Job that never resolves keeps the scope alive until deletion.
        h.tts.set_outcome("One", JobStatus::Pending);

        let units = segment_pages("One");
        h.orchestrator
            .start_processing("d1", "alice", units, params())
            .await
            .unwrap();
        wait_for(&h.store, "d1", "alice", |d| {
            page_status(d, 1) == ProcessingStatus::Processing
        })
        .await;

        h.orchestrator.delete_document("d1", "alice").await.unwrap();
        assert!(matches!(
            h.orchestrator.get_file_progress("d1", "alice").await,
            Err(EngineError::NotFound)
        ));

        // A few more intervals pass without the scope resurrecting anything.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            h.orchestrator.get_file_progress("d1", "alice").await,
            Err(EngineError::NotFound)
        ));
    }

    #[tokio::test]
    async fn start_processing_requires_existing_document() {
        let h = harness();
        assert!(matches!(
            h.orchestrator
                .start_processing("ghost", "alice", vec!["One".to_string()], params())
                .await,
            Err(EngineError::NotFound)
        ));
        assert_eq!(h.tts.submission_count(), 0);
    }
}
