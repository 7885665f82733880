//! Per-document polling scopes.
//!
//! Each scope is a supervising task that drives a set of `(page, job handle)`
//! pairs for one document to resolution, on a fixed interval. There is no
//! process-wide job map; the store remains the source of truth and a scope
//! can always be rebuilt from pages stuck in `processing`. A retry gets its
//! own fresh single-page scope.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::progress::{ProgressEvent, ProgressPhase, ProgressSink};
use crate::store::{DocumentStore, PageUpdate};
use crate::tts::{JobStatus, TtsClient};

use super::types::PageJob;

/// Cancellation tokens for the polling scopes of live documents.
///
/// Every scope for a document shares that document's token, itself a child
/// of the orchestrator's master token, so deleting a document or shutting
/// down the orchestrator tears down all of its scopes. Entries are
/// scope-counted and dropped with the last scope; a later retry gets a
/// fresh entry.
#[derive(Clone)]
pub struct PollerRegistry {
    master: CancellationToken,
    documents: Arc<Mutex<HashMap<String, DocumentScopes>>>,
}

struct DocumentScopes {
    token: CancellationToken,
    scopes: usize,
}

impl PollerRegistry {
    pub fn new(master: CancellationToken) -> Self {
        Self {
            master,
            documents: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Token shared by all polling scopes of one document. Each call counts
    /// one scope; the scope must [`release`](Self::release) when it ends.
    pub fn acquire(&self, document_id: &str) -> CancellationToken {
        let mut documents = self
            .documents
            .lock()
            .expect("poller registry lock poisoned");
        let entry = documents
            .entry(document_id.to_string())
            .or_insert_with(|| DocumentScopes {
                token: self.master.child_token(),
                scopes: 0,
            });
        entry.scopes += 1;
        entry.token.clone()
    }

    /// Called by a polling scope when it ends. The document's entry goes
    /// with its last scope. A no-op for entries already removed by
    /// [`cancel_document`](Self::cancel_document).
    pub fn release(&self, document_id: &str) {
        let mut documents = self
            .documents
            .lock()
            .expect("poller registry lock poisoned");
        if let Some(entry) = documents.get_mut(document_id) {
            entry.scopes -= 1;
            if entry.scopes == 0 {
                documents.remove(document_id);
            }
        }
    }

    /// Cancel and forget every scope for a document.
    pub fn cancel_document(&self, document_id: &str) {
        let entry = self
            .documents
            .lock()
            .expect("poller registry lock poisoned")
            .remove(document_id);
        if let Some(entry) = entry {
            entry.token.cancel();
            tracing::debug!(doc_id = %document_id, "Cancelled polling scopes");
        }
    }

    /// Number of documents with live polling scopes.
    pub fn tracked_documents(&self) -> usize {
        self.documents
            .lock()
            .expect("poller registry lock poisoned")
            .len()
    }
}

/// Shared collaborators for a polling scope.
#[derive(Clone)]
pub struct PollContext {
    pub store: Arc<dyn DocumentStore>,
    pub tts: Arc<dyn TtsClient>,
    pub progress: Arc<dyn ProgressSink>,
    pub interval: Duration,
}

/// Spawn a polling scope for one document.
///
/// The scope ends when every tracked page resolves, when the token is
/// cancelled, or silently when the document disappears from the store.
pub fn spawn_poll_scope(
    ctx: PollContext,
    registry: PollerRegistry,
    owner: String,
    document_id: String,
    jobs: Vec<PageJob>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        match run_poll_scope(&ctx, &owner, &document_id, jobs, cancel).await {
            Ok(()) => {}
            Err(StoreError::NotFound | StoreError::PageNotFound(_)) => {
                // Document deleted mid-cycle; nothing left to track.
                tracing::debug!(doc_id = %document_id, "Document gone, poll scope ended");
            }
            Err(e) => {
                tracing::error!(doc_id = %document_id, error = %e, "Poll scope aborted");
            }
        }
        registry.release(&document_id);
    });
}

async fn run_poll_scope(
    ctx: &PollContext,
    owner: &str,
    document_id: &str,
    jobs: Vec<PageJob>,
    cancel: CancellationToken,
) -> Result<(), StoreError> {
    let doc = ctx.store.get_document(document_id, owner).await?;
    let total = doc.total_pages;
    let mut processed = doc.processed_pages;
    let mut outstanding = jobs;
    let mut completed_job_ids: Vec<String> = Vec::new();

    tracing::debug!(
        doc_id = %document_id,
        jobs = outstanding.len(),
        "Poll scope started"
    );

    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !outstanding.is_empty() {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::debug!(doc_id = %document_id, "Poll scope cancelled");
                return Ok(());
            }

            _ = ticker.tick() => {}
        }

        // Query all outstanding handles concurrently; one slow or failing
        // query must not hold up its siblings.
        let queries = outstanding.iter().map(|job| {
            let tts = ctx.tts.clone();
            let job = job.clone();
            async move {
                let status = tts.query_status(&job.job_id).await;
                (job, status)
            }
        });
        let results = join_all(queries).await;

        let mut still_pending = Vec::with_capacity(outstanding.len());
        for (job, status) in results {
            match status {
                Ok(JobStatus::Completed { url }) => {
                    ctx.store
                        .update_page_fields(
                            document_id,
                            job.page_number,
                            PageUpdate::audio_completed(url),
                        )
                        .await?;
                    processed = ctx.store.increment_processed_count(document_id).await?;
                    completed_job_ids.push(job.job_id.clone());

                    ctx.progress.publish(
                        owner,
                        document_id,
                        ProgressEvent {
                            phase: ProgressPhase::Audio,
                            completed_pages: processed,
                            total_pages: total,
                            page_number: Some(job.page_number),
                            completed_job_ids: None,
                        },
                    );

                    // Completion guard: exactly one increment observes the
                    // counter reach the total.
                    if processed >= total && ctx.store.set_completion_flag(document_id).await? {
                        tracing::info!(doc_id = %document_id, total_pages = total, "Document processing complete");
                    }
                }
                Ok(JobStatus::Failed { error }) => {
                    tracing::warn!(
                        doc_id = %document_id,
                        page = job.page_number,
                        error = %error,
                        "Synthesis job failed"
                    );
                    ctx.store
                        .update_page_fields(
                            document_id,
                            job.page_number,
                            PageUpdate::audio_failed(error),
                        )
                        .await?;
                    ctx.progress.publish(
                        owner,
                        document_id,
                        ProgressEvent {
                            phase: ProgressPhase::Audio,
                            completed_pages: processed,
                            total_pages: total,
                            page_number: Some(job.page_number),
                            completed_job_ids: None,
                        },
                    );
                }
                Ok(JobStatus::Pending) => still_pending.push(job),
                Err(e) => {
                    // Transient query failure; the handle stays pending and
                    // is re-queried next cycle.
                    tracing::warn!(
                        doc_id = %document_id,
                        page = job.page_number,
                        error = %e,
                        "Status query failed, retrying next cycle"
                    );
                    still_pending.push(job);
                }
            }
        }
        outstanding = still_pending;

        ctx.progress.publish(
            owner,
            document_id,
            ProgressEvent {
                phase: ProgressPhase::Audio,
                completed_pages: processed,
                total_pages: total,
                page_number: None,
                completed_job_ids: Some(completed_job_ids.clone()),
            },
        );
    }

    tracing::debug!(doc_id = %document_id, "Poll scope finished");
    Ok(())
}
