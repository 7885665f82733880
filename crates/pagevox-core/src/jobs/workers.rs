//! Dispatch worker pool.
//!
//! `start_processing` enqueues documents here instead of spawning unawaited
//! background work from the entry point, so lifecycle and backpressure are
//! explicit. Workers fan out one synthesis submission per page and then hand
//! the collected job handles to a polling scope.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};

use crate::error::StoreError;
use crate::progress::{ProgressEvent, ProgressPhase};
use crate::store::PageUpdate;
use crate::tts::SynthesisRequest;

use super::poller::{spawn_poll_scope, PollContext, PollerRegistry};
use super::types::{PageJob, ProcessJob};

/// Hands one unbounded channel to several workers.
pub struct SharedReceiver<T> {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
}

impl<T> SharedReceiver<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

/// Spawn the dispatch worker pool.
///
/// Workers stop when the job channel closes, which happens when the
/// orchestrator is dropped.
pub fn spawn_dispatch_workers(
    count: usize,
    rx: SharedReceiver<ProcessJob>,
    ctx: PollContext,
    registry: PollerRegistry,
) {
    for i in 0..count {
        let rx = rx.clone();
        let ctx = ctx.clone();
        let registry = registry.clone();

        tokio::spawn(async move {
            tracing::debug!(worker = i, "Dispatch worker started");

            while let Some(job) = rx.recv().await {
                let doc_id = job.document_id.clone();
                match dispatch_document(&ctx, &registry, job).await {
                    Ok(()) => {}
                    Err(StoreError::NotFound | StoreError::PageNotFound(_)) => {
                        // Document deleted mid-dispatch; per-page records are
                        // already consistent, nothing more to do.
                        tracing::debug!(doc_id = %doc_id, "Document gone during dispatch");
                    }
                    Err(e) => {
                        tracing::error!(doc_id = %doc_id, error = %e, "Dispatch failed");
                    }
                }
            }

            tracing::debug!(worker = i, "Dispatch worker stopped");
        });
    }
}

/// Fan out one synthesis submission per page, then start polling.
async fn dispatch_document(
    ctx: &PollContext,
    registry: &PollerRegistry,
    job: ProcessJob,
) -> Result<(), StoreError> {
    let ProcessJob {
        document_id,
        owner,
        page_units,
        params,
    } = job;
    let total = page_units.len() as u32;
    let extracted = AtomicU32::new(0);

    tracing::info!(doc_id = %document_id, pages = total, "Dispatching document");

    let submissions = page_units.into_iter().enumerate().map(|(i, text)| {
        let page_number = i as u32 + 1;
        let document_id = &document_id;
        let owner = &owner;
        let params = &params;
        let extracted = &extracted;
        async move {
            // Within one page: record text completion durably before the
            // audio job is submitted. A crash mid-dispatch leaves either
            // "text done, no job yet" or "text done, job submitted".
            ctx.store
                .update_page_fields(
                    document_id,
                    page_number,
                    PageUpdate::text_extracted(text.clone()),
                )
                .await?;

            let done = extracted.fetch_add(1, Ordering::Relaxed) + 1;
            ctx.progress.publish(
                owner,
                document_id,
                ProgressEvent {
                    phase: ProgressPhase::Extraction,
                    completed_pages: done,
                    total_pages: total,
                    page_number: Some(page_number),
                    completed_job_ids: None,
                },
            );

            let request = SynthesisRequest::new(text, params);
            match ctx.tts.submit(&request).await {
                Ok(job_id) => {
                    ctx.store
                        .update_page_fields(
                            document_id,
                            page_number,
                            PageUpdate::job_submitted(job_id.clone()),
                        )
                        .await?;
                    Ok(Some(PageJob {
                        page_number,
                        job_id,
                    }))
                }
                Err(e) => {
                    // Only this page fails; siblings are unaffected.
                    tracing::error!(
                        doc_id = %document_id,
                        page = page_number,
                        error = %e,
                        "Synthesis submission failed"
                    );
                    ctx.store
                        .update_page_fields(
                            document_id,
                            page_number,
                            PageUpdate::audio_failed(e.to_string()),
                        )
                        .await?;
                    ctx.progress.publish(
                        owner,
                        document_id,
                        ProgressEvent {
                            phase: ProgressPhase::Audio,
                            completed_pages: 0,
                            total_pages: total,
                            page_number: Some(page_number),
                            completed_job_ids: None,
                        },
                    );
                    Ok(None)
                }
            }
        }
    });

    let results: Vec<Result<Option<PageJob>, StoreError>> = join_all(submissions).await;

    let mut page_jobs = Vec::new();
    for result in results {
        if let Some(page_job) = result? {
            page_jobs.push(page_job);
        }
    }

    if !page_jobs.is_empty() {
        let cancel = registry.acquire(&document_id);
        spawn_poll_scope(
            ctx.clone(),
            registry.clone(),
            owner,
            document_id,
            page_jobs,
            cancel,
        );
    }

    Ok(())
}
