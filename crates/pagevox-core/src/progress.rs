//! Progress events for document processing.
//!
//! Progress is an observability side effect, not part of the consistency
//! contract. Delivery is fire-and-forget; a full or closed subscriber
//! channel never fails or retries the job-state mutation that produced the
//! event.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Which stage of processing the event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Extraction,
    Audio,
}

/// Progress snapshot for one document, delivered on a channel keyed by
/// `(owner, document_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub completed_pages: u32,
    pub total_pages: u32,
    /// Present on per-page transition events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Present on per-cycle poll events; job handles completed so far in
    /// this polling scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_job_ids: Option<Vec<String>>,
}

/// Delivers progress events to whoever is listening for a document.
///
/// Implemented by the in-process [`ProgressBroadcaster`] here and by the
/// real-time transport in the API layer. Must not block and must not fail
/// the caller.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, owner: &str, document_id: &str, event: ProgressEvent);
}

/// No-op sink for tests and headless use.
#[derive(Debug, Default)]
pub struct NoOpSink;

impl ProgressSink for NoOpSink {
    fn publish(&self, _owner: &str, _document_id: &str, _event: ProgressEvent) {}
}

type ChannelKey = (String, String);

/// In-process broadcaster with one bounded channel per subscription.
///
/// `publish` uses `try_send`; a subscriber that stopped draining loses
/// events rather than stalling the pipeline, and a closed subscription is
/// dropped on the next publish.
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    subscribers: Arc<RwLock<HashMap<ChannelKey, mpsc::Sender<ProgressEvent>>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to progress for one `(owner, document)` pair.
    ///
    /// A second subscription for the same pair replaces the first.
    pub fn subscribe(&self, owner: &str, document_id: &str) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(256);
        let key = (owner.to_string(), document_id.to_string());
        self.subscribers
            .write()
            .expect("progress subscriber lock poisoned")
            .insert(key, tx);
        rx
    }

    /// Drop the subscription for one `(owner, document)` pair.
    pub fn unsubscribe(&self, owner: &str, document_id: &str) {
        let key = (owner.to_string(), document_id.to_string());
        self.subscribers
            .write()
            .expect("progress subscriber lock poisoned")
            .remove(&key);
    }
}

impl ProgressSink for ProgressBroadcaster {
    fn publish(&self, owner: &str, document_id: &str, event: ProgressEvent) {
        let key = (owner.to_string(), document_id.to_string());

        let closed = {
            let subscribers = self
                .subscribers
                .read()
                .expect("progress subscriber lock poisoned");
            match subscribers.get(&key) {
                Some(tx) => match tx.try_send(event) {
                    Ok(()) => false,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(doc_id = %document_id, "Progress channel full, dropping event");
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => true,
                },
                None => false,
            }
        };

        if closed {
            self.subscribers
                .write()
                .expect("progress subscriber lock poisoned")
                .remove(&key);
            tracing::debug!(doc_id = %document_id, "Progress subscriber gone, removed");
        }
    }
}
