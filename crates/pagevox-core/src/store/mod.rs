//! Durable document records.
//!
//! The store is the single source of truth for per-page state; the polling
//! scopes only hold ephemeral `(job handle, page)` associations. Counter
//! updates go through atomic store operations, never read-modify-write in
//! process memory, because the poller and the retry path mutate them
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::model::{Document, DocumentSummary, Page, ProcessingStatus, SynthesisParams};

/// Initial shape of a document, created when an upload is accepted and
/// before segmentation finishes.
#[derive(Debug, Clone)]
pub struct DocumentShell {
    pub id: String,
    pub owner: String,
    pub file_name: String,
    pub params: SynthesisParams,
}

/// Field changes for one page, applied atomically.
///
/// `job_id` and `error` use `Some(None)` to clear the stored value, mirroring
/// a partial update on the backing record.
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub text: Option<String>,
    pub audio_url: Option<String>,
    pub text_extraction_status: Option<ProcessingStatus>,
    pub audio_generation_status: Option<ProcessingStatus>,
    pub job_id: Option<Option<String>>,
    pub error: Option<Option<String>>,
}

impl PageUpdate {
    /// Text extraction done for this page; audio not yet submitted.
    pub fn text_extracted(text: String) -> Self {
        Self {
            text: Some(text),
            text_extraction_status: Some(ProcessingStatus::Completed),
            ..Self::default()
        }
    }

    /// Synthesis job accepted; the page now holds a live handle.
    pub fn job_submitted(job_id: String) -> Self {
        Self {
            audio_generation_status: Some(ProcessingStatus::Processing),
            job_id: Some(Some(job_id)),
            ..Self::default()
        }
    }

    /// Audio rendered; the handle is no longer authoritative.
    pub fn audio_completed(url: String) -> Self {
        Self {
            audio_url: Some(url),
            audio_generation_status: Some(ProcessingStatus::Completed),
            job_id: Some(None),
            ..Self::default()
        }
    }

    /// Audio generation failed permanently for this page.
    pub fn audio_failed(error: String) -> Self {
        Self {
            audio_generation_status: Some(ProcessingStatus::Failed),
            job_id: Some(None),
            error: Some(Some(error)),
            ..Self::default()
        }
    }

}

/// Durable, queryable record of documents and their pages.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document in `pending` shape: zero counts, no pages.
    async fn create_document_shell(&self, shell: DocumentShell) -> Result<(), StoreError>;

    /// Write the page list and total count produced by segmentation.
    async fn set_pages(&self, id: &str, pages: Vec<Page>) -> Result<(), StoreError>;

    /// Apply a partial update to a single page, atomically.
    async fn update_page_fields(
        &self,
        id: &str,
        page_number: u32,
        update: PageUpdate,
    ) -> Result<(), StoreError>;

    /// Atomically move a failed page into `processing` for a retry, clearing
    /// its error. Returns `false` without changes when the page is not
    /// `failed`, so concurrent retries of the same page admit exactly one
    /// caller.
    async fn begin_page_retry(&self, id: &str, page_number: u32) -> Result<bool, StoreError>;

    /// Atomically bump the completed-page counter; returns the new value.
    ///
    /// The returned count is the completion guard: the one caller that
    /// observes it reach `total_pages` sets the completion flag, so the
    /// transition is detected exactly once even under concurrent page
    /// completions.
    async fn increment_processed_count(&self, id: &str) -> Result<u32, StoreError>;

    /// Set the completion flag. Returns `true` only on the transition from
    /// unset to set, so the transition can be acted on exactly once.
    async fn set_completion_flag(&self, id: &str) -> Result<bool, StoreError>;

    /// Fetch a document owned by `owner`.
    async fn get_document(&self, id: &str, owner: &str) -> Result<Document, StoreError>;

    /// All documents for an owner, newest first.
    async fn list_documents(&self, owner: &str) -> Result<Vec<DocumentSummary>, StoreError>;

    /// Delete a document owned by `owner`. The only teardown path for
    /// in-flight work; pollers observe the disappearance as not-found.
    async fn delete_document(&self, id: &str, owner: &str) -> Result<(), StoreError>;
}

/// In-memory store. The default backing for tests and single-process use;
/// every mutation happens under one write lock, which gives the counter
/// operations their atomicity.
#[derive(Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<HashMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document_shell(&self, shell: DocumentShell) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&shell.id) {
            return Err(StoreError::AlreadyExists);
        }
        documents.insert(
            shell.id.clone(),
            Document {
                id: shell.id,
                owner: shell.owner,
                file_name: shell.file_name,
                uploaded_at: Utc::now(),
                params: shell.params,
                total_pages: 0,
                processed_pages: 0,
                processing_complete: false,
                pages: Vec::new(),
            },
        );
        Ok(())
    }

    async fn set_pages(&self, id: &str, pages: Vec<Page>) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(id).ok_or(StoreError::NotFound)?;
        doc.total_pages = pages.len() as u32;
        doc.pages = pages;
        Ok(())
    }

    async fn update_page_fields(
        &self,
        id: &str,
        page_number: u32,
        update: PageUpdate,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(id).ok_or(StoreError::NotFound)?;
        let page = doc
            .pages
            .iter_mut()
            .find(|p| p.page_number == page_number)
            .ok_or(StoreError::PageNotFound(page_number))?;

        if let Some(text) = update.text {
            page.text = text;
        }
        if let Some(url) = update.audio_url {
            page.audio_url = Some(url);
        }
        if let Some(status) = update.text_extraction_status {
            page.text_extraction_status = status;
        }
        if let Some(status) = update.audio_generation_status {
            page.audio_generation_status = status;
        }
        if let Some(job_id) = update.job_id {
            page.job_id = job_id;
        }
        if let Some(error) = update.error {
            page.error = error;
        }
        Ok(())
    }

    async fn begin_page_retry(&self, id: &str, page_number: u32) -> Result<bool, StoreError> {
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(id).ok_or(StoreError::NotFound)?;
        let page = doc
            .pages
            .iter_mut()
            .find(|p| p.page_number == page_number)
            .ok_or(StoreError::PageNotFound(page_number))?;

        if page.audio_generation_status != ProcessingStatus::Failed {
            return Ok(false);
        }
        page.audio_generation_status = ProcessingStatus::Processing;
        page.error = None;
        Ok(true)
    }

    async fn increment_processed_count(&self, id: &str) -> Result<u32, StoreError> {
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(id).ok_or(StoreError::NotFound)?;
        doc.processed_pages += 1;
        debug_assert!(doc.processed_pages <= doc.total_pages);
        Ok(doc.processed_pages)
    }

    async fn set_completion_flag(&self, id: &str) -> Result<bool, StoreError> {
        let mut documents = self.documents.write().await;
        let doc = documents.get_mut(id).ok_or(StoreError::NotFound)?;
        let newly_set = !doc.processing_complete;
        doc.processing_complete = true;
        Ok(newly_set)
    }

    async fn get_document(&self, id: &str, owner: &str) -> Result<Document, StoreError> {
        let documents = self.documents.read().await;
        documents
            .get(id)
            .filter(|d| d.owner == owner)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_documents(&self, owner: &str) -> Result<Vec<DocumentSummary>, StoreError> {
        let documents = self.documents.read().await;
        let mut summaries: Vec<DocumentSummary> = documents
            .values()
            .filter(|d| d.owner == owner)
            .map(|d| DocumentSummary {
                id: d.id.clone(),
                file_name: d.file_name.clone(),
                uploaded_at: d.uploaded_at,
                voice_id: d.params.voice_id.clone(),
                total_pages: d.total_pages,
                processed_pages: d.processed_pages,
                processing_complete: d.processing_complete,
            })
            .collect();
        summaries.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(summaries)
    }

    async fn delete_document(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        match documents.get(id) {
            Some(d) if d.owner == owner => {
                documents.remove(id);
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(id: &str, owner: &str) -> DocumentShell {
        DocumentShell {
            id: id.to_string(),
            owner: owner.to_string(),
            file_name: "book.pdf".to_string(),
            params: SynthesisParams {
                voice_id: "voice-1".to_string(),
                temperature: None,
                speed: 1.0,
            },
        }
    }

    #[tokio::test]
    async fn shell_then_pages() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();

        let doc = store.get_document("d1", "alice").await.unwrap();
        assert_eq!(doc.total_pages, 0);
        assert!(doc.pages.is_empty());
        assert!(!doc.processing_complete);

        store
            .set_pages("d1", vec![Page::new(1), Page::new(2)])
            .await
            .unwrap();
        let doc = store.get_document("d1", "alice").await.unwrap();
        assert_eq!(doc.total_pages, 2);
    }

    #[tokio::test]
    async fn owner_mismatch_is_not_found() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();

        assert!(matches!(
            store.get_document("d1", "mallory").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.delete_document("d1", "mallory").await,
            Err(StoreError::NotFound)
        ));
        // Still there for the real owner.
        assert!(store.get_document("d1", "alice").await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_shell_rejected() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();
        assert!(matches!(
            store.create_document_shell(shell("d1", "alice")).await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn page_update_applies_and_clears_fields() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();
        store.set_pages("d1", vec![Page::new(1)]).await.unwrap();

        store
            .update_page_fields("d1", 1, PageUpdate::text_extracted("hello".into()))
            .await
            .unwrap();
        store
            .update_page_fields("d1", 1, PageUpdate::job_submitted("job-9".into()))
            .await
            .unwrap();

        let doc = store.get_document("d1", "alice").await.unwrap();
        let page = &doc.pages[0];
        assert_eq!(page.text, "hello");
        assert_eq!(page.text_extraction_status, ProcessingStatus::Completed);
        assert_eq!(page.audio_generation_status, ProcessingStatus::Processing);
        assert_eq!(page.job_id.as_deref(), Some("job-9"));

        store
            .update_page_fields("d1", 1, PageUpdate::audio_completed("https://a/1.mp3".into()))
            .await
            .unwrap();
        let doc = store.get_document("d1", "alice").await.unwrap();
        let page = &doc.pages[0];
        assert_eq!(page.audio_generation_status, ProcessingStatus::Completed);
        assert_eq!(page.audio_url.as_deref(), Some("https://a/1.mp3"));
        assert!(page.job_id.is_none());
    }

    #[tokio::test]
    async fn missing_page_is_page_not_found() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();
        store.set_pages("d1", vec![Page::new(1)]).await.unwrap();

        assert!(matches!(
            store
                .update_page_fields("d1", 7, PageUpdate::audio_failed("boom".into()))
                .await,
            Err(StoreError::PageNotFound(7))
        ));
        assert!(matches!(
            store.begin_page_retry("d1", 7).await,
            Err(StoreError::PageNotFound(7))
        ));
    }

    #[tokio::test]
    async fn begin_page_retry_admits_only_failed_pages() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();
        store.set_pages("d1", vec![Page::new(1)]).await.unwrap();

        // Pending page: no transition.
        assert!(!store.begin_page_retry("d1", 1).await.unwrap());

        store
            .update_page_fields("d1", 1, PageUpdate::audio_failed("boom".into()))
            .await
            .unwrap();
        assert!(store.begin_page_retry("d1", 1).await.unwrap());

        let doc = store.get_document("d1", "alice").await.unwrap();
        let page = &doc.pages[0];
        assert_eq!(page.audio_generation_status, ProcessingStatus::Processing);
        assert!(page.error.is_none());

        // The page is no longer failed, so a second caller is turned away.
        assert!(!store.begin_page_retry("d1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn completion_flag_reports_transition_once() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();

        assert!(store.set_completion_flag("d1").await.unwrap());
        assert!(!store.set_completion_flag("d1").await.unwrap());
    }

    #[tokio::test]
    async fn processed_counter_increments_atomically() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();
        store.set_pages("d1", vec![Page::new(1), Page::new(2)]).await.unwrap();

        assert_eq!(store.increment_processed_count("d1").await.unwrap(), 1);
        assert_eq!(store.increment_processed_count("d1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_is_newest_first_per_owner() {
        let store = MemoryStore::new();
        store.create_document_shell(shell("d1", "alice")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create_document_shell(shell("d2", "alice")).await.unwrap();
        store.create_document_shell(shell("d3", "bob")).await.unwrap();

        let docs = store.list_documents("alice").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "d2");
        assert_eq!(docs[1].id, "d1");
    }
}
