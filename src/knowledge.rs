//! Knowledge base synchronizer.
//!
//! Owns the fetched document set and the current selection. All mutation
//! goes through [`KnowledgeBase`] so the selection rule is enforced in one
//! place: after every change to the document set, a selection that no
//! longer names a document in the set is cleared.
//!
//! State is published on a `tokio::sync::watch` channel. Observers (the
//! [`PreviewBinder`](crate::preview::PreviewBinder), a UI) call
//! [`KnowledgeBase::subscribe`] and are woken on every change.
//!
//! # Endpoints
//!
//! | Operation | Method & Path |
//! |-----------|---------------|
//! | [`fetch`](KnowledgeBase::fetch) | `GET /api/v1/documents/?skip&limit` (paged) |
//! | [`remove`](KnowledgeBase::remove) | `DELETE /api/v1/documents/{id}` |
//! | [`preview_bytes`](KnowledgeBase::preview_bytes) | `GET /api/v1/documents/preview/{id}` |
//! | [`summarize`](KnowledgeBase::summarize) | `POST /api/v1/chat/documents/{id}/summarize` |

use reqwest::Method;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::client::{segment_path, ApiRequest, RequestBody, RequestClient};
use crate::error::ClassifiedError;
use crate::models::Document;

pub const DOCUMENTS_PATH: &str = "/api/v1/documents/";
const CHAT_DOCUMENTS_PATH: &str = "/api/v1/chat/documents/";

/// Point-in-time view of the knowledge base.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeSnapshot {
    pub documents: Vec<Document>,
    pub selection: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
}

impl KnowledgeSnapshot {
    pub fn find(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    fn reconcile_selection(&mut self) {
        let dangling = match &self.selection {
            Some(id) => self.find(id).is_none(),
            None => false,
        };
        if dangling {
            self.selection = None;
        }
    }
}

/// Receives alert-level notifications meant for the user.
pub trait Notifier: Send + Sync {
    fn alert(&self, message: &str);
}

/// Logs alerts at error level.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str) {
        error!("{}", message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed,
    Failed(ClassifiedError),
}

struct Inner {
    client: RequestClient,
    page_size: u32,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<KnowledgeSnapshot>,
    fetches: AtomicUsize,
}

/// Keeps `loading` true while any fetch is outstanding, including one that
/// is dropped midway.
struct LoadingGuard<'a> {
    inner: &'a Inner,
}

impl<'a> LoadingGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        inner.fetches.fetch_add(1, Ordering::SeqCst);
        inner.state.send_modify(|s| s.loading = true);
        Self { inner }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.inner.fetches.fetch_sub(1, Ordering::SeqCst) - 1;
        self.inner.state.send_modify(|s| s.loading = remaining > 0);
    }
}

/// Cheap to clone; clones share one document set and selection.
#[derive(Clone)]
pub struct KnowledgeBase {
    inner: Arc<Inner>,
}

impl KnowledgeBase {
    pub fn new(client: RequestClient, page_size: u32, notifier: Arc<dyn Notifier>) -> Self {
        let (state, _) = watch::channel(KnowledgeSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                client,
                page_size: page_size.clamp(1, 100),
                notifier,
                state,
                fetches: AtomicUsize::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<KnowledgeSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> KnowledgeSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn documents(&self) -> Vec<Document> {
        self.inner.state.borrow().documents.clone()
    }

    pub fn selection(&self) -> Option<String> {
        self.inner.state.borrow().selection.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    /// Replace the document set with the server's.
    ///
    /// On failure the previous set is kept and `error` is set. Overlapping
    /// fetches are allowed; the last one to complete wins.
    pub async fn fetch(&self) -> Result<(), ClassifiedError> {
        let _loading = LoadingGuard::new(&self.inner);

        match self.list_all().await {
            Ok(documents) => {
                info!(count = documents.len(), "fetched documents");
                self.inner.state.send_modify(|s| {
                    s.documents = documents;
                    s.error = None;
                    s.reconcile_selection();
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch documents");
                let message = format!("Failed to load documents: {}", e);
                self.inner.state.send_modify(|s| s.error = Some(message));
                Err(e)
            }
        }
    }

    async fn list_all(&self) -> Result<Vec<Document>, ClassifiedError> {
        let page_size = self.inner.page_size as usize;
        let mut documents: Vec<Document> = Vec::new();
        let mut seen = HashSet::new();

        loop {
            let request = ApiRequest::new(Method::GET, DOCUMENTS_PATH)
                .query("skip", documents.len())
                .query("limit", page_size);
            let page: Vec<Document> = self.inner.client.execute(&request).await?.json()?;

            let returned = page.len();
            let before = documents.len();
            documents.extend(page.into_iter().filter(|d| seen.insert(d.id.clone())));

            // A short page is the last one. A page with nothing new means the
            // server ignored the paging parameters.
            if returned < page_size || documents.len() == before {
                break;
            }
        }

        Ok(documents)
    }

    /// Select a document. The id need not be in the current set yet.
    pub fn select(&self, id: impl Into<String>) {
        let id = id.into();
        self.inner.state.send_modify(|s| s.selection = Some(id));
    }

    pub fn clear_selection(&self) {
        self.inner.state.send_if_modified(|s| s.selection.take().is_some());
    }

    /// Delete a document, then resynchronize.
    ///
    /// Failures leave the set and selection untouched and are reported to
    /// the notifier rather than returned as an error.
    pub async fn remove(&self, id: &str) -> RemoveOutcome {
        let path = segment_path(DOCUMENTS_PATH, id);

        match self.inner.client.send(Method::DELETE, &path, None).await {
            Ok(_) => {
                info!(document = id, "deleted document");
                self.inner
                    .state
                    .send_if_modified(|s| match s.selection.as_deref() {
                        Some(selected) if selected == id => {
                            s.selection = None;
                            true
                        }
                        _ => false,
                    });
                // The error flag records a failed refresh.
                let _ = self.fetch().await;
                RemoveOutcome::Removed
            }
            Err(e) => {
                warn!(document = id, error = %e, "failed to delete document");
                let reason = e.detail().map(str::to_string).unwrap_or_else(|| e.to_string());
                self.inner
                    .notifier
                    .alert(&format!("Failed to delete document: {}", reason));
                RemoveOutcome::Failed(e)
            }
        }
    }

    /// One document as the server has it now. Does not touch the local set.
    pub async fn get(&self, id: &str) -> Result<Document, ClassifiedError> {
        let path = segment_path(DOCUMENTS_PATH, id);
        self.inner.client.send(Method::GET, &path, None).await?.json()
    }

    /// Raw bytes of a document, for an embedded viewer.
    pub async fn preview_bytes(&self, id: &str) -> Result<Vec<u8>, ClassifiedError> {
        let path = segment_path(&format!("{}preview/", DOCUMENTS_PATH), id);
        let response = self.inner.client.send(Method::GET, &path, None).await?;
        Ok(response.into_bytes())
    }

    /// Ask the assistant for a summary of one document.
    pub async fn summarize(&self, id: &str) -> Result<String, ClassifiedError> {
        #[derive(Deserialize)]
        struct Summary {
            summary: String,
        }

        let path = format!("{}/summarize", segment_path(CHAT_DOCUMENTS_PATH, id));
        let response = self.inner.client.send(Method::POST, &path, None).await?;
        Ok(response.json::<Summary>()?.summary)
    }

    /// Ask the assistant how several documents relate with respect to
    /// `question`.
    pub async fn compare(&self, ids: &[String], question: &str) -> Result<String, ClassifiedError> {
        #[derive(Deserialize)]
        struct Comparison {
            analysis: String,
        }

        if ids.len() < 2 {
            return Err(ClassifiedError::validation(
                "at least two documents are needed for a comparison",
            ));
        }
        if question.trim().is_empty() {
            return Err(ClassifiedError::validation("question is empty"));
        }

        let request = ApiRequest::new(Method::POST, format!("{}compare", CHAT_DOCUMENTS_PATH))
            .query("question", question)
            .body(RequestBody::Json(serde_json::json!(ids)));
        let response = self.inner.client.execute(&request).await?;
        Ok(response.json::<Comparison>()?.analysis)
    }
}
