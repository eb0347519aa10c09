//! Document preview binder.
//!
//! Decides which document, if any, is shown in detail. The rule is a pure
//! function of the knowledge base state:
//!
//! ```text
//! preview = selection.and_then(|id| documents.find(id))
//! ```
//!
//! [`PreviewBinder`] holds no state of its own beyond a subscription to the
//! knowledge base. It never makes network calls. Fetching the bytes for the
//! embedded viewer is [`KnowledgeBase::preview_bytes`].

use tokio::sync::watch;

use crate::knowledge::{KnowledgeBase, KnowledgeSnapshot};
use crate::models::Document;

pub fn derive_preview(snapshot: &KnowledgeSnapshot) -> Option<Document> {
    let id = snapshot.selection.as_deref()?;
    snapshot.find(id).cloned()
}

pub struct PreviewBinder {
    knowledge: KnowledgeBase,
    updates: watch::Receiver<KnowledgeSnapshot>,
}

impl PreviewBinder {
    pub fn new(knowledge: KnowledgeBase) -> Self {
        let updates = knowledge.subscribe();
        Self { knowledge, updates }
    }

    /// The document to show now, recomputed on every call.
    pub fn current(&self) -> Option<Document> {
        derive_preview(&self.updates.borrow())
    }

    /// Wait for the next change to the selection or the document set and
    /// return the preview derived from it.
    pub async fn changed(&mut self) -> Option<Document> {
        // Never errs: `self.knowledge` keeps the sender alive.
        let _ = self.updates.changed().await;
        derive_preview(&self.updates.borrow_and_update())
    }

    /// Close the preview by clearing the selection.
    pub fn close(&self) {
        self.knowledge.clear_selection();
    }
}
