//! Composition root.
//!
//! Builds one [`RequestClient`] and threads it, together with the explicit
//! [`Session`], into every component. Nothing here holds state of its own.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatPipeline, DebouncedInput};
use crate::client::RequestClient;
use crate::config::Config;
use crate::knowledge::{KnowledgeBase, Notifier};
use crate::models::Session;
use crate::preview::PreviewBinder;
use crate::progress::UploadProgressReporter;
use crate::sessions::SessionDirectory;
use crate::upload::UploadCoordinator;

pub struct App {
    pub chat: ChatPipeline,
    pub knowledge: KnowledgeBase,
    pub preview: PreviewBinder,
    pub uploads: UploadCoordinator,
    pub sessions: SessionDirectory,
    debounce: Duration,
}

impl App {
    /// Wire every component against the HTTP backend in `config`.
    pub fn from_config(
        config: &Config,
        session: Session,
        notifier: Arc<dyn Notifier>,
        reporter: Arc<dyn UploadProgressReporter>,
    ) -> Result<Self> {
        let client = RequestClient::from_config(config)?;
        Ok(Self::with_client(client, config, session, notifier, reporter))
    }

    pub fn with_client(
        client: RequestClient,
        config: &Config,
        session: Session,
        notifier: Arc<dyn Notifier>,
        reporter: Arc<dyn UploadProgressReporter>,
    ) -> Self {
        let chat = ChatPipeline::new(client.clone(), session, &config.chat);
        let knowledge = KnowledgeBase::new(client.clone(), config.documents.page_size, notifier);
        let preview = PreviewBinder::new(knowledge.clone());
        let uploads = UploadCoordinator::new(
            client.clone(),
            knowledge.clone(),
            config.upload.chunk_size,
            reporter,
        );
        let sessions = SessionDirectory::new(client);

        Self {
            chat,
            knowledge,
            preview,
            uploads,
            sessions,
            debounce: Duration::from_millis(config.chat.debounce_ms),
        }
    }

    /// A debounced chat input bound to this app's conversation.
    pub fn debounced_input(&self) -> DebouncedInput {
        DebouncedInput::new(self.chat.clone(), self.debounce)
    }
}
