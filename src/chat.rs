//! Chat message pipeline.
//!
//! Owns the ordered conversation and turns user submissions into requests
//! against `POST /api/v1/chat/message`.
//!
//! ```text
//!            submit(text)                 reply / failure
//!   Idle ─────────────────▶ Sending ─────────────────────▶ Idle
//!    ▲   (user message        │      (assistant or error
//!    │    appended first)     │       message appended)
//!    └────────────────────────┘
//! ```
//!
//! At most one request is in flight: a submit while `Sending` is rejected,
//! so replies are appended in the order their questions were asked. The
//! pipeline never returns an error to its caller. Failures become an
//! `error`-authored message carrying a fixed apology, and the underlying
//! detail is only logged.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ApiRequest, ApiResponse, RequestBody, RequestClient};
use crate::config::ChatConfig;
use crate::error::ClassifiedError;
use crate::models::{Message, Session, SessionMessage, SourceRef};

pub const CHAT_MESSAGE_PATH: &str = "/api/v1/chat/message";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Sending,
}

/// Result of a [`ChatPipeline::submit`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Nothing was sent or appended.
    Rejected(ClassifiedError),
    /// The assistant answered; carries the appended assistant message.
    Replied(Message),
    /// The request failed; carries the appended error message.
    Failed(Message),
}

impl SubmitOutcome {
    pub fn message(&self) -> Option<&Message> {
        match self {
            SubmitOutcome::Replied(m) | SubmitOutcome::Failed(m) => Some(m),
            SubmitOutcome::Rejected(_) => None,
        }
    }
}

/// A decoded assistant reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub sources: Vec<SourceRef>,
    pub session_id: Option<String>,
}

/// The two reply shapes the backend produces: a flat answer, or the whole
/// session document whose last message is the answer.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyWire {
    Session {
        id: Option<String>,
        messages: Vec<SessionMessage>,
    },
    Flat {
        content: String,
        #[serde(default)]
        sources: Vec<SourceRef>,
        #[serde(default)]
        session_id: Option<String>,
        /// Older backends put the session id here; newer ones may put a
        /// message id here next to `session_id`.
        #[serde(default)]
        id: Option<String>,
    },
}

/// Validate and decode a chat reply.
pub fn decode_reply(response: &ApiResponse) -> Result<ChatReply, ClassifiedError> {
    let (content, sources, session_id) = match response.json::<ReplyWire>()? {
        ReplyWire::Flat {
            content,
            sources,
            session_id,
            id,
        } => (content, sources, session_id.or(id)),
        ReplyWire::Session { id, mut messages } => {
            let last = messages
                .pop()
                .ok_or_else(|| ClassifiedError::malformed(response.status, "session has no messages"))?;
            (last.content, last.sources, id)
        }
    };

    let sources = sources
        .into_iter()
        .map(SourceRef::normalized)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            ClassifiedError::malformed(response.status, "source relevance_score is not a number")
        })?;

    Ok(ChatReply {
        content,
        sources,
        session_id,
    })
}

struct ChatState {
    messages: Vec<Message>,
    session: Session,
    phase: PipelineState,
}

struct Inner {
    client: RequestClient,
    apology: String,
    prompt_template: Option<String>,
    state: Mutex<ChatState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the pipeline to `Idle` if a send is dropped before it settles.
struct SendingGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state().phase = PipelineState::Idle;
        }
    }
}

/// Cheap to clone; clones share one conversation.
#[derive(Clone)]
pub struct ChatPipeline {
    inner: Arc<Inner>,
}

impl ChatPipeline {
    pub fn new(client: RequestClient, session: Session, config: &ChatConfig) -> Self {
        let greeting = Message::assistant(config.greeting.clone(), Vec::new());
        Self {
            inner: Arc::new(Inner {
                client,
                apology: config.apology.clone(),
                prompt_template: config.prompt_template.clone(),
                state: Mutex::new(ChatState {
                    messages: vec![greeting],
                    session,
                    phase: PipelineState::Idle,
                }),
            }),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.state().messages.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.inner.state().phase
    }

    pub fn session(&self) -> Session {
        self.inner.state().session.clone()
    }

    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Rejected(ClassifiedError::validation("message is empty"));
        }

        let session_id = {
            let mut state = self.inner.state();
            if state.phase == PipelineState::Sending {
                debug!("submit ignored: a message is already being sent");
                return SubmitOutcome::Rejected(ClassifiedError::validation(
                    "a message is already being sent",
                ));
            }
            state.messages.push(Message::user(text));
            state.phase = PipelineState::Sending;
            state.session.id().map(str::to_string)
        };
        let mut guard = SendingGuard {
            inner: &self.inner,
            armed: true,
        };

        let mut request = ApiRequest::new(Method::POST, CHAT_MESSAGE_PATH).body(RequestBody::Json(
            json!({ "content": text, "session_id": session_id }),
        ));
        if let Some(template) = &self.inner.prompt_template {
            request = request.query("prompt_template", template);
        }

        let result = match self.inner.client.execute(&request).await {
            Ok(response) => decode_reply(&response),
            Err(e) => Err(e),
        };

        let mut state = self.inner.state();
        guard.armed = false;
        state.phase = PipelineState::Idle;

        match result {
            Ok(reply) => {
                if state.session.adopt(reply.session_id) {
                    info!(session = ?state.session.id(), "adopted chat session");
                }
                let message = Message::assistant(reply.content, reply.sources);
                state.messages.push(message.clone());
                SubmitOutcome::Replied(message)
            }
            Err(e) => {
                warn!(kind = ?e.kind(), error = %e, "chat request failed");
                let message = Message::error(self.inner.apology.clone());
                state.messages.push(message.clone());
                SubmitOutcome::Failed(message)
            }
        }
    }
}

struct PendingSubmit {
    handle: JoinHandle<SubmitOutcome>,
    fired: Arc<AtomicBool>,
}

/// Debounced input for the chat box.
///
/// Owns at most one scheduled submit. Scheduling again, calling
/// [`cancel`](Self::cancel), or dropping the input cancels a submit that is
/// still waiting out its delay. A submit that already started is left to
/// finish.
pub struct DebouncedInput {
    pipeline: ChatPipeline,
    delay: Duration,
    pending: Option<PendingSubmit>,
}

impl DebouncedInput {
    pub fn new(pipeline: ChatPipeline, delay: Duration) -> Self {
        Self {
            pipeline,
            delay,
            pending: None,
        }
    }

    pub fn schedule(&mut self, text: impl Into<String>) {
        self.cancel();

        let text = text.into();
        let pipeline = self.pipeline.clone();
        let delay = self.delay;
        let fired = Arc::new(AtomicBool::new(false));
        let task_fired = fired.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task_fired.store(true, Ordering::SeqCst);
            pipeline.submit(&text).await
        });

        self.pending = Some(PendingSubmit { handle, fired });
    }

    /// Cancel the scheduled submit. Returns whether one was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) if !pending.fired.load(Ordering::SeqCst) => {
                pending.handle.abort();
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| !p.fired.load(Ordering::SeqCst))
    }

    /// Wait for the scheduled submit to run and return its outcome.
    pub async fn flush(&mut self) -> Option<SubmitOutcome> {
        let pending = self.pending.take()?;
        pending.handle.await.ok()
    }
}

impl Drop for DebouncedInput {
    fn drop(&mut self) {
        self.cancel();
    }
}
