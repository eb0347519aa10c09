//! # Corpus Chat
//!
//! An async client for conversing with an assistant grounded in a personal
//! document corpus, browsing that corpus, and adding documents to it.
//!
//! The crate is the interaction layer between a user-facing surface (the
//! bundled `corpus` CLI, or any UI) and the corpus backend: it turns user
//! input into requests, folds replies and failures back into conversation
//! state, keeps the document list consistent with select/delete/upload, and
//! absorbs rate limiting without surfacing it.
//!
//! ## Architecture
//!
//! ```text
//!   user input ──▶ ┌──────────────┐
//!                  │ ChatPipeline │──┐
//!                  └──────────────┘  │     ┌───────────────┐     ┌─────────┐
//!   file ────────▶ ┌──────────────┐  ├───▶ │ RequestClient │───▶ │ backend │
//!                  │   Uploads    │──┤     │ retry+classify│     └─────────┘
//!                  └──────┬───────┘  │     └───────────────┘
//!                refresh  ▼          │
//!                  ┌──────────────┐  │
//!                  │KnowledgeBase │──┘
//!                  └──────┬───────┘
//!                   watch ▼
//!                  ┌──────────────┐
//!                  │PreviewBinder │
//!                  └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! corpus ask "What does the lease say about pets?"
//! corpus docs list
//! corpus docs upload ./lease.pdf
//! corpus chat                     # interactive conversation
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`client`] | Resilient request client (retry, classification) |
//! | [`chat`] | Chat message pipeline and debounced input |
//! | [`knowledge`] | Document set, selection, delete/refresh |
//! | [`preview`] | Derived document preview |
//! | [`upload`] | Chunked sequential uploads |
//! | [`sessions`] | Server-side chat sessions |
//! | [`app`] | Composition root |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Classified error taxonomy |
//! | [`models`] | Core data types |
//! | [`progress`] | Upload progress reporting |
//! | [`logging`] | Tracing subscriber setup |

pub mod app;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod logging;
pub mod models;
pub mod preview;
pub mod progress;
pub mod sessions;
pub mod upload;
