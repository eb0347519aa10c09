//! # Corpus Chat CLI (`corpus`)
//!
//! The `corpus` binary talks to a corpus backend: it holds conversations
//! grounded in your documents, lists and manages those documents, and
//! uploads new ones.
//!
//! ## Usage
//!
//! ```bash
//! corpus --config ./config/corpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus chat` | Interactive conversation |
//! | `corpus ask "<text>"` | Send one message and print the answer |
//! | `corpus docs list` | List documents in the knowledge base |
//! | `corpus docs upload <path>` | Upload a file in chunks |
//! | `corpus docs delete <id>` | Delete a document |
//! | `corpus docs preview <id> --out <path>` | Save a PDF document's bytes |
//! | `corpus docs show <id>` | Print one document |
//! | `corpus docs summarize <id>` | Ask the backend for a summary |
//! | `corpus docs compare <id>... --question "<text>"` | Compare documents |
//! | `corpus sessions list` | List server-side chat sessions |
//! | `corpus sessions show <id>` | Print a session transcript |
//! | `corpus sessions delete <id>` | Delete a session |

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use corpus_chat::app::App;
use corpus_chat::chat::SubmitOutcome;
use corpus_chat::config::{self, Config};
use corpus_chat::knowledge::{Notifier, RemoveOutcome};
use corpus_chat::logging::setup_logging;
use corpus_chat::models::{Author, Document, Message, Session, SourceRef};
use corpus_chat::progress::ProgressMode;
use corpus_chat::upload::UploadFile;

const DEFAULT_CONFIG_PATH: &str = "./config/corpus.toml";

/// Corpus Chat CLI: converse with an assistant grounded in your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/corpus.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "corpus",
    about = "Corpus Chat: converse with an assistant grounded in your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/corpus.toml` when it exists, otherwise a
    /// backend on `http://localhost:8000` is assumed.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Upload progress: off, human, or json. Defaults to human on a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation.
    ///
    /// Type a message and press enter. Lines starting with `/` are
    /// commands: `/docs`, `/select <id>`, `/close`, `/delete <id>`, `/quit`.
    Chat {
        /// Continue an existing server-side session.
        #[arg(long)]
        session: Option<String>,
    },

    /// Send one message and print the reply.
    Ask {
        text: String,

        /// Continue an existing server-side session.
        #[arg(long)]
        session: Option<String>,
    },

    /// Manage documents in the knowledge base.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Inspect and delete server-side chat sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// List all documents.
    List,
    /// Delete a document by id.
    Delete { id: String },
    /// Upload a file in sequential chunks.
    Upload {
        path: PathBuf,
        /// Override the configured chunk size in bytes.
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Write a PDF document's bytes to a file.
    Preview {
        id: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print one document as the server has it.
    Show { id: String },
    /// Ask the backend to summarize a document.
    Summarize { id: String },
    /// Ask how several documents relate to a question.
    Compare {
        /// Two or more document ids.
        #[arg(required = true, num_args = 2..)]
        ids: Vec<String>,
        #[arg(long)]
        question: String,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, most recently updated first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print a session's messages.
    Show { id: String },
    /// Delete a session.
    Delete { id: String },
}

/// Prints alerts to stderr so they do not interleave with answers.
struct CliNotifier;

impl Notifier for CliNotifier {
    fn alert(&self, message: &str) {
        eprintln!("! {}", message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let cfg = resolve_config(cli.config.as_deref())?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    let session = match &cli.command {
        Commands::Chat { session } | Commands::Ask { session, .. } => session
            .as_deref()
            .map(Session::resume)
            .unwrap_or_default(),
        _ => Session::new(),
    };

    let app = App::from_config(
        &cfg,
        session,
        Arc::new(CliNotifier),
        Arc::from(progress.reporter()),
    )?;

    match cli.command {
        Commands::Chat { .. } => run_chat(&app).await?,
        Commands::Ask { text, .. } => {
            match app.chat.submit(&text).await {
                SubmitOutcome::Replied(message) => print_message(&message),
                SubmitOutcome::Failed(message) => {
                    print_message(&message);
                    bail!("message could not be answered");
                }
                SubmitOutcome::Rejected(e) => bail!(e),
            }
            if let Some(id) = app.chat.session().id() {
                eprintln!("session: {}", id);
            }
        }
        Commands::Docs { action } => run_docs(&app, action).await?,
        Commands::Sessions { action } => run_sessions(&app, action).await?,
    }

    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                config::load_config(default)
            } else {
                Ok(Config::minimal())
            }
        }
    }
}

async fn run_chat(app: &App) -> Result<()> {
    for message in app.chat.messages() {
        print_message(&message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = match command.split_once(' ') {
                Some((name, arg)) => (name, arg.trim()),
                None => (command, ""),
            };
            match name {
                "quit" | "exit" => break,
                "docs" => {
                    if app.knowledge.fetch().await.is_ok() {
                        print_documents(&app.knowledge.documents(), app.knowledge.selection());
                    } else if let Some(error) = app.knowledge.error() {
                        eprintln!("! {}", error);
                    }
                }
                "select" if !arg.is_empty() => {
                    app.knowledge.select(arg);
                    match app.preview.current() {
                        Some(doc) => print_preview(&doc),
                        None => println!("(no loaded document with id {}; try /docs)", arg),
                    }
                }
                "close" => app.preview.close(),
                "delete" if !arg.is_empty() => {
                    if app.knowledge.remove(arg).await == RemoveOutcome::Removed {
                        println!("deleted {}", arg);
                    }
                }
                _ => eprintln!("unknown command: /{}", command),
            }
            continue;
        }

        match app.chat.submit(line).await {
            SubmitOutcome::Rejected(e) => eprintln!("! {}", e),
            outcome => outcome.message().into_iter().for_each(print_message),
        }
    }

    if let Some(id) = app.chat.session().id() {
        eprintln!("session: {}", id);
    }
    Ok(())
}

async fn run_docs(app: &App, action: DocsAction) -> Result<()> {
    match action {
        DocsAction::List => {
            app.knowledge.fetch().await?;
            print_documents(&app.knowledge.documents(), None);
        }
        DocsAction::Delete { id } => match app.knowledge.remove(&id).await {
            RemoveOutcome::Removed => println!("deleted {}", id),
            RemoveOutcome::Failed(e) => bail!(e),
        },
        DocsAction::Upload { path, chunk_size } => {
            let file = UploadFile::from_path(&path).await?;
            let report = match chunk_size {
                Some(size) => app.uploads.upload_with_chunk_size(&file, size).await?,
                None => app.uploads.upload(&file).await?,
            };
            println!(
                "uploaded {} ({} bytes, {} chunk{})",
                report.file_name,
                report.bytes,
                report.total_chunks,
                if report.total_chunks == 1 { "" } else { "s" }
            );
            if !report.refreshed {
                eprintln!("! document list could not be refreshed");
            }
        }
        DocsAction::Preview { id, out } => {
            let bytes = app.knowledge.preview_bytes(&id).await?;
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!("wrote {} bytes to {}", bytes.len(), out.display());
        }
        DocsAction::Show { id } => {
            let doc = app.knowledge.get(&id).await?;
            println!("{}  {}", doc.id, doc.created_at.format("%Y-%m-%d %H:%M"));
            print_preview(&doc);
        }
        DocsAction::Summarize { id } => {
            let summary = app.knowledge.summarize(&id).await?;
            println!("{}", summary);
        }
        DocsAction::Compare { ids, question } => {
            let analysis = app.knowledge.compare(&ids, &question).await?;
            println!("{}", analysis);
        }
    }
    Ok(())
}

async fn run_sessions(app: &App, action: SessionsAction) -> Result<()> {
    match action {
        SessionsAction::List { limit } => {
            let sessions = app.sessions.list(0, limit).await?;
            if sessions.is_empty() {
                println!("No sessions.");
            }
            for s in sessions {
                let updated = s
                    .updated_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  {}",
                    s.id,
                    updated,
                    s.title.as_deref().unwrap_or("(untitled)")
                );
            }
        }
        SessionsAction::Show { id } => {
            let session = app.sessions.get(&id).await?;
            for m in &session.messages {
                println!("[{}] {}", m.role.as_deref().unwrap_or("?"), m.content);
                print_sources(&m.sources);
            }
        }
        SessionsAction::Delete { id } => {
            app.sessions.delete(&id).await?;
            println!("deleted session {}", id);
        }
    }
    Ok(())
}

fn print_message(message: &Message) {
    let who = match message.author {
        Author::User => "you",
        Author::Assistant => "assistant",
        Author::Error => "error",
    };
    println!("[{}] {}", who, message.content);
    print_sources(&message.sources);
}

fn print_sources(sources: &[SourceRef]) {
    for source in sources {
        println!(
            "    - {} ({:.0}%): {}",
            source.title,
            source.relevance_score * 100.0,
            source.snippet
        );
    }
}

fn print_documents(documents: &[Document], selection: Option<String>) {
    if documents.is_empty() {
        println!("No documents.");
        return;
    }
    for doc in documents {
        let marker = if selection.as_deref() == Some(doc.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  {}  {}  {}",
            marker,
            doc.id,
            doc.created_at.format("%Y-%m-%d"),
            doc.mime_type,
            doc.title
        );
    }
}

fn print_preview(doc: &Document) {
    println!("── {} ({}) ──", doc.title, doc.mime_type);
    if doc.is_pdf() {
        println!("(PDF; save it with `corpus docs preview {} --out <path>`)", doc.id);
    } else {
        println!("{}", doc.content.as_deref().unwrap_or("No content available"));
    }
}
