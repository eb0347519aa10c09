//! Upload progress reporting.
//!
//! Reports observable progress during `corpus docs upload` so users see how
//! many chunks have been acknowledged and whether the job finished or was
//! aborted. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

/// A single progress event for one upload job.
#[derive(Clone, Debug, PartialEq)]
pub enum UploadProgressEvent {
    /// The job was accepted; no chunk has been sent yet.
    Started {
        file: String,
        bytes: u64,
        total_chunks: usize,
    },
    /// Chunk `index` (zero-based) was acknowledged by the server.
    ChunkAcknowledged {
        file: String,
        index: usize,
        total_chunks: usize,
    },
    /// Every chunk was acknowledged.
    Completed { file: String, total_chunks: usize },
    /// Chunk `index` failed and the remaining chunks were not sent.
    Aborted {
        file: String,
        index: usize,
        total_chunks: usize,
        reason: String,
    },
}

/// Reports upload progress. Implementations write to stderr (human or JSON).
pub trait UploadProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the upload coordinator.
    fn report(&self, event: UploadProgressEvent);
}

/// Human-friendly progress on stderr: "upload report.pdf  chunk 2 / 3".
pub struct StderrProgress;

impl UploadProgressReporter for StderrProgress {
    fn report(&self, event: UploadProgressEvent) {
        let line = match &event {
            UploadProgressEvent::Started {
                file,
                bytes,
                total_chunks,
            } => format!(
                "upload {}  {} bytes in {} chunks\n",
                file,
                format_number(*bytes),
                format_number(*total_chunks as u64)
            ),
            UploadProgressEvent::ChunkAcknowledged {
                file,
                index,
                total_chunks,
            } => format!(
                "upload {}  chunk {} / {}\n",
                file,
                format_number(*index as u64 + 1),
                format_number(*total_chunks as u64)
            ),
            UploadProgressEvent::Completed { file, .. } => format!("upload {}  done\n", file),
            UploadProgressEvent::Aborted {
                file,
                index,
                total_chunks,
                reason,
            } => format!(
                "upload {}  aborted at chunk {} / {}: {}\n",
                file,
                index + 1,
                total_chunks,
                reason
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl UploadProgressReporter for JsonProgress {
    fn report(&self, event: UploadProgressEvent) {
        let obj = match &event {
            UploadProgressEvent::Started {
                file,
                bytes,
                total_chunks,
            } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "started",
                "bytes": bytes,
                "total": total_chunks
            }),
            UploadProgressEvent::ChunkAcknowledged {
                file,
                index,
                total_chunks,
            } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "uploading",
                "n": index + 1,
                "total": total_chunks
            }),
            UploadProgressEvent::Completed { file, total_chunks } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "completed",
                "total": total_chunks
            }),
            UploadProgressEvent::Aborted {
                file,
                index,
                total_chunks,
                reason,
            } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "aborted",
                "chunk": index,
                "total": total_chunks,
                "reason": reason
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UploadProgressReporter for NoProgress {
    fn report(&self, _event: UploadProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn UploadProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
