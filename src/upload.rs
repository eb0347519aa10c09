//! Chunked upload coordinator.
//!
//! Splits a file into fixed-size chunks and sends them strictly in order to
//! `POST /api/v1/documents/upload/chunk`, waiting for each acknowledgment
//! before sending the next. Each request is a multipart form:
//!
//! | Field | Content |
//! |-------|---------|
//! | `file` | raw chunk bytes, with the original file name |
//! | `chunk` | zero-based chunk index |
//! | `chunks` | total number of chunks |
//!
//! Any failed chunk aborts the whole job: nothing is retried at the chunk
//! level and the remaining chunks are never sent. When the last chunk is
//! acknowledged the knowledge base is refreshed so the new document shows
//! up. Only one job runs at a time; a concurrent upload is rejected.

use anyhow::{Context, Result};
use reqwest::Method;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::client::{MultipartBody, RequestBody, RequestClient};
use crate::error::ClassifiedError;
use crate::knowledge::KnowledgeBase;
use crate::progress::{UploadProgressEvent, UploadProgressReporter};

pub const UPLOAD_CHUNK_PATH: &str = "/api/v1/documents/upload/chunk";

/// A file to upload, fully loaded in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        Ok(Self::new(name, guess_mime_type(path), bytes))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// MIME type from the file extension, `application/octet-stream` otherwise.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// `ceil(size / chunk_size)`.
pub fn total_chunks(size: usize, chunk_size: usize) -> usize {
    size.div_ceil(chunk_size)
}

/// Bookkeeping for one upload. Lives only for the duration of the job.
struct UploadJob<'a> {
    file: &'a UploadFile,
    chunk_size: usize,
    total_chunks: usize,
    next_chunk_index: usize,
}

impl<'a> UploadJob<'a> {
    fn new(file: &'a UploadFile, chunk_size: usize) -> Self {
        Self {
            file,
            chunk_size,
            total_chunks: total_chunks(file.size(), chunk_size),
            next_chunk_index: 0,
        }
    }

    fn next_chunk(&self) -> Option<(usize, &'a [u8])> {
        if self.next_chunk_index >= self.total_chunks {
            return None;
        }
        let start = self.next_chunk_index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.file.size());
        Some((self.next_chunk_index, &self.file.bytes[start..end]))
    }

    fn acknowledge(&mut self) {
        self.next_chunk_index += 1;
    }
}

/// Outcome of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub file_name: String,
    pub bytes: usize,
    pub total_chunks: usize,
    /// Whether the knowledge base refresh after the upload succeeded.
    pub refreshed: bool,
}

/// Clears the active flag when the job ends, however it ends.
struct ActiveJob<'a>(&'a AtomicBool);

impl<'a> ActiveJob<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct UploadCoordinator {
    client: RequestClient,
    knowledge: KnowledgeBase,
    chunk_size: usize,
    reporter: Arc<dyn UploadProgressReporter>,
    active: Arc<AtomicBool>,
}

impl UploadCoordinator {
    pub fn new(
        client: RequestClient,
        knowledge: KnowledgeBase,
        chunk_size: usize,
        reporter: Arc<dyn UploadProgressReporter>,
    ) -> Self {
        Self {
            client,
            knowledge,
            chunk_size,
            reporter,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn upload(&self, file: &UploadFile) -> Result<UploadReport, ClassifiedError> {
        self.upload_with_chunk_size(file, self.chunk_size).await
    }

    pub async fn upload_with_chunk_size(
        &self,
        file: &UploadFile,
        chunk_size: usize,
    ) -> Result<UploadReport, ClassifiedError> {
        if chunk_size == 0 {
            return Err(ClassifiedError::validation("chunk size must be greater than zero"));
        }
        if file.bytes.is_empty() {
            return Err(ClassifiedError::validation(format!(
                "{} is empty",
                file.name
            )));
        }
        let _active = ActiveJob::acquire(&self.active)
            .ok_or_else(|| ClassifiedError::validation("an upload is already in progress"))?;

        let mut job = UploadJob::new(file, chunk_size);
        info!(
            file = %file.name,
            bytes = file.size(),
            chunks = job.total_chunks,
            "starting upload"
        );
        self.reporter.report(UploadProgressEvent::Started {
            file: file.name.clone(),
            bytes: file.size() as u64,
            total_chunks: job.total_chunks,
        });

        while let Some((index, bytes)) = job.next_chunk() {
            let body = MultipartBody {
                file_field: "file".to_string(),
                file_name: file.name.clone(),
                mime_type: file.mime_type.clone(),
                bytes: bytes.to_vec(),
                fields: vec![
                    ("chunk".to_string(), index.to_string()),
                    ("chunks".to_string(), job.total_chunks.to_string()),
                ],
            };

            if let Err(e) = self
                .client
                .send(Method::POST, UPLOAD_CHUNK_PATH, Some(RequestBody::Multipart(body)))
                .await
            {
                warn!(file = %file.name, chunk = index, error = %e, "upload aborted");
                self.reporter.report(UploadProgressEvent::Aborted {
                    file: file.name.clone(),
                    index,
                    total_chunks: job.total_chunks,
                    reason: e.to_string(),
                });
                return Err(e);
            }

            job.acknowledge();
            self.reporter.report(UploadProgressEvent::ChunkAcknowledged {
                file: file.name.clone(),
                index,
                total_chunks: job.total_chunks,
            });
        }

        info!(file = %file.name, "upload complete");
        self.reporter.report(UploadProgressEvent::Completed {
            file: file.name.clone(),
            total_chunks: job.total_chunks,
        });

        let refreshed = self.knowledge.fetch().await.is_ok();

        Ok(UploadReport {
            file_name: file.name.clone(),
            bytes: file.size(),
            total_chunks: job.total_chunks,
            refreshed,
        })
    }
}
