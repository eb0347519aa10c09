//! Core data models shared by the chat pipeline, the knowledge base, and
//! the upload coordinator.
//!
//! Wire shapes follow the backend's JSON: documents carry their MIME type in
//! a field named `type`, timestamps may arrive without an offset (they are
//! UTC), and source references use snake_case keys.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
    Error,
}

/// One entry in the conversation. Never edited after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub author: Author,
    pub sources: Vec<SourceRef>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(author: Author, content: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            author,
            sources,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Author::User, content, Vec::new())
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self::new(Author::Assistant, content, sources)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Author::Error, content, Vec::new())
    }
}

/// A document cited by an assistant answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(alias = "id")]
    pub document_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "content")]
    pub snippet: String,
    #[serde(default)]
    pub relevance_score: f64,
}

impl SourceRef {
    /// Bring the relevance score into `[0, 1]`.
    ///
    /// Returns `None` when the score is not a finite number.
    pub fn normalized(mut self) -> Option<Self> {
        if !self.relevance_score.is_finite() {
            return None;
        }
        self.relevance_score = self.relevance_score.clamp(0.0, 1.0);
        Some(self)
    }
}

/// A document in the knowledge base. Identity is assigned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(rename = "type", alias = "mime_type")]
    pub mime_type: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub content: Option<String>,
}

impl Document {
    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }
}

/// Server-assigned conversation identifier.
///
/// Unset until the first successful reply carries one; afterwards it never
/// changes for the lifetime of the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    id: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a conversation the server already knows about.
    pub fn resume(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Adopt `id` if no session id is held yet. Returns whether it was adopted.
    pub fn adopt(&mut self, id: Option<String>) -> bool {
        match (&self.id, id) {
            (None, Some(id)) if !id.is_empty() => {
                self.id = Some(id);
                true
            }
            _ => false,
        }
    }
}

/// Summary of a server-side chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

/// A message as stored in a server-side session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

/// Parse RFC 3339 timestamps, or naive ISO 8601 timestamps taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw))),
    }
}
