//! Classified network and validation errors.
//!
//! Every outcome of a call through [`RequestClient`](crate::client::RequestClient)
//! is normalized into one of the variants of [`ClassifiedError`] before it
//! reaches business logic. Components above the client only ever see this
//! two-armed shape: success, or one of these kinds.
//!
//! | Variant | Origin | Retried |
//! |---------|--------|---------|
//! | `Network` | no response reached us (connect, timeout, body read) | no |
//! | `RateLimited` | HTTP 429 | yes, until the attempt cap |
//! | `Client` | HTTP 4xx or a malformed payload | no |
//! | `Server` | HTTP 5xx | no |
//! | `Validation` | rejected locally before any request | n/a |

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifiedError {
    #[error("network error: {detail}")]
    Network { detail: String },

    #[error("rate limited after {attempts} attempts: {}", detail_or_default(.detail))]
    RateLimited {
        detail: Option<String>,
        attempts: u32,
    },

    #[error("client error {status}: {}", detail_or_default(.detail))]
    Client { status: u16, detail: Option<String> },

    #[error("server error {status}: {}", detail_or_default(.detail))]
    Server { status: u16, detail: Option<String> },

    #[error("validation error: {detail}")]
    Validation { detail: String },
}

/// Short machine-readable name of a [`ClassifiedError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    RateLimited,
    Client,
    Server,
    Validation,
}

fn detail_or_default(detail: &Option<String>) -> &str {
    detail.as_deref().unwrap_or("no detail provided")
}

impl ClassifiedError {
    pub fn validation(detail: impl Into<String>) -> Self {
        ClassifiedError::Validation {
            detail: detail.into(),
        }
    }

    /// A response arrived but its body could not be decoded into the
    /// expected shape. Treated as a client-side contract violation.
    pub fn malformed(status: u16, detail: impl std::fmt::Display) -> Self {
        ClassifiedError::Client {
            status,
            detail: Some(format!("malformed response payload: {}", detail)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifiedError::Network { .. } => ErrorKind::Network,
            ClassifiedError::RateLimited { .. } => ErrorKind::RateLimited,
            ClassifiedError::Client { .. } => ErrorKind::Client,
            ClassifiedError::Server { .. } => ErrorKind::Server,
            ClassifiedError::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// The server-provided (or locally produced) detail message, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClassifiedError::Network { detail } | ClassifiedError::Validation { detail } => {
                Some(detail)
            }
            ClassifiedError::RateLimited { detail, .. }
            | ClassifiedError::Client { detail, .. }
            | ClassifiedError::Server { detail, .. } => detail.as_deref(),
        }
    }

    /// HTTP status that produced this error, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClassifiedError::Client { status, .. } | ClassifiedError::Server { status, .. } => {
                Some(*status)
            }
            ClassifiedError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}
