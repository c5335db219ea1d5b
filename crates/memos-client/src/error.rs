//! Error types for memos-client

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::service::BatchReport;

/// Result type alias using memos-client's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in memos-client operations
#[derive(Error, Debug)]
pub enum Error {
    /// Bad credentials, unrenewable token, or a repeated 401.
    #[error("Authentication failed during {operation}: {message}{}", status_suffix(.status))]
    Authentication {
        operation: &'static str,
        message: String,
        status: Option<u16>,
    },

    /// Malformed local input or server response.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Non-2xx response other than 401.
    #[error("API error during {operation}{}: {message} (HTTP {status})", resource_suffix(.resource))]
    Api {
        operation: &'static str,
        resource: Option<String>,
        status: u16,
        message: String,
    },

    /// Connection-level failure after retries were exhausted.
    #[error("Transport error during {operation}{}: {source}", resource_suffix(.resource))]
    Transport {
        operation: &'static str,
        resource: Option<String>,
        #[source]
        source: reqwest::Error,
    },

    /// Request did not complete within the configured timeout.
    #[error("Request timed out after {timeout:?} during {operation}{}", resource_suffix(.resource))]
    Timeout {
        operation: &'static str,
        resource: Option<String>,
        timeout: Duration,
    },

    /// Batch operation where at least one item failed.
    #[error("Batch {operation} partially failed: {}", batch_summary(.report))]
    PartialBatchFailure {
        operation: &'static str,
        report: BatchReport,
    },

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local file error while streaming an attachment
    #[error("IO error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn authentication(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Authentication {
            operation,
            message: message.into(),
            status: None,
        }
    }

    pub(crate) fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// HTTP status carried by this error, when there is one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. } => *status,
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error class may be retried by the transport policy.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map_or_else(String::new, |status| format!(" (HTTP {status})"))
}

fn resource_suffix(resource: &Option<String>) -> String {
    resource
        .as_deref()
        .map_or_else(String::new, |resource| format!(" on {resource}"))
}

fn batch_summary(report: &BatchReport) -> String {
    format!(
        "{} succeeded, {} failed",
        report.succeeded().count(),
        report.failed().count()
    )
}

/// A single field that failed constraint checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every constraint violation found while validating one object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    /// What was being validated, e.g. `memo` or `create_memo request`.
    pub subject: String,
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            violations: Vec::new(),
        }
    }

    pub fn single(
        subject: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(subject);
        error.push(field, message);
        error
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Returns `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Whether a violation was recorded for `field`.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.violations
            .iter()
            .any(|violation| violation.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: ", self.subject)?;
        for (index, violation) in self.violations.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}
