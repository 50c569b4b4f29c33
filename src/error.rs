//! Error types for the edgequake-pdfqa library.
//!
//! Three distinct error types reflect three distinct failure modes:
//!
//! * [`QaError`]: **Fatal**: the turn (or call) cannot produce a result at
//!   all (schema violation, rewrite loop did not converge, nothing ingested
//!   yet, provider not configured). Returned as `Err(QaError)` from the
//!   top-level engine and workflow functions.
//!
//! * [`CitationError`]: **Non-fatal**: one citation could not be located on
//!   its source page (missing file, page out of range, render glitch) but all
//!   other citations are fine. Stored inside
//!   [`crate::output::EvidenceReport`] so callers still get partial evidence.
//!
//! * [`CapabilityError`]: the raw outcome of a failed call to an external
//!   capability (language model, retriever). It only tells the retry loop in
//!   [`crate::pipeline::llm`] whether another attempt is worthwhile; it is
//!   always converted into a [`QaError`] before leaving the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdfqa library.
///
/// Per-citation failures use [`CitationError`] and are stored in
/// [`crate::output::EvidenceReport`] rather than propagated here.
#[derive(Debug, Error)]
pub enum QaError {
    // ── Workflow errors ───────────────────────────────────────────────────
    /// A structured-output call returned content that does not match its schema.
    #[error("Model output does not match the '{schema}' schema: {detail}")]
    SchemaValidation { schema: String, detail: String },

    /// The rewrite → decide → retrieve → grade cycle did not converge.
    #[error("Retrieval did not produce relevant context after {limit} question rewrites")]
    MaxIterationsExceeded { limit: u32 },

    /// A query arrived before any document was made available for retrieval.
    #[error("No documents available: {0}\nUpload or ingest at least one PDF before asking questions.")]
    PreconditionFailed(String),

    /// The turn was cancelled at a state boundary.
    #[error("Turn cancelled before completion")]
    Cancelled,

    // ── External capability errors ────────────────────────────────────────
    /// The LLM API returned a non-retryable error.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The retrieval capability returned a non-retryable error.
    #[error("Retrieval failed: {message}")]
    RetrievalFailed { message: String },

    /// A transient failure persisted through every retry.
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium system-wide, or set PDFIUM_LIB_PATH to the library file\n\
(or the directory containing it).\n"
    )]
    PdfiumBindingFailed(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the output directory or write an evidence image.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Caller-facing error category.
///
/// Every [`QaError`] maps onto exactly one kind so an outer layer (HTTP,
/// CLI) can choose a status code without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SchemaValidation,
    MaxIterationsExceeded,
    SourceNotFound,
    Precondition,
    Upstream,
    InvalidInput,
    Configuration,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::SchemaValidation => "schema_validation",
            ErrorKind::MaxIterationsExceeded => "max_iterations_exceeded",
            ErrorKind::SourceNotFound => "source_not_found",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Upstream => "upstream",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error returned to callers: a kind plus a human message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl QaError {
    /// The caller-facing category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QaError::SchemaValidation { .. } => ErrorKind::SchemaValidation,
            QaError::MaxIterationsExceeded { .. } => ErrorKind::MaxIterationsExceeded,
            QaError::PreconditionFailed(_) => ErrorKind::Precondition,
            QaError::Cancelled => ErrorKind::Cancelled,
            QaError::LlmApiError { .. }
            | QaError::RetrievalFailed { .. }
            | QaError::RetriesExhausted { .. } => ErrorKind::Upstream,
            QaError::FileNotFound { .. }
            | QaError::PermissionDenied { .. }
            | QaError::NotAPdf { .. }
            | QaError::CorruptPdf { .. }
            | QaError::PasswordRequired { .. }
            | QaError::WrongPassword { .. } => ErrorKind::InvalidInput,
            QaError::ProviderNotConfigured { .. }
            | QaError::PdfiumBindingFailed(_)
            | QaError::InvalidConfig(_) => ErrorKind::Configuration,
            QaError::OutputWriteFailed { .. } | QaError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Build the structured error surfaced to callers.
    ///
    /// Internal errors are reported with a generic message so no internal
    /// state leaks out of the library.
    pub fn to_client_error(&self) -> ClientError {
        let message = match self.kind() {
            ErrorKind::Internal => "internal error while answering the question".to_string(),
            _ => self.to_string(),
        };
        ClientError {
            kind: self.kind(),
            message,
        }
    }
}

/// A non-fatal error for a single citation.
///
/// Stored in [`crate::output::EvidenceReport::errors`]. The locator skips
/// the citation (or page) and carries on with the rest.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CitationError {
    /// The source document could not be opened, or the cited page does not exist.
    #[error("Citation {citation}: source '{file_source}' page {page_no} not found: {detail}")]
    SourceNotFound {
        citation: usize,
        file_source: String,
        page_no: usize,
        detail: String,
    },

    /// The annotated page could not be rasterised or written.
    #[error("Page {page_no} of '{file_source}': rendering failed: {detail}")]
    RenderFailed {
        file_source: String,
        page_no: usize,
        detail: String,
    },
}

impl CitationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CitationError::SourceNotFound { .. } => ErrorKind::SourceNotFound,
            CitationError::RenderFailed { .. } => ErrorKind::Internal,
        }
    }
}

/// Failure of a single call to an external capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Network blip, rate limit, 5xx: worth another attempt.
    #[error("transient: {0}")]
    Transient(String),

    /// Bad request, authentication failure: retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl CapabilityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            CapabilityError::Transient(m) | CapabilityError::Permanent(m) => m,
        }
    }
}
