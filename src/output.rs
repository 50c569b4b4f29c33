//! Result types produced by a question-answering turn.
//!
//! [`AnsweredResult`] is the terminal output of the workflow and the only
//! input the evidence locator needs. Its canonical text form (pretty JSON) is
//! what gets appended to the conversation and returned to callers, so it must
//! round-trip losslessly.

use crate::checkpoint::ThreadId;
use crate::error::{CitationError, ClientError, QaError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata attached to a retrieved chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 0-indexed page the chunk came from.
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub title: String,
    /// Path of the original PDF.
    #[serde(default)]
    pub source: String,
}

/// A chunk returned by the retrieval capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl RetrievedDocument {
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// A supporting excerpt claimed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Verbatim (or near-verbatim) excerpt from the context.
    pub text: String,
    pub title: String,
    /// 1-indexed page number.
    pub page_no: usize,
    /// Path to the original PDF.
    pub file_source: String,
}

/// A citation flattened for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub text: String,
    pub page_no: usize,
    pub source: String,
}

/// The answer to one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredResult {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl AnsweredResult {
    /// A direct reply with no supporting evidence.
    pub fn direct(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            citations: Vec::new(),
        }
    }

    /// Canonical text form: JSON with two-space indentation.
    pub fn to_canonical(&self) -> Result<String, QaError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| QaError::Internal(format!("serialise answer: {e}")))
    }

    /// Parse the canonical text form back.
    pub fn from_canonical(text: &str) -> Result<Self, QaError> {
        serde_json::from_str(text).map_err(|e| QaError::SchemaValidation {
            schema: "answer_with_citations".into(),
            detail: e.to_string(),
        })
    }

    pub fn references(&self) -> Vec<Reference> {
        self.citations
            .iter()
            .map(|c| Reference {
                text: c.text.clone(),
                page_no: c.page_no,
                source: c.file_source.clone(),
            })
            .collect()
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    /// The model answered without retrieving.
    DoneDirect,
    /// The answer was synthesized from graded context.
    Done,
}

/// Result of one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutput {
    pub thread_id: ThreadId,
    pub result: AnsweredResult,
    pub terminal: Terminal,
    /// Number of DECIDE passes taken.
    pub decide_passes: u32,
    /// Number of question rewrites performed.
    pub rewrites: u32,
    /// Documents the retriever returned during this turn. Citations naming
    /// any other document are not located.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// One rendered, annotated page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceImage {
    /// 1-indexed page number.
    pub page_no: usize,
    pub file_source: String,
    pub path: PathBuf,
}

/// Everything the evidence locator produced for one call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceReport {
    /// Annotated pages in first-touch order.
    pub images: Vec<EvidenceImage>,
    /// Citations (or pages) that were skipped.
    pub errors: Vec<CitationError>,
}

impl EvidenceReport {
    pub fn image_paths(&self) -> Vec<PathBuf> {
        self.images.iter().map(|i| i.path.clone()).collect()
    }

    /// One-line summary of the skipped citations, if any.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Full response for a query: answer, references and evidence images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub thread_id: ThreadId,
    /// Canonical JSON of the [`AnsweredResult`].
    pub answer: String,
    pub references: Vec<Reference>,
    pub image_paths: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ClientError>,
}

impl QueryResponse {
    pub fn from_turn(turn: &TurnOutput, evidence: &EvidenceReport) -> Result<Self, QaError> {
        Ok(Self {
            thread_id: turn.thread_id,
            answer: turn.result.to_canonical()?,
            references: turn.result.references(),
            image_paths: evidence.image_paths(),
            errors: evidence
                .errors
                .iter()
                .map(|e| ClientError {
                    kind: e.kind(),
                    message: e.to_string(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnsweredResult {
        AnsweredResult {
            answer: "Attention weighs tokens by relevance.".into(),
            citations: vec![
                Citation {
                    text: "An attention function can be described as mapping a query".into(),
                    title: "Attention Is All You Need".into(),
                    page_no: 3,
                    file_source: "temp_upload_dir/attention.pdf".into(),
                },
                Citation {
                    text: "Multi-head attention allows the model".into(),
                    title: "Attention Is All You Need".into(),
                    page_no: 5,
                    file_source: "temp_upload_dir/attention.pdf".into(),
                },
            ],
        }
    }

    #[test]
    fn canonical_form_round_trips_in_order() {
        let original = sample();
        let text = original.to_canonical().unwrap();
        let parsed = AnsweredResult::from_canonical(&text).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(parsed.citations[0].page_no, 3);
        assert_eq!(parsed.citations[1].page_no, 5);
    }

    #[test]
    fn canonical_form_is_indented_json() {
        let text = sample().to_canonical().unwrap();
        assert!(text.starts_with("{\n  \"answer\""), "got: {text}");
    }

    #[test]
    fn direct_answer_has_no_citations() {
        let text = AnsweredResult::direct("Hello!").to_canonical().unwrap();
        let parsed = AnsweredResult::from_canonical(&text).unwrap();
        assert!(parsed.citations.is_empty());
        assert_eq!(parsed.answer, "Hello!");
    }

    #[test]
    fn references_flatten_citations() {
        let refs = sample().references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].source, "temp_upload_dir/attention.pdf");
        assert_eq!(refs[1].page_no, 5);
    }

    #[test]
    fn error_summary_joins_messages() {
        let mut report = EvidenceReport::default();
        assert!(report.error_summary().is_none());
        report.errors.push(CitationError::SourceNotFound {
            citation: 0,
            file_source: "missing.pdf".into(),
            page_no: 1,
            detail: "no such file".into(),
        });
        assert!(report.error_summary().unwrap().contains("missing.pdf"));
    }
}
