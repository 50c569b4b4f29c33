//! Structured-output contracts and their validation.
//!
//! Models are asked for JSON matching a declared schema, but the reply is
//! never trusted: it is cleaned of the usual wrapping artefacts, then
//! deserialised into a strict Rust type. Anything that does not fit becomes
//! [`QaError::SchemaValidation`]; there is no lenient fallback.
//!
//! ## Cleanup rules
//!
//! Applied in order, each a pure `&str → String` pass:
//! 1. Strip invisible Unicode (BOM, zero-width spaces)
//! 2. Strip an outer ```` ```json ```` fence
//! 3. Trim surrounding whitespace

use crate::capability::OutputSchema;
use crate::error::QaError;
use crate::output::{AnsweredResult, Citation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

pub const GRADE_SCHEMA_NAME: &str = "grade_documents";
pub const ANSWER_SCHEMA_NAME: &str = "answer_with_citations";

/// `{"binary_score": "yes" | "no"}`
pub fn grade_schema() -> OutputSchema {
    OutputSchema {
        name: GRADE_SCHEMA_NAME,
        schema: json!({
            "type": "object",
            "description": "Grade documents using a binary score for relevance check.",
            "properties": {
                "binary_score": {
                    "type": "string",
                    "enum": ["yes", "no"],
                    "description": "Relevance score: 'yes' if relevant, or 'no' if not relevant"
                }
            },
            "required": ["binary_score"],
            "additionalProperties": false
        }),
    }
}

/// `{answer, citations: [{text, title, page_no, file_source}]}`
pub fn answer_schema() -> OutputSchema {
    OutputSchema {
        name: ANSWER_SCHEMA_NAME,
        schema: json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "The answer to the question based on the provided context"
                },
                "citations": {
                    "type": "array",
                    "description": "List of citations of the context relevant to the answer",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": {
                                "type": "string",
                                "description": "The exact text of the citation from the context"
                            },
                            "title": {
                                "type": "string",
                                "description": "The title of the document from which the citation is taken"
                            },
                            "page_no": {
                                "type": "integer",
                                "minimum": 1,
                                "description": "The page number of the document from which the citation is taken"
                            },
                            "file_source": {
                                "type": "string",
                                "description": "The source of the document from which the citation is taken, provide the file name or url"
                            }
                        },
                        "required": ["text", "title", "page_no", "file_source"]
                    }
                }
            },
            "required": ["answer", "citations"]
        }),
    }
}

/// The grader's wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradeReply {
    pub binary_score: BinaryScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryScore {
    Yes,
    No,
}

/// The synthesizer's wire shape. Every field is required.
#[derive(Debug, Deserialize)]
struct AnswerReply {
    answer: String,
    citations: Vec<CitationReply>,
}

#[derive(Debug, Deserialize)]
struct CitationReply {
    text: String,
    title: String,
    page_no: usize,
    file_source: String,
}

/// Parse a grader reply.
pub fn parse_grade(raw: &str) -> Result<GradeReply, QaError> {
    parse_as(GRADE_SCHEMA_NAME, raw)
}

/// Parse and validate a synthesizer reply.
pub fn parse_answer(raw: &str) -> Result<AnsweredResult, QaError> {
    let reply: AnswerReply = parse_as(ANSWER_SCHEMA_NAME, raw)?;

    let mut citations = Vec::with_capacity(reply.citations.len());
    for (i, c) in reply.citations.into_iter().enumerate() {
        if c.page_no == 0 {
            return Err(QaError::SchemaValidation {
                schema: ANSWER_SCHEMA_NAME.into(),
                detail: format!("citations[{i}].page_no must be >= 1, got 0"),
            });
        }
        if c.file_source.trim().is_empty() {
            return Err(QaError::SchemaValidation {
                schema: ANSWER_SCHEMA_NAME.into(),
                detail: format!("citations[{i}].file_source is empty"),
            });
        }
        citations.push(Citation {
            text: c.text,
            title: c.title,
            page_no: c.page_no,
            file_source: c.file_source,
        });
    }

    Ok(AnsweredResult {
        answer: reply.answer,
        citations,
    })
}

fn parse_as<T: DeserializeOwned>(schema: &str, raw: &str) -> Result<T, QaError> {
    let cleaned = clean_json_reply(raw);
    serde_json::from_str(&cleaned).map_err(|e| QaError::SchemaValidation {
        schema: schema.to_string(),
        detail: e.to_string(),
    })
}

/// Apply the cleanup rules to a raw structured reply.
pub fn clean_json_reply(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = strip_json_fences(&s);
    s.trim().to_string()
}

// ── Rule 1: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

// ── Rule 2: Strip outer code fences ─────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:json|JSON)?[ \t]*\n(.*)\n```\s*$").expect("static regex")
});

fn strip_json_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}
