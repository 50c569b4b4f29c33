//! # edgequake-pdfqa
//!
//! Answer questions over PDF documents with cited answers and highlighted
//! evidence pages.
//!
//! ## Why this crate?
//!
//! Retrieval-augmented answers are only useful when a reader can check them.
//! Every answer produced here carries citations (excerpt, title, page, file)
//! and each citation is mapped back onto its source page, where the matching
//! text blocks are outlined in red and saved as a PNG.
//!
//! ## Workflow Overview
//!
//! ```text
//! question
//!  │
//!  ├─ DECIDE    model answers directly, or calls the retrieval tool
//!  ├─ RETRIEVE  top-k chunks from the index
//!  ├─ GRADE     {"binary_score": "yes" | "no"}
//!  │    └─ no → REWRITE the question → back to DECIDE (bounded)
//!  ├─ GENERATE  {answer, citations[]} validated against its schema
//!  └─ EVIDENCE  fuzzy-match citations on their pages, render PNGs
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfqa::{QaConfig, QaEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let engine = QaEngine::from_config(QaConfig::default())?;
//!     engine.ingest(&["attention.pdf"]).await?;
//!
//!     let response = engine.ask_with_evidence("What is multi-head attention?", None).await?;
//!     println!("{}", response.answer);
//!     for path in &response.image_paths {
//!         eprintln!("evidence: {}", path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfqa` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-pdfqa = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod index;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod similarity;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use capability::{LanguageModel, ModelReply, OutputSchema, Retriever, ToolSpec};
pub use checkpoint::{CheckpointStore, ThreadId};
pub use config::{QaConfig, QaConfigBuilder};
pub use conversation::{ConversationState, Message, Role, ToolInvocation};
pub use engine::{resolve_provider, IngestSummary, QaEngine};
pub use error::{CapabilityError, CitationError, ClientError, ErrorKind, QaError};
pub use evidence::{locate, BoundingBox, DocumentStore, LocateOptions, PageLayout, SourceDocument, TextBlock};
pub use index::DocumentIndex;
pub use observer::{NoopObserver, WorkflowObserver};
pub use output::{
    AnsweredResult, ChunkMetadata, Citation, EvidenceImage, EvidenceReport, QueryResponse,
    Reference, RetrievedDocument, Terminal, TurnOutput,
};
pub use similarity::{LevenshteinRatio, Similarity};
pub use workflow::{Workflow, WorkflowState};
