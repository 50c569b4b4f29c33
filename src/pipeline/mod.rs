//! Pipeline stages used by the workflow and the evidence locator.
//!
//! Each submodule implements exactly one step, so each is independently
//! testable against a scripted model.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ index            (ingestion)
//! llm ──▶ grade / rewrite / synthesize  (one turn)
//!             └──▶ structured          (schema validation)
//! ```
//!
//! 1. [`input`]: validate a local PDF path (existence, permission, magic)
//! 2. [`render`]: pdfium: page text, text-block layout, rasterisation;
//!    blocking, so callers use `spawn_blocking`
//! 3. [`llm`]: retry with exponential backoff and the provider adapter;
//!    the only stage with network I/O
//! 4. [`grade`], [`rewrite`], [`synthesize`]: one model call each
//! 5. [`structured`]: JSON schemas and strict parsing of structured replies

pub mod grade;
pub mod input;
pub mod llm;
pub mod render;
pub mod rewrite;
pub mod structured;
pub mod synthesize;
