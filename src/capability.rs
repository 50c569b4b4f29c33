//! Contracts of the external capabilities the workflow depends on.
//!
//! The workflow never talks to a provider SDK or a vector database directly;
//! it sees only these two traits. [`crate::pipeline::llm::ProviderModel`]
//! adapts any `edgequake_llm` provider to [`LanguageModel`], and
//! [`crate::index::DocumentIndex`] is the built-in [`Retriever`]. Tests plug
//! in scripted implementations.

use crate::conversation::{Message, ToolInvocation};
use crate::error::CapabilityError;
use crate::output::RetrievedDocument;
use async_trait::async_trait;
use serde_json::Value;

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// A declared structured-output contract.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    pub name: &'static str,
    /// JSON Schema the reply must satisfy.
    pub schema: Value,
}

/// What the model replied with.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Plain text (or, when a schema was requested, the raw JSON text).
    Text(String),
    /// A request to run one of the offered tools.
    ToolCall(ToolInvocation),
}

/// A chat-completion capability.
///
/// `tools` may be empty; `schema` is `None` for free-form replies. The
/// returned text for a schema-constrained call is validated by the caller,
/// never trusted.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        schema: Option<&OutputSchema>,
    ) -> Result<ModelReply, CapabilityError>;

    /// Provider/model label for logging.
    fn name(&self) -> &str {
        "model"
    }
}

/// A document retrieval capability.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedDocument>, CapabilityError>;

    /// Whether any document has been made available. Queries against an
    /// unready retriever fail with a precondition error.
    fn is_ready(&self) -> bool {
        true
    }
}
