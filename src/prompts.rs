//! Prompt templates for grading, rewriting and answer synthesis.
//!
//! Every prompt the workflow sends lives here; tests import them directly.

use crate::capability::OutputSchema;

/// Name of the retrieval tool offered to the model in the DECIDE step.
pub const RETRIEVER_TOOL_NAME: &str = "relevant_document_retriever";

/// Description of the retrieval tool.
pub const RETRIEVER_TOOL_DESCRIPTION: &str =
    "Search and retrieve relevant documents from a set of documents based on a query";

/// Description of the tool's single `query` argument.
pub const RETRIEVER_QUERY_DESCRIPTION: &str =
    "The query string to search for relevant documents";

/// Relevance grading prompt. Placeholders: `{context}`, `{question}`.
pub const GRADE_PROMPT: &str = "You are a grader assessing relevance of a retrieved document to a user question. \n \
Here is the retrieved document: \n\n {context} \n\n\
Here is the user question: {question} \n\
If the document contains keyword(s) or semantic meaning related to the user question, grade it as relevant. \n\
Give a binary score 'yes' or 'no' score to indicate whether the document is relevant to the question.";

/// Question rewriting prompt. Placeholder: `{question}`.
pub const REWRITE_PROMPT: &str = "Look at the input and try to reason about the underlying semantic intent / meaning.\n\
Here is the initial question:\
\n ------- \n\
{question}\
\n ------- \n\
Formulate an improved question:";

/// Answer synthesis prompt. Placeholders: `{question}`, `{context}`.
pub const GENERATE_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. The answer must be detailed and comprehensive. \
If you don't know the answer, just say that you don't know. \
Also give the right references to the context.\n\
Question: {question} \n\
Context: {context}";

pub fn grade_prompt(question: &str, context: &str) -> String {
    GRADE_PROMPT
        .replace("{context}", context)
        .replace("{question}", question)
}

pub fn rewrite_prompt(question: &str) -> String {
    REWRITE_PROMPT.replace("{question}", question)
}

pub fn generate_prompt(question: &str, context: &str) -> String {
    GENERATE_PROMPT
        .replace("{question}", question)
        .replace("{context}", context)
}

/// System instruction that pins a reply to a JSON schema.
///
/// Sent by the provider adapter whenever a structured-output contract is
/// requested, so that providers without native JSON mode still comply.
pub fn structured_output_instruction(schema: &OutputSchema) -> String {
    format!(
        "Respond ONLY with a single JSON object named '{}' that validates against this JSON Schema. \
Do not wrap it in markdown fences and do not add any commentary.\n\n{}",
        schema.name,
        serde_json::to_string_pretty(&schema.schema).unwrap_or_else(|_| schema.schema.to_string())
    )
}

/// Follow-up message sent after a structured reply failed validation.
pub fn corrective_prompt(rejected: &str, detail: &str) -> String {
    format!(
        "Your previous reply could not be accepted because it does not match the required JSON schema.\n\
Validation error: {detail}\n\n\
Rejected reply:\n\"\"\"{rejected}\"\"\"\n\n\
Reply again with ONLY the corrected JSON object."
    )
}
