//! The question-answering state machine.
//!
//! ```text
//! DECIDE ──tool call──▶ RETRIEVE ──▶ GRADE ──relevant──▶ GENERATE ──▶ DONE
//!   │                                  │
//!   │ direct reply                     │ irrelevant
//!   ▼                                  ▼
//! DONE_DIRECT            DECIDE ◀── REWRITE
//! ```
//!
//! Each turn owns its [`ConversationState`]. States run strictly one after
//! another; [`Workflow::transition`] is the single `(state, conversation) ->
//! (next, conversation)` step and [`Workflow::run_turn`] drives it until a
//! terminal state is reached. The rewrite loop is bounded by
//! `max_rewrites`; exceeding it fails the turn with
//! [`QaError::MaxIterationsExceeded`].

use crate::capability::{LanguageModel, ModelReply, Retriever, ToolSpec};
use crate::checkpoint::ThreadId;
use crate::config::QaConfig;
use crate::conversation::{ConversationState, Message};
use crate::error::QaError;
use crate::observer::{NoopObserver, WorkflowObserver};
use crate::output::{AnsweredResult, RetrievedDocument, Terminal, TurnOutput};
use crate::pipeline::grade::{grade, Grade};
use crate::pipeline::llm::{with_retry, CallKind, RetryPolicy};
use crate::pipeline::rewrite::rewrite;
use crate::pipeline::synthesize::synthesize;
use crate::prompts::{RETRIEVER_QUERY_DESCRIPTION, RETRIEVER_TOOL_DESCRIPTION, RETRIEVER_TOOL_NAME};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// States of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Decide,
    Retrieve,
    Grade,
    Rewrite,
    Generate,
    DoneDirect,
    Done,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::DoneDirect | WorkflowState::Done)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Decide => "decide",
            WorkflowState::Retrieve => "retrieve",
            WorkflowState::Grade => "grade",
            WorkflowState::Rewrite => "rewrite",
            WorkflowState::Generate => "generate",
            WorkflowState::DoneDirect => "done_direct",
            WorkflowState::Done => "done",
        };
        f.write_str(s)
    }
}

/// Per-turn bookkeeping carried alongside the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnProgress {
    pub decide_passes: u32,
    pub rewrites: u32,
    /// Distinct `file_source`s returned by retrieval so far, first-seen order.
    pub sources: Vec<String>,
    /// Set when a terminal state is reached.
    pub result: Option<AnsweredResult>,
}

/// One retrieved chunk as shown to the grader and synthesizer.
#[derive(Debug, Serialize)]
struct ContextEntry<'a> {
    text: &'a str,
    title: &'a str,
    /// 1-indexed.
    page_no: Option<usize>,
    file_source: &'a str,
}

/// Render retrieved documents as the JSON array placed in the tool-result message.
pub fn serialize_context(documents: &[RetrievedDocument]) -> Result<String, QaError> {
    let entries: Vec<ContextEntry<'_>> = documents
        .iter()
        .map(|d| ContextEntry {
            text: &d.text,
            title: &d.metadata.title,
            page_no: d.metadata.page.map(|p| p + 1),
            file_source: &d.metadata.source,
        })
        .collect();
    serde_json::to_string_pretty(&entries)
        .map_err(|e| QaError::Internal(format!("serialise retrieved context: {e}")))
}

/// The retrieval tool offered to the model in DECIDE.
pub fn retrieval_tool() -> ToolSpec {
    ToolSpec {
        name: RETRIEVER_TOOL_NAME.to_string(),
        description: RETRIEVER_TOOL_DESCRIPTION.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": RETRIEVER_QUERY_DESCRIPTION
                }
            },
            "required": ["query"]
        }),
    }
}

/// Orchestrates one turn over shared model and retrieval capabilities.
#[derive(Clone)]
pub struct Workflow {
    model: Arc<dyn LanguageModel>,
    retriever: Arc<dyn Retriever>,
    policy: RetryPolicy,
    max_rewrites: u32,
    schema_repair_attempts: u32,
    observer: Arc<dyn WorkflowObserver>,
    tools: Vec<ToolSpec>,
}

impl Workflow {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        config: &QaConfig,
    ) -> Self {
        Self {
            model,
            retriever,
            policy: RetryPolicy::from_config(config),
            max_rewrites: config.max_rewrites,
            schema_repair_attempts: config.schema_repair_attempts,
            observer: config
                .observer
                .clone()
                .unwrap_or_else(|| Arc::new(NoopObserver)),
            tools: vec![retrieval_tool()],
        }
    }

    /// Run one turn to completion.
    ///
    /// `conversation` is the thread's history so far (empty for a new
    /// thread). On success the updated history is returned with the output
    /// so the caller can checkpoint it. Cancellation is observed between
    /// states and while a state's external call is in flight; a cancelled
    /// call's result is discarded.
    pub async fn run_turn(
        &self,
        thread_id: ThreadId,
        mut conversation: ConversationState,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<(TurnOutput, ConversationState), QaError> {
        conversation.begin_turn(question);
        self.observer.on_turn_start(&thread_id, question);
        info!("thread {}: turn started", thread_id);

        match self.drive(thread_id, conversation, cancel).await {
            Ok((output, conversation)) => {
                self.observer
                    .on_turn_complete(&thread_id, output.terminal, output.rewrites);
                info!(
                    "thread {}: {:?} after {} decide passes, {} rewrites",
                    thread_id, output.terminal, output.decide_passes, output.rewrites
                );
                Ok((output, conversation))
            }
            Err(e) => {
                self.observer.on_turn_error(&thread_id, &e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        thread_id: ThreadId,
        mut conversation: ConversationState,
        cancel: &CancellationToken,
    ) -> Result<(TurnOutput, ConversationState), QaError> {
        let mut state = WorkflowState::Decide;
        let mut progress = TurnProgress::default();

        loop {
            if cancel.is_cancelled() {
                return Err(QaError::Cancelled);
            }
            self.observer.on_state_enter(&thread_id, state);
            debug!("thread {}: enter {}", thread_id, state);

            if state.is_terminal() {
                break;
            }

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QaError::Cancelled),
                step = self.transition(state, conversation, &mut progress) => step,
            };
            (state, conversation) = step?;
        }

        let terminal = match state {
            WorkflowState::DoneDirect => Terminal::DoneDirect,
            _ => Terminal::Done,
        };
        let result = progress
            .result
            .ok_or_else(|| QaError::Internal(format!("terminal state {state} without a result")))?;

        Ok((
            TurnOutput {
                thread_id,
                result,
                terminal,
                decide_passes: progress.decide_passes,
                rewrites: progress.rewrites,
                sources: progress.sources,
            },
            conversation,
        ))
    }

    /// Execute one state and return the next one.
    ///
    /// Terminal states are returned unchanged.
    pub async fn transition(
        &self,
        state: WorkflowState,
        mut conversation: ConversationState,
        progress: &mut TurnProgress,
    ) -> Result<(WorkflowState, ConversationState), QaError> {
        let next = match state {
            WorkflowState::Decide => self.decide(&mut conversation, progress).await?,
            WorkflowState::Retrieve => self.retrieve(&mut conversation, progress).await?,
            WorkflowState::Grade => self.grade(&conversation, progress).await?,
            WorkflowState::Rewrite => self.rewrite(&mut conversation, progress).await?,
            WorkflowState::Generate => self.generate(&mut conversation, progress).await?,
            WorkflowState::DoneDirect | WorkflowState::Done => state,
        };
        Ok((next, conversation))
    }

    // ── DECIDE ───────────────────────────────────────────────────────────────

    async fn decide(
        &self,
        conversation: &mut ConversationState,
        progress: &mut TurnProgress,
    ) -> Result<WorkflowState, QaError> {
        progress.decide_passes += 1;
        let messages = conversation.messages();
        let reply = with_retry("decide", CallKind::Model, self.policy, || {
            self.model.complete(messages, &self.tools, None)
        })
        .await?;

        match reply {
            ModelReply::ToolCall(call) => {
                if call.name != RETRIEVER_TOOL_NAME {
                    return Err(QaError::SchemaValidation {
                        schema: RETRIEVER_TOOL_NAME.into(),
                        detail: format!("model called unknown tool '{}'", call.name),
                    });
                }
                conversation.push(Message::tool_request(call));
                Ok(WorkflowState::Retrieve)
            }
            ModelReply::Text(text) => {
                conversation.push(Message::assistant(text.clone()));
                progress.result = Some(AnsweredResult::direct(text));
                Ok(WorkflowState::DoneDirect)
            }
        }
    }

    // ── RETRIEVE ─────────────────────────────────────────────────────────────

    async fn retrieve(
        &self,
        conversation: &mut ConversationState,
        progress: &mut TurnProgress,
    ) -> Result<WorkflowState, QaError> {
        let call = conversation
            .pending_tool_call()
            .cloned()
            .ok_or_else(|| QaError::Internal("retrieve entered without a pending tool call".into()))?;
        let query = call.query().ok_or_else(|| QaError::SchemaValidation {
            schema: RETRIEVER_TOOL_NAME.into(),
            detail: match &call.arguments {
                serde_json::Value::String(raw) => {
                    format!("arguments are not a JSON object: {raw}")
                }
                other => format!("missing string argument 'query' in {other}"),
            },
        })?;

        let documents = with_retry("retrieve", CallKind::Retrieval, self.policy, || {
            self.retriever.retrieve(query)
        })
        .await?;
        debug!("retrieve: {} documents for {:?}", documents.len(), query);

        for source in documents.iter().map(|d| &d.metadata.source) {
            if !source.is_empty() && !progress.sources.contains(source) {
                progress.sources.push(source.clone());
            }
        }

        conversation.push(Message::tool_result(call.id.clone(), serialize_context(&documents)?));
        Ok(WorkflowState::Grade)
    }

    // ── GRADE ────────────────────────────────────────────────────────────────

    async fn grade(
        &self,
        conversation: &ConversationState,
        progress: &TurnProgress,
    ) -> Result<WorkflowState, QaError> {
        let question = turn_question(conversation)?;
        let context = conversation.latest_tool_result().unwrap_or_default();

        match grade(self.model.as_ref(), self.policy, question, context).await? {
            Grade::Relevant => Ok(WorkflowState::Generate),
            Grade::Irrelevant if progress.rewrites >= self.max_rewrites => {
                Err(QaError::MaxIterationsExceeded {
                    limit: self.max_rewrites,
                })
            }
            Grade::Irrelevant => Ok(WorkflowState::Rewrite),
        }
    }

    // ── REWRITE ──────────────────────────────────────────────────────────────

    async fn rewrite(
        &self,
        conversation: &mut ConversationState,
        progress: &mut TurnProgress,
    ) -> Result<WorkflowState, QaError> {
        let question = turn_question(conversation)?;
        let rewritten = rewrite(self.model.as_ref(), self.policy, question).await?;
        conversation.push(Message::user(rewritten));
        progress.rewrites += 1;
        Ok(WorkflowState::Decide)
    }

    // ── GENERATE ─────────────────────────────────────────────────────────────

    async fn generate(
        &self,
        conversation: &mut ConversationState,
        progress: &mut TurnProgress,
    ) -> Result<WorkflowState, QaError> {
        let question = turn_question(conversation)?;
        let context = conversation.latest_tool_result().unwrap_or_default();

        let result = synthesize(
            self.model.as_ref(),
            self.policy,
            question,
            context,
            self.schema_repair_attempts,
        )
        .await?;

        conversation.push(Message::assistant(result.to_canonical()?));
        progress.result = Some(result);
        Ok(WorkflowState::Done)
    }
}

fn turn_question(conversation: &ConversationState) -> Result<&str, QaError> {
    conversation
        .question()
        .ok_or_else(|| QaError::Internal("conversation has no user question".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ChunkMetadata;

    #[test]
    fn context_uses_one_indexed_pages() {
        let docs = vec![RetrievedDocument::new(
            "Scaled dot-product attention",
            ChunkMetadata {
                page: Some(2),
                title: "Attention".into(),
                source: "papers/attention.pdf".into(),
            },
        )];
        let text = serialize_context(&docs).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["page_no"], 3);
        assert_eq!(value[0]["file_source"], "papers/attention.pdf");
        assert_eq!(value[0]["title"], "Attention");
    }

    #[test]
    fn retrieval_tool_requires_query() {
        let tool = retrieval_tool();
        assert_eq!(tool.name, "relevant_document_retriever");
        assert_eq!(tool.parameters["required"], json!(["query"]));
    }

    #[test]
    fn only_done_states_are_terminal() {
        assert!(WorkflowState::Done.is_terminal());
        assert!(WorkflowState::DoneDirect.is_terminal());
        assert!(!WorkflowState::Rewrite.is_terminal());
        assert_eq!(WorkflowState::DoneDirect.to_string(), "done_direct");
    }
}
