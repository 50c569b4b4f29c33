//! Model interaction: retry policy and the `edgequake_llm` provider adapter.
//!
//! Every external call in the workflow (model or retriever) goes through
//! [`with_retry`], so the retry rules live in one place:
//!
//! * [`CapabilityError::Transient`] is retried with exponential backoff
//!   (`retry_backoff_ms * 2^attempt`: 500 ms → 1 s → 2 s with defaults).
//! * [`CapabilityError::Permanent`] is surfaced immediately.
//! * Schema violations never reach this layer; they are detected after the
//!   call returns and are not retried here.
//!
//! [`ProviderModel`] wraps any `edgequake_llm::LLMProvider` as a
//! [`LanguageModel`], mapping conversation messages to chat messages and the
//! retrieval tool to a function-calling definition.

use crate::capability::{LanguageModel, ModelReply, OutputSchema, ToolSpec};
use crate::config::QaConfig;
use crate::conversation::{Message, Role, ToolInvocation};
use crate::error::{CapabilityError, QaError};
use crate::prompts::structured_output_instruction;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ToolChoice, ToolDefinition};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Which capability a retried call belongs to; decides the error variant
/// used when a permanent failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Model,
    Retrieval,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &QaConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Run `op` until it succeeds, fails permanently, or the retries run out.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    kind: CallKind,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, QaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut last_err = String::new();

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                operation,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(CapabilityError::Permanent(message)) => {
                warn!("{}: permanent failure: {}", operation, message);
                return Err(match kind {
                    CallKind::Model => QaError::LlmApiError { message },
                    CallKind::Retrieval => QaError::RetrievalFailed { message },
                });
            }
            Err(CapabilityError::Transient(message)) => {
                warn!("{}: attempt {} failed: {}", operation, attempt + 1, message);
                last_err = message;
            }
        }
    }

    Err(QaError::RetriesExhausted {
        operation: operation.to_string(),
        attempts: policy.max_retries + 1,
        last_error: last_err,
    })
}

/// Decide whether a provider error message describes a transient failure.
///
/// Authentication, permission and malformed-request errors are permanent;
/// everything else (rate limits, timeouts, 5xx, connection resets) is
/// assumed transient.
pub fn classify_provider_error(message: &str) -> CapabilityError {
    const PERMANENT_MARKERS: [&str; 9] = [
        "401",
        "403",
        "400",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "authentication",
        "invalid request",
        "content_filter",
    ];
    let lower = message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        CapabilityError::Permanent(message.to_string())
    } else {
        CapabilityError::Transient(message.to_string())
    }
}

/// [`LanguageModel`] backed by an `edgequake_llm` provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    label: String,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &QaConfig) -> Self {
        let label = format!("{}/{}", provider.name(), provider.model());
        Self {
            provider,
            options: build_options(config),
            label,
        }
    }
}

#[async_trait]
impl LanguageModel for ProviderModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
        schema: Option<&OutputSchema>,
    ) -> Result<ModelReply, CapabilityError> {
        let mut chat = Vec::with_capacity(messages.len() + 1);
        if let Some(schema) = schema {
            chat.push(ChatMessage::system(structured_output_instruction(schema)));
        }
        chat.extend(messages.iter().map(to_chat_message));

        if tools.is_empty() {
            let response = self
                .provider
                .chat(&chat, Some(&self.options))
                .await
                .map_err(|e| classify_provider_error(&e.to_string()))?;
            debug!(
                "{}: {} input tokens, {} output tokens",
                self.label, response.prompt_tokens, response.completion_tokens
            );
            return Ok(ModelReply::Text(response.content));
        }

        let definitions: Vec<ToolDefinition> = tools
            .iter()
            .map(|t| ToolDefinition::function(&t.name, &t.description, t.parameters.clone()))
            .collect();

        let response = self
            .provider
            .chat_with_tools(&chat, &definitions, Some(ToolChoice::auto()), Some(&self.options))
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens, {} tool calls",
            self.label,
            response.prompt_tokens,
            response.completion_tokens,
            response.tool_calls.len()
        );

        match response.tool_calls.first() {
            Some(call) => Ok(ModelReply::ToolCall(tool_invocation(
                &call.id,
                &call.function.name,
                &call.function.arguments,
            ))),
            None => Ok(ModelReply::Text(response.content)),
        }
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Build a [`ToolInvocation`] from the provider's raw tool call.
///
/// Arguments that are not valid JSON are kept verbatim as a JSON string so
/// the workflow rejects the call as a schema violation.
fn tool_invocation(id: &str, name: &str, raw_arguments: &str) -> ToolInvocation {
    let arguments = serde_json::from_str(raw_arguments).unwrap_or_else(|e| {
        debug!("tool call '{}' has malformed arguments: {}", name, e);
        serde_json::Value::String(raw_arguments.to_string())
    });
    ToolInvocation {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Map a conversation message onto the provider's chat format.
///
/// Tool traffic is rendered as plain assistant/user turns so that every
/// provider accepts the history, including ones without tool-message support.
fn to_chat_message(message: &Message) -> ChatMessage {
    match message.role {
        Role::User => ChatMessage::user(&message.content),
        Role::Assistant => match &message.tool_call {
            Some(call) => ChatMessage::assistant(format!(
                "Calling tool `{}` with arguments {}",
                call.name, call.arguments
            )),
            None => ChatMessage::assistant(&message.content),
        },
        Role::Tool => ChatMessage::user(format!(
            "Result of tool call {}:\n{}",
            message.tool_call_id.as_deref().unwrap_or("-"),
            message.content
        )),
    }
}

/// Build `CompletionOptions` from the engine config.
fn build_options(config: &QaConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_ms: 1,
        }
    }

    #[test]
    fn build_options_defaults() {
        let config = QaConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_ms: 500,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn classifies_provider_errors() {
        assert!(classify_provider_error("HTTP 429 Too Many Requests").is_transient());
        assert!(classify_provider_error("request timed out").is_transient());
        assert!(classify_provider_error("503 Service Unavailable").is_transient());
        assert!(!classify_provider_error("401 Unauthorized").is_transient());
        assert!(!classify_provider_error("Invalid API key provided").is_transient());
    }

    #[test]
    fn tool_messages_become_user_turns() {
        let m = to_chat_message(&Message::tool_result("call_7", "[docs]"));
        assert!(m.content.contains("call_7"));
        assert!(m.content.contains("[docs]"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_retry("grade", CallKind::Model, fast(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CapabilityError::Transient("429".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("retrieve", CallKind::Retrieval, fast(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CapabilityError::Permanent("bad index".into())) }
        })
        .await;
        assert!(matches!(result, Err(QaError::RetrievalFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("decide", CallKind::Model, fast(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CapabilityError::Transient("connection reset".into())) }
        })
        .await;
        match result {
            Err(QaError::RetriesExhausted {
                attempts,
                last_error,
                ..
            }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "connection reset");
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn tool_arguments_are_parsed_as_json() {
        let call = tool_invocation("call_1", "relevant_document_retriever", r#"{"query":"heads"}"#);
        assert_eq!(call.query(), Some("heads"));
    }

    #[test]
    fn malformed_tool_arguments_are_kept_verbatim() {
        let call = tool_invocation("call_1", "relevant_document_retriever", "{query: heads");
        assert_eq!(call.arguments, serde_json::Value::String("{query: heads".into()));
        assert_eq!(call.query(), None);
    }
}
