//! Answer synthesis with citations.
//!
//! The model is asked for `{answer, citations: [{text, title, page_no,
//! file_source}]}`. A malformed reply gets up to `repair_attempts` corrective
//! retries: the rejected reply and the validation error are appended to the
//! exchange and the model is asked again. When those run out the last
//! [`QaError::SchemaValidation`] is returned; no partial answer is produced.

use crate::capability::{LanguageModel, ModelReply};
use crate::conversation::Message;
use crate::error::QaError;
use crate::output::AnsweredResult;
use crate::pipeline::llm::{with_retry, CallKind, RetryPolicy};
use crate::pipeline::structured::{answer_schema, parse_answer, ANSWER_SCHEMA_NAME};
use crate::prompts::{corrective_prompt, generate_prompt};
use tracing::{debug, warn};

pub async fn synthesize(
    model: &dyn LanguageModel,
    policy: RetryPolicy,
    question: &str,
    context: &str,
    repair_attempts: u32,
) -> Result<AnsweredResult, QaError> {
    let schema = answer_schema();
    let mut messages = vec![Message::user(generate_prompt(question, context))];

    for attempt in 0..=repair_attempts {
        let reply = with_retry("synthesize", CallKind::Model, policy, || {
            model.complete(&messages, &[], Some(&schema))
        })
        .await?;

        let (raw, outcome) = match reply {
            ModelReply::Text(text) => {
                let parsed = parse_answer(&text);
                (text, parsed)
            }
            ModelReply::ToolCall(call) => (
                String::new(),
                Err(QaError::SchemaValidation {
                    schema: ANSWER_SCHEMA_NAME.into(),
                    detail: format!("expected a JSON object, got a call to tool '{}'", call.name),
                }),
            ),
        };

        match outcome {
            Ok(result) => {
                debug!(
                    "synthesize: {} citations after {} corrective retries",
                    result.citations.len(),
                    attempt
                );
                return Ok(result);
            }
            Err(QaError::SchemaValidation { detail, .. }) if attempt < repair_attempts => {
                warn!("synthesize: malformed reply ({}), asking for a correction", detail);
                messages.push(Message::assistant(raw.clone()));
                messages.push(Message::user(corrective_prompt(&raw, &detail)));
            }
            Err(e) => return Err(e),
        }
    }

    // The loop body returns on its final iteration.
    Err(QaError::Internal("synthesize: repair loop exited without a result".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{OutputSchema, ToolSpec};
    use crate::error::CapabilityError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct Scripted {
        replies: Mutex<VecDeque<&'static str>>,
        transcript_lens: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(replies: &[&'static str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().copied().collect()),
                transcript_lens: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(
            &self,
            messages: &[Message],
            _tools: &[ToolSpec],
            schema: Option<&OutputSchema>,
        ) -> Result<ModelReply, CapabilityError> {
            assert_eq!(schema.map(|s| s.name), Some(ANSWER_SCHEMA_NAME));
            self.transcript_lens.lock().push(messages.len());
            let next = self.replies.lock().pop_front().unwrap_or("{}");
            Ok(ModelReply::Text(next.into()))
        }
    }

    const GOOD: &str = r#"{"answer": "42", "citations": [
        {"text": "the answer is 42", "title": "Guide", "page_no": 1, "file_source": "guide.pdf"}]}"#;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn valid_reply_is_returned() {
        let m = Scripted::new(&[GOOD]);
        let r = synthesize(&m, policy(), "q", "ctx", 1).await.unwrap();
        assert_eq!(r.answer, "42");
        assert_eq!(r.citations[0].file_source, "guide.pdf");
    }

    #[tokio::test]
    async fn corrective_retry_recovers() {
        let m = Scripted::new(&["The answer is 42.", GOOD]);
        let r = synthesize(&m, policy(), "q", "ctx", 1).await.unwrap();
        assert_eq!(r.answer, "42");
        // Second call carries the rejected reply and the correction request.
        assert_eq!(*m.transcript_lens.lock(), vec![1, 3]);
    }

    #[tokio::test]
    async fn zero_repairs_fails_immediately() {
        let m = Scripted::new(&["The answer is 42.", GOOD]);
        let err = synthesize(&m, policy(), "q", "ctx", 0).await.unwrap_err();
        assert!(matches!(err, QaError::SchemaValidation { .. }));
        assert_eq!(m.transcript_lens.lock().len(), 1);
    }

    #[tokio::test]
    async fn repairs_are_bounded() {
        let m = Scripted::new(&["nope", "still nope", GOOD]);
        let err = synthesize(&m, policy(), "q", "ctx", 1).await.unwrap_err();
        assert!(matches!(err, QaError::SchemaValidation { .. }));
        assert_eq!(m.transcript_lens.lock().len(), 2);
    }
}
