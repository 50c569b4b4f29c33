//! Relevance grading of retrieved context.

use crate::capability::{LanguageModel, ModelReply};
use crate::conversation::Message;
use crate::error::QaError;
use crate::pipeline::llm::{with_retry, CallKind, RetryPolicy};
use crate::pipeline::structured::{grade_schema, parse_grade, BinaryScore, GRADE_SCHEMA_NAME};
use crate::prompts::grade_prompt;
use tracing::debug;

/// Verdict of the grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Relevant,
    Irrelevant,
}

impl From<BinaryScore> for Grade {
    fn from(score: BinaryScore) -> Self {
        match score {
            BinaryScore::Yes => Grade::Relevant,
            BinaryScore::No => Grade::Irrelevant,
        }
    }
}

/// Judge whether `context` is relevant to `question`.
///
/// The reply must be exactly `{"binary_score": "yes" | "no"}`. Anything else,
/// including a tool call, is a [`QaError::SchemaValidation`]; there is no
/// default verdict and no corrective retry.
pub async fn grade(
    model: &dyn LanguageModel,
    policy: RetryPolicy,
    question: &str,
    context: &str,
) -> Result<Grade, QaError> {
    let messages = [Message::user(grade_prompt(question, context))];
    let schema = grade_schema();

    let reply = with_retry("grade", CallKind::Model, policy, || {
        model.complete(&messages, &[], Some(&schema))
    })
    .await?;

    let raw = match reply {
        ModelReply::Text(text) => text,
        ModelReply::ToolCall(call) => {
            return Err(QaError::SchemaValidation {
                schema: GRADE_SCHEMA_NAME.into(),
                detail: format!("expected a JSON object, got a call to tool '{}'", call.name),
            })
        }
    };

    let grade = Grade::from(parse_grade(&raw)?.binary_score);
    debug!("grade: {:?}", grade);
    Ok(grade)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{OutputSchema, ToolSpec};
    use crate::conversation::ToolInvocation;
    use crate::error::CapabilityError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Fixed {
        reply: ModelReply,
        seen: Mutex<Vec<String>>,
    }

    impl Fixed {
        fn text(s: &str) -> Self {
            Self {
                reply: ModelReply::Text(s.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for Fixed {
        async fn complete(
            &self,
            messages: &[Message],
            _tools: &[ToolSpec],
            schema: Option<&OutputSchema>,
        ) -> Result<ModelReply, CapabilityError> {
            assert_eq!(schema.map(|s| s.name), Some(GRADE_SCHEMA_NAME));
            self.seen.lock().push(messages[0].content.clone());
            Ok(self.reply.clone())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn yes_is_relevant() {
        let m = Fixed::text(r#"{"binary_score": "yes"}"#);
        let g = grade(&m, policy(), "What is BLEU?", "BLEU is a metric").await.unwrap();
        assert_eq!(g, Grade::Relevant);
        assert!(m.seen.lock()[0].contains("What is BLEU?"));
    }

    #[tokio::test]
    async fn no_is_irrelevant() {
        let m = Fixed::text(r#"{"binary_score": "no"}"#);
        let g = grade(&m, policy(), "q", "ctx").await.unwrap();
        assert_eq!(g, Grade::Irrelevant);
    }

    #[tokio::test]
    async fn free_text_is_a_schema_error() {
        let m = Fixed::text("Yes, the document is relevant.");
        let err = grade(&m, policy(), "q", "ctx").await.unwrap_err();
        assert!(matches!(err, QaError::SchemaValidation { .. }));
    }

    #[tokio::test]
    async fn tool_call_is_a_schema_error() {
        let m = Fixed {
            reply: ModelReply::ToolCall(ToolInvocation {
                id: "1".into(),
                name: "relevant_document_retriever".into(),
                arguments: serde_json::json!({"query": "q"}),
            }),
            seen: Mutex::new(Vec::new()),
        };
        let err = grade(&m, policy(), "q", "ctx").await.unwrap_err();
        assert!(err.to_string().contains("relevant_document_retriever"));
    }
}
