//! Question reformulation after a failed grade.

use crate::capability::{LanguageModel, ModelReply};
use crate::conversation::Message;
use crate::error::QaError;
use crate::pipeline::llm::{with_retry, CallKind, RetryPolicy};
use crate::prompts::rewrite_prompt;
use tracing::{debug, warn};

/// Restate `question` so that retrieval has a better chance.
///
/// The output is not validated and may equal the input. An empty reply or a
/// tool call keeps the original question.
pub async fn rewrite(
    model: &dyn LanguageModel,
    policy: RetryPolicy,
    question: &str,
) -> Result<String, QaError> {
    let messages = [Message::user(rewrite_prompt(question))];

    let reply = with_retry("rewrite", CallKind::Model, policy, || {
        model.complete(&messages, &[], None)
    })
    .await?;

    let rewritten = match reply {
        ModelReply::Text(text) if !text.trim().is_empty() => text.trim().to_string(),
        ModelReply::Text(_) => {
            warn!("rewrite: empty reply, keeping the original question");
            question.to_string()
        }
        ModelReply::ToolCall(call) => {
            warn!("rewrite: unexpected call to '{}', keeping the original question", call.name);
            question.to_string()
        }
    };
    debug!("rewrite: {:?} -> {:?}", question, rewritten);
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{OutputSchema, ToolSpec};
    use crate::error::CapabilityError;
    use async_trait::async_trait;

    struct Echo(&'static str);

    #[async_trait]
    impl LanguageModel for Echo {
        async fn complete(
            &self,
            messages: &[Message],
            tools: &[ToolSpec],
            schema: Option<&OutputSchema>,
        ) -> Result<ModelReply, CapabilityError> {
            assert!(tools.is_empty());
            assert!(schema.is_none());
            assert!(messages[0].content.contains("Formulate an improved question:"));
            Ok(ModelReply::Text(self.0.into()))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn returns_trimmed_reply() {
        let q = rewrite(&Echo("  How does self-attention work?\n"), policy(), "attention?")
            .await
            .unwrap();
        assert_eq!(q, "How does self-attention work?");
    }

    #[tokio::test]
    async fn empty_reply_keeps_question() {
        let q = rewrite(&Echo("   "), policy(), "attention?").await.unwrap();
        assert_eq!(q, "attention?");
    }
}
