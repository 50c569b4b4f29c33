//! Conversation state owned by the workflow for the duration of a turn.
//!
//! A [`ConversationState`] is an append-only list of [`Message`]s. Checkpointed
//! threads carry their history across turns, so the state also remembers
//! where the current turn started: the grader and synthesizer always work on
//! the question that opened *this* turn, not the first question ever asked
//! on the thread.

use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Provider-assigned call id; echoed back on the tool-result message.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    /// The `query` argument of a retrieval call, if present and a string.
    pub fn query(&self) -> Option<&str> {
        self.arguments.get("query").and_then(|q| q.as_str())
    }
}

/// One entry in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Set on assistant messages that request a tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolInvocation>,
    /// Set on tool messages: the id of the call they answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    /// An assistant message that carries a tool request.
    pub fn tool_request(call: ToolInvocation) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call: Some(call),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Ordered message history for one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// Index of the user message that opened the current turn.
    turn_start: usize,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new turn with the user's question.
    pub fn begin_turn(&mut self, question: impl Into<String>) {
        self.turn_start = self.messages.len();
        self.messages.push(Message::user(question));
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The question that opened the current turn.
    pub fn question(&self) -> Option<&str> {
        self.messages[self.turn_start.min(self.messages.len())..]
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Content of the most recent tool-result message in the current turn.
    pub fn latest_tool_result(&self) -> Option<&str> {
        self.messages[self.turn_start.min(self.messages.len())..]
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
    }

    /// The tool request carried by the last message, if any.
    pub fn pending_tool_call(&self) -> Option<&ToolInvocation> {
        self.messages.last().and_then(|m| m.tool_call.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(query: &str) -> ToolInvocation {
        ToolInvocation {
            id: "call_1".into(),
            name: "relevant_document_retriever".into(),
            arguments: json!({ "query": query }),
        }
    }

    #[test]
    fn question_is_first_user_message_of_turn() {
        let mut conv = ConversationState::new();
        conv.begin_turn("What is attention?");
        conv.push(Message::tool_request(call("attention")));
        conv.push(Message::tool_result("call_1", "[]"));
        conv.push(Message::user("Explain the attention mechanism"));
        assert_eq!(conv.question(), Some("What is attention?"));
    }

    #[test]
    fn second_turn_uses_its_own_question() {
        let mut conv = ConversationState::new();
        conv.begin_turn("first");
        conv.push(Message::assistant("answer one"));
        conv.begin_turn("second");
        assert_eq!(conv.question(), Some("second"));
        assert_eq!(conv.len(), 3);
    }

    #[test]
    fn latest_tool_result_is_scoped_to_turn() {
        let mut conv = ConversationState::new();
        conv.begin_turn("first");
        conv.push(Message::tool_result("a", "old context"));
        conv.begin_turn("second");
        assert_eq!(conv.latest_tool_result(), None);

        conv.push(Message::tool_result("b", "ctx 1"));
        conv.push(Message::tool_result("c", "ctx 2"));
        assert_eq!(conv.latest_tool_result(), Some("ctx 2"));
    }

    #[test]
    fn pending_tool_call_reads_last_message() {
        let mut conv = ConversationState::new();
        conv.begin_turn("q");
        assert!(conv.pending_tool_call().is_none());
        conv.push(Message::tool_request(call("transformers")));
        assert_eq!(
            conv.pending_tool_call().and_then(|c| c.query()),
            Some("transformers")
        );
    }

    #[test]
    fn role_serialises_lowercase() {
        let json = serde_json::to_string(&Message::tool_result("x", "y")).unwrap();
        assert!(json.contains("\"role\":\"tool\""), "got: {json}");
        assert!(!json.contains("tool_call\""), "got: {json}");
    }
}
