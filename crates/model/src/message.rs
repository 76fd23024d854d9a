use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::error::{DecodeMessageSnafu, ModelResult};
use super::ids::MessageId;
use super::item::GenericItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageErrorState {
    #[default]
    None,
    Failed,
    Retrying,
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackHistory {
    pub is_positive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStreamingHistory {
    pub is_done: bool,
}

/// Metadata attached to a message after creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    /// Hydrated from a stored transcript rather than received live.
    #[serde(default)]
    pub from_history: bool,
    /// Stored but never placed in the visible conversation.
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub is_welcome_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackHistory>,
    #[serde(default)]
    pub error_state: MessageErrorState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<MessageStreamingHistory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageHistoryPatch {
    pub timestamp_ms: Option<u64>,
    pub from_history: Option<bool>,
    pub silent: Option<bool>,
    pub is_welcome_request: Option<bool>,
    pub feedback: Option<FeedbackHistory>,
    pub error_state: Option<MessageErrorState>,
    pub streaming: Option<MessageStreamingHistory>,
}

impl MessageHistory {
    /// Applies each field the patch sets; unset fields keep their current value.
    pub fn merge(&mut self, patch: MessageHistoryPatch) {
        if let Some(timestamp_ms) = patch.timestamp_ms {
            self.timestamp_ms = Some(timestamp_ms);
        }
        if let Some(from_history) = patch.from_history {
            self.from_history = from_history;
        }
        if let Some(silent) = patch.silent {
            self.silent = silent;
        }
        if let Some(is_welcome_request) = patch.is_welcome_request {
            self.is_welcome_request = is_welcome_request;
        }
        if let Some(feedback) = patch.feedback {
            self.feedback = Some(feedback);
        }
        if let Some(error_state) = patch.error_state {
            self.error_state = error_state;
        }
        if let Some(streaming) = patch.streaming {
            self.streaming = Some(streaming);
        }
    }
}

/// A stored request or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    #[serde(default)]
    pub items: Vec<GenericItem>,
    /// For responses, the request this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<MessageId>,
    #[serde(default)]
    pub history: MessageHistory,
}

impl Message {
    pub fn new(id: impl Into<MessageId>, kind: MessageKind, items: Vec<GenericItem>) -> Self {
        Self {
            id: id.into(),
            kind,
            items,
            request_id: None,
            history: MessageHistory::default(),
        }
    }

    pub fn response(id: impl Into<MessageId>, items: Vec<GenericItem>) -> Self {
        Self::new(id, MessageKind::Response, items)
    }

    pub fn request_text(id: impl Into<MessageId>, text: impl Into<String>) -> Self {
        Self::new(id, MessageKind::Request, vec![GenericItem::text(text)])
    }

    pub fn for_request(mut self, request_id: impl Into<MessageId>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn is_response(&self) -> bool {
        matches!(self.kind, MessageKind::Response)
    }

    pub fn is_silent(&self) -> bool {
        self.history.silent
    }

    pub fn from_json(raw: &str) -> ModelResult<Self> {
        serde_json::from_str(raw).context(DecodeMessageSnafu {
            stage: "decode-message-json",
        })
    }
}

/// Caller input for adding a message; the id is assigned when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    pub kind: MessageKind,
    #[serde(default)]
    pub items: Vec<GenericItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<MessageId>,
    #[serde(default)]
    pub history: MessageHistory,
}

impl NewMessage {
    pub fn new(kind: MessageKind, items: Vec<GenericItem>) -> Self {
        Self {
            id: None,
            kind,
            items,
            request_id: None,
            history: MessageHistory::default(),
        }
    }

    pub fn response(items: Vec<GenericItem>) -> Self {
        Self::new(MessageKind::Response, items)
    }

    pub fn request_text(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Request, vec![GenericItem::text(text)])
    }

    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_history(mut self, history: MessageHistory) -> Self {
        self.history = history;
        self
    }

    pub fn for_request(mut self, request_id: impl Into<MessageId>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Blank caller-supplied ids count as absent.
    pub fn supplied_id(&self) -> Option<&MessageId> {
        self.id.as_ref().filter(|id| !id.is_empty())
    }

    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            kind: self.kind,
            items: self.items,
            request_id: self.request_id,
            history: self.history,
        }
    }

    pub fn from_json(raw: &str) -> ModelResult<Self> {
        serde_json::from_str(raw).context(DecodeMessageSnafu {
            stage: "decode-new-message-json",
        })
    }
}

impl From<Message> for NewMessage {
    fn from(message: Message) -> Self {
        Self {
            id: Some(message.id),
            kind: message.kind,
            items: message.items,
            request_id: message.request_id,
            history: message.history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_merge_only_touches_patched_fields() {
        let mut history = MessageHistory {
            timestamp_ms: Some(10),
            silent: true,
            ..MessageHistory::default()
        };

        history.merge(MessageHistoryPatch {
            feedback: Some(FeedbackHistory {
                is_positive: false,
                text: Some("wrong answer".to_string()),
                categories: vec!["accuracy".to_string()],
            }),
            error_state: Some(MessageErrorState::Failed),
            ..MessageHistoryPatch::default()
        });

        assert_eq!(history.timestamp_ms, Some(10));
        assert!(history.silent);
        assert_eq!(history.error_state, MessageErrorState::Failed);
        assert_eq!(
            history.feedback.as_ref().map(|feedback| feedback.is_positive),
            Some(false)
        );
    }

    #[test]
    fn new_message_decodes_without_id_and_history() {
        let message = NewMessage::from_json(
            r#"{"kind":"response","items":[{"response_type":"text","text":"hi"}]}"#,
        )
        .unwrap();

        assert_eq!(message.supplied_id(), None);
        assert_eq!(message.kind, MessageKind::Response);
        assert_eq!(message.items.len(), 1);
        assert_eq!(message.history, MessageHistory::default());
    }

    #[test]
    fn blank_supplied_id_is_treated_as_absent() {
        let message = NewMessage::request_text("hello").with_id(" ");
        assert_eq!(message.supplied_id(), None);
    }

    #[test]
    fn request_builder_holds_one_text_item() {
        let message = Message::request_text("req-1", "what is rust?");
        assert!(!message.is_response());
        assert_eq!(message.items[0].streamable_text(), Some("what is rust?"));
    }
}
