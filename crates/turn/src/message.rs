use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a typed message identifier.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Feedback value recorded against an assistant answer.
///
/// `Neutral` is the explicit "cleared" value and travels as `"none"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Good,
    Bad,
    #[serde(rename = "none")]
    Neutral,
}

impl Feedback {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Bad => "bad",
            Self::Neutral => "none",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A thumbs-up or thumbs-down press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Good,
    Bad,
}

impl Vote {
    pub fn as_feedback(self) -> Feedback {
        match self {
            Self::Good => Feedback::Good,
            Self::Bad => Feedback::Bad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// Opaque reference to an uploaded image or file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub source_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Attachment {
    pub fn image(source_id: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::Image,
            source_id: source_id.into(),
            name: None,
        }
    }

    pub fn file(source_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: AttachmentKind::File,
            source_id: source_id.into(),
            name: Some(name.into()),
        }
    }
}

/// One chat turn as supplied by the session store.
///
/// The store re-supplies a fresh value on every change, so the turn never mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub created_date: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub trace: Option<String>,
    #[serde(default)]
    pub extra_data: Vec<Attachment>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub llm_type: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            created_date: None,
            role,
            content: content.into(),
            trace: None,
            extra_data: Vec::new(),
            feedback: None,
            llm_type: None,
        }
    }

    /// Creates an assistant placeholder before the first token arrives.
    pub fn assistant_streaming() -> Self {
        Self::new(Role::Assistant, String::new())
    }

    pub fn with_identity(mut self, id: MessageId, created_date: impl Into<String>) -> Self {
        self.id = Some(id);
        self.created_date = Some(created_date.into());
        self
    }

    pub fn with_feedback(mut self, feedback: Feedback) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.extra_data = attachments;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    pub fn with_llm_type(mut self, llm_type: impl Into<String>) -> Self {
        self.llm_type = Some(llm_type.into());
        self
    }

    /// Returns the correlation key for feedback writes.
    ///
    /// Both the id and the creation timestamp must be present; otherwise the message has no
    /// stable identity and feedback stays disabled.
    pub fn feedback_key(&self) -> Option<&str> {
        self.id.as_ref()?;
        self.created_date.as_deref().filter(|date| !date.is_empty())
    }

    /// Returns true when the answer is still being produced for this turn.
    pub fn is_streaming(&self, loading: bool) -> bool {
        loading && self.role == Role::Assistant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_key_requires_id_and_timestamp() {
        let bare = Message::new(Role::Assistant, "hi");
        assert_eq!(bare.feedback_key(), None);

        let mut dated_only = bare.clone();
        dated_only.created_date = Some("1700000000000".to_string());
        assert_eq!(dated_only.feedback_key(), None);

        let full = bare.with_identity(MessageId::new("m-1"), "1700000000000");
        assert_eq!(full.feedback_key(), Some("1700000000000"));
    }

    #[test]
    fn decodes_store_payload() {
        let payload = r#"{
            "id": "m-7",
            "createdDate": "1700000000001",
            "role": "assistant",
            "content": "hello",
            "extraData": [
                {"type": "image", "sourceId": "img-1"},
                {"type": "file", "sourceId": "doc-1", "name": "report.pdf"}
            ],
            "feedback": "none",
            "llmType": "claude"
        }"#;

        let message: Message = serde_json::from_str(payload).expect("payload should decode");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.feedback, Some(Feedback::Neutral));
        assert_eq!(message.extra_data.len(), 2);
        assert_eq!(message.extra_data[1].name.as_deref(), Some("report.pdf"));
        assert_eq!(message.llm_type.as_deref(), Some("claude"));
    }

    #[test]
    fn only_assistant_turns_stream() {
        assert!(Message::assistant_streaming().is_streaming(true));
        assert!(!Message::new(Role::User, "q").is_streaming(true));
        assert!(!Message::assistant_streaming().is_streaming(false));
    }
}
