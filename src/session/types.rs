//! Message, attachment, and session types.
//!
//! `Message` is tagged on `role` and mirrors the wire shape exactly: user
//! entries carry `content` (plus optional `code` and attachments), assistant
//! entries carry `text`/`code`. The ordered message list is the conversation
//! log; insertion order is display order and entries are immutable once
//! appended.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A file staged alongside a prompt.
///
/// Live attachments carry the raw text body. The persistence layer never
/// stores bodies: [`Attachment::stripped`] replaces `content` with
/// `contentLength` before a session record is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_hint: Option<String>,
    /// Byte length of the original body; set only on the stripped durable form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
            mime_hint: None,
            content_length: None,
        }
    }

    pub fn with_mime_hint(mut self, mime_hint: impl Into<String>) -> Self {
        self.mime_hint = Some(mime_hint.into());
        self
    }

    pub fn byte_len(&self) -> u64 {
        self.content.len() as u64
    }

    /// The durable form: body dropped, length kept.
    pub fn stripped(&self) -> Self {
        Self {
            filename: self.filename.clone(),
            content: String::new(),
            mime_hint: None,
            content_length: Some(self.byte_len()),
        }
    }
}

/// One entry in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
        timestamp: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        code: String,
        timestamp: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
            code: None,
            attachments: Vec::new(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn assistant(text: impl Into<String>, code: impl Into<String>) -> Self {
        Message::Assistant {
            text: text.into(),
            code: code.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }

    /// The generated code carried by this entry, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Message::User { code, .. } => code.as_deref().filter(|c| !c.is_empty()),
            Message::Assistant { code, .. } => Some(code.as_str()).filter(|c| !c.is_empty()),
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            Message::User { timestamp, .. } | Message::Assistant { timestamp, .. } => timestamp,
        }
    }

    /// Copy of this entry with attachment bodies replaced by their lengths.
    pub fn with_stripped_attachments(&self) -> Self {
        match self {
            Message::User {
                content,
                code,
                attachments,
                timestamp,
            } if !attachments.is_empty() => Message::User {
                content: content.clone(),
                code: code.clone(),
                attachments: attachments.iter().map(Attachment::stripped).collect(),
                timestamp: timestamp.clone(),
            },
            other => other.clone(),
        }
    }
}

/// The per-identity aggregate root: conversation log plus editor state.
///
/// Created empty on first load of a storage key; mutated by the orchestrator
/// on every send/clear/sync; destroyed only by an explicit clear.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub chat_history: Vec<Message>,
    #[serde(default)]
    pub current_code: String,
    #[serde(default)]
    pub send_on_enter: bool,
    #[serde(default)]
    pub is_code_user_modified: bool,
    /// Threads multi-turn context to the remote assistant; forwarded on the
    /// next request whenever present.
    #[serde(default)]
    pub previous_response_id: Option<String>,
}

impl Session {
    /// Back to the empty state (explicit clear).
    pub fn reset(&mut self) {
        *self = Session::default();
    }

    /// Code from the most recent assistant entry that carried any.
    pub fn last_assistant_code(&self) -> Option<&str> {
        self.chat_history
            .iter()
            .rev()
            .find(|m| m.is_assistant())
            .and_then(Message::code)
    }
}

/// Current time as RFC 3339 with millisecond precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert a unix-seconds timestamp (as sent by the sync endpoint) to the
/// RFC 3339 form used in the log. Out-of-range values yield the epoch.
pub fn rfc3339_from_unix_seconds(seconds: f64) -> String {
    let millis = if seconds.is_finite() {
        (seconds * 1000.0) as i64
    } else {
        0
    };
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
