use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of an inbound chat message as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Voice,
    File,
    #[serde(other)]
    Other,
}

impl MessageKind {
    /// Kinds whose payload can be fetched to local storage.
    pub fn is_downloadable(self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::File)
    }

    /// Kinds that can be transcribed to text.
    pub fn is_transcribable(self) -> bool {
        matches!(self, Self::Voice)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Voice => "voice",
            Self::File => "file",
            Self::Other => "other",
        }
    }
}

/// A message exactly as the backend observed it, before normalization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub sender: String,
    pub chat_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub is_group: bool,
    pub is_self: bool,
    /// Epoch milliseconds at which the backend saw the message.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
    /// Opaque backend reference used to fetch media or voice payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl RawMessage {
    pub fn text(sender: &str, chat_name: &str, content: &str) -> Self {
        Self {
            sender: sender.to_string(),
            chat_name: chat_name.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            is_group: false,
            is_self: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
            file_name: None,
            file_size: None,
            handle: None,
        }
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn in_group(mut self) -> Self {
        self.is_group = true;
        self
    }

    pub fn from_self(mut self) -> Self {
        self.is_self = true;
        self
    }
}

/// Where a media attachment can be reached.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<String>,
}

impl MediaRef {
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.local_path.is_none()
            && self.file_name.is_none()
            && self.file_size.is_none()
    }
}

/// Backend-agnostic message shape pushed to the gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalMessage {
    pub sender: String,
    pub chat_name: String,
    /// Content with the mention token removed, before text synthesis.
    pub raw_text: String,
    /// Final text the gateway consumes.
    pub text: String,
    pub kind: MessageKind,
    pub is_group: bool,
    pub is_self: bool,
    pub is_mentioned: bool,
    pub timestamp: i64,
    pub media: Option<MediaRef>,
    pub voice_transcript: Option<String>,
}

impl CanonicalMessage {
    pub fn chat_type(&self) -> &'static str {
        if self.is_group {
            "group"
        } else {
            "friend"
        }
    }
}
