use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::BackendError;
use crate::messages::RawMessage;

/// Connection state of the messaging backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Snapshot of the backend reported through `getStatus`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub status: BackendStatus,
    pub connected: bool,
    pub nickname: Option<String>,
    pub id: Option<String>,
}

impl StatusRecord {
    pub fn connected(nickname: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            status: BackendStatus::Connected,
            connected: true,
            nickname: Some(nickname.into()),
            id: Some(id.into()),
        }
    }
}

/// Something the backend observed that the gateway should hear about.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    Message(RawMessage),
    Status(StatusRecord),
}

/// Producer half of the bounded backend event queue.
///
/// `emit` never blocks, so it is safe to call from the backend's own
/// automation threads as well as from async tasks.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<BackendEvent>,
}

impl EventSender {
    pub fn emit(&self, event: BackendEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("backend event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Create the bounded queue between a backend and the event normalizer.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<BackendEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, rx)
}

/// Capability surface a messaging backend must provide to be bridged.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in the gateway path and notification method names.
    fn name(&self) -> &str;

    async fn connect(&self) -> bool;

    async fn disconnect(&self);

    async fn status(&self) -> StatusRecord;

    async fn send_message(
        &self,
        chat: &str,
        text: &str,
        mentions: &[String],
    ) -> Result<(), BackendError>;

    async fn send_file(&self, chat: &str, path: &Path) -> Result<(), BackendError>;

    async fn add_listener(&self, chat: &str) -> Result<(), BackendError>;

    async fn remove_listener(&self, chat: &str) -> Result<(), BackendError>;

    async fn list_conversations(&self) -> Result<Vec<String>, BackendError>;

    /// Fetch the payload of a media message into `dest_dir`.
    async fn download_media(
        &self,
        message: &RawMessage,
        dest_dir: &Path,
    ) -> Result<Option<PathBuf>, BackendError>;

    async fn transcribe_voice(&self, message: &RawMessage) -> Result<Option<String>, BackendError>;
}
