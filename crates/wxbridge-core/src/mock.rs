use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{Backend, BackendStatus, StatusRecord};
use crate::errors::BackendError;
use crate::messages::RawMessage;

/// A call the mock backend received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentItem {
    Text {
        chat: String,
        text: String,
        mentions: Vec<String>,
    },
    File {
        chat: String,
        path: PathBuf,
    },
}

/// In-process backend with scripted outcomes for deterministic testing.
///
/// Send outcomes are consumed in order; once the script is empty every send
/// succeeds. Every call is recorded so tests can assert on it.
pub struct MockBackend {
    name: String,
    connect_ok: bool,
    status: Mutex<StatusRecord>,
    send_script: Mutex<VecDeque<Result<(), BackendError>>>,
    send_delay: Mutex<Duration>,
    listener_delay: Mutex<Duration>,
    listener_error: Mutex<Option<BackendError>>,
    contacts: Mutex<Vec<String>>,
    download_path: Mutex<Option<PathBuf>>,
    transcript: Mutex<Option<String>>,
    panic_on_list: AtomicBool,
    sent: Mutex<Vec<SentItem>>,
    listeners: Mutex<Vec<String>>,
    send_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connect_ok: true,
            status: Mutex::new(StatusRecord::connected("bridge-bot", "wxid_bridge")),
            send_script: Mutex::new(VecDeque::new()),
            send_delay: Mutex::new(Duration::ZERO),
            listener_delay: Mutex::new(Duration::ZERO),
            listener_error: Mutex::new(None),
            contacts: Mutex::new(Vec::new()),
            download_path: Mutex::new(None),
            transcript: Mutex::new(None),
            panic_on_list: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect_ok = false;
        self
    }

    pub fn with_nickname(self, nickname: &str) -> Self {
        self.status.lock().nickname = Some(nickname.to_string());
        self
    }

    pub fn with_contacts(self, contacts: &[&str]) -> Self {
        *self.contacts.lock() = contacts.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_download(self, path: impl Into<PathBuf>) -> Self {
        *self.download_path.lock() = Some(path.into());
        self
    }

    pub fn with_transcript(self, text: &str) -> Self {
        *self.transcript.lock() = Some(text.to_string());
        self
    }

    pub fn with_send_delay(self, delay: Duration) -> Self {
        *self.send_delay.lock() = delay;
        self
    }

    /// Delay every listener registration, to widen race windows in tests.
    pub fn with_listener_delay(self, delay: Duration) -> Self {
        *self.listener_delay.lock() = delay;
        self
    }

    /// Queue outcomes for upcoming `send_message`/`send_file` calls.
    pub fn script_sends(&self, outcomes: Vec<Result<(), BackendError>>) {
        self.send_script.lock().extend(outcomes);
    }

    pub fn fail_listeners(&self, message: &str) {
        *self.listener_error.lock() = Some(BackendError::new(message));
    }

    pub fn panic_on_list(&self) {
        self.panic_on_list.store(true, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: StatusRecord) {
        *self.status.lock() = status;
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().clone()
    }

    pub fn listeners(&self) -> Vec<String> {
        self.listeners.lock().clone()
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::Relaxed)
    }

    async fn next_send_outcome(&self) -> Result<(), BackendError> {
        self.send_calls.fetch_add(1, Ordering::Relaxed);
        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.send_script.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> bool {
        let mut status = self.status.lock();
        if self.connect_ok {
            status.status = BackendStatus::Connected;
            status.connected = true;
        } else {
            status.status = BackendStatus::Error;
            status.connected = false;
        }
        self.connect_ok
    }

    async fn disconnect(&self) {
        let mut status = self.status.lock();
        status.status = BackendStatus::Disconnected;
        status.connected = false;
    }

    async fn status(&self) -> StatusRecord {
        self.status.lock().clone()
    }

    async fn send_message(
        &self,
        chat: &str,
        text: &str,
        mentions: &[String],
    ) -> Result<(), BackendError> {
        self.next_send_outcome().await?;
        self.sent.lock().push(SentItem::Text {
            chat: chat.to_string(),
            text: text.to_string(),
            mentions: mentions.to_vec(),
        });
        Ok(())
    }

    async fn send_file(&self, chat: &str, path: &Path) -> Result<(), BackendError> {
        self.next_send_outcome().await?;
        self.sent.lock().push(SentItem::File {
            chat: chat.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }

    async fn add_listener(&self, chat: &str) -> Result<(), BackendError> {
        let delay = *self.listener_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.listener_error.lock().clone() {
            return Err(err);
        }
        self.listeners.lock().push(chat.to_string());
        Ok(())
    }

    async fn remove_listener(&self, chat: &str) -> Result<(), BackendError> {
        if let Some(err) = self.listener_error.lock().clone() {
            return Err(err);
        }
        self.listeners.lock().retain(|c| c != chat);
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<String>, BackendError> {
        if self.panic_on_list.load(Ordering::Relaxed) {
            panic!("conversation list unavailable");
        }
        Ok(self.contacts.lock().clone())
    }

    async fn download_media(
        &self,
        _message: &RawMessage,
        _dest_dir: &Path,
    ) -> Result<Option<PathBuf>, BackendError> {
        Ok(self.download_path.lock().clone())
    }

    async fn transcribe_voice(&self, _message: &RawMessage) -> Result<Option<String>, BackendError> {
        Ok(self.transcript.lock().clone())
    }
}
