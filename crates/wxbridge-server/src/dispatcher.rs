//! Command handlers for requests arriving from the gateway.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use wxbridge_core::{Backend, BridgeError, ListenerSet, RetryPolicy};

use crate::command::{Command, ListenParams, Mentions, SendFileParams, SendParams};
use crate::file_guard::FileGuard;
use crate::media::MediaInfo;
use crate::rpc::{now_millis, RpcRequest, RpcResponse};

/// Shared state every command handler runs against.
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    listeners: Arc<ListenerSet>,
    retry: RetryPolicy,
    file_guard: FileGuard,
    media: Option<MediaInfo>,
    media_dir: PathBuf,
    listen_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, listeners: Arc<ListenerSet>) -> Self {
        Self {
            backend,
            listeners,
            retry: RetryPolicy::default(),
            file_guard: FileGuard::default(),
            media: None,
            media_dir: PathBuf::new(),
            listen_lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_file_guard(mut self, guard: FileGuard) -> Self {
        self.file_guard = guard;
        self
    }

    /// Record where media lives and, if it is being served, how to reach it.
    pub fn with_media(mut self, dir: PathBuf, info: Option<MediaInfo>) -> Self {
        self.media_dir = dir;
        self.media = info;
        self
    }

    /// Handle one inbound request.
    ///
    /// Returns the response owed to the peer, or `None` when the request
    /// carried no id. Handler failures and panics become `-32000` errors.
    pub async fn dispatch(&self, request: RpcRequest) -> Option<RpcResponse> {
        let RpcRequest {
            method, params, id, ..
        } = request;
        let reply_id = id.clone().unwrap_or(Value::Null);

        let response = match Command::parse(&method, params) {
            Ok(command) => {
                tracing::debug!(method = %method, request_id = %reply_id, "dispatching command");
                match AssertUnwindSafe(self.execute(command)).catch_unwind().await {
                    Ok(Ok(result)) => RpcResponse::success(reply_id, result),
                    Ok(Err(e)) => {
                        tracing::warn!(method = %method, error = %e, kind = e.error_kind(), "command failed");
                        RpcResponse::error(reply_id, e.rpc_code(), e.to_string())
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(method = %method, panic = %message, "command handler panicked");
                        RpcResponse::handler_error(reply_id, message)
                    }
                }
            }
            Err(error) => {
                tracing::warn!(method = %method, code = error.code, "rejected request");
                RpcResponse::from_error(reply_id, error)
            }
        };

        if id.is_none() {
            tracing::debug!(method = %method, "notification from gateway, no reply");
            return None;
        }
        Some(response)
    }

    async fn execute(&self, command: Command) -> Result<Value, BridgeError> {
        let outcome = match command {
            Command::Send(params) => self.send(params).await,
            Command::SendFile(params) => self.send_file(params).await,
            Command::GetStatus => self.get_status().await,
            Command::GetContacts => self.get_contacts().await,
            Command::AddListen(params) => self.add_listen(params).await,
            Command::RemoveListen(params) => self.remove_listen(params).await,
            Command::GetMediaInfo => Ok(self.get_media_info()),
            Command::Ping => Ok(json!({ "pong": true, "timestamp": now_millis() })),
        };
        // Commands that were understood but not carried out answer with a result, not an error.
        match outcome {
            Err(e @ (BridgeError::Application(_) | BridgeError::Backend(_))) => {
                tracing::warn!(kind = e.error_kind(), error = %e, "command not carried out");
                Ok(failure(e.to_string()))
            }
            other => other,
        }
    }

    async fn send(&self, params: SendParams) -> Result<Value, BridgeError> {
        let to = required(params.to, "to")?;

        for file in params.files.unwrap_or_default() {
            self.deliver_file(&to, &file).await?;
        }

        let text = params.text.unwrap_or_default();
        if !text.is_empty() {
            let mentions = params.at.map(Mentions::into_vec).unwrap_or_default();
            self.retry
                .run("send_message", || {
                    self.backend.send_message(&to, &text, &mentions)
                })
                .await?;
            tracing::info!(chat = %to, mentions = mentions.len(), "text sent");
        }

        Ok(json!({ "ok": true }))
    }

    async fn send_file(&self, params: SendFileParams) -> Result<Value, BridgeError> {
        let to = required(params.to, "to")?;
        let file = required(params.file_path, "filePath")?;
        self.deliver_file(&to, &file).await?;
        Ok(json!({ "ok": true }))
    }

    async fn deliver_file(&self, to: &str, file: &str) -> Result<(), BridgeError> {
        let path = self.file_guard.check(file).map_err(BridgeError::Application)?;
        self.retry
            .run("send_file", || self.backend.send_file(to, &path))
            .await?;
        tracing::info!(chat = %to, path = %path.display(), "file sent");
        Ok(())
    }

    async fn get_status(&self) -> Result<Value, BridgeError> {
        let status = self.backend.status().await;
        let mut value = serde_json::to_value(&status)?;
        value["listeningChats"] = json!(self.listeners.names());
        Ok(value)
    }

    async fn get_contacts(&self) -> Result<Value, BridgeError> {
        let contacts = self.backend.list_conversations().await?;
        Ok(json!({ "ok": true, "contacts": contacts }))
    }

    async fn add_listen(&self, params: ListenParams) -> Result<Value, BridgeError> {
        let chat = required(params.chat, "chat")?;
        let _serial = self.listen_lock.lock().await;
        self.register(&chat).await?;
        Ok(json!({ "ok": true, "listening": self.listeners.names() }))
    }

    async fn remove_listen(&self, params: ListenParams) -> Result<Value, BridgeError> {
        let chat = required(params.chat, "chat")?;
        let _serial = self.listen_lock.lock().await;
        if self.listeners.contains(&chat) {
            self.backend.remove_listener(&chat).await?;
            if self.listeners.remove(&chat).is_some() {
                tracing::info!(chat = %chat, "stopped listening");
            }
        }
        Ok(json!({ "ok": true, "listening": self.listeners.names() }))
    }

    /// Register every chat queued before the gateway connection opened.
    pub async fn register_queued(&self) {
        let _serial = self.listen_lock.lock().await;
        for chat in self.listeners.take_queued() {
            if let Err(e) = self.register(&chat).await {
                tracing::warn!(chat = %chat, error = %e, "failed to register listener");
            }
        }
    }

    /// Caller holds `listen_lock`, so the check and the insert see the same set.
    async fn register(&self, chat: &str) -> Result<(), BridgeError> {
        if self.listeners.contains(chat) {
            return Ok(());
        }
        self.backend.add_listener(chat).await?;
        if self.listeners.insert(chat) {
            tracing::info!(chat = %chat, "listening");
        }
        Ok(())
    }

    fn get_media_info(&self) -> Value {
        match &self.media {
            Some(info) => json!({
                "ok": true,
                "url": info.url,
                "dir": info.dir,
                "port": info.port,
            }),
            None => json!({
                "ok": false,
                "error": "Media server not running",
                "dir": self.media_dir,
            }),
        }
    }
}

fn required(value: Option<String>, param: &str) -> Result<String, BridgeError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BridgeError::Application(format!("Missing '{param}' parameter")))
}

fn failure(message: impl Into<String>) -> Value {
    json!({ "ok": false, "error": message.into() })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "command handler panicked".to_string()
    }
}
