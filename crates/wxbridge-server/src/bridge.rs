//! Wires the backend, dispatcher, event bridge, media server and gateway
//! session into one running bridge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wxbridge_core::{Backend, BackendEvent, BridgeError, ListenerSet, RetryPolicy};
use wxbridge_settings::BridgeSettings;

use crate::dispatcher::Dispatcher;
use crate::event_bridge::{connected_params, EventBridge, EventNormalizer};
use crate::file_guard::FileGuard;
use crate::media::{self, MediaConfig, MediaInfo, MediaLinks, MediaServerHandle};
use crate::rpc::Envelope;
use crate::transport::{SessionHandler, TransportConfig, TransportSession};

/// A configured bridge, ready to run.
pub struct Bridge {
    settings: BridgeSettings,
    backend: Arc<dyn Backend>,
    events: mpsc::Receiver<BackendEvent>,
    listeners: Arc<ListenerSet>,
    session: Arc<TransportSession>,
    shutdown: CancellationToken,
}

impl Bridge {
    pub fn new(
        settings: BridgeSettings,
        backend: Arc<dyn Backend>,
        events: mpsc::Receiver<BackendEvent>,
    ) -> Result<Self, BridgeError> {
        settings
            .validate()
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        let session = TransportSession::new(TransportConfig::from_settings(&settings.gateway))?;
        Ok(Self {
            settings,
            backend,
            events,
            listeners: Arc::new(ListenerSet::new()),
            session,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn session(&self) -> Arc<TransportSession> {
        Arc::clone(&self.session)
    }

    pub fn listeners(&self) -> Arc<ListenerSet> {
        Arc::clone(&self.listeners)
    }

    /// Token that stops [`Bridge::run`] when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Send a request to the gateway and wait for its result.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        self.session.call(method, params, timeout).await
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Fails only when the backend cannot connect; gateway outages are
    /// absorbed by the reconnect loop.
    pub async fn run(self) -> Result<(), BridgeError> {
        let Self {
            settings,
            backend,
            events,
            listeners,
            session,
            shutdown,
        } = self;

        if !backend.connect().await {
            return Err(BridgeError::Config(format!(
                "backend {} failed to connect",
                backend.name()
            )));
        }
        tracing::info!(backend = backend.name(), "backend connected");

        let media_dir = settings.media.dir_path();
        let media_server = if settings.media.enabled {
            let config = MediaConfig {
                root: media_dir.clone(),
                host: settings.media.host.clone(),
                port: settings.media.port,
                port_fallbacks: settings.media.port_fallbacks,
            };
            match media::start(config).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "media server unavailable, continuing without it");
                    None
                }
            }
        } else {
            tracing::info!("media server disabled");
            None
        };
        let links = media_server
            .as_ref()
            .map(MediaServerHandle::links)
            .unwrap_or_else(|| MediaLinks::disabled(media_dir.clone()));
        let media_info = media_server.as_ref().map(MediaServerHandle::info);

        for chat in settings.enabled_listen_chats() {
            listeners.queue(chat);
        }

        let dispatcher = Dispatcher::new(Arc::clone(&backend), listeners)
            .with_retry(RetryPolicy::new(
                settings.send.max_attempts,
                settings.send.retry_delay(),
            ))
            .with_file_guard(FileGuard::new(settings.send.allowed_dirs()))
            .with_media(media_dir, media_info.clone());

        let event_task = EventBridge::new(
            EventNormalizer::new(Arc::clone(&backend), links),
            Arc::clone(&session),
        )
        .start(events);

        let watcher = {
            let session = Arc::clone(&session);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                tracing::info!("shutdown requested");
                session.stop();
            })
        };

        let handler = Arc::new(BridgeHandler {
            backend: Arc::clone(&backend),
            dispatcher: Arc::new(dispatcher),
            media: media_info,
        });
        Arc::clone(&session).run(handler).await;

        watcher.abort();
        event_task.abort();
        if let Some(server) = media_server {
            server.stop().await;
        }
        backend.disconnect().await;
        tracing::info!("bridge stopped");
        Ok(())
    }
}

/// Session callbacks: greet the gateway on open and route inbound frames.
struct BridgeHandler {
    backend: Arc<dyn Backend>,
    dispatcher: Arc<Dispatcher>,
    media: Option<MediaInfo>,
}

#[async_trait]
impl SessionHandler for BridgeHandler {
    async fn on_open(&self, session: &Arc<TransportSession>) {
        let status = self.backend.status().await;
        let method = format!("{}.connected", session.backend_name());
        session.notify(&method, connected_params(&status, self.media.as_ref()));
        self.dispatcher.register_queued().await;
    }

    async fn on_message(&self, session: &Arc<TransportSession>, text: String) {
        match Envelope::parse(&text) {
            Ok(Envelope::Response(response)) => {
                if !session.resolve(response) {
                    tracing::debug!("dropped response with no waiting request");
                }
            }
            Ok(Envelope::Request(request) | Envelope::Notification(request)) => {
                // Commands run on their own task so a slow one never stalls the read loop.
                let dispatcher = Arc::clone(&self.dispatcher);
                let session = Arc::clone(session);
                tokio::spawn(async move {
                    if let Some(response) = dispatcher.dispatch(request).await {
                        session.send(&response);
                    }
                });
            }
            Err(e) => {
                let err = e.to_error();
                tracing::warn!(kind = err.error_kind(), error = %err, "unreadable frame from gateway");
                session.send(&e.to_response());
            }
        }
    }
}
