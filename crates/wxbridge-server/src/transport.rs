use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use wxbridge_core::ids::ConnectionId;
use wxbridge_core::BridgeError;
use wxbridge_settings::GatewaySettings;

use crate::correlator::Correlator;
use crate::rpc::{RpcRequest, RpcResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of the gateway connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Transport session configuration.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Base gateway URL (`ws://` or `wss://`).
    pub gateway_url: String,
    pub auth_token: String,
    pub backend_name: String,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub request_timeout: Duration,
    pub max_send_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://localhost:18789".to_string(),
            auth_token: String::new(),
            backend_name: "wechat".to_string(),
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_send_queue: 256,
        }
    }
}

impl TransportConfig {
    pub fn from_settings(gateway: &GatewaySettings) -> Self {
        Self {
            gateway_url: gateway.url.clone(),
            auth_token: gateway.auth_token.clone(),
            backend_name: gateway.backend_name.clone(),
            reconnect_delay: gateway.reconnect_delay(),
            ping_interval: gateway.ping_interval(),
            pong_timeout: gateway.pong_timeout(),
            request_timeout: gateway.request_timeout(),
            ..Default::default()
        }
    }

    /// `<gateway>/channels/<backend>`, plus `?token=` when a token is set.
    pub fn endpoint(&self) -> Result<Url, BridgeError> {
        let mut url = Url::parse(self.gateway_url.trim())
            .map_err(|e| BridgeError::Config(format!("invalid gateway url {:?}: {e}", self.gateway_url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(BridgeError::Config(format!(
                "gateway url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        let path = format!(
            "{}/channels/{}",
            url.path().trim_end_matches('/'),
            self.backend_name
        );
        url.set_path(&path);
        url.set_query(None);
        if !self.auth_token.is_empty() {
            url.query_pairs_mut().append_pair("token", &self.auth_token);
        }
        Ok(url)
    }
}

/// Callbacks driven by the session's read loop.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Called once per successful connect, before any inbound frame.
    async fn on_open(&self, session: &Arc<TransportSession>);

    /// Called for every inbound text frame, in arrival order.
    async fn on_message(&self, session: &Arc<TransportSession>, text: String);
}

enum Disconnect {
    Stopped,
    Lost(BridgeError),
}

/// Reconnecting WebSocket client to the gateway.
///
/// A single task owns the socket; everything else enqueues frames through
/// [`TransportSession::send_frame`], which never blocks.
pub struct TransportSession {
    config: TransportConfig,
    endpoint: Url,
    state: watch::Sender<SessionState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    correlator: Correlator,
    cancel: CancellationToken,
}

impl TransportSession {
    pub fn new(config: TransportConfig) -> Result<Arc<Self>, BridgeError> {
        let endpoint = config.endpoint()?;
        let (state, _) = watch::channel(SessionState::Idle);
        Ok(Arc::new(Self {
            config,
            endpoint,
            state,
            outbound: Mutex::new(None),
            correlator: Correlator::new(),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn backend_name(&self) -> &str {
        &self.config.backend_name
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "session state changed");
        }
    }

    /// Queue a text frame for the current connection.
    pub fn send_frame(&self, text: String) -> bool {
        if !self.is_open() {
            tracing::debug!(state = ?self.state(), "session not open, dropping outbound frame");
            return false;
        }
        let Some(tx) = self.outbound.lock().clone() else {
            tracing::debug!("no active connection, dropping outbound frame");
            return false;
        };
        match tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(msg_len = msg.len(), "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send_frame(json),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound frame");
                false
            }
        }
    }

    pub fn notify(&self, method: &str, params: Value) -> bool {
        self.send(&RpcRequest::notification(method, params))
    }

    /// Send a request to the gateway and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        let pending = self.correlator.register();
        let request = RpcRequest::new(method, params, pending.id.as_str());
        if !self.send(&request) {
            self.correlator.cancel(&pending.id);
            return Err(BridgeError::ConnectionLost);
        }
        self.correlator
            .wait(pending, timeout.unwrap_or(self.config.request_timeout))
            .await
    }

    /// Hand a gateway response to its waiting caller.
    pub fn resolve(&self, response: RpcResponse) -> bool {
        self.correlator.resolve(response)
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Request shutdown. Safe to call more than once.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        match self.state() {
            SessionState::Idle => self.set_state(SessionState::Closed),
            SessionState::Closed => {}
            _ => self.set_state(SessionState::Closing),
        }
    }

    /// Connect and keep reconnecting until [`TransportSession::stop`] is called.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn SessionHandler>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(SessionState::Connecting);

            let conn_id = ConnectionId::new();
            tracing::info!(conn_id = %conn_id, url = %redacted(&self.endpoint), "connecting to gateway");

            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(self.endpoint.as_str())) => result,
            };

            match connected {
                Ok(Ok((ws, _resp))) => {
                    let outcome = self.serve(ws, &handler, &conn_id).await;
                    self.outbound.lock().take();
                    let failed = self.correlator.fail_all();
                    if failed > 0 {
                        tracing::warn!(conn_id = %conn_id, failed, "failed pending requests after disconnect");
                    }
                    match outcome {
                        Disconnect::Stopped => break,
                        Disconnect::Lost(err) => {
                            tracing::warn!(conn_id = %conn_id, kind = err.error_kind(), error = %err, "gateway connection lost");
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(conn_id = %conn_id, error = %e, "gateway connect failed");
                }
                Err(_) => {
                    tracing::warn!(conn_id = %conn_id, timeout_secs = CONNECT_TIMEOUT.as_secs(), "gateway connect timed out");
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(SessionState::Connecting);
            tracing::info!(delay_ms = self.config.reconnect_delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.outbound.lock().take();
        self.correlator.fail_all();
        self.set_state(SessionState::Closed);
        tracing::info!("gateway session closed");
    }

    async fn serve<S>(
        self: &Arc<Self>,
        ws: tokio_tungstenite::WebSocketStream<S>,
        handler: &Arc<dyn SessionHandler>,
        conn_id: &ConnectionId,
    ) -> Disconnect
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::channel::<String>(self.config.max_send_queue.max(1));
        *self.outbound.lock() = Some(tx);
        self.set_state(SessionState::Open);
        tracing::info!(conn_id = %conn_id, "gateway connection open");

        handler.on_open(self).await;

        // A zero period disables keepalive instead of panicking in `interval`.
        let mut ping_interval = if self.config.ping_interval.is_zero() {
            tracing::debug!(conn_id = %conn_id, "keepalive disabled");
            None
        } else {
            let mut interval = tokio::time::interval(self.config.ping_interval);
            interval.tick().await; // consume first immediate tick
            Some(interval)
        };
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return Disconnect::Stopped;
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            handler.on_message(self, text.to_string()).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            pong_deadline = None;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("closed by gateway: {} {}", u16::from(f.code), f.reason.as_str()))
                                .unwrap_or_else(|| "closed by gateway".to_string());
                            return Disconnect::Lost(BridgeError::Transport(reason));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Disconnect::Lost(BridgeError::Transport(e.to_string())),
                        None => return Disconnect::Lost(BridgeError::Transport("stream ended".to_string())),
                    }
                }
                Some(text) = rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        return Disconnect::Lost(BridgeError::Transport(e.to_string()));
                    }
                }
                () = next_ping(&mut ping_interval) => {
                    if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                        return Disconnect::Lost(BridgeError::Transport(e.to_string()));
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                }
                () = wait_until(pong_deadline) => {
                    return Disconnect::Lost(BridgeError::Transport(format!(
                        "no pong within {}ms",
                        self.config.pong_timeout.as_millis()
                    )));
                }
            }
        }
    }
}

async fn next_ping(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Endpoint for logs with the token masked.
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.query().is_some() {
        shown.set_query(Some("token=***"));
    }
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    struct Recorder {
        opens: AtomicUsize,
        frames: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                frames: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionHandler for Recorder {
        async fn on_open(&self, _session: &Arc<TransportSession>) {
            self.opens.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_message(&self, session: &Arc<TransportSession>, text: String) {
            if let Ok(crate::rpc::Envelope::Response(resp)) = crate::rpc::Envelope::parse(&text) {
                session.resolve(resp);
                return;
            }
            self.frames.lock().push(text);
        }
    }

    async fn local_gateway() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    fn fast_config(url: &str) -> TransportConfig {
        TransportConfig {
            gateway_url: url.to_string(),
            reconnect_delay: Duration::from_millis(100),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<SessionState>, want: SessionState) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    #[test]
    fn endpoint_appends_channel_and_token() {
        let config = TransportConfig {
            gateway_url: "ws://localhost:18789/".into(),
            auth_token: "s3cret".into(),
            ..Default::default()
        };
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "ws://localhost:18789/channels/wechat?token=s3cret"
        );
    }

    #[test]
    fn endpoint_without_token_has_no_query() {
        let config = TransportConfig {
            gateway_url: "wss://gw.example.com/base".into(),
            backend_name: "im".into(),
            ..Default::default()
        };
        assert_eq!(
            config.endpoint().unwrap().as_str(),
            "wss://gw.example.com/base/channels/im"
        );
    }

    #[test]
    fn endpoint_rejects_bad_urls() {
        for bad in ["not a url", "http://localhost:18789", ""] {
            let config = TransportConfig {
                gateway_url: bad.into(),
                ..Default::default()
            };
            assert!(
                matches!(config.endpoint(), Err(BridgeError::Config(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn redacts_token() {
        let url = Url::parse("ws://h/channels/wechat?token=abc").unwrap();
        assert_eq!(redacted(&url), "ws://h/channels/wechat?token=***");
    }

    #[test]
    fn send_before_open_is_dropped() {
        let session = TransportSession::new(TransportConfig::default()).unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.notify("wechat.status", json!({})));
    }

    #[tokio::test]
    async fn call_before_open_fails_fast() {
        let session = TransportSession::new(TransportConfig::default()).unwrap();
        let err = session.call("x", json!({}), None).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionLost));
        assert_eq!(session.pending_requests(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let session = TransportSession::new(TransportConfig::default()).unwrap();
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn connects_with_token_path() {
        let (listener, url) = local_gateway().await;
        let config = TransportConfig {
            auth_token: "abc".into(),
            ..fast_config(&url)
        };
        let session = TransportSession::new(config).unwrap();
        let recorder = Recorder::new();
        let runner = tokio::spawn(Arc::clone(&session).run(recorder.clone()));

        let (tcp, _) = listener.accept().await.unwrap();
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_in_cb = Arc::clone(&seen);
        let _ws = tokio_tungstenite::accept_hdr_async(tcp, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen_in_cb.lock() = req.uri().to_string();
            Ok(resp)
        })
        .await
        .unwrap();

        let mut state = session.subscribe_state();
        wait_for(&mut state, SessionState::Open).await;
        assert_eq!(*seen.lock(), "/channels/wechat?token=abc");
        assert_eq!(recorder.opens.load(Ordering::SeqCst), 1);

        session.stop();
        runner.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn reconnects_once_per_cycle_after_drop() {
        let (listener, url) = local_gateway().await;
        let session = TransportSession::new(fast_config(&url)).unwrap();
        let recorder = Recorder::new();
        let mut state = session.subscribe_state();
        let runner = tokio::spawn(Arc::clone(&session).run(recorder.clone()));

        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        wait_for(&mut state, SessionState::Open).await;

        drop(ws);
        wait_for(&mut state, SessionState::Connecting).await;

        let (tcp, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("no reconnect")
            .unwrap();
        let _ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        wait_for(&mut state, SessionState::Open).await;
        assert_eq!(recorder.opens.load(Ordering::SeqCst), 2);

        // No further attempt while the connection stays up.
        let extra = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(extra.is_err());

        session.stop();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn missing_pong_drops_connection() {
        let (listener, url) = local_gateway().await;
        let config = TransportConfig {
            ping_interval: Duration::from_millis(50),
            pong_timeout: Duration::from_millis(50),
            ..fast_config(&url)
        };
        let session = TransportSession::new(config).unwrap();
        let mut state = session.subscribe_state();
        let runner = tokio::spawn(Arc::clone(&session).run(Recorder::new()));

        // Accept but never read, so no pong is ever produced.
        let (tcp, _) = listener.accept().await.unwrap();
        let _silent = tokio_tungstenite::accept_async(tcp).await.unwrap();
        wait_for(&mut state, SessionState::Open).await;
        wait_for(&mut state, SessionState::Connecting).await;

        session.stop();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn zero_ping_interval_keeps_connection_without_keepalive() {
        let (listener, url) = local_gateway().await;
        let config = TransportConfig {
            ping_interval: Duration::ZERO,
            ..fast_config(&url)
        };
        let session = TransportSession::new(config).unwrap();
        let mut state = session.subscribe_state();
        let runner = tokio::spawn(Arc::clone(&session).run(Recorder::new()));

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        wait_for(&mut state, SessionState::Open).await;

        // No ping arrives and the session stays open.
        let frame = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
        assert!(frame.is_err(), "unexpected frame: {frame:?}");
        assert_eq!(session.state(), SessionState::Open);
        assert!(!runner.is_finished());

        session.stop();
        runner.await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn stop_interrupts_reconnect_backoff() {
        // Reserve a port, then free it so every connect is refused.
        let url = {
            let (listener, url) = local_gateway().await;
            drop(listener);
            url
        };
        let config = TransportConfig {
            reconnect_delay: Duration::from_secs(60),
            ..fast_config(&url)
        };
        let session = TransportSession::new(config).unwrap();
        let mut state = session.subscribe_state();
        let runner = tokio::spawn(Arc::clone(&session).run(Recorder::new()));

        wait_for(&mut state, SessionState::Connecting).await;
        // Give the refused attempt time to land in the backoff sleep.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!runner.is_finished());

        session.stop();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("run did not return after stop")
            .unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn call_roundtrip_and_fail_on_stop() {
        let (listener, url) = local_gateway().await;
        let session = TransportSession::new(fast_config(&url)).unwrap();
        let mut state = session.subscribe_state();
        let runner = tokio::spawn(Arc::clone(&session).run(Recorder::new()));

        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        wait_for(&mut state, SessionState::Open).await;

        let caller = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call("gateway.echo", json!({"v": 1}), None).await })
        };

        // Answer the first request with its own id.
        let request = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(t) => break serde_json::from_str::<Value>(&t).unwrap(),
                _ => continue,
            }
        };
        assert_eq!(request["method"], "gateway.echo");
        let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": {"echo": 1}});
        ws.send(Message::Text(reply.to_string().into())).await.unwrap();

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result, json!({"echo": 1}));

        // A call left pending is failed by stop.
        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call("gateway.slow", json!({}), Some(Duration::from_secs(30))).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.pending_requests() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        session.stop();
        runner.await.unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionLost));
    }

    #[tokio::test]
    async fn call_times_out() {
        let (listener, url) = local_gateway().await;
        let session = TransportSession::new(fast_config(&url)).unwrap();
        let mut state = session.subscribe_state();
        let runner = tokio::spawn(Arc::clone(&session).run(Recorder::new()));

        let (tcp, _) = listener.accept().await.unwrap();
        let _ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        wait_for(&mut state, SessionState::Open).await;

        let err = session
            .call("gateway.never", json!({}), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
        assert_eq!(session.pending_requests(), 0);

        session.stop();
        runner.await.unwrap();
    }
}
