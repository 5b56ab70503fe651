use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use wxbridge_core::{Backend, BackendEvent, CanonicalMessage, MediaRef, MessageKind, RawMessage, StatusRecord};

use crate::media::{MediaInfo, MediaLinks};
use crate::rpc::now_millis;
use crate::transport::TransportSession;

const VOICE_LABEL: &str = "[voice message]";

/// Remove every `@own_name` token from `content`.
///
/// Returns the trimmed remainder and whether a mention was found.
pub fn strip_mention(content: &str, own_name: Option<&str>) -> (String, bool) {
    let Some(name) = own_name.filter(|n| !n.is_empty()) else {
        return (content.to_string(), false);
    };
    let token = format!("@{name}");
    if !content.contains(&token) {
        return (content.to_string(), false);
    }
    (content.replace(&token, "").trim().to_string(), true)
}

/// Text the gateway sees for a message of `kind`.
pub fn synthesize_text(
    kind: MessageKind,
    raw_text: &str,
    media: Option<&MediaRef>,
    transcript: Option<&str>,
) -> String {
    let label = match kind {
        MessageKind::Image => "[image]",
        MessageKind::Video => "[video]",
        MessageKind::File => "[file]",
        MessageKind::Voice => {
            return match transcript.filter(|t| !t.trim().is_empty()) {
                Some(text) => format!("{VOICE_LABEL} {text}"),
                None => format!("{VOICE_LABEL} (transcription unavailable)"),
            };
        }
        MessageKind::Text | MessageKind::Other => return raw_text.to_string(),
    };

    let mut parts = vec![label.to_string()];
    if let Some(media) = media {
        if kind == MessageKind::File {
            parts.extend(media.file_name.clone());
            parts.extend(media.file_size.clone());
        }
        if let Some(url) = &media.url {
            parts.push(format!("remote: {url}"));
        }
        if let Some(path) = &media.local_path {
            parts.push(format!("local: {}", path.display()));
        }
    }
    parts.join(" ")
}

/// Turns raw backend messages into canonical ones.
pub struct EventNormalizer {
    backend: Arc<dyn Backend>,
    links: MediaLinks,
}

impl EventNormalizer {
    pub fn new(backend: Arc<dyn Backend>, links: MediaLinks) -> Self {
        Self { backend, links }
    }

    /// Normalize `raw`. Messages the bridge account sent itself yield `None`.
    pub async fn normalize(&self, raw: RawMessage) -> Option<CanonicalMessage> {
        if raw.is_self {
            return None;
        }

        let own_name = self.backend.status().await.nickname;
        let (raw_text, is_mentioned) = strip_mention(&raw.content, own_name.as_deref());

        let media = if raw.kind.is_downloadable() {
            Some(self.fetch_media(&raw).await).filter(|m| !m.is_empty())
        } else {
            None
        };

        let voice_transcript = if raw.kind.is_transcribable() {
            match self.backend.transcribe_voice(&raw).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(chat = %raw.chat_name, error = %e, "voice transcription failed");
                    None
                }
            }
        } else {
            None
        };

        let text = synthesize_text(
            raw.kind,
            &raw_text,
            media.as_ref(),
            voice_transcript.as_deref(),
        );

        Some(CanonicalMessage {
            sender: raw.sender,
            chat_name: raw.chat_name,
            raw_text,
            text,
            kind: raw.kind,
            is_group: raw.is_group,
            is_self: raw.is_self,
            is_mentioned,
            timestamp: raw.timestamp,
            media,
            voice_transcript,
        })
    }

    async fn fetch_media(&self, raw: &RawMessage) -> MediaRef {
        let mut media = MediaRef {
            file_name: raw.file_name.clone(),
            file_size: raw.file_size.clone(),
            ..Default::default()
        };
        match self.backend.download_media(raw, self.links.root()).await {
            Ok(Some(path)) => {
                media.url = self.links.url_for(&path);
                if media.file_name.is_none() {
                    media.file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned());
                }
                media.local_path = Some(path);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(chat = %raw.chat_name, kind = raw.kind.as_str(), error = %e, "media download failed");
            }
        }
        media
    }
}

/// Params of the `<backend>.message` notification.
pub fn message_params(msg: &CanonicalMessage) -> Value {
    let mut params = json!({
        "from": msg.sender,
        "to": msg.chat_name,
        "text": msg.text,
        "type": msg.kind,
        "chatType": msg.chat_type(),
        "timestamp": msg.timestamp,
        "isSelf": msg.is_self,
        "isAtMe": msg.is_mentioned,
    });
    if let Some(media) = &msg.media {
        params["media"] = json!(media);
    }
    if let Some(transcript) = &msg.voice_transcript {
        params["voiceText"] = json!(transcript);
    }
    if msg.raw_text != msg.text {
        params["rawText"] = json!(msg.raw_text);
    }
    params
}

/// Params of the `<backend>.status` notification.
pub fn status_params(status: &StatusRecord) -> Value {
    json!({
        "status": status.status,
        "connected": status.connected,
        "nickname": status.nickname,
        "id": status.id,
        "timestamp": now_millis(),
    })
}

/// Params of the `<backend>.connected` notification sent on every open.
pub fn connected_params(status: &StatusRecord, media: Option<&MediaInfo>) -> Value {
    let mut params = json!({
        "nickname": status.nickname,
        "id": status.id,
        "online": status.connected,
        "timestamp": now_millis(),
    });
    if let Some(media) = media {
        params["mediaServer"] = json!(media);
    }
    params
}

/// Drains the backend event queue and forwards events to the gateway.
pub struct EventBridge {
    normalizer: EventNormalizer,
    session: Arc<TransportSession>,
}

impl EventBridge {
    pub fn new(normalizer: EventNormalizer, session: Arc<TransportSession>) -> Self {
        Self {
            normalizer,
            session,
        }
    }

    /// Start the bridge. Runs until every [`wxbridge_core::EventSender`] is dropped.
    pub fn start(self, mut rx: mpsc::Receiver<BackendEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let backend = self.session.backend_name().to_string();
            let message_method = format!("{backend}.message");
            let status_method = format!("{backend}.status");

            while let Some(event) = rx.recv().await {
                match event {
                    BackendEvent::Message(raw) => {
                        let Some(msg) = self.normalizer.normalize(raw).await else {
                            continue;
                        };
                        tracing::info!(
                            from = %msg.sender,
                            chat = %msg.chat_name,
                            kind = msg.kind.as_str(),
                            mentioned = msg.is_mentioned,
                            "forwarding message"
                        );
                        self.session.notify(&message_method, message_params(&msg));
                    }
                    BackendEvent::Status(status) => {
                        tracing::info!(status = ?status.status, "backend status changed");
                        self.session.notify(&status_method, status_params(&status));
                    }
                }
            }
            tracing::info!("backend event channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wxbridge_core::mock::MockBackend;

    fn normalizer(backend: MockBackend, root: PathBuf) -> EventNormalizer {
        let links = MediaLinks::serving(root, "localhost", 18790);
        EventNormalizer::new(Arc::new(backend), links)
    }

    #[test]
    fn strip_mention_removes_token() {
        let (text, mentioned) = strip_mention("@Bot hi there", Some("Bot"));
        assert_eq!(text, "hi there");
        assert!(mentioned);

        let (text, mentioned) = strip_mention("hi @Bot\u{2005}", Some("Bot"));
        assert_eq!(text, "hi");
        assert!(mentioned);
    }

    #[test]
    fn strip_mention_without_name_or_token() {
        assert_eq!(strip_mention("@Bot hi", None), ("@Bot hi".to_string(), false));
        assert_eq!(strip_mention("@Bot hi", Some("")), ("@Bot hi".to_string(), false));
        assert_eq!(strip_mention(" hello ", Some("Bot")), (" hello ".to_string(), false));
    }

    #[test]
    fn synthesize_text_variants() {
        assert_eq!(synthesize_text(MessageKind::Text, "hi", None, None), "hi");
        assert_eq!(
            synthesize_text(MessageKind::Voice, "", None, Some("see you")),
            "[voice message] see you"
        );
        assert_eq!(
            synthesize_text(MessageKind::Voice, "", None, None),
            "[voice message] (transcription unavailable)"
        );
        assert_eq!(synthesize_text(MessageKind::Other, "<sticker>", None, None), "<sticker>");
        assert_eq!(synthesize_text(MessageKind::Image, "", None, None), "[image]");

        let media = MediaRef {
            url: Some("http://localhost:18790/media/a.png".into()),
            local_path: Some(PathBuf::from("/m/a.png")),
            ..Default::default()
        };
        assert_eq!(
            synthesize_text(MessageKind::Image, "", Some(&media), None),
            "[image] remote: http://localhost:18790/media/a.png local: /m/a.png"
        );

        let file = MediaRef {
            file_name: Some("report.pdf".into()),
            file_size: Some("1.2MB".into()),
            ..Default::default()
        };
        assert_eq!(
            synthesize_text(MessageKind::File, "", Some(&file), None),
            "[file] report.pdf 1.2MB"
        );
    }

    #[tokio::test]
    async fn self_messages_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer(MockBackend::new("wechat"), dir.path().to_path_buf());
        let raw = RawMessage::text("me", "team", "hello").from_self();
        assert!(n.normalize(raw).await.is_none());
    }

    #[tokio::test]
    async fn group_mention_is_detected_and_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new("wechat").with_nickname("Bot");
        let n = normalizer(backend, dir.path().to_path_buf());

        let raw = RawMessage::text("alice", "team", "@Bot what's up").in_group();
        let msg = n.normalize(raw).await.unwrap();
        assert!(msg.is_mentioned);
        assert_eq!(msg.text, "what's up");
        assert_eq!(msg.chat_type(), "group");

        let params = message_params(&msg);
        assert_eq!(params["from"], "alice");
        assert_eq!(params["to"], "team");
        assert_eq!(params["isAtMe"], true);
        assert_eq!(params["type"], "text");
        assert!(params.get("rawText").is_none());
    }

    #[tokio::test]
    async fn downloaded_image_gets_url_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let saved = root.join("2024").join("cat.png");
        let backend = MockBackend::new("wechat").with_download(saved.clone());
        let n = normalizer(backend, root);

        let raw = RawMessage::text("bob", "bob", "").with_kind(MessageKind::Image);
        let msg = n.normalize(raw).await.unwrap();
        let media = msg.media.clone().unwrap();
        assert_eq!(
            media.url.as_deref(),
            Some("http://localhost:18790/media/2024/cat.png")
        );
        assert_eq!(media.local_path.as_deref(), Some(saved.as_path()));
        assert!(msg.text.starts_with("[image] remote: http://localhost:18790/media/2024/cat.png"));

        let params = message_params(&msg);
        assert_eq!(params["media"]["fileName"], "cat.png");
        assert_eq!(params["chatType"], "friend");
        assert_eq!(params["rawText"], "");
    }

    #[tokio::test]
    async fn voice_uses_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::new("wechat").with_transcript("call me back");
        let n = normalizer(backend, dir.path().to_path_buf());

        let raw = RawMessage::text("carol", "carol", "[Voice]").with_kind(MessageKind::Voice);
        let msg = n.normalize(raw).await.unwrap();
        assert_eq!(msg.text, "[voice message] call me back");
        let params = message_params(&msg);
        assert_eq!(params["voiceText"], "call me back");
        assert_eq!(params["rawText"], "[Voice]");
    }

    #[test]
    fn connected_params_include_media() {
        let status = StatusRecord::connected("Bot", "wxid_1");
        let info = MediaInfo {
            url: "http://localhost:18790".into(),
            dir: PathBuf::from("/m"),
            port: 18790,
        };
        let params = connected_params(&status, Some(&info));
        assert_eq!(params["nickname"], "Bot");
        assert_eq!(params["online"], true);
        assert_eq!(params["mediaServer"]["port"], 18790);
        assert!(params["timestamp"].as_i64().unwrap() > 0);

        let params = connected_params(&status, None);
        assert!(params.get("mediaServer").is_none());
    }

    #[test]
    fn status_params_shape() {
        let params = status_params(&StatusRecord::default());
        assert_eq!(params["status"], "disconnected");
        assert_eq!(params["connected"], false);
    }
}
