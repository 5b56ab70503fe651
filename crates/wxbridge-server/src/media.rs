use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use url::Url;

use wxbridge_core::BridgeError;

const CACHE_CONTROL_VALUE: &str = "public, max-age=3600";
const FALLBACK_MIME: &str = "application/octet-stream";
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Media server configuration.
#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    /// Extra consecutive ports tried after `port`.
    pub port_fallbacks: u16,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
            host: "localhost".to_string(),
            port: 18790,
            port_fallbacks: 5,
        }
    }
}

/// Public description of a running media server, returned by `getMediaInfo`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MediaInfo {
    pub url: String,
    pub dir: PathBuf,
    pub port: u16,
}

/// Builds fetchable URLs for files under the media root.
#[derive(Clone, Debug)]
pub struct MediaLinks {
    root: PathBuf,
    base: Option<Url>,
}

impl MediaLinks {
    /// Links for a root that is not being served.
    pub fn disabled(root: PathBuf) -> Self {
        Self { root, base: None }
    }

    pub fn serving(root: PathBuf, host: &str, port: u16) -> Self {
        let base = Url::parse(&format!("http://{host}:{port}/media/")).ok();
        Self { root, base }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// URL for `path`, if it lies under the root and serving is enabled.
    pub fn url_for(&self, path: &Path) -> Option<String> {
        let base = self.base.as_ref()?;
        let relative = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                let canonical_root = self.root.canonicalize().ok()?;
                let canonical = path.canonicalize().ok()?;
                canonical.strip_prefix(&canonical_root).ok()?.to_path_buf()
            }
        };

        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if segments.is_empty() {
            return None;
        }

        let mut url = base.clone();
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .extend(segments.iter().map(String::as_str));
        Some(url.to_string())
    }
}

/// Content type for a file, by extension.
///
/// Chat media formats the common table lacks or maps differently are pinned first.
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "amr" => "audio/amr",
        "silk" => "audio/silk",
        _ => mime_guess::from_path(path).first_raw().unwrap_or(FALLBACK_MIME),
    }
}

/// Why a media request was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum MediaRejection {
    Forbidden,
    NotFound,
    NotAFile,
}

impl IntoResponse for MediaRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Forbidden => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
            Self::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            Self::NotAFile => (StatusCode::BAD_REQUEST, "Not a file").into_response(),
        }
    }
}

/// Resolve a request path against `root` without ever leaving it.
///
/// `root` must already be canonical. The lexical check runs before any
/// filesystem access; the canonical check afterwards catches symlinks.
pub fn resolve_media_path(root: &Path, requested: &str) -> Result<PathBuf, MediaRejection> {
    let mut relative = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(MediaRejection::Forbidden);
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(MediaRejection::Forbidden),
        }
    }

    let full = root.join(&relative);
    let canonical = match full.canonicalize() {
        Ok(p) => p,
        Err(_) => return Err(MediaRejection::NotFound),
    };
    if !canonical.starts_with(root) {
        return Err(MediaRejection::Forbidden);
    }
    if !canonical.is_file() {
        return Err(MediaRejection::NotAFile);
    }
    Ok(canonical)
}

#[derive(Clone)]
struct MediaState {
    root: PathBuf,
    port: u16,
}

/// Build the media router. `root` must be canonical.
fn build_router(state: MediaState) -> Router {
    let allow_origin = HeaderValue::from_static("*");
    let allow_methods = HeaderValue::from_static("GET, OPTIONS");
    let allow_headers = HeaderValue::from_static("*");

    Router::new()
        .route("/media/{*path}", get(media_handler).options(preflight_handler))
        .route("/health", get(health_handler))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            allow_origin,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            allow_methods,
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            allow_headers,
        ))
}

async fn media_handler(
    State(state): State<MediaState>,
    UrlPath(requested): UrlPath<String>,
) -> Response {
    let path = match resolve_media_path(&state.root, &requested) {
        Ok(p) => p,
        Err(rejection) => {
            tracing::debug!(path = %requested, ?rejection, "media request refused");
            return rejection.into_response();
        }
    };

    match file_response(&path).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to serve media file");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

async fn file_response(path: &Path) -> std::io::Result<Response> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_default();

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static(mime_for(path))),
        (header::CONTENT_LENGTH, HeaderValue::from(len)),
        (header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE)),
        (
            header::CONTENT_DISPOSITION,
            content_disposition(&file_name),
        ),
    ];
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

fn content_disposition(file_name: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("inline; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"))
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn fallback_handler() -> MediaRejection {
    MediaRejection::NotFound
}

async fn health_handler(State(state): State<MediaState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "media_dir": state.root.display().to_string(),
        "port": state.port,
    }))
}

/// Handle for a running media server.
pub struct MediaServerHandle {
    pub port: u16,
    host: String,
    root: PathBuf,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl MediaServerHandle {
    pub fn links(&self) -> MediaLinks {
        MediaLinks::serving(self.root.clone(), &self.host, self.port)
    }

    pub fn info(&self) -> MediaInfo {
        MediaInfo {
            url: format!("http://{}:{}", self.host, self.port),
            dir: self.root.clone(),
            port: self.port,
        }
    }

    /// Stop serving. The port is released once this returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        let mut task = self.task;
        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            tracing::warn!(port = self.port, "media server did not drain in time, aborting");
            task.abort();
            let _ = task.await;
        }
        tracing::info!(port = self.port, "media server stopped");
    }
}

/// Bind the first free port in `port..=port+port_fallbacks` and start serving.
pub async fn start(config: MediaConfig) -> Result<MediaServerHandle, BridgeError> {
    std::fs::create_dir_all(&config.root)?;
    let root = config.root.canonicalize()?;

    let first = config.port;
    let last = if first == 0 {
        0
    } else {
        first.saturating_add(config.port_fallbacks)
    };

    let mut last_error = None;
    let mut bound = None;
    for port in first..=last {
        match TcpListener::bind((config.host.as_str(), port)).await {
            Ok(listener) => {
                bound = Some(listener);
                break;
            }
            Err(e) => {
                tracing::debug!(port, error = %e, "media port unavailable");
                last_error = Some(e);
            }
        }
    }

    let Some(listener) = bound else {
        let detail = last_error.map(|e| e.to_string()).unwrap_or_default();
        return Err(BridgeError::Resource(format!(
            "no free media port in {first}..={last}: {detail}"
        )));
    };

    let port = listener.local_addr()?.port();
    if port != first && first != 0 {
        tracing::warn!(preferred = first, port, "media port in use, fell back");
    }

    let router = build_router(MediaState {
        root: root.clone(),
        port,
    });
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "media server exited with error");
        }
    });

    tracing::info!(port, root = %root.display(), "media server started");

    Ok(MediaServerHandle {
        port,
        host: config.host,
        root,
        cancel,
        task,
    })
}
