use reqwest::header::{CONTENT_TYPE, HeaderMap};
use url::Url;

/// What kind of payload an upstream response carries, and so what the proxy does with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Html,
    HlsManifest,
    Json,
    BinaryMedia,
    Opaque,
}

impl ContentClass {
    /// only these get their text rewritten, so only these are ever fully buffered
    pub fn needs_rewrite(self) -> bool {
        matches!(self, Self::Html | Self::HlsManifest)
    }
}

/// Order matters here. Plenty of CDNs send manifests as `text/plain` or
/// `application/octet-stream`, so the suffix check has to run before the generic fallbacks.
pub fn classify(url: &Url, headers: &HeaderMap) -> ContentClass {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let path = url.path().to_ascii_lowercase();

    if content_type.contains("text/html") {
        ContentClass::Html
    } else if content_type.contains("mpegurl")
        || content_type.contains("m3u8")
        || path.ends_with(".m3u8")
    {
        ContentClass::HlsManifest
    } else if content_type.contains("application/json") {
        ContentClass::Json
    } else if content_type.contains("video")
        || content_type.contains("audio")
        || [".mp4", ".ts", ".m4s"].iter().any(|ext| path.ends_with(ext))
    {
        ContentClass::BinaryMedia
    } else {
        ContentClass::Opaque
    }
}
