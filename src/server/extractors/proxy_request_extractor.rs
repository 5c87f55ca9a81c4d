use axum::Extension;
use axum::extract::{FromRequestParts, Query};
use axum::http::{Method, header, request::Parts};
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use crate::config::AppConfig;
use crate::server::error::{AppResult, Error, ErrorFormat, ErrorResponse};
use crate::server::services::ProxyServices;
use crate::server::utils::url_utils::ProxyBase;

#[derive(Deserialize)]
struct ResourceQuery {
    url: Option<String>,
    referer: Option<String>,
}

/// Everything the core needs to know about one inbound `/resource` call.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target_url: Url,
    pub declared_referer: Option<String>,
    pub client_range: Option<String>,
    pub client_method: Method,
    pub requested_with: Option<String>,
    pub accept: Option<String>,
    pub accept_encoding: Option<String>,
    /// absolute, so it still works once the page carries an upstream `<base>`
    pub proxy_base: ProxyBase,
}

pub struct ProxiedResource(pub ProxyRequest, pub ProxyServices);

fn header_str(parts: &Parts, name: impl header::AsHeaderName) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
}

/// Parses the `url` query value. The query parser already percent-decoded it, so it must not be
/// decoded a second time or an upstream `%26` turns into a real `&`. Values that aren't a plain
/// url are tried as unpadded url-safe base64.
pub fn decode_target(url_param: &str) -> AppResult<Url> {
    let url_param = url_param.trim();
    let lower = url_param.to_ascii_lowercase();

    let raw = if lower.starts_with("http://") || lower.starts_with("https://") {
        url_param.to_string()
    } else {
        let mut padded = url_param.to_string();
        while padded.len() % 4 != 0 {
            padded.push('=');
        }

        let bytes = URL_SAFE.decode(&padded).map_err(|e| {
            error!("Failed to decode base64 url: {}", e);
            Error::InvalidRequest("url must be an absolute http(s) url".to_string())
        })?;

        String::from_utf8(bytes).map_err(|e| {
            error!("Failed to parse UTF-8: {}", e);
            Error::InvalidRequest("Invalid URL encoding".to_string())
        })?
    };

    let url = Url::parse(&raw)
        .map_err(|e| Error::InvalidRequest(format!("Invalid URL format: {}", e)))?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
        _ => Err(Error::InvalidRequest(
            "url must be an absolute http(s) url".to_string(),
        )),
    }
}

// a configured public url wins, otherwise whatever host the client used to reach us
fn proxy_base(parts: &Parts, config: &AppConfig) -> ProxyBase {
    if let Some(public_url) = config.public_url.as_deref() {
        return ProxyBase::from_parts(public_url, &config.proxy_path);
    }

    let host = header_str(parts, "x-forwarded-host")
        .or_else(|| header_str(parts, header::HOST))
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_else(|| format!("localhost:{}", config.port));

    let scheme = header_str(parts, "x-forwarded-proto")
        .and_then(|p| p.split(',').next().map(|s| s.trim().to_string()))
        .filter(|p| p == "http" || p == "https")
        .unwrap_or_else(|| "http".to_string());

    ProxyBase::from_parts(&format!("{}://{}", scheme, host), &config.proxy_path)
}

/// route layer for the proxy: validates the query and hands the core a `ProxyRequest`,
/// no upstream call happens when this rejects
impl<S> FromRequestParts<S> for ProxiedResource
where
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let accept = header_str(parts, header::ACCEPT);
        let format = ErrorFormat::from_accept(accept.as_deref());
        let reject = |error: Error| ErrorResponse::new(error, format);

        let Extension(services): Extension<ProxyServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| reject(Error::InternalServerErrorWithContext(err.to_string())))?;

        let Query(query): Query<ResourceQuery> = Query::from_request_parts(parts, state)
            .await
            .map_err(|err| reject(Error::InvalidRequest(err.body_text())))?;

        let url_param = query
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| reject(Error::InvalidRequest("Missing url parameter".to_string())))?;

        let target_url = decode_target(&url_param).map_err(reject)?;

        let request = ProxyRequest {
            target_url,
            declared_referer: query.referer.filter(|r| !r.trim().is_empty()),
            client_range: header_str(parts, header::RANGE),
            client_method: parts.method.clone(),
            requested_with: header_str(parts, "x-requested-with"),
            accept,
            accept_encoding: header_str(parts, header::ACCEPT_ENCODING),
            proxy_base: proxy_base(parts, &services.config),
        };

        debug!(
            "Proxy request {} {} (referer: {:?}, range: {:?})",
            request.client_method,
            request.target_url,
            request.declared_referer,
            request.client_range
        );

        Ok(ProxiedResource(request, services))
    }
}
