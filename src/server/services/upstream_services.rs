use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use mockall::automock;
use reqwest::{
    Method, StatusCode,
    header::{CONTENT_ENCODING, CONTENT_LENGTH, HeaderMap, RANGE},
    redirect::Policy,
};
use tracing::{debug, error, warn};
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    utils::{content_class_utils::classify, encoding_utils::ContentEncoding},
};

pub const MAX_REDIRECTS: usize = 5;

pub type DynUpstreamService = Arc<dyn UpstreamServiceTrait + Send + Sync>;

pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Text that is about to be rewritten sits fully in memory, everything else is relayed chunk
/// by chunk as it arrives.
pub enum UpstreamBody {
    Buffered(Bytes),
    Streamed(ByteStream),
}

/// One upstream answer, owned by the request that asked for it.
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// lowercase names, values untouched, repeated headers such as set-cookie kept
    pub headers: HeaderMap,
    /// where the body actually came from after redirects, relative references resolve here
    pub final_url: Url,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn is_buffered(&self) -> bool {
        matches!(self.body, UpstreamBody::Buffered(_))
    }
}

#[automock]
#[async_trait]
pub trait UpstreamServiceTrait {
    /// Any http status from upstream is a response, only network trouble is an error.
    async fn fetch(&self, target: &Url, headers: HeaderMap, method: Method)
    -> AppResult<UpstreamResponse>;
}

pub struct UpstreamService {
    http: reqwest::Client,
    timeout: Duration,
}

impl UpstreamService {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        // referer(false) or reqwest replaces the spoofed referer with the previous hop on redirect
        let http = reqwest::Client::builder()
            .redirect(Policy::limited(MAX_REDIRECTS))
            .referer(false)
            .read_timeout(timeout)
            .build()?;

        Ok(Self { http, timeout })
    }

    fn map_send_error(e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::UpstreamTimeout
        } else if e.is_redirect() {
            Error::RedirectLimitExceeded
        } else {
            Error::UpstreamUnreachable(e.to_string())
        }
    }

    async fn read_body(&self, response: reqwest::Response) -> AppResult<Bytes> {
        tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| {
                error!("Timed out reading upstream body");
                Error::UpstreamTimeout
            })?
            .map_err(|e| {
                error!("Failed to read upstream body: {}", e);
                Self::map_send_error(e)
            })
    }
}

#[async_trait]
impl UpstreamServiceTrait for UpstreamService {
    async fn fetch(
        &self,
        target: &Url,
        headers: HeaderMap,
        method: Method,
    ) -> AppResult<UpstreamResponse> {
        debug!("Sending {} to {}", method, target);
        let ranged = headers.contains_key(RANGE);

        let request = self
            .http
            .request(method.clone(), target.clone())
            .headers(headers);

        // dropping the send future on timeout also tears down the upstream connection
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| {
                error!("Upstream timed out after {:?}: {}", self.timeout, target);
                Error::UpstreamTimeout
            })?
            .map_err(|e| {
                error!("Upstream request failed: {}", e);
                Self::map_send_error(e)
            })?;

        let status = response.status();
        let final_url = response.url().clone();
        let mut headers = response.headers().clone();

        debug!("Upstream answered {} from {}", status, final_url);

        let class = classify(&final_url, &headers);
        let encoding = ContentEncoding::from_content_encoding(
            headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok()),
        );

        // a ranged, partial or header-only answer can't be rewritten, and neither can an
        // encoding we don't know how to undo. upstream error pages are relayed verbatim, so they
        // stream too
        let buffer = class.needs_rewrite()
            && status.is_success()
            && status != StatusCode::PARTIAL_CONTENT
            && !ranged
            && method != Method::HEAD;

        let body = match (buffer, encoding) {
            (true, Some(ContentEncoding::None)) => {
                let bytes = self.read_body(response).await?;
                debug!("Buffered {} bytes of {:?}", bytes.len(), class);
                UpstreamBody::Buffered(bytes)
            }
            (true, Some(encoding)) => {
                let raw = self.read_body(response).await?;
                debug!("Decompressing {:?}-encoded upstream body", encoding);

                match encoding.decompress(&raw) {
                    Ok(decoded) => {
                        headers.remove(CONTENT_ENCODING);
                        headers.remove(CONTENT_LENGTH);
                        debug!("Buffered {} bytes of {:?}", decoded.len(), class);
                        UpstreamBody::Buffered(Bytes::from(decoded))
                    }
                    Err(e) => {
                        // raw bytes go out with their content-encoding intact
                        warn!("Relaying {} undecoded: {}", final_url, e);
                        let raw = stream::once(async move { Ok::<_, std::io::Error>(raw) });
                        UpstreamBody::Streamed(raw.boxed())
                    }
                }
            }
            _ => UpstreamBody::Streamed(
                response
                    .bytes_stream()
                    .map_err(std::io::Error::other)
                    .boxed(),
            ),
        };

        Ok(UpstreamResponse {
            status,
            headers,
            final_url,
            body,
        })
    }
}
