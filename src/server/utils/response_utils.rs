// response emitter: status, an allow-list of upstream headers, cors, then the body
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::TryStreamExt;
use tracing::{debug, error};
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    services::upstream_services::ByteStream,
    utils::{content_class_utils::ContentClass, encoding_utils::ContentEncoding},
};

/// Never a blanket copy: upstream csp / x-frame-options would stop the page working inside
/// whatever embeds the proxy.
pub const FORWARDED_HEADERS: [HeaderName; 8] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
    header::SET_COOKIE,
];

const EXPOSED_HEADERS: &str = "content-length, content-range, accept-ranges, content-type";
const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, HEAD, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
}

// append keeps every set-cookie instead of the last one
fn copy_headers(from: &HeaderMap, to: &mut HeaderMap, names: &[HeaderName]) {
    for name in names {
        for value in from.get_all(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

/// Relay an upstream response as is. Status (206 and its exact content-range included) and
/// body are untouched, the body goes out chunk by chunk in upstream order.
pub fn emit_passthrough(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    final_url: &Url,
    stream: ByteStream,
) -> Response {
    let mut headers = HeaderMap::new();
    copy_headers(upstream_headers, &mut headers, &FORWARDED_HEADERS);
    // not decoded, so the client needs to know what the bytes are wrapped in
    copy_headers(
        upstream_headers,
        &mut headers,
        std::slice::from_ref(&header::CONTENT_ENCODING),
    );
    apply_cors(&mut headers);

    let final_url = final_url.clone();
    // headers are already gone by the time this fires, all that's left is to drop the
    // connection, which hyper does when the body stream errors
    let body = Body::from_stream(stream.inspect_err(move |e| {
        error!("Upstream stream from {} failed mid-response: {}", final_url, e);
    }));

    debug!("Relaying upstream {} unmodified", status);
    (status, headers, body).into_response()
}

/// Send a body that was produced by a rewrite (or the original text when the rewrite gave up).
/// Length and etag are recomputed from the bytes that actually go out, and the body is
/// compressed if the client asks for it.
pub fn emit_buffered(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    class: ContentClass,
    body: Bytes,
    accept_encoding: Option<&str>,
) -> AppResult<Response> {
    let mut headers = HeaderMap::new();
    copy_headers(
        upstream_headers,
        &mut headers,
        &[
            header::CONTENT_TYPE,
            header::ACCEPT_RANGES,
            header::CACHE_CONTROL,
            header::LAST_MODIFIED,
            header::SET_COOKIE,
        ],
    );
    apply_cors(&mut headers);

    if class == ContentClass::HlsManifest {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(MANIFEST_CONTENT_TYPE),
        );
        if !headers.contains_key(header::CACHE_CONTROL) {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
    }

    let encoding = ContentEncoding::from_accept_encoding(accept_encoding);
    let response_body: Vec<u8> = match encoding.as_header_value() {
        Some(enc_header) => {
            let compressed = encoding.compress(&body).map_err(|e| {
                error!("Failed to compress response with {:?}: {}", encoding, e);
                Error::InternalServerErrorWithContext("Failed to compress response".to_string())
            })?;
            debug!(
                "Compressed {:?} with {:?} from {} to {} bytes",
                class,
                encoding,
                body.len(),
                compressed.len()
            );
            headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(enc_header));
            headers.insert(header::VARY, HeaderValue::from_static("accept-encoding"));
            compressed
        }
        None => body.to_vec(),
    };

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(response_body.len()),
    );

    Ok((status, headers, response_body).into_response())
}

/// answer to a cors preflight
pub fn emit_preflight() -> Response {
    let mut headers = HeaderMap::new();
    apply_cors(&mut headers);
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    (StatusCode::NO_CONTENT, headers).into_response()
}
