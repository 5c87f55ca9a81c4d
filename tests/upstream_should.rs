// end to end: the real fetcher against a local axum upstream
mod common;

use std::io::Write;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use embed_proxy::{
    HostMatcher, ProfileConfig, ProfileDefaults, ProfileRule,
    server::services::{UpstreamService, UpstreamServiceTrait},
};
use flate2::{Compression, write::GzEncoder};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

use common::{
    PROXY_BASE, body_bytes, body_string, get as get_request, live_router, resource_uri,
    spawn_upstream,
};

const MEDIA_LEN: usize = 1000;
const MASTER: &str = "#EXTM3U\n#EXTINF:10,\nseg0.ts\n";
const NOT_GZIP: &[u8] = b"<html>plainly not gzip</html>";

fn media_bytes() -> Vec<u8> {
    (0..MEDIA_LEN).map(|i| (i % 251) as u8).collect()
}

async fn media(headers: HeaderMap) -> Response {
    let data = media_bytes();
    let Some(range) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) else {
        return ([(header::CONTENT_TYPE, "video/mp4")], data).into_response();
    };

    let (start, end) = range.trim_start_matches("bytes=").split_once('-').unwrap();
    let start: usize = start.parse().unwrap();
    let end: usize = end.parse().unwrap();

    (
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, end, MEDIA_LEN),
            ),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        data[start..=end].to_vec(),
    )
        .into_response()
}

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let value_of = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };

    Json(json!({
        "referer": value_of(header::REFERER),
        "origin": value_of(header::ORIGIN),
        "user_agent": value_of(header::USER_AGENT),
    }))
}

async fn master() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        MASTER,
    )
}

async fn gzipped_page() -> impl IntoResponse {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(b"<html><head></head><body><img src=\"/img/a.png\"></body></html>")
        .unwrap();
    let body = encoder.finish().unwrap();

    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CONTENT_ENCODING, "gzip"),
        ],
        body,
    )
}

async fn not_really_gzip() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/html"),
            (header::CONTENT_ENCODING, "gzip"),
        ],
        NOT_GZIP,
    )
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(3)).await;
    "late"
}

fn upstream_router() -> Router {
    Router::new()
        .route("/media.mp4", get(media))
        .route("/echo", get(echo_headers))
        .route("/hls/master.m3u8", get(master))
        .route(
            "/moved",
            get(|| async { Redirect::temporary("/hls/master.m3u8") }),
        )
        .route("/loop", get(|| async { Redirect::temporary("/loop") }))
        .route("/page", get(gzipped_page))
        .route("/broken", get(not_really_gzip))
        .route("/slow", get(slow))
}

// the local double stands in for the embed host
fn local_profiles() -> ProfileConfig {
    ProfileConfig {
        rules: vec![ProfileRule {
            matcher: HostMatcher {
                host: "127.0.0.1".to_string(),
                path_prefix: None,
            },
            profile: ProfileDefaults {
                referer: Some("https://megacloud.blog/".to_string()),
                origin: Some("https://megacloud.blog".to_string()),
                ..Default::default()
            },
        }],
        ..ProfileConfig::default()
    }
}

#[tokio::test]
async fn test_relay_exact_byte_range() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    let request = Request::builder()
        .uri(resource_uri(&format!("{}/media.mp4", upstream), None))
        .header(header::RANGE, "bytes=100-199")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 100-199/1000"
    );
    let body = body_bytes(response).await;
    assert_eq!(body.len(), 100);
    assert_eq!(body, media_bytes()[100..200].to_vec());
}

#[tokio::test]
async fn test_stream_whole_media_without_range() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("{}/media.mp4", upstream),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, media_bytes());
}

#[tokio::test]
async fn test_send_profile_headers_upstream() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("{}/echo", upstream),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(seen["referer"], "https://megacloud.blog/");
    assert_eq!(seen["origin"], "https://megacloud.blog");
    assert!(
        seen["user_agent"]
            .as_str()
            .unwrap()
            .starts_with("Mozilla/5.0")
    );
}

#[tokio::test]
async fn test_resolve_manifest_against_redirect_target() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("{}/moved", upstream),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let manifest = body_string(response).await;
    assert_eq!(
        manifest,
        format!(
            "#EXTM3U\n#EXTINF:10,\n{}?url={}&referer={}\n",
            PROXY_BASE,
            urlencoding::encode(&format!("{}/hls/seg0.ts", upstream)),
            urlencoding::encode("https://megacloud.blog/")
        )
    );
}

#[tokio::test]
async fn test_give_up_on_redirect_loop() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("{}/loop", upstream),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_decode_compressed_page_before_rewriting() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("{}/page", upstream),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    let page = body_string(response).await;
    assert!(page.contains(&format!(
        "{}?url={}",
        PROXY_BASE,
        urlencoding::encode(&format!("{}/img/a.png", upstream))
    )));
}

#[tokio::test]
async fn test_time_out_slow_upstream() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 1);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("{}/slow", upstream),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_map_refused_connection_to_bad_gateway() {
    // bind then drop, so nothing listens on the port
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let app = live_router(local_profiles(), 5);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("http://{}/gone", addr),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_stream_ranged_manifest_unmodified() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    // the double ignores Range and answers 200 with the whole playlist
    let request = Request::builder()
        .uri(resource_uri(&format!("{}/hls/master.m3u8", upstream), None))
        .header(header::RANGE, "bytes=0-3")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, MASTER);
}

#[tokio::test]
async fn test_never_buffer_ranged_requests() {
    let upstream = spawn_upstream(upstream_router()).await;
    let service = UpstreamService::new(Duration::from_secs(5)).unwrap();

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::RANGE,
        reqwest::header::HeaderValue::from_static("bytes=0-3"),
    );
    let target = Url::parse(&format!("{}/hls/master.m3u8", upstream)).unwrap();

    let response = service
        .fetch(&target, headers, reqwest::Method::GET)
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.is_buffered());
}

#[tokio::test]
async fn test_relay_undecodable_body_as_is() {
    let upstream = spawn_upstream(upstream_router()).await;
    let app = live_router(local_profiles(), 5);

    let response = app
        .oneshot(get_request(&resource_uri(
            &format!("{}/broken", upstream),
            None,
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
    assert_eq!(body_bytes(response).await, NOT_GZIP);
}
