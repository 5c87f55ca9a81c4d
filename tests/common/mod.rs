#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use embed_proxy::{
    AppConfig, ProfileConfig,
    server::{
        ApplicationServer,
        services::{DynUpstreamService, ProxyServices},
    },
};
use tokio::net::TcpListener;

pub const PUBLIC_URL: &str = "http://proxy.test";
pub const PROXY_BASE: &str = "http://proxy.test/resource";

pub fn test_config() -> Arc<AppConfig> {
    config_with_timeout(5)
}

pub fn config_with_timeout(upstream_timeout_secs: u64) -> Arc<AppConfig> {
    Arc::new(AppConfig {
        public_url: Some(PUBLIC_URL.to_string()),
        upstream_timeout_secs,
        ..AppConfig::default()
    })
}

pub fn router_with(upstream: DynUpstreamService, profiles: ProfileConfig) -> Router {
    ApplicationServer::router(ProxyServices::with_upstream(
        test_config(),
        profiles,
        upstream,
    ))
}

/// router backed by the real reqwest fetcher
pub fn live_router(profiles: ProfileConfig, upstream_timeout_secs: u64) -> Router {
    ApplicationServer::router(
        ProxyServices::new(config_with_timeout(upstream_timeout_secs), profiles)
            .expect("services should build"),
    )
}

/// `/resource?url=<enc(target)>[&referer=<enc(referer)>]`
pub fn resource_uri(target: &str, referer: Option<&str>) -> String {
    let mut uri = format!("/resource?url={}", urlencoding::encode(target));
    if let Some(referer) = referer {
        uri.push_str("&referer=");
        uri.push_str(&urlencoding::encode(referer));
    }
    uri
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_string(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// serves `router` on an ephemeral local port, returns its origin like `http://127.0.0.1:1234`
pub async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}
