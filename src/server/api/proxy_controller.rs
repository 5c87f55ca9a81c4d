// one parameterized path for every kind of upstream resource: html embed pages, playlists,
// segments and whatever else those pages pull in
use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;

use crate::server::{
    error::{AppResult, Error, ErrorFormat, ErrorResponse},
    extractors::{ProxiedResource, ProxyRequest},
    services::{ProxyServices, UpstreamBody, UpstreamResponse},
    utils::{
        content_class_utils::{ContentClass, classify},
        html_rewrite_utils::HtmlRewriter,
        manifest_rewrite_utils::ManifestRewriter,
        response_utils::{emit_buffered, emit_passthrough, emit_preflight},
        url_utils::RewriteOutcome,
    },
};

pub struct ProxyController;

impl ProxyController {
    pub fn app(path: &str) -> Router {
        let path = format!("/{}", path.trim_matches('/'));
        Router::new().route(&path, get(Self::proxy_get).options(Self::proxy_options))
    }

    async fn proxy_get(
        ProxiedResource(request, services): ProxiedResource,
    ) -> Result<Response, ErrorResponse> {
        let format = ErrorFormat::from_accept(request.accept.as_deref());

        Self::proxy(&request, &services)
            .await
            .map_err(|e| ErrorResponse::new(e, format))
    }

    async fn proxy_options() -> impl IntoResponse {
        emit_preflight()
    }

    /// Fetch, classify, rewrite if needed, emit. Upstream 4xx/5xx come back as responses, only
    /// a failure to talk to upstream at all is an `Err`.
    pub async fn proxy(request: &ProxyRequest, services: &ProxyServices) -> AppResult<Response> {
        let profile = services.profiles.resolve_for(request);
        // declared referer (already upgraded) or the rule's own, carried on every rewritten url
        // so hosts without a rule of their own still get the embed's referer
        let referer = profile.referer.clone();

        let upstream = services
            .upstream
            .fetch(
                &request.target_url,
                profile.to_header_map(),
                request.client_method.clone(),
            )
            .await?;

        let class = classify(&upstream.final_url, &upstream.headers);
        debug!(
            "Upstream {} for {} classified as {:?} (buffered: {})",
            upstream.status,
            upstream.final_url,
            class,
            upstream.is_buffered()
        );

        if upstream.status.is_client_error() || upstream.status.is_server_error() {
            // relayed as is, the body usually says more than a generic 502 would
            warn!(
                "Response from target not successful: {} {}",
                upstream.status, upstream.final_url
            );
        }

        let UpstreamResponse {
            status,
            headers,
            final_url,
            body,
        } = upstream;

        // only rewriteable text is ever buffered, everything else is relayed as it streams in
        let original = match body {
            UpstreamBody::Buffered(bytes) => bytes,
            UpstreamBody::Streamed(stream) => {
                return Ok(emit_passthrough(status, &headers, &final_url, stream));
            }
        };

        // the whole rewrite finishes before the first byte goes out
        let rewritten = Self::rewrite(
            class,
            &original,
            &final_url,
            request,
            services,
            referer.as_deref(),
        );
        let body = match rewritten {
            Ok(outcome) => {
                debug!(
                    "Rewrote {} references in {:?} from {}",
                    outcome.targets.len(),
                    class,
                    final_url
                );
                Bytes::from(outcome.body)
            }
            Err(e) => {
                // un-proxied links still beat no page at all
                warn!("Serving {} without rewriting: {}", final_url, e);
                original
            }
        };

        emit_buffered(
            status,
            &headers,
            class,
            body,
            request.accept_encoding.as_deref(),
        )
    }

    fn rewrite(
        class: ContentClass,
        body: &[u8],
        final_url: &Url,
        request: &ProxyRequest,
        services: &ProxyServices,
        referer: Option<&str>,
    ) -> AppResult<RewriteOutcome> {
        match class {
            ContentClass::Html => HtmlRewriter::new(
                &request.proxy_base,
                referer,
                services.profiles.analytics_hosts(),
            )
            .rewrite(body, final_url),
            ContentClass::HlsManifest => {
                ManifestRewriter::new(&request.proxy_base, referer).rewrite(body, final_url)
            }
            other => Err(Error::RewriteFailure(format!(
                "{:?} has nothing to rewrite",
                other
            ))),
        }
    }
}
