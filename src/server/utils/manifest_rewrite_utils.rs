use tracing::{debug, warn};
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    utils::url_utils::{ProxyBase, RewriteContext, RewriteOutcome, RewriteTarget},
};

const URI_ATTRIBUTE: &str = "URI=\"";

/// Rewrites an HLS playlist so every segment, sub-playlist and key goes back through the proxy.
///
/// A playlist is positional: lines keep their order and their `\n` / `\r\n` endings, and
/// everything that isn't a uri is left byte for byte.
pub struct ManifestRewriter<'a> {
    proxy: &'a ProxyBase,
    referer: Option<&'a str>,
}

impl<'a> ManifestRewriter<'a> {
    pub fn new(proxy: &'a ProxyBase, referer: Option<&'a str>) -> Self {
        Self { proxy, referer }
    }

    /// `manifest_url` is where the playlist was actually served from (after redirects)
    pub fn rewrite(&self, body: &[u8], manifest_url: &Url) -> AppResult<RewriteOutcome> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::RewriteFailure(format!("manifest is not utf-8: {}", e)))?;

        Ok(self.rewrite_text(text, manifest_url))
    }

    pub fn rewrite_text(&self, text: &str, manifest_url: &Url) -> RewriteOutcome {
        let mut body = String::with_capacity(text.len() * 2);
        let mut targets = Vec::new();

        for (index, raw_line) in text.split('\n').enumerate() {
            if index > 0 {
                body.push('\n');
            }

            let (line, ending) = match raw_line.strip_suffix('\r') {
                Some(line) => (line, "\r"),
                None => (raw_line, ""),
            };
            let trimmed = line.trim();

            if trimmed.is_empty() || self.proxy.is_proxied(trimmed) {
                body.push_str(line);
            } else if trimmed.starts_with('#') {
                body.push_str(&self.rewrite_tag_line(line, manifest_url, &mut targets));
            } else {
                match RewriteTarget::resolve(trimmed, manifest_url, RewriteContext::ManifestLine) {
                    Some(target) => {
                        body.push_str(&self.proxy.wrap_target(&target, self.referer));
                        targets.push(target);
                    }
                    None => {
                        warn!("Failed to resolve manifest line: {}", trimmed);
                        body.push_str(line);
                    }
                }
            }

            body.push_str(ending);
        }

        debug!(
            "Rewrote {} manifest references from {}",
            targets.len(),
            manifest_url
        );

        RewriteOutcome { body, targets }
    }

    // only the quoted value changes, attribute order and everything around it stays
    fn rewrite_tag_line(
        &self,
        line: &str,
        manifest_url: &Url,
        targets: &mut Vec<RewriteTarget>,
    ) -> String {
        let mut result = String::with_capacity(line.len());
        let mut remaining = line;

        while let Some(start) = remaining.find(URI_ATTRIBUTE) {
            // URI has to be its own attribute, not the tail of some other name
            let preceded_ok = remaining[..start]
                .chars()
                .last()
                .is_some_and(|c| c == ':' || c == ',');

            let value_start = start + URI_ATTRIBUTE.len();
            result.push_str(&remaining[..value_start]);
            remaining = &remaining[value_start..];

            let Some(end) = remaining.find('"') else {
                break;
            };
            let value = &remaining[..end];

            let replacement = if preceded_ok && !self.proxy.is_proxied(value) {
                RewriteTarget::resolve(value, manifest_url, RewriteContext::ManifestTagUri).map(
                    |target| {
                        let proxied = self.proxy.wrap_target(&target, self.referer);
                        targets.push(target);
                        proxied
                    },
                )
            } else {
                None
            };

            result.push_str(replacement.as_deref().unwrap_or(value));
            result.push('"');
            remaining = &remaining[end + 1..];
        }

        result.push_str(remaining);
        result
    }
}
