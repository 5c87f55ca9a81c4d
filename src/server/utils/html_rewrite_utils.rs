// regex based, which is fine for the handful of embed pages this runs against. it does not
// understand markup: an attribute value containing `>` cuts the tag short, and tags written
// inside comments get rewritten like real ones. a tokenizer would fix both if it ever matters
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;
use url::Url;

use crate::server::{
    error::{AppResult, Error},
    utils::{
        interceptor_utils::{INTERCEPTOR_MARKER, interceptor_script},
        url_utils::{ProxyBase, RewriteContext, RewriteOutcome, RewriteTarget, directory_of},
    },
};

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)(\s[^>]*)?>").expect("tag regex should compile")
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\s)(src|href|poster)(\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+))"#)
        .expect("attribute regex should compile")
});

static BASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<base\s[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("base regex should compile")
});

static HEAD_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").expect("head regex should compile"));

static HTML_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<html(\s[^>]*)?>").expect("html regex should compile"));

static DOCTYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*<!doctype[^>]*>").expect("doctype regex should compile"));

static META_CSP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\s[^>]*http-equiv\s*=\s*["']?content-security-policy["']?[^>]*>"#)
        .expect("meta csp regex should compile")
});

const MEDIA_TAGS: [&str; 2] = ["video", "audio"];

/// Rewrites an embed page so the browser loads every resource through the proxy.
pub struct HtmlRewriter<'a> {
    proxy: &'a ProxyBase,
    referer: Option<&'a str>,
    analytics_hosts: &'a [String],
}

impl<'a> HtmlRewriter<'a> {
    pub fn new(proxy: &'a ProxyBase, referer: Option<&'a str>, analytics_hosts: &'a [String]) -> Self {
        Self {
            proxy,
            referer,
            analytics_hosts,
        }
    }

    /// `page_url` is the final url the page came from, relative references resolve against it
    /// unless the page declares its own `<base>`
    pub fn rewrite(&self, body: &[u8], page_url: &Url) -> AppResult<RewriteOutcome> {
        let text = std::str::from_utf8(body)
            .map_err(|e| Error::RewriteFailure(format!("html is not utf-8: {}", e)))?;

        Ok(self.rewrite_text(text, page_url))
    }

    pub fn rewrite_text(&self, text: &str, page_url: &Url) -> RewriteOutcome {
        let declared_base = Self::declared_base(text, page_url);
        let document_base = declared_base.clone().unwrap_or_else(|| page_url.clone());

        let without_csp = META_CSP_RE.replace_all(text, "");

        let mut targets = Vec::new();
        let rewritten = TAG_RE
            .replace_all(&without_csp, |caps: &Captures| {
                self.rewrite_tag(caps, &document_base, &mut targets)
            })
            .into_owned();

        let mut injected = String::new();
        if declared_base.is_none() {
            injected.push_str(&format!("<base href=\"{}\">", directory_of(page_url)));
        }
        if !rewritten.contains(INTERCEPTOR_MARKER) {
            injected.push_str(&interceptor_script(self.proxy, self.referer));
        }

        debug!(
            "Rewrote {} html references from {}",
            targets.len(),
            page_url
        );

        RewriteOutcome {
            body: Self::inject_into_head(rewritten, &injected),
            targets,
        }
    }

    fn declared_base(text: &str, page_url: &Url) -> Option<Url> {
        let caps = BASE_RE.captures(text)?;
        let href = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))?
            .as_str();
        page_url.join(&decode_entities(href)).ok()
    }

    fn rewrite_tag(
        &self,
        caps: &Captures,
        document_base: &Url,
        targets: &mut Vec<RewriteTarget>,
    ) -> String {
        let whole = &caps[0];
        let tag = caps[1].to_ascii_lowercase();

        let Some(attributes) = caps.get(2) else {
            return whole.to_string();
        };
        if tag == "base" {
            return whole.to_string();
        }

        let rewritten = ATTR_RE.replace_all(attributes.as_str(), |attr: &Captures| {
            let name = attr[2].to_ascii_lowercase();
            let applies = match name.as_str() {
                "src" => true,
                "href" => tag == "link",
                "poster" => MEDIA_TAGS.contains(&tag.as_str()),
                _ => false,
            };

            let value = attr
                .get(4)
                .or_else(|| attr.get(5))
                .or_else(|| attr.get(6))
                .map(|m| m.as_str())
                .unwrap_or("");

            if !applies {
                return attr[0].to_string();
            }

            match self.proxied_value(value, document_base) {
                Some((proxied, target)) => {
                    targets.push(target);
                    let quote = if attr.get(5).is_some() { '\'' } else { '"' };
                    format!("{}{}{}{}{}{}", &attr[1], &attr[2], &attr[3], quote, proxied, quote)
                }
                None => attr[0].to_string(),
            }
        });

        format!("<{}{}>", &caps[1], rewritten)
    }

    fn proxied_value(&self, value: &str, document_base: &Url) -> Option<(String, RewriteTarget)> {
        let value = decode_entities(value);
        if self.proxy.is_proxied(&value) {
            return None;
        }

        let target = RewriteTarget::resolve(&value, document_base, RewriteContext::Attribute)?;
        if self.is_analytics(&target.resolved) {
            return None;
        }

        Some((self.proxy.wrap_target(&target, self.referer), target))
    }

    fn is_analytics(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();

        self.analytics_hosts.iter().any(|blocked| {
            let blocked = blocked.to_ascii_lowercase();
            host == blocked || host.ends_with(&format!(".{}", blocked))
        })
    }

    // right after <head>, so the interceptor runs before any upstream script
    fn inject_into_head(document: String, injected: &str) -> String {
        if injected.is_empty() {
            return document;
        }

        let insert_at = HEAD_OPEN_RE
            .find(&document)
            .or_else(|| HTML_OPEN_RE.find(&document))
            // anything ahead of the doctype drops the page into quirks mode
            .or_else(|| DOCTYPE_RE.find(&document))
            .map(|m| m.end())
            .unwrap_or(0);

        let mut out = String::with_capacity(document.len() + injected.len());
        out.push_str(&document[..insert_at]);
        out.push_str(injected);
        out.push_str(&document[insert_at..]);
        out
    }
}

// attribute values are html, so `&amp;` in a query string is really `&`
fn decode_entities(value: &str) -> String {
    value.replace("&amp;", "&").replace("&#38;", "&")
}
