// the one url primitive both rewriters share: resolve a reference against a document and point it
// back at our own /resource endpoint
use url::Url;

/// Where in a document a reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteContext {
    Attribute,
    ManifestLine,
    ManifestTagUri,
}

/// A reference found during one rewrite pass, already resolved to an absolute url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTarget {
    pub original_value: String,
    pub resolved: Url,
    pub context: RewriteContext,
}

impl RewriteTarget {
    /// `None` when the value can't be turned into an http(s) url, the caller keeps it as is
    pub fn resolve(original_value: &str, base: &Url, context: RewriteContext) -> Option<Self> {
        let resolved = resolve_reference(base, original_value)?;
        Some(Self {
            original_value: original_value.to_string(),
            resolved,
            context,
        })
    }
}

/// Rewritten text plus every reference that was swapped out, in document order.
#[derive(Debug)]
pub struct RewriteOutcome {
    pub body: String,
    pub targets: Vec<RewriteTarget>,
}

/// The proxy's own resource endpoint, e.g. `https://proxy.example/resource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBase {
    endpoint: String,
}

impl ProxyBase {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint.trim_end_matches('?').to_string();
        Self { endpoint }
    }

    /// joins a public origin like `https://proxy.example/` with a path like `/resource`
    pub fn from_parts(public_url: &str, path: &str) -> Self {
        let origin = public_url.trim_end_matches('/');
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self::new(format!("{}{}", origin, path))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn prefix(&self) -> String {
        format!("{}?url=", self.endpoint)
    }

    pub fn is_proxied(&self, value: &str) -> bool {
        value.trim_start().starts_with(&self.prefix())
    }

    pub fn wrap(&self, absolute: &Url, referer: Option<&str>) -> String {
        let mut proxied = format!(
            "{}{}",
            self.prefix(),
            urlencoding::encode(absolute.as_str())
        );

        if let Some(referer) = referer.filter(|r| !r.is_empty()) {
            proxied.push_str("&referer=");
            proxied.push_str(&urlencoding::encode(referer));
        }

        proxied
    }

    pub fn wrap_target(&self, target: &RewriteTarget, referer: Option<&str>) -> String {
        self.wrap(&target.resolved, referer)
    }
}

/// values that a browser never fetches from the network or that point inside the document
pub fn is_local_reference(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || value.starts_with('#') {
        return true;
    }

    let lower = value.to_ascii_lowercase();
    ["data:", "blob:", "javascript:", "about:", "mailto:", "tel:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Resolve `raw` the way a browser would against `base`. Absolute urls come back unchanged,
/// `/path` lands on the base origin and `path` on the base directory.
pub fn resolve_reference(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if is_local_reference(raw) {
        return None;
    }

    let resolved = base.join(raw).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// `https://cdn.example/path/master.m3u8?x=1` -> `https://cdn.example/path/`
pub fn directory_of(url: &Url) -> Url {
    url.join("./").unwrap_or_else(|_| url.clone())
}

/// `https://cdn.example:8443/a/b` -> `https://cdn.example:8443`
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
