use std::sync::Arc;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER, USER_AGENT,
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    config::{HostMatcher, ProfileConfig, ProfileDefaults},
    server::{extractors::ProxyRequest, utils::url_utils::origin_of},
};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT: &str = "*/*";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// The outbound headers that get a request past one upstream's hotlink checks.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderProfile {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl HeaderProfile {
    /// generic browser, no referer and no origin
    pub fn browser_default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            referer: None,
            origin: None,
            extra_headers: Vec::new(),
        }
    }

    fn from_defaults(defaults: &ProfileDefaults) -> Self {
        let fallback = Self::browser_default();
        Self {
            user_agent: defaults.user_agent.clone().unwrap_or(fallback.user_agent),
            accept: defaults.accept.clone().unwrap_or(fallback.accept),
            accept_language: defaults
                .accept_language
                .clone()
                .unwrap_or(fallback.accept_language),
            referer: defaults.referer.clone(),
            origin: defaults.origin.clone(),
            extra_headers: defaults.extra_headers.clone(),
        }
    }

    /// sets a header that is not one of the named fields, replacing any earlier value
    pub fn set_extra(&mut self, name: &str, value: &str) {
        self.extra_headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.extra_headers.push((name.to_string(), value.to_string()));
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let named = [
            (USER_AGENT, Some(self.user_agent.as_str())),
            (ACCEPT, Some(self.accept.as_str())),
            (ACCEPT_LANGUAGE, Some(self.accept_language.as_str())),
            (REFERER, self.referer.as_deref()),
            (ORIGIN, self.origin.as_deref()),
        ];
        for (name, value) in named {
            let Some(value) = value else { continue };
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(name, v);
                }
                Err(_) => warn!("Skipping unusable {} header value: {}", name, value),
            }
        }

        for (name, value) in &self.extra_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(n), Ok(v)) => {
                    headers.insert(n, v);
                }
                _ => warn!("Skipping unusable extra header {}: {}", name, value),
            }
        }

        headers
    }
}

/// Picks a header profile per target from the static rule list. Rules are read-only after
/// startup, so one resolver is shared by every request.
pub struct HeaderProfileResolver {
    config: Arc<ProfileConfig>,
}

impl HeaderProfileResolver {
    pub fn new(config: Arc<ProfileConfig>) -> Self {
        Self { config }
    }

    pub fn analytics_hosts(&self) -> &[String] {
        &self.config.analytics_hosts
    }

    /// first matching rule wins, anything unmatched gets the browser default
    pub fn resolve(&self, target: &Url) -> HeaderProfile {
        self.config
            .rules
            .iter()
            .find(|rule| Self::matches(&rule.matcher, target))
            .map(|rule| {
                debug!("Header profile {} matched {}", rule.matcher.host, target);
                HeaderProfile::from_defaults(&rule.profile)
            })
            .unwrap_or_else(HeaderProfile::browser_default)
    }

    /// The profile for one proxied request: the rule's profile, the caller's declared referer
    /// on top of it, and the client's Range / X-Requested-With passed through untouched.
    pub fn resolve_for(&self, request: &ProxyRequest) -> HeaderProfile {
        let mut profile = self.resolve(&request.target_url);

        if let Some(referer) = self.effective_declared_referer(request) {
            if let Ok(parsed) = Url::parse(&referer) {
                profile.origin = Some(origin_of(&parsed));
            }
            profile.referer = Some(referer);
        }

        if let Some(range) = request.client_range.as_deref() {
            profile.set_extra("Range", range);
        }
        if let Some(requested_with) = request.requested_with.as_deref() {
            profile.set_extra("X-Requested-With", requested_with);
        }

        profile
    }

    /// the declared referer after the embed upgrade, this is also what gets carried forward in
    /// rewritten urls
    pub fn effective_declared_referer(&self, request: &ProxyRequest) -> Option<String> {
        request
            .declared_referer
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map(|r| self.upgrade_referer(r.trim(), &request.target_url))
    }

    /// A bare origin like `https://megacloud.blog` only satisfies the upstream when it points
    /// at the embed page. If the target path carries the embed id we can rebuild that page url,
    /// otherwise the origin goes out as given.
    pub fn upgrade_referer(&self, declared: &str, target: &Url) -> String {
        let Ok(parsed) = Url::parse(declared) else {
            return declared.to_string();
        };

        let bare_origin = matches!(parsed.path(), "" | "/")
            && parsed.query().is_none()
            && parsed.fragment().is_none();
        if !bare_origin {
            return declared.to_string();
        }

        match self.embed_token(target) {
            Some(token) => {
                let path = self.config.embed.path_template.replace("{id}", token);
                let upgraded = format!("{}{}", origin_of(&parsed), path);
                debug!("Upgraded bare referer {} to {}", declared, upgraded);
                upgraded
            }
            None => declared.to_string(),
        }
    }

    fn embed_token<'u>(&self, target: &'u Url) -> Option<&'u str> {
        let min_len = self.config.embed.min_token_len.max(1);
        target.path_segments()?.find(|segment| {
            segment.len() >= min_len && segment.chars().all(|c| c.is_ascii_hexdigit())
        })
    }

    fn matches(matcher: &HostMatcher, target: &Url) -> bool {
        let Some(host) = target.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let wanted = matcher.host.to_ascii_lowercase();

        let host_ok = host == wanted || host.ends_with(&format!(".{}", wanted));
        let path_ok = matcher
            .path_prefix
            .as_deref()
            .is_none_or(|prefix| target.path().starts_with(prefix));

        host_ok && path_ok
    }
}
