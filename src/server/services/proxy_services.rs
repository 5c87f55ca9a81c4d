use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{AppConfig, ProfileConfig};

use super::{
    header_profile_services::HeaderProfileResolver,
    upstream_services::{DynUpstreamService, UpstreamService},
};

/// Everything a proxied request needs, all of it read-only and shared between requests.
#[derive(Clone)]
pub struct ProxyServices {
    pub profiles: Arc<HeaderProfileResolver>,
    pub upstream: DynUpstreamService,
    pub config: Arc<AppConfig>,
}

impl ProxyServices {
    pub fn new(config: Arc<AppConfig>, profiles: ProfileConfig) -> anyhow::Result<Self> {
        info!(
            "starting proxy services ({} header profiles, {} analytics hosts)...",
            profiles.rules.len(),
            profiles.analytics_hosts.len()
        );

        let upstream = Arc::new(UpstreamService::new(Duration::from_secs(
            config.upstream_timeout_secs,
        ))?) as DynUpstreamService;

        Ok(Self::with_upstream(config, profiles, upstream))
    }

    /// same as `new` but with a caller-provided fetcher, tests hand in a mock here
    pub fn with_upstream(
        config: Arc<AppConfig>,
        profiles: ProfileConfig,
        upstream: DynUpstreamService,
    ) -> Self {
        Self {
            profiles: Arc::new(HeaderProfileResolver::new(Arc::new(profiles))),
            upstream,
            config,
        }
    }
}
