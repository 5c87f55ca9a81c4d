use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // absolute url that browsers use to reach this proxy, e.g. https://proxy.example.com
    // when it's missing the Host header of every request is used instead
    #[clap(long, env)]
    pub public_url: Option<String>,

    // path of the resource endpoint, every rewritten url points back here
    #[clap(long, env, default_value = "/resource")]
    pub proxy_path: String,

    // budget for one upstream round trip, streamed bodies use it as an idle timeout
    #[clap(long, env, default_value = "30")]
    pub upstream_timeout_secs: u64,

    // optional toml file that replaces the built-in header profiles
    #[clap(long, env)]
    pub profiles_file: Option<PathBuf>,

    // where production logs go
    #[clap(long, env, default_value = "logs")]
    pub log_dir: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 5000,
            public_url: None,
            proxy_path: "/resource".to_string(),
            upstream_timeout_secs: 30,
            profiles_file: None,
            log_dir: "logs".to_string(),
            sentry_dsn: None,
        }
    }
}

/// Which requests a profile applies to. Hosts match exactly or as a parent domain, so
/// `megacloud.blog` also covers `cdn.megacloud.blog`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HostMatcher {
    pub host: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
}

/// Outbound header defaults for one upstream. Anything left empty falls back to the default
/// browser profile.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProfileDefaults {
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub accept: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub extra_headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProfileRule {
    #[serde(rename = "match")]
    pub matcher: HostMatcher,
    #[serde(default)]
    pub profile: ProfileDefaults,
}

/// Tunable guess at how embed pages are addressed. A bare-origin referer gets upgraded to
/// `origin + template` when a long enough hex token shows up in the target path.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EmbedHeuristic {
    #[serde(default = "EmbedHeuristic::default_min_token_len")]
    pub min_token_len: usize,
    #[serde(default = "EmbedHeuristic::default_path_template")]
    pub path_template: String,
}

impl EmbedHeuristic {
    fn default_min_token_len() -> usize {
        16
    }

    fn default_path_template() -> String {
        "/embed-2/v3/e-1/{id}".to_string()
    }
}

impl Default for EmbedHeuristic {
    fn default() -> Self {
        Self {
            min_token_len: Self::default_min_token_len(),
            path_template: Self::default_path_template(),
        }
    }
}

/// Static header configuration, read once at startup and shared read-only between requests.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProfileConfig {
    #[serde(default)]
    pub rules: Vec<ProfileRule>,
    #[serde(default)]
    pub analytics_hosts: Vec<String>,
    #[serde(default)]
    pub embed: EmbedHeuristic,
}

const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl Default for ProfileConfig {
    // these are the upstreams the proxy was written against, a profiles file replaces all of it
    fn default() -> Self {
        let megacloud = |accept: &str| ProfileDefaults {
            user_agent: Some(CHROME_USER_AGENT.to_string()),
            accept: Some(accept.to_string()),
            accept_language: Some("en-US,en;q=0.9".to_string()),
            referer: Some("https://megacloud.blog/".to_string()),
            origin: Some("https://megacloud.blog".to_string()),
            extra_headers: Vec::new(),
        };

        Self {
            rules: vec![
                // embed pages want a document accept header, everything below it is */*
                ProfileRule {
                    matcher: HostMatcher {
                        host: "megacloud.blog".to_string(),
                        path_prefix: Some("/embed-2/".to_string()),
                    },
                    profile: megacloud(
                        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                    ),
                },
                ProfileRule {
                    matcher: HostMatcher {
                        host: "megacloud.blog".to_string(),
                        path_prefix: None,
                    },
                    profile: megacloud("*/*"),
                },
                ProfileRule {
                    matcher: HostMatcher {
                        host: "hianime.to".to_string(),
                        path_prefix: Some("/ajax/".to_string()),
                    },
                    profile: ProfileDefaults {
                        user_agent: Some(CHROME_USER_AGENT.to_string()),
                        accept: Some("application/json".to_string()),
                        accept_language: None,
                        referer: Some("https://hianime.to/".to_string()),
                        origin: Some("https://hianime.to".to_string()),
                        extra_headers: vec![(
                            "X-Requested-With".to_string(),
                            "XMLHttpRequest".to_string(),
                        )],
                    },
                },
                ProfileRule {
                    matcher: HostMatcher {
                        host: "hianime.to".to_string(),
                        path_prefix: None,
                    },
                    profile: ProfileDefaults {
                        user_agent: Some(CHROME_USER_AGENT.to_string()),
                        referer: Some("https://hianime.to/".to_string()),
                        origin: Some("https://hianime.to".to_string()),
                        ..Default::default()
                    },
                },
            ],
            analytics_hosts: vec![
                "www.google-analytics.com".to_string(),
                "google-analytics.com".to_string(),
                "www.googletagmanager.com".to_string(),
                "stats.g.doubleclick.net".to_string(),
                "static.cloudflareinsights.com".to_string(),
                "mc.yandex.ru".to_string(),
                "histats.com".to_string(),
            ],
            embed: EmbedHeuristic::default(),
        }
    }
}

impl ProfileConfig {
    /// built-in profiles unless a file is given, a broken file is a startup error
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read profiles file {}", path.display()))?;

        Self::from_toml(&raw)
            .with_context(|| format!("failed to parse profiles file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("invalid profile config")
    }
}
