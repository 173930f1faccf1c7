use std::net::SocketAddr;
use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::errors::{AppError, Result};

/// Flat variable names accepted alongside the nested `SECTION__KEY` form.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("LISTEN_ADDRESS", "listen.address"),
    ("LISTEN_PATH", "listen.path"),
    ("GITLAB_URI", "gitlab.uri"),
    ("GITLAB_API_KEY", "gitlab.api_key"),
    ("INTERVAL", "collector.interval_secs"),
];

const MAX_WINDOW_DAYS: i64 = 3650;

/// Routes the exporter always serves besides the metrics path.
const RESERVED_PATHS: &[&str] = &["/", "/healthz"];

pub const USAGE: &str = "\
Usage: gitlab-extra-exporter

Settings are read from config/default.*, config/local.*, the environment
(SECTION__KEY, e.g. GITLAB__API_KEY) and the variables below.

  LISTEN_ADDRESS   port or host:port to serve metrics on (default 8080)
  LISTEN_PATH      path where metrics are exposed (default /metrics)
  GITLAB_URI       URI of the GitLab instance to monitor (required)
  GITLAB_API_KEY   API key used to access the GitLab instance (required)
  INTERVAL         seconds between collection cycles (required)
";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub gitlab: GitlabConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(".")
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder()
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/default")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(
                File::with_name(
                    path.as_ref()
                        .join("config/local")
                        .to_string_lossy()
                        .as_ref(),
                )
                .required(false),
            )
            .add_source(Environment::default().separator("__"));

        for (var, key) in LEGACY_ENV {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Rejects configurations the exporter cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.gitlab.uri.trim().is_empty() {
            return Err(AppError::MissingSetting("gitlab.uri"));
        }
        if self.gitlab.api_key.trim().is_empty() {
            return Err(AppError::MissingSetting("gitlab.api_key"));
        }
        if self.collector.interval_secs == 0 {
            return Err(AppError::MissingSetting("collector.interval_secs"));
        }
        if !self.listen.path.starts_with('/') {
            return Err(AppError::invalid(
                "listen.path",
                format!("{:?} must start with '/'", self.listen.path),
            ));
        }
        if RESERVED_PATHS.contains(&self.listen.path.as_str()) {
            return Err(AppError::invalid(
                "listen.path",
                format!("{:?} is already served by the exporter", self.listen.path),
            ));
        }
        if self.gitlab.page_size == 0 || self.gitlab.page_size > 100 {
            return Err(AppError::invalid(
                "gitlab.page_size",
                "must be between 1 and 100",
            ));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.gitlab.window_days) {
            return Err(AppError::invalid(
                "gitlab.window_days",
                format!("must be between 1 and {MAX_WINDOW_DAYS}"),
            ));
        }
        if self.gitlab.timeout_secs == 0 {
            return Err(AppError::invalid("gitlab.timeout_secs", "must be positive"));
        }
        self.listen.socket_addr()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "ListenConfig::default_address")]
    pub address: String,
    #[serde(default = "ListenConfig::default_path")]
    pub path: String,
}

impl ListenConfig {
    fn default_address() -> String {
        "8080".to_string()
    }

    fn default_path() -> String {
        "/metrics".to_string()
    }

    /// A bare port binds every interface.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let address = self.address.trim();
        if let Ok(port) = address.trim_start_matches(':').parse::<u16>() {
            return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
        }
        address
            .parse()
            .map_err(|err| AppError::invalid("listen.address", format!("{address:?}: {err}")))
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            path: Self::default_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitlabConfig {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "GitlabConfig::default_target_branch")]
    pub target_branch: String,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default = "GitlabConfig::default_fetch_changes")]
    pub fetch_changes: bool,
    #[serde(default = "GitlabConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "GitlabConfig::default_window_days")]
    pub window_days: i64,
    #[serde(default = "GitlabConfig::default_page_size")]
    pub page_size: u32,
}

impl GitlabConfig {
    fn default_target_branch() -> String {
        "master".to_string()
    }

    const fn default_fetch_changes() -> bool {
        true
    }

    const fn default_timeout_secs() -> u64 {
        10
    }

    const fn default_window_days() -> i64 {
        7
    }

    const fn default_page_size() -> u32 {
        100
    }
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            api_key: String::new(),
            target_branch: Self::default_target_branch(),
            include_archived: false,
            fetch_changes: Self::default_fetch_changes(),
            timeout_secs: Self::default_timeout_secs(),
            window_days: Self::default_window_days(),
            page_size: Self::default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectorConfig {
    /// No default: operators pick a period that suits their rate limits.
    #[serde(default)]
    pub interval_secs: u64,
}
