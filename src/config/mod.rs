//! Configuration management.
//!
//! [`ClientConfig`] is plain data: it can be built in code, deserialized from a
//! file, or layered from a file plus `ARXIV_HARVEST_*` environment variables via
//! [`load_config`]. Every constructor that consumes it calls
//! [`ClientConfig::validate`] first, so an invalid value never reaches the
//! session.
//!
//! # Configuration File Format
//!
//! ```toml
//! base_url = "http://export.arxiv.org/api/query"
//! timeout_secs = 30.0
//! max_retries = 3
//! min_wait_secs = 3.0
//! max_wait_secs = 60.0
//! rate_limit_calls = 1
//! rate_limit_period_secs = 3.0
//! max_concurrent_requests = 3
//! page_size = 100
//! proxy = "socks5://127.0.0.1:1080"
//! enable_downloader = true
//! download_dir = "./papers"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::arxiv::ArxivError;

/// Largest page the arXiv API serves in one response
pub const MAX_PAGE_SIZE: u32 = 2000;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Query endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-attempt request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: f64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in seconds
    #[serde(default = "default_min_wait")]
    pub min_wait_secs: f64,

    /// Upper bound for any single backoff delay, in seconds
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,

    /// Growth factor between consecutive backoff delays
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,

    /// Requests allowed per rate-limit period (0 disables the limiter)
    #[serde(default = "default_rate_calls")]
    pub rate_limit_calls: u32,

    /// Rate-limit period in seconds (0 disables the limiter)
    #[serde(default = "default_rate_period")]
    pub rate_limit_period_secs: f64,

    /// Requests in flight at once, searches and downloads combined
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Entries requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Optional upstream proxy (http, https or socks5)
    #[serde(default)]
    pub proxy: Option<String>,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whether download operations perform I/O
    #[serde(default)]
    pub enable_downloader: bool,

    /// Download directory; defaults to `<documents>/arxiv-harvest`
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            min_wait_secs: default_min_wait(),
            max_wait_secs: default_max_wait(),
            backoff_multiplier: default_multiplier(),
            rate_limit_calls: default_rate_calls(),
            rate_limit_period_secs: default_rate_period(),
            max_concurrent_requests: default_max_concurrent(),
            page_size: default_page_size(),
            proxy: None,
            user_agent: default_user_agent(),
            enable_downloader: false,
            download_dir: None,
        }
    }
}

fn default_base_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}

fn default_timeout() -> f64 {
    30.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_wait() -> f64 {
    3.0
}

fn default_max_wait() -> f64 {
    60.0
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_rate_calls() -> u32 {
    1
}

fn default_rate_period() -> f64 {
    3.0
}

fn default_max_concurrent() -> usize {
    3
}

fn default_page_size() -> u32 {
    100
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn positive(name: &str, value: f64) -> Result<(), ArxivError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ArxivError::Configuration(format!(
            "{} must be a positive number, got {}",
            name, value
        )))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), ArxivError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ArxivError::Configuration(format!(
            "{} must be zero or positive, got {}",
            name, value
        )))
    }
}

impl ClientConfig {
    /// Check every setting, failing on the first invalid one
    pub fn validate(&self) -> Result<(), ArxivError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ArxivError::Configuration(format!("invalid base_url {:?}: {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ArxivError::Configuration(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }

        positive("timeout_secs", self.timeout_secs)?;
        positive("min_wait_secs", self.min_wait_secs)?;
        positive("max_wait_secs", self.max_wait_secs)?;
        if self.max_wait_secs < self.min_wait_secs {
            return Err(ArxivError::Configuration(format!(
                "max_wait_secs ({}) is below min_wait_secs ({})",
                self.max_wait_secs, self.min_wait_secs
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ArxivError::Configuration(format!(
                "backoff_multiplier must be at least 1, got {}",
                self.backoff_multiplier
            )));
        }
        non_negative("rate_limit_period_secs", self.rate_limit_period_secs)?;

        if self.max_concurrent_requests == 0 {
            return Err(ArxivError::Configuration(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ArxivError::Configuration(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if let Some(proxy) = &self.proxy {
            reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                ArxivError::Configuration(format!("invalid proxy {:?}: {}", proxy, e))
            })?;
        }
        Ok(())
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// Rate-limit window
    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_period_secs)
    }

    /// Download directory, falling back to the user's documents folder
    pub fn resolved_download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| {
            dirs::document_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(env!("CARGO_PKG_NAME"))
        })
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ArxivError> {
        toml::to_string_pretty(self)
            .map_err(|e| ArxivError::Configuration(format!("cannot render config: {}", e)))
    }
}

/// Load configuration from an optional file plus `ARXIV_HARVEST_*` variables
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ArxivError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    let settings = builder
        .add_source(config::Environment::with_prefix("ARXIV_HARVEST"))
        .build()
        .map_err(|e| ArxivError::Configuration(e.to_string()))?;

    let config: ClientConfig = settings
        .try_deserialize()
        .map_err(|e| ArxivError::Configuration(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
