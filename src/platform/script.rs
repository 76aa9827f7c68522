//! Fetching player script bodies

use crate::error::DecipherError;
use crate::utils::url::resolve_script_url;
use reqwest::{Client, ClientBuilder};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Source of player script text, keyed by an opaque identifier
#[async_trait::async_trait]
pub trait ScriptFetcher: Send + Sync {
    /// Fetch the script body for `identifier`
    async fn fetch(&self, identifier: &str) -> Result<String, DecipherError>;
}

/// HTTP fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: Option<String>,
    /// Proxy URL
    pub proxy_url: Option<String>,
    /// Origin that site-relative script paths are resolved against
    pub base_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            proxy_url: None,
            base_url: "https://www.youtube.com".to_string(),
        }
    }
}

/// Fetches player scripts over HTTP
pub struct HttpScriptFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpScriptFetcher {
    /// Create a new fetcher with default configuration
    pub fn new() -> Result<Self, DecipherError> {
        Self::with_config(FetchConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: FetchConfig) -> Result<Self, DecipherError> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent);
        } else {
            builder = builder.user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            );
        }

        if let Some(proxy_url) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ScriptFetcher for HttpScriptFetcher {
    async fn fetch(&self, identifier: &str) -> Result<String, DecipherError> {
        let url = resolve_script_url(&self.config.base_url, identifier)?;
        debug!("Fetching player script from {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DecipherError::FetchStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        debug!("Fetched player script ({} chars)", body.len());
        Ok(body)
    }
}

/// Reads player scripts saved on disk; the identifier is a path
#[derive(Debug, Clone, Default)]
pub struct FileScriptFetcher {
    root: Option<PathBuf>,
}

impl FileScriptFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative identifiers against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait::async_trait]
impl ScriptFetcher for FileScriptFetcher {
    async fn fetch(&self, identifier: &str) -> Result<String, DecipherError> {
        let path = match &self.root {
            Some(root) => root.join(identifier),
            None => PathBuf::from(identifier),
        };
        debug!("Reading player script from {}", path.display());
        Ok(tokio::fs::read_to_string(path).await?)
    }
}
