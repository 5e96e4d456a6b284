//! HTTP fetch capability with a rotating user-agent pool.

use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use tracing::debug;

use crate::config::GeneralConfig;
use crate::error::{Error, Result};
use crate::scrape::pagination::PageFetcher;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fallback when the configured user-agent pool is empty.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Pick a user agent from `pool`, falling back to the built-in default
/// when the pool is empty.
pub fn pick_from_pool(pool: &[String]) -> &str {
    if pool.is_empty() {
        return DEFAULT_USER_AGENT;
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as usize)
        .unwrap_or(0);
    &pool[nanos % pool.len()]
}

/// Thin reqwest wrapper. Picks a random user agent per request and
/// attaches the configured default headers.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    user_agents: Vec<String>,
    default_headers: IndexMap<String, String>,
}

impl HttpClient {
    pub fn new(general: &GeneralConfig) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            user_agents: general.user_agents.clone(),
            default_headers: general.default_headers.clone(),
        }
    }

    /// Pick a user agent from the pool.
    pub fn pick_user_agent(&self) -> &str {
        pick_from_pool(&self.user_agents)
    }

    /// GET `url` and return the body text. Non-2xx statuses are errors.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let user_agent = self.pick_user_agent();
        debug!(url, user_agent, "fetching page");

        let mut request = self.client.get(url).header(USER_AGENT, user_agent);
        for (name, value) in &self.default_headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let fetch_err = |source: reqwest::Error| Error::Fetch {
            url: url.to_string(),
            source,
        };

        let response = request.send().await.map_err(fetch_err)?;
        let response = response.error_for_status().map_err(fetch_err)?;
        response.text().await.map_err(fetch_err)
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.get_text(url).await
    }
}
