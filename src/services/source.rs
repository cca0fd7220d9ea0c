// src/services/source.rs

//! Remote content endpoint.
//!
//! `PageSource` is the seam between the pipeline and the network: the real
//! implementation talks to the MediaWiki raw export, tests script their own.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{FetchError, Result};
use crate::models::CrawlerConfig;
use crate::services::markup::strip_export_banner;
use crate::utils::{export_url, get_domain, http};

/// A remote endpoint returning one page payload per identifier.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Host requests are sent to, used for per-host rate limiting.
    fn host(&self) -> &str;

    /// Retrieve one page. Failures come back classified.
    async fn fetch_page(&self, id: &str) -> std::result::Result<String, FetchError>;
}

/// Raw-wikitext export over HTTP(S).
pub struct HttpSource {
    client: Client,
    endpoint: String,
    host: String,
}

impl HttpSource {
    /// Build a source from the crawler settings.
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = http::create_async_client(config)?;
        Self::with_client(client, &config.endpoint)
    }

    pub fn with_client(client: Client, endpoint: &str) -> Result<Self> {
        // Validates the endpoint up front.
        export_url(endpoint, "Pagina")?;
        let host = get_domain(endpoint).unwrap_or_else(|| endpoint.to_string());
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            host,
        })
    }

    /// Map an HTTP status to a fetch failure, or `None` on success.
    pub(crate) fn classify_status(id: &str, status: StatusCode) -> Option<FetchError> {
        if status.is_success() {
            return None;
        }
        let reason = format!("HTTP {}", status.as_u16());
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            Some(FetchError::transient(id, reason))
        } else {
            Some(FetchError::permanent(id, reason))
        }
    }

    /// Map a transport error to a fetch failure.
    pub(crate) fn classify_error(id: &str, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
            FetchError::transient(id, error)
        } else {
            FetchError::permanent(id, error)
        }
    }
}

#[async_trait]
impl PageSource for HttpSource {
    fn host(&self) -> &str {
        &self.host
    }

    async fn fetch_page(&self, id: &str) -> std::result::Result<String, FetchError> {
        let url = export_url(&self.endpoint, id).map_err(|e| FetchError::permanent(id, e))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::classify_error(id, &e))?;

        if let Some(error) = Self::classify_status(id, response.status()) {
            return Err(error);
        }

        let text = response
            .text()
            .await
            .map_err(|e| Self::classify_error(id, &e))?;

        let text = strip_export_banner(&text);
        if text.trim().is_empty() {
            return Err(FetchError::permanent(id, "empty page"));
        }
        Ok(text)
    }
}
