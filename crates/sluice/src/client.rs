use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::HeaderMap;
use tracing::{debug, info, trace};

use crate::config::DownloaderConfig;
use crate::error::{DownloadError, SegmentFetchError};
use crate::headers::SiteHeaders;
use crate::hls::fetcher::SegmentDownloader;

/// Fetches text resources: playlists and listing pages.
#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str, headers: HeaderMap) -> Result<String, DownloadError>;
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if config.use_system_proxy {
        // reqwest picks up system proxy settings unless no_proxy() is called
        info!("Using system proxy settings for downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

/// `reqwest`-backed implementation of both collaborator traits.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    headers: SiteHeaders,
}

impl HttpClient {
    pub fn new(config: &DownloaderConfig) -> Result<Self, DownloadError> {
        Ok(Self {
            client: create_client(config)?,
            headers: SiteHeaders::from_config(config),
        })
    }

    pub fn from_client(client: Client, headers: SiteHeaders) -> Self {
        Self { client, headers }
    }

    pub fn site_headers(&self) -> &SiteHeaders {
        &self.headers
    }
}

#[async_trait]
impl PlaylistFetcher for HttpClient {
    async fn fetch_text(&self, url: &str, headers: HeaderMap) -> Result<String, DownloadError> {
        debug!(url = %url, "Fetching text resource");
        let response = self.client.get(url).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(status, url, "text fetch"));
        }
        let body = response.text().await?;
        trace!(url = %url, len = body.len(), "Fetched text resource");
        Ok(body)
    }
}

#[async_trait]
impl SegmentDownloader for HttpClient {
    async fn fetch_segment(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<Bytes, SegmentFetchError> {
        let response = self
            .client
            .get(url)
            .headers(self.headers.build(referer))
            .send()
            .await
            .map_err(|e| SegmentFetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SegmentFetchError::HttpStatus {
                status,
                url: url.to_owned(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| SegmentFetchError::from_reqwest(url, e))
    }
}
