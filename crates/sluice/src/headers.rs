use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use tracing::warn;

use crate::config::DownloaderConfig;

/// Builds the fixed header bundle sent with every playlist, page and segment request.
#[derive(Debug, Clone)]
pub struct SiteHeaders {
    user_agent: String,
    site_root: String,
}

impl SiteHeaders {
    pub fn new(user_agent: impl Into<String>, site_root: impl Into<String>) -> Self {
        let site_root: String = site_root.into();
        Self {
            user_agent: user_agent.into(),
            site_root: site_root.trim_end_matches('/').to_owned(),
        }
    }

    pub fn from_config(config: &DownloaderConfig) -> Self {
        Self::new(config.user_agent.clone(), config.site_root.clone())
    }

    pub fn site_root(&self) -> &str {
        &self.site_root
    }

    pub fn default_referer(&self) -> String {
        format!("{}/", self.site_root)
    }

    /// `User-Agent`, `Referer` (override or `<site_root>/`), `Origin` and `Accept: */*`.
    pub fn build(&self, referer: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, &self.user_agent);
        match referer {
            Some(referer) => insert(&mut headers, REFERER, referer),
            None => insert(&mut headers, REFERER, &self.default_referer()),
        }
        insert(&mut headers, ORIGIN, &self.site_root);
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers
    }
}

impl Default for SiteHeaders {
    fn default() -> Self {
        Self::from_config(&DownloaderConfig::default())
    }
}

fn insert(headers: &mut HeaderMap, name: reqwest::header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => warn!(header = %name, error = %e, "Skipping invalid header value"),
    }
}
