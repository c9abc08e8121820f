// Stream URL extraction from listing pages.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use moka::future::Cache;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::client::PlaylistFetcher;
use crate::error::DownloadError;
use crate::headers::SiteHeaders;

use super::decode_base64_url;
use super::detect::{EpisodeInfo, is_listing_page};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
const CACHE_CAPACITY: u64 = 256;
const STREAM_INDICATORS: [&str; 4] = [".m3u8", "stream", "video", "http"];

/// Tried in order; the first candidate that decodes to a stream URL wins.
static CANDIDATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // script variable or object key
        r#"(?i)(?:src|url|stream|video)\s*[:=]\s*["']([A-Za-z0-9+/]{20,}={0,2})["']"#,
        // data-* attribute
        r#"(?i)data-[^=]*=\s*["']([A-Za-z0-9+/]{20,}={0,2})["']"#,
        // any long quoted string
        r#"["']([A-Za-z0-9+/]{40,}={0,2})["']"#,
        // any long run
        r"([A-Za-z0-9+/]{50,}={0,2})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// A stream URL found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub stream_url: String,
    /// The page the stream was found on
    pub referer: String,
    pub episode: Option<EpisodeInfo>,
}

/// Find the base64 candidate on a page that decodes to a stream URL.
pub fn find_encoded_stream(content: &str) -> Option<String> {
    for pattern in CANDIDATE_PATTERNS.iter() {
        for caps in pattern.captures_iter(content) {
            let Some(candidate) = caps.get(1) else {
                continue;
            };
            if decodes_to_stream_url(candidate.as_str()) {
                debug!(len = candidate.len(), "Found encoded stream URL candidate");
                return Some(candidate.as_str().to_owned());
            }
        }
    }
    None
}

fn decodes_to_stream_url(candidate: &str) -> bool {
    if candidate.len() < 20 {
        return false;
    }
    let Ok(decoded) = decode_base64_url(candidate) else {
        return false;
    };
    let lower = decoded.to_lowercase();
    (decoded.starts_with("http://") || decoded.starts_with("https://"))
        && STREAM_INDICATORS.iter().any(|i| lower.contains(i))
}

/// Fetches listing pages and pulls the encoded stream URL out of them.
///
/// Results are cached per page URL for the configured TTL.
pub struct StreamExtractor {
    fetcher: Arc<dyn PlaylistFetcher>,
    headers: SiteHeaders,
    cache: Cache<String, Extraction>,
}

impl StreamExtractor {
    pub fn new(fetcher: Arc<dyn PlaylistFetcher>, headers: SiteHeaders) -> Self {
        Self::with_ttl(fetcher, headers, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(fetcher: Arc<dyn PlaylistFetcher>, headers: SiteHeaders, ttl: Duration) -> Self {
        Self {
            fetcher,
            headers,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn extract(&self, page_url: &str) -> Result<Extraction, DownloadError> {
        if !is_listing_page(page_url) {
            return Err(DownloadError::extraction(
                page_url,
                "URL is not a supported listing page",
            ));
        }

        if let Some(cached) = self.cache.get(page_url).await {
            info!(url = %page_url, "Using cached extraction");
            return Ok(cached);
        }

        let content = self
            .fetcher
            .fetch_text(page_url, self.headers.build(None))
            .await?;
        if content.is_empty() {
            return Err(DownloadError::extraction(page_url, "page is empty"));
        }

        let Some(encoded) = find_encoded_stream(&content) else {
            warn!(url = %page_url, "No stream URL found in page");
            return Err(DownloadError::extraction(
                page_url,
                "streaming URL not found on page",
            ));
        };
        let stream_url = decode_base64_url(&encoded)?;

        let extraction = Extraction {
            stream_url,
            referer: page_url.to_owned(),
            episode: EpisodeInfo::from_url(page_url),
        };
        self.cache
            .insert(page_url.to_owned(), extraction.clone())
            .await;
        info!(url = %page_url, "Extracted stream URL");
        Ok(extraction)
    }

    pub async fn invalidate(&self, page_url: &str) {
        self.cache.invalidate(page_url).await;
    }
}
