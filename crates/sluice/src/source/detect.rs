use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static LISTING_PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.)?weekseries\.info/series/([^/]+)/temporada-(\d+)/episodio-(\d+)")
        .unwrap()
});

static BASE64_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]*={0,2}$").unwrap());

/// What kind of input the user handed us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// An episode page on the listing site; the stream URL must be extracted from it.
    ListingPage,
    /// A playlist URL that can be downloaded as is.
    DirectStream,
    /// A base64-encoded stream URL.
    Base64,
    Unknown,
}

/// Classify `input`. Listing pages win over direct streams, which win over base64.
pub fn detect_url_kind(input: &str) -> UrlKind {
    if input.is_empty() {
        UrlKind::Unknown
    } else if is_listing_page(input) {
        UrlKind::ListingPage
    } else if is_stream_url(input) {
        UrlKind::DirectStream
    } else if is_base64(input) {
        UrlKind::Base64
    } else {
        UrlKind::Unknown
    }
}

pub fn is_listing_page(url: &str) -> bool {
    has_http_scheme(url) && url.contains("weekseries.info") && LISTING_PAGE_RE.is_match(url)
}

pub fn is_stream_url(url: &str) -> bool {
    has_http_scheme(url) && (url.ends_with(".m3u8") || url.to_lowercase().contains("stream"))
}

pub fn is_base64(text: &str) -> bool {
    text.len() >= 4 && BASE64_RE.is_match(text)
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Series and episode numbers parsed from a listing page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeInfo {
    pub series_name: String,
    pub season: u32,
    pub episode: u32,
    pub original_url: String,
}

impl EpisodeInfo {
    pub fn from_url(url: &str) -> Option<Self> {
        if !is_listing_page(url) {
            return None;
        }
        let caps = LISTING_PAGE_RE.captures(url)?;
        Some(Self {
            series_name: caps.get(1)?.as_str().to_owned(),
            season: caps.get(2)?.as_str().parse().ok()?,
            episode: caps.get(3)?.as_str().parse().ok()?,
            original_url: url.to_owned(),
        })
    }

    /// `<series>_S01E02` with filesystem-reserved characters replaced.
    pub fn filename_safe_name(&self) -> String {
        let safe: String = self
            .series_name
            .chars()
            .map(|c| if super::filename::is_reserved(c) { '_' } else { c })
            .collect();
        format!("{safe}_S{:02}E{:02}", self.season, self.episode)
    }
}

impl fmt::Display for EpisodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - S{:02}E{:02}",
            self.series_name, self.season, self.episode
        )
    }
}
