//! Turning user input into a playable stream URL.
//!
//! Input may be a direct playlist URL, a base64-encoded URL, or an episode page on the
//! listing site from which the encoded URL is extracted.

pub mod detect;
pub mod extract;
pub mod filename;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::info;

use crate::error::DownloadError;

pub use detect::{EpisodeInfo, UrlKind, detect_url_kind};
pub use extract::{Extraction, StreamExtractor};
pub use filename::{generate_filename, generate_output_path, sanitize_filename};

/// Decode a standard-alphabet base64 string into a UTF-8 URL.
pub fn decode_base64_url(encoded: &str) -> Result<String, DownloadError> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::Decode {
            input: encoded.to_owned(),
            reason: "empty input".to_string(),
        });
    }
    let bytes = STANDARD.decode(trimmed).map_err(|e| DownloadError::Decode {
        input: encoded.to_owned(),
        reason: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| DownloadError::Decode {
        input: encoded.to_owned(),
        reason: e.to_string(),
    })
}

/// Where to download from, plus naming and referer hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub stream_url: String,
    pub referer: Option<String>,
    pub episode: Option<EpisodeInfo>,
}

impl ResolvedInput {
    fn direct(stream_url: String) -> Self {
        Self {
            stream_url,
            referer: None,
            episode: None,
        }
    }
}

/// Resolve `--url` / `--encoded` into a stream URL. `encoded` takes precedence.
pub async fn resolve_input(
    url: Option<&str>,
    encoded: Option<&str>,
    extractor: &StreamExtractor,
) -> Result<ResolvedInput, DownloadError> {
    if let Some(encoded) = encoded.filter(|e| !e.is_empty()) {
        info!("Decoding URL");
        return Ok(ResolvedInput::direct(decode_base64_url(encoded)?));
    }

    let Some(url) = url.filter(|u| !u.is_empty()) else {
        return Err(DownloadError::invalid_url(
            "",
            "provide --url or --encoded",
        ));
    };

    match detect_url_kind(url) {
        UrlKind::DirectStream => Ok(ResolvedInput::direct(url.to_owned())),
        UrlKind::ListingPage => {
            info!(url = %url, "Extracting streaming URL");
            let extraction = extractor.extract(url).await?;
            if let Some(episode) = &extraction.episode {
                info!(episode = %episode, "Detected episode");
            }
            Ok(ResolvedInput {
                stream_url: extraction.stream_url,
                referer: Some(extraction.referer),
                episode: extraction.episode,
            })
        }
        UrlKind::Base64 => {
            info!("Decoding base64 URL");
            Ok(ResolvedInput::direct(decode_base64_url(url)?))
        }
        UrlKind::Unknown => Err(DownloadError::invalid_url(
            url,
            "unsupported URL; use a listing page, a direct stream URL or a base64-encoded URL",
        )),
    }
}
