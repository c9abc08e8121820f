// HLS Playlist Parser: line-based handling of static VOD playlists.
//
// Only the two shapes a VOD source serves are understood: a flat media playlist
// and a master playlist whose first variant is followed.

use m3u8_rs::Playlist;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::DownloadError;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";

/// True if the playlist text contains a variant-stream marker.
pub fn is_master_playlist(content: &str) -> bool {
    content.contains(STREAM_INF_TAG)
}

/// Resolve the URI on the line following the first `#EXT-X-STREAM-INF` tag.
pub fn get_first_quality_url(content: &str, base_url: &Url) -> Option<Url> {
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        if !line.starts_with(STREAM_INF_TAG) {
            continue;
        }
        let Some(next) = lines.next() else {
            break;
        };
        let path = next.trim();
        match resolve_url(path, base_url) {
            Some(url) => {
                info!(url = %url, "Selected quality playlist");
                return Some(url);
            }
            None => {
                warn!(path = %path, "Variant playlist path could not be resolved");
                return None;
            }
        }
    }

    warn!("No quality playlist found in master playlist");
    None
}

/// Absolute segment URLs in playlist order. Index `i` in the result is segment `i + 1`.
///
/// Lines that are empty, comments, or that cannot be resolved are skipped.
pub fn parse_segments(content: &str, base_url: &Url) -> Vec<Url> {
    let segments: Vec<Url> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let resolved = resolve_url(line, base_url);
            if resolved.is_none() {
                debug!(line = %line, "Skipping unresolvable playlist line");
            }
            resolved
        })
        .collect();

    debug!(count = segments.len(), "Parsed segments from playlist");
    segments
}

/// The playlist URL truncated after its last `/`.
pub fn get_base_url(playlist_url: &Url) -> Url {
    let raw = playlist_url.as_str();
    let prefix = match raw.rfind('/') {
        Some(pos) => &raw[..=pos],
        None => raw,
    };
    Url::parse(prefix).unwrap_or_else(|_| playlist_url.clone())
}

/// Parse a user supplied playlist URL.
pub fn parse_playlist_url(input: &str) -> Result<Url, DownloadError> {
    Url::parse(input).map_err(|e| DownloadError::invalid_url(input, e.to_string()))
}

fn resolve_url(uri: &str, base_url: &Url) -> Option<Url> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Url::parse(uri).ok()
    } else {
        base_url.join(uri).ok()
    }
}

/// Summary of a media playlist as seen by a full m3u8 parser.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylistInfo {
    pub target_duration: f64,
    pub segment_count: usize,
    pub total_duration: f64,
    pub end_list: bool,
}

/// Inspect a media playlist with `m3u8-rs`.
///
/// Returns `None` when the text is not a parseable media playlist; the line-based
/// parser above stays authoritative for the segment list.
pub fn inspect_media_playlist(content: &str) -> Option<MediaPlaylistInfo> {
    match m3u8_rs::parse_playlist_res(content.as_bytes()) {
        Ok(Playlist::MediaPlaylist(media)) => Some(MediaPlaylistInfo {
            target_duration: media.target_duration as f64,
            segment_count: media.segments.len(),
            total_duration: media.segments.iter().map(|s| s.duration as f64).sum(),
            end_list: media.end_list,
        }),
        Ok(Playlist::MasterPlaylist(_)) => None,
        Err(e) => {
            debug!(error = ?e, "m3u8 parser rejected playlist");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.test/path/").unwrap()
    }

    #[test]
    fn detects_master_playlist() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000\nlow/index.m3u8\n";
        assert!(is_master_playlist(master));
        assert!(!is_master_playlist("#EXTM3U\n#EXTINF:10,\nseg1.ts\n"));
    }

    #[test]
    fn first_quality_url_is_joined_against_base() {
        let master = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720\n\
            720p/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=640000\n\
            360p/index.m3u8\n";
        let url = get_first_quality_url(master, &base()).unwrap();
        assert_eq!(url.as_str(), "https://cdn.test/path/720p/index.m3u8");
    }

    #[test]
    fn first_quality_url_keeps_absolute_paths() {
        let master = "#EXT-X-STREAM-INF:BANDWIDTH=1\nhttps://other.test/v/index.m3u8";
        let url = get_first_quality_url(master, &base()).unwrap();
        assert_eq!(url.as_str(), "https://other.test/v/index.m3u8");
    }

    #[test]
    fn first_quality_url_missing_following_line() {
        assert!(get_first_quality_url("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1", &base()).is_none());
    }

    #[test]
    fn segments_preserve_order_and_resolve() {
        let media = "#EXTM3U\n\
            #EXT-X-TARGETDURATION:10\n\
            #EXTINF:10.0,\n\
            seg1.ts\n\
            \n\
            #EXTINF:10.0,\n\
            ../other/seg2.ts\n\
            #EXTINF:9.5,\n\
            https://mirror.test/seg3.ts\n\
            #EXT-X-ENDLIST\n";
        let segments = parse_segments(media, &base());
        let urls: Vec<&str> = segments.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.test/path/seg1.ts",
                "https://cdn.test/other/seg2.ts",
                "https://mirror.test/seg3.ts",
            ]
        );
    }

    #[test]
    fn empty_playlist_has_no_segments() {
        assert!(parse_segments("", &base()).is_empty());
        assert!(parse_segments("#EXTM3U\n#EXT-X-ENDLIST\n", &base()).is_empty());
    }

    #[test]
    fn base_url_truncates_to_last_slash() {
        let url = Url::parse("https://cdn.test/a/b/index.m3u8?token=1").unwrap();
        assert_eq!(get_base_url(&url).as_str(), "https://cdn.test/a/b/");
    }

    #[test]
    fn inspect_reports_endlist() {
        let vod = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nseg1.ts\n#EXTINF:5.0,\nseg2.ts\n#EXT-X-ENDLIST\n";
        let info = inspect_media_playlist(vod).unwrap();
        assert!(info.end_list);
        assert_eq!(info.segment_count, 2);
        assert!((info.total_duration - 15.0).abs() < f64::EPSILON);

        let live = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg1.ts\n";
        assert!(!inspect_media_playlist(live).unwrap().end_list);
    }
}
