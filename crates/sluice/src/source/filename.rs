// Output file naming: user choice, then episode info, then patterns in the stream URL.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use url::Url;

use super::detect::EpisodeInfo;

const DEFAULT_STEM: &str = "video";
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "ts", "mkv", "mov", "m4v"];
const STREAMING_INDICATORS: [&str; 5] = [".m3u8", "stream", "playlist", "video", "media"];

static UNDERSCORE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

pub(crate) fn is_reserved(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

/// Sanitize a string for use as a filename
pub fn sanitize_filename(input: &str) -> String {
    let result: String = input
        .chars()
        .map(|c| if is_reserved(c) || c < ' ' { '_' } else { c })
        .collect();

    let result = result.trim_matches(|c| c == '.' || c == ' ');
    if result.is_empty() {
        DEFAULT_STEM.to_string()
    } else if result.chars().count() > 200 {
        result.chars().take(200).collect()
    } else {
        result.to_string()
    }
}

/// Pick the output filename (no directory).
///
/// `default_extension` includes the dot, e.g. `".mp4"`.
pub fn generate_filename(
    stream_url: &str,
    episode: Option<&EpisodeInfo>,
    user_output: Option<&str>,
    default_extension: &str,
) -> String {
    if let Some(user) = user_output.filter(|s| !s.trim().is_empty()) {
        debug!(name = %user, "Using custom filename");
        return ensure_extension(&sanitize_filename(user), default_extension);
    }

    if let Some(episode) = episode {
        let name = format!("{}{default_extension}", episode.filename_safe_name());
        info!(name = %name, "Filename from episode info");
        return sanitize_filename(&name);
    }

    if let Some(stem) = extract_from_url(stream_url) {
        let name = format!("{stem}{default_extension}");
        info!(name = %name, "Filename from stream URL");
        return sanitize_filename(&name);
    }

    format!("{DEFAULT_STEM}{default_extension}")
}

/// Like [`generate_filename`], but a user-supplied path keeps its directory.
pub fn generate_output_path(
    stream_url: &str,
    episode: Option<&EpisodeInfo>,
    user_output: Option<&Path>,
    default_extension: &str,
) -> PathBuf {
    let Some(user) = user_output else {
        return PathBuf::from(generate_filename(stream_url, episode, None, default_extension));
    };
    let name = user
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if name.trim().is_empty() {
        generate_filename(stream_url, episode, None, default_extension)
    } else {
        generate_filename(stream_url, episode, Some(&name), default_extension)
    };
    match user.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && user.file_name().is_some() => {
            parent.join(name)
        }
        _ if user.file_name().is_none() => user.join(name),
        _ => PathBuf::from(name),
    }
}

fn ensure_extension(name: &str, default_extension: &str) -> String {
    let has_video_ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(e)));
    if has_video_ext {
        name.to_string()
    } else {
        format!("{name}{default_extension}")
    }
}

fn extract_from_url(url: &str) -> Option<String> {
    let lower = url.to_lowercase();
    if !STREAMING_INDICATORS.iter().any(|i| lower.contains(i)) {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();
    from_marker_pattern(&segments, "temporada")
        .or_else(|| from_marker_pattern(&segments, "season"))
        .or_else(|| from_path_segments(&segments))
        .or_else(|| from_domain_and_path(&parsed, &segments))
}

/// `/<series>/<NN-temporada>/<ep>/...` or `/<series>/season-NN/episode-NN/...`
fn from_marker_pattern(segments: &[&str], marker: &str) -> Option<String> {
    (1..segments.len().saturating_sub(1))
        .find(|&i| segments[i].to_lowercase().contains(marker))
        .map(|i| {
            format!(
                "{}_{}_{}",
                clean_name(segments[i - 1]),
                clean_name(segments[i]),
                clean_name(segments[i + 1])
            )
        })
}

/// Up to three directories before the file name; the first is taken as the series.
fn from_path_segments(segments: &[&str]) -> Option<String> {
    let end = segments.len().saturating_sub(1);
    let start = segments.len().saturating_sub(4);
    let relevant: Vec<&str> = segments[start..end]
        .iter()
        .copied()
        .filter(|p| !is_media_file(p) && !p.ends_with(".mp4") && *p != "stream")
        .collect();
    if relevant.len() < 2 {
        return None;
    }
    let extras: Vec<String> = relevant[1..].iter().map(|p| clean_name(p)).collect();
    Some(format!("{}_{}", clean_name(relevant[0]), extras.join("_")))
}

fn from_domain_and_path(parsed: &Url, segments: &[&str]) -> Option<String> {
    let domain = parsed.host_str()?.split('.').next()?;
    let path: Vec<&str> = segments.iter().copied().filter(|p| !is_media_file(p)).collect();
    if path.is_empty() {
        return None;
    }
    let tail: Vec<String> = path[path.len().saturating_sub(2)..]
        .iter()
        .map(|p| clean_name(p))
        .collect();
    Some(format!("{}_{}", clean_name(domain), tail.join("_")))
}

fn is_media_file(segment: &str) -> bool {
    segment.ends_with(".m3u8") || segment.ends_with(".ts")
}

/// Lowercase, `_` for reserved characters, spaces and hyphens, no repeated or edge `_`.
fn clean_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if is_reserved(c) || c == ' ' || c == '-' {
                '_'
            } else {
                c
            }
        })
        .collect();
    UNDERSCORE_RUN_RE
        .replace_all(&replaced, "_")
        .trim_matches('_')
        .to_lowercase()
}
