//! Container conversion and media probing through external `ffmpeg` and `ffprobe` processes.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::TranscodeConfig;
use crate::error::DownloadError;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Converts the downloaded transport stream into the requested container.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), DownloadError>;
}

/// Container and stream details reported by `ffprobe -print_format json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub format: Option<FormatInfo>,
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
}

/// ffprobe reports numeric format fields as strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormatInfo {
    #[serde(default)]
    pub format_name: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub bit_rate: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl MediaInfo {
    pub fn parse(json: &[u8]) -> Result<Self, DownloadError> {
        serde_json::from_slice(json).map_err(|e| DownloadError::Transcode {
            reason: format!("unreadable ffprobe output: {e}"),
        })
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.format
            .as_ref()?
            .duration
            .as_deref()?
            .trim()
            .parse()
            .ok()
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.format.as_ref()?.size.as_deref()?.trim().parse().ok()
    }

    pub fn video_stream(&self) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    pub fn has_audio(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"))
    }
}

/// Runs `ffmpeg -y -i <input> -c copy <output>`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(config: &TranscodeConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    pub fn probe_args(path: &Path) -> Vec<OsString> {
        vec![
            "-v".into(),
            "quiet".into(),
            "-print_format".into(),
            "json".into(),
            "-show_format".into(),
            "-show_streams".into(),
            path.as_os_str().to_owned(),
        ]
    }

    /// Media details of `path`, or `None` when ffprobe is missing or cannot read it.
    pub async fn probe_media_info(&self, path: &Path) -> Option<MediaInfo> {
        let output = match command(&self.ffprobe_path)
            .args(Self::probe_args(path))
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                debug!(ffprobe = %self.ffprobe_path.display(), error = %e, "ffprobe could not be started");
                return None;
            }
        };
        if !output.status.success() {
            debug!(path = %path.display(), status = %output.status, "ffprobe failed");
            return None;
        }
        match MediaInfo::parse(&output.stdout) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring ffprobe output");
                None
            }
        }
    }

    /// First line of `ffmpeg -version`, if the executable runs.
    pub async fn detect_version(&self) -> Option<String> {
        let output = command(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout)
            .ok()
            .and_then(|s| s.lines().next().map(str::to_owned))
    }

    /// Stream copy, no re-encode, overwrite the target.
    pub fn conversion_args(input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-c".into(),
            "copy".into(),
            output.as_os_str().to_owned(),
        ]
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(&TranscodeConfig::default())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn is_available(&self) -> bool {
        match self.detect_version().await {
            Some(version) => {
                debug!(version = %version, "ffmpeg detected");
                true
            }
            None => false,
        }
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), DownloadError> {
        info!(input = %input.display(), output = %output.display(), "Converting container");

        let result = command(&self.ffmpeg_path)
            .args(Self::conversion_args(input, output))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DownloadError::Transcode {
                reason: format!("failed to run {}: {e}", self.ffmpeg_path.display()),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            error!(status = %result.status, stderr = %tail.join("\n"), "ffmpeg exited with an error");
            return Err(DownloadError::Transcode {
                reason: format!("ffmpeg exited with {}", result.status),
            });
        }

        info!(output = %output.display(), "Conversion complete");
        Ok(())
    }
}

/// A `tokio::process::Command` that does not open a console window on Windows.
fn command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }
    cmd.kill_on_drop(true);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_stream_copy_arguments() {
        let args = FfmpegTranscoder::conversion_args(Path::new("in.ts"), Path::new("out.mp4"));
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, vec!["-y", "-i", "in.ts", "-c", "copy", "out.mp4"]);
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let transcoder = FfmpegTranscoder::new(&TranscodeConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg-binary"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe-binary"),
        });
        assert!(!transcoder.is_available().await);
        let result = transcoder
            .transcode(Path::new("in.ts"), Path::new("out.mp4"))
            .await;
        assert!(matches!(result, Err(DownloadError::Transcode { .. })));
        assert!(transcoder.probe_media_info(Path::new("in.ts")).await.is_none());
    }

    const FFPROBE_SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_name": "h264", "codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "24000/1001"},
            {"index": 1, "codec_name": "aac", "codec_type": "audio", "sample_rate": "48000", "channels": 2}
        ],
        "format": {
            "filename": "episode.mp4",
            "nb_streams": 2,
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "1421.504000",
            "size": "318767104",
            "bit_rate": "1793949"
        }
    }"#;

    #[test]
    fn parses_ffprobe_json() {
        let info = MediaInfo::parse(FFPROBE_SAMPLE.as_bytes()).unwrap();
        assert_eq!(info.duration_secs(), Some(1421.504));
        assert_eq!(info.size_bytes(), Some(318_767_104));
        assert!(info.has_audio());

        let video = info.video_stream().unwrap();
        assert_eq!(video.codec_name.as_deref(), Some("h264"));
        assert_eq!((video.width, video.height), (Some(1920), Some(1080)));
    }

    #[test]
    fn sparse_ffprobe_output_has_no_duration() {
        let info = MediaInfo::parse(br#"{"streams": [{"index": 0, "codec_type": "audio"}]}"#).unwrap();
        assert!(info.format.is_none());
        assert_eq!(info.duration_secs(), None);
        assert!(info.video_stream().is_none());

        let info = MediaInfo::parse(br#"{"format": {"duration": "N/A"}}"#).unwrap();
        assert_eq!(info.duration_secs(), None);
    }

    #[test]
    fn rejects_non_json_output() {
        let err = MediaInfo::parse(b"ffprobe: command not found").unwrap_err();
        assert!(matches!(err, DownloadError::Transcode { .. }));
    }

    #[test]
    fn builds_json_probe_arguments() {
        let args = FfmpegTranscoder::probe_args(Path::new("out.mp4"));
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            vec!["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams", "out.mp4"]
        );
    }
}
