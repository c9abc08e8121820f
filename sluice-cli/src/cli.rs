use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use sluice_engine::HlsConfig;

/// Download a static HLS playlist into a single video file.
#[derive(Parser, Debug)]
#[command(name = "sluice", author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("input")
        .required(true)
        .multiple(true)
        .args(["url", "encoded"])
))]
pub struct Args {
    /// Episode page, direct .m3u8 URL or base64-encoded stream URL
    #[arg(short, long)]
    pub url: Option<String>,

    /// Base64-encoded stream URL (takes precedence over --url)
    #[arg(short, long)]
    pub encoded: Option<String>,

    /// Output file. Derived from the episode or stream URL when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Referer header sent with every request
    #[arg(short, long)]
    pub referer: Option<String>,

    /// Keep the transport stream instead of converting it with ffmpeg
    #[arg(long)]
    pub no_convert: bool,

    /// Number of parallel segment downloads
    #[arg(short, long, default_value_t = 8, env = "SLUICE_WORKERS")]
    pub workers: usize,

    /// Maximum number of segments held in memory ahead of the writer
    #[arg(long, default_value_t = 50, env = "SLUICE_BUFFER")]
    pub buffer: usize,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, env = "SLUICE_TIMEOUT")]
    pub timeout: u64,

    /// Retries per segment after the first attempt
    #[arg(long, default_value_t = 2, env = "SLUICE_RETRIES")]
    pub retries: u32,

    /// Path to the ffmpeg executable
    #[arg(long, default_value = "ffmpeg", env = "SLUICE_FFMPEG")]
    pub ffmpeg: PathBuf,

    /// Path to the ffprobe executable, used to report the final file's duration
    #[arg(long, default_value = "ffprobe", env = "SLUICE_FFPROBE")]
    pub ffprobe: PathBuf,

    /// Do not write a resume manifest next to the output. A partial .ts target without one is treated as finished
    #[arg(long)]
    pub no_manifest: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors and hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,

    /// Also write logs to this file
    #[arg(long, env = "SLUICE_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Args {
    pub fn hls_config(&self) -> HlsConfig {
        HlsConfig::default()
            .with_workers(self.workers)
            .with_buffer_capacity(self.buffer)
            .with_timeout(Duration::from_secs(self.timeout))
            .with_retries(self.retries)
            .with_ffmpeg(&self.ffmpeg)
            .with_ffprobe(&self.ffprobe)
            .with_resume_manifest(!self.no_manifest)
    }

    /// Extension of the generated filename, including the dot.
    pub fn default_extension(&self) -> &'static str {
        if self.no_convert { ".ts" } else { ".mp4" }
    }
}
