use std::path::PathBuf;
use std::time::Duration;

pub use crate::hls::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Referer and origin sent when the caller does not supply a referer.
pub const DEFAULT_SITE_ROOT: &str = "https://www.weekseries.info";

/// HTTP client options shared by playlist and segment requests
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for a single request (playlist or segment)
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Site root used for the default `Referer` and for `Origin`
    pub site_root: String,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// Maximum idle connections to keep per host.
    /// Segment workers hit the same CDN host, so this should be at least the worker count.
    pub pool_max_idle_per_host: usize,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            site_root: DEFAULT_SITE_ROOT.to_owned(),
            follow_redirects: true,
            pool_max_idle_per_host: 10,
            use_system_proxy: true,
        }
    }
}

/// Parallel segment download settings
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of concurrent segment workers
    pub max_workers: usize,
    /// Maximum number of downloaded segments held in memory awaiting the writer
    pub buffer_capacity: usize,
    /// Upper bound on how long the writer or a blocked worker sleeps between checks
    pub poll_interval: Duration,
    /// How long to wait for the writer to drain after downloads finish
    pub writer_drain_timeout: Duration,
    /// Retry policy applied to each segment fetch
    pub retry: RetryPolicy,
    /// Persist a `<output>.resume.json` manifest for byte-exact resume
    pub resume_manifest: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            buffer_capacity: 50,
            poll_interval: Duration::from_millis(50),
            writer_drain_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            resume_manifest: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Path or name of the ffmpeg executable
    pub ffmpeg_path: PathBuf,
    /// Path or name of the ffprobe executable
    pub ffprobe_path: PathBuf,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

/// Top-level configuration for an HLS download job
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    pub base: DownloaderConfig,
    pub parallel: ParallelConfig,
    pub transcode: TranscodeConfig,
}

impl HlsConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.parallel.max_workers = workers.max(1);
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.parallel.buffer_capacity = capacity.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.base.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.parallel.retry.max_retries = max_retries;
        self
    }

    pub fn with_ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcode.ffmpeg_path = path.into();
        self
    }

    pub fn with_ffprobe(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcode.ffprobe_path = path.into();
        self
    }

    pub fn with_resume_manifest(mut self, enabled: bool) -> Self {
        self.parallel.resume_manifest = enabled;
        self
    }
}
