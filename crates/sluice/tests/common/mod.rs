//! In-process collaborators for driving the pipeline without a network.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use sluice_engine::config::ParallelConfig;
use sluice_engine::hls::RetryPolicy;
use sluice_engine::{DownloadError, PlaylistFetcher, SegmentDownloader, SegmentFetchError, Transcoder};

pub const SEGMENT_LEN: usize = 188 * 4;

/// Deterministic, per-index distinct payload.
pub fn payload(index: u64) -> Bytes {
    let mut data = vec![(index % 251) as u8; SEGMENT_LEN];
    data[..8].copy_from_slice(&index.to_be_bytes());
    Bytes::from(data)
}

pub fn segment_url(index: u64) -> String {
    format!("https://cdn.test/vod/seg{index}.ts")
}

pub fn segment_urls(total: u64) -> Vec<String> {
    (1..=total).map(segment_url).collect()
}

/// Concatenation of payloads `1..=count`.
pub fn expected_bytes(count: u64) -> Vec<u8> {
    (1..=count).flat_map(|i| payload(i).to_vec()).collect()
}

pub fn fast_config(max_workers: usize, buffer_capacity: usize) -> ParallelConfig {
    ParallelConfig {
        max_workers,
        buffer_capacity,
        poll_interval: Duration::from_millis(5),
        writer_drain_timeout: Duration::from_secs(10),
        retry: RetryPolicy::none(),
        resume_manifest: true,
    }
}

#[derive(Default)]
pub struct StubSegments {
    payloads: HashMap<String, Bytes>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    requested: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl StubSegments {
    /// Serves `payload(i)` for `segment_url(i)`, `i` in `1..=total`.
    pub fn serving(total: u64) -> Self {
        let payloads = (1..=total).map(|i| (segment_url(i), payload(i))).collect();
        Self {
            payloads,
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, url: impl Into<String>, data: Bytes) -> Self {
        self.payloads.insert(url.into(), data);
        self
    }

    pub fn failing_at(mut self, indices: &[u64]) -> Self {
        for &i in indices {
            self.failing.insert(segment_url(i));
        }
        self
    }

    pub fn with_delays(mut self, delays: impl IntoIterator<Item = (u64, Duration)>) -> Self {
        for (i, delay) in delays {
            self.delays.insert(segment_url(i), delay);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl SegmentDownloader for StubSegments {
    async fn fetch_segment(
        &self,
        url: &str,
        _referer: Option<&str>,
    ) -> Result<Bytes, SegmentFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(url.to_owned());

        if let Some(delay) = self.delays.get(url) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(url) {
            return Err(SegmentFetchError::HttpStatus {
                status: StatusCode::NOT_FOUND,
                url: url.to_owned(),
            });
        }
        self.payloads
            .get(url)
            .cloned()
            .ok_or_else(|| SegmentFetchError::Transport {
                url: url.to_owned(),
                reason: "connection refused".to_string(),
                timeout: false,
            })
    }
}

#[derive(Default)]
pub struct StubPlaylists {
    pages: HashMap<String, String>,
    calls: AtomicUsize,
}

impl StubPlaylists {
    pub fn with(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaylistFetcher for StubPlaylists {
    async fn fetch_text(&self, url: &str, _headers: HeaderMap) -> Result<String, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| DownloadError::http_status(StatusCode::NOT_FOUND, url, "text fetch"))
    }
}

pub struct StubTranscoder {
    available: bool,
    succeed: bool,
    /// Write a truncated output before failing, like an interrupted ffmpeg run
    partial: bool,
    calls: AtomicUsize,
}

impl StubTranscoder {
    pub fn missing() -> Arc<Self> {
        Arc::new(Self {
            available: false,
            succeed: false,
            partial: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            succeed: true,
            partial: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            succeed: false,
            partial: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn leaves_partial_output() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            succeed: false,
            partial: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.succeed {
            if self.partial {
                tokio::fs::write(output, b"ftyp-isom-truncated").await?;
            }
            return Err(DownloadError::Transcode {
                reason: "ffmpeg exited with exit status: 1".to_string(),
            });
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// A flat VOD media playlist listing `total` segments relative to its own directory.
pub fn media_playlist(total: u64) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
    for i in 1..=total {
        body.push_str(&format!("#EXTINF:10.0,\nseg{i}.ts\n"));
    }
    body.push_str("#EXT-X-ENDLIST\n");
    body
}
