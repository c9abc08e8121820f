// HLS Segment Fetcher: a single GET per segment, plus the worker-side retry wrapper.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::SegmentFetchError;
use crate::hls::retry::{RetryAction, RetryError, RetryPolicy, retry_with_backoff};

/// Downloads the raw bytes of one media segment.
///
/// Implementations make exactly one request per call and do not retry.
#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    async fn fetch_segment(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<Bytes, SegmentFetchError>;
}

/// Fetch a segment, retrying transient failures according to `policy`.
pub async fn fetch_with_retry(
    downloader: &dyn SegmentDownloader,
    index: u64,
    url: &str,
    referer: Option<&str>,
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> Result<Bytes, RetryError<SegmentFetchError>> {
    retry_with_backoff(policy, token, |attempt| async move {
        trace!(index, attempt, url = %url, "Fetching segment");
        match downloader.fetch_segment(url, referer).await {
            Ok(data) => {
                debug!(index, bytes = data.len(), "Segment downloaded");
                RetryAction::Success(data)
            }
            Err(e) if e.is_retryable() => RetryAction::Retry(e),
            Err(e) => RetryAction::Fail(e),
        }
    })
    .await
}
