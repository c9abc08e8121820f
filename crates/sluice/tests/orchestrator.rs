//! Playlist resolution, skip rules and container conversion through `HlsDownloader`.

mod common;

use std::sync::Arc;

use common::*;
use sluice_engine::{DownloadError, DownloadOutcome, DownloadRequest, HlsConfig, HlsDownloader};

const MEDIA_URL: &str = "https://cdn.test/vod/index.m3u8";
const MASTER_URL: &str = "https://cdn.test/master.m3u8";

fn config() -> HlsConfig {
    HlsConfig {
        parallel: fast_config(3, 2),
        ..HlsConfig::default()
    }
}

struct Harness {
    playlists: Arc<StubPlaylists>,
    segments: Arc<StubSegments>,
    transcoder: Arc<StubTranscoder>,
    downloader: HlsDownloader,
}

fn harness(playlists: StubPlaylists, segments: StubSegments, transcoder: Arc<StubTranscoder>) -> Harness {
    let playlists = Arc::new(playlists);
    let segments = Arc::new(segments);
    let downloader = HlsDownloader::with_collaborators(
        config(),
        playlists.clone(),
        segments.clone(),
        transcoder.clone(),
    );
    Harness {
        playlists,
        segments,
        transcoder,
        downloader,
    }
}

mod playlist_tests {
    use super::*;

    #[tokio::test]
    async fn media_playlist_downloads_to_ts() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(4)),
            StubSegments::serving(4),
            StubTranscoder::missing(),
        );
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.ts");

        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::TransportStream(target.clone()));
        assert_eq!(std::fs::read(&target).unwrap(), expected_bytes(4));
        assert_eq!(h.playlists.calls(), 1);
        assert_eq!(h.transcoder.calls(), 0);
    }

    #[tokio::test]
    async fn master_playlist_follows_first_variant() {
        let master = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
            vod/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
            low/index.m3u8\n";
        let h = harness(
            StubPlaylists::default()
                .with(MASTER_URL, master)
                .with(MEDIA_URL, media_playlist(3)),
            StubSegments::serving(3),
            StubTranscoder::missing(),
        );
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.ts");

        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MASTER_URL, &target))
            .await
            .unwrap();

        assert_eq!(outcome.path(), target.as_path());
        assert_eq!(std::fs::read(&target).unwrap(), expected_bytes(3));
        assert_eq!(h.playlists.calls(), 2);
        assert_eq!(h.segments.requested().len(), 3);
    }

    #[tokio::test]
    async fn empty_playlist_fails_without_segment_requests() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, ""),
            StubSegments::serving(1),
            StubTranscoder::missing(),
        );
        let dir = tempfile::tempdir().unwrap();

        let result = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, dir.path().join("a.ts")))
            .await;

        assert!(matches!(result, Err(DownloadError::Playlist { .. })));
        assert_eq!(h.segments.calls(), 0);
        assert!(!dir.path().join("a.ts").exists());
    }

    #[tokio::test]
    async fn playlist_without_segments_fails() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-ENDLIST\n"),
            StubSegments::serving(1),
            StubTranscoder::missing(),
        );
        let dir = tempfile::tempdir().unwrap();

        let result = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, dir.path().join("a.ts")))
            .await;

        assert!(matches!(result, Err(DownloadError::NoSegments { .. })));
        assert_eq!(h.segments.calls(), 0);
    }

    #[tokio::test]
    async fn playlist_fetch_error_is_propagated() {
        let h = harness(
            StubPlaylists::default(),
            StubSegments::serving(1),
            StubTranscoder::missing(),
        );
        let dir = tempfile::tempdir().unwrap();

        let result = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, dir.path().join("a.ts")))
            .await;

        assert!(matches!(result, Err(DownloadError::HttpStatus { .. })));
    }

    #[tokio::test]
    async fn invalid_stream_url_is_rejected() {
        let h = harness(
            StubPlaylists::default(),
            StubSegments::serving(1),
            StubTranscoder::missing(),
        );
        let dir = tempfile::tempdir().unwrap();

        let result = h
            .downloader
            .download(&DownloadRequest::new("not a url", dir.path().join("a.ts")))
            .await;

        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
        assert_eq!(h.playlists.calls(), 0);
    }
}

mod output_tests {
    use super::*;

    #[tokio::test]
    async fn existing_output_is_skipped() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(2)),
            StubSegments::serving(2),
            StubTranscoder::working(),
        );
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.mp4");
        std::fs::write(&target, b"already converted").unwrap();

        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::AlreadyExists(target.clone()));
        assert_eq!(h.playlists.calls(), 0);
        assert_eq!(h.segments.calls(), 0);
        assert_eq!(std::fs::read(&target).unwrap(), b"already converted");
    }

    #[tokio::test]
    async fn missing_transcoder_keeps_transport_stream() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(3)),
            StubSegments::serving(3),
            StubTranscoder::missing(),
        );
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.mp4");
        let ts_path = dir.path().join("episode.ts");

        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();

        assert!(matches!(
            &outcome,
            DownloadOutcome::ConversionSkipped { ts_path: p, .. } if p == &ts_path
        ));
        assert_eq!(std::fs::read(&ts_path).unwrap(), expected_bytes(3));
        assert!(!target.exists());
        assert_eq!(h.transcoder.calls(), 0);
    }

    #[tokio::test]
    async fn successful_conversion_removes_transport_stream() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(3)),
            StubSegments::serving(3),
            StubTranscoder::working(),
        );
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.mp4");

        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::Converted(target.clone()));
        assert_eq!(std::fs::read(&target).unwrap(), expected_bytes(3));
        assert!(!dir.path().join("episode.ts").exists());
        assert_eq!(h.transcoder.calls(), 1);
    }

    #[tokio::test]
    async fn failed_conversion_keeps_transport_stream() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(2)),
            StubSegments::serving(2),
            StubTranscoder::broken(),
        );
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.mkv");

        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();

        assert!(matches!(outcome, DownloadOutcome::ConversionSkipped { .. }));
        assert!(dir.path().join("episode.ts").exists());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn failed_conversion_removes_partial_target_so_next_run_converts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.mp4");

        let first = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(3)),
            StubSegments::serving(3),
            StubTranscoder::leaves_partial_output(),
        );
        let outcome = first
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();
        assert!(matches!(outcome, DownloadOutcome::ConversionSkipped { .. }));
        assert!(!target.exists(), "partial conversion output left behind");
        assert!(dir.path().join("episode.ts").exists());

        let second = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(3)),
            StubSegments::serving(3),
            StubTranscoder::working(),
        );
        let outcome = second
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::Converted(target.clone()));
        assert_eq!(std::fs::read(&target).unwrap(), expected_bytes(3));
        // only the resume probe; the kept .ts already holds every segment
        assert_eq!(second.segments.calls(), 1);
        assert_eq!(second.transcoder.calls(), 1);
    }

    #[tokio::test]
    async fn transport_stream_without_manifest_counts_as_finished() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.ts");
        std::fs::write(&target, expected_bytes(2)).unwrap();

        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(5)),
            StubSegments::serving(5),
            StubTranscoder::missing(),
        );
        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target).with_convert(false))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::AlreadyExists(target.clone()));
        assert_eq!(h.playlists.calls(), 0);
        assert_eq!(h.segments.calls(), 0);
    }

    #[tokio::test]
    async fn no_convert_stops_at_transport_stream() {
        let h = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(2)),
            StubSegments::serving(2),
            StubTranscoder::working(),
        );
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.mp4");

        let outcome = h
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target).with_convert(false))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DownloadOutcome::TransportStream(dir.path().join("episode.ts"))
        );
        assert_eq!(h.transcoder.calls(), 0);
    }

    #[tokio::test]
    async fn unfinished_transport_stream_is_resumed_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("episode.ts");

        let first = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(5)),
            StubSegments::serving(5).failing_at(&[3]),
            StubTranscoder::missing(),
        );
        let result = first
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await;
        assert!(matches!(result, Err(DownloadError::Incomplete { .. })));

        let second = harness(
            StubPlaylists::default().with(MEDIA_URL, media_playlist(5)),
            StubSegments::serving(5),
            StubTranscoder::missing(),
        );
        let outcome = second
            .downloader
            .download(&DownloadRequest::new(MEDIA_URL, &target))
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::TransportStream(target.clone()));
        assert_eq!(second.segments.calls(), 3);
        assert_eq!(std::fs::read(&target).unwrap(), expected_bytes(5));
    }
}
