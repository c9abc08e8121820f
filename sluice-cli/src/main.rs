mod cli;
mod error;
mod logging;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sluice_engine::source::{StreamExtractor, generate_output_path, resolve_input};
use sluice_engine::{DownloadOutcome, DownloadRequest, FfmpegTranscoder, HlsDownloader, HttpClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::Args;
use crate::error::AppError;
use crate::progress::ProgressReporter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _log_guard = match logging::init_logging(args.verbose, args.quiet, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(path) => {
            println!("Download completed: {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.is_cancelled() {
                warn!("Download interrupted; run the same command again to resume");
            } else {
                error!(error = %e, "Download failed");
            }
            eprintln!("Download failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<PathBuf, AppError> {
    let config = args.hls_config();
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let http = Arc::new(HttpClient::new(&config.base)?);
    let extractor = StreamExtractor::new(http.clone(), http.site_headers().clone());

    let resolved = resolve_input(args.url.as_deref(), args.encoded.as_deref(), &extractor).await?;
    let output = generate_output_path(
        &resolved.stream_url,
        resolved.episode.as_ref(),
        args.output.as_deref(),
        args.default_extension(),
    );
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let referer = args.referer.clone().or(resolved.referer);
    info!(url = %resolved.stream_url, output = %output.display(), "Resolved download");

    let transcoder = Arc::new(FfmpegTranscoder::new(&config.transcode));
    if !args.no_convert {
        match transcoder.detect_version().await {
            Some(version) => debug!(version = %version, "ffmpeg found"),
            None => warn!(
                ffmpeg = %transcoder.ffmpeg_path().display(),
                "ffmpeg not found; the transport stream will be kept"
            ),
        }
    }

    let reporter = ProgressReporter::new(args.quiet);
    let downloader = HlsDownloader::with_collaborators(config, http.clone(), http, transcoder.clone())
        .with_progress(Some(reporter.callback()))
        .with_cancellation(cancel);

    let request = DownloadRequest::new(resolved.stream_url, output)
        .with_referer(referer)
        .with_convert(!args.no_convert);
    let result = downloader.download(&request).await;
    reporter.finish(result.is_ok());

    let outcome = result?;
    match &outcome {
        DownloadOutcome::ConversionSkipped { ts_path, reason } => {
            warn!(path = %ts_path.display(), reason = %reason, "Conversion skipped");
        }
        DownloadOutcome::Converted(path) | DownloadOutcome::TransportStream(path) => {
            if let Some(media) = transcoder.probe_media_info(path).await {
                info!(
                    path = %path.display(),
                    duration_secs = media.duration_secs(),
                    video = media.video_stream().and_then(|s| s.codec_name.as_deref()),
                    audio = media.has_audio(),
                    "Media info"
                );
            }
        }
        DownloadOutcome::AlreadyExists(_) => {}
    }
    Ok(outcome.path().to_path_buf())
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping download");
            cancel.cancel();
        }
    });
}
