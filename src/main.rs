//! CLI entry point for the video downloader.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, warn};
use video_downloader::catalog::{self, VideoItem};
use video_downloader::download::DownloadOperation;
use video_downloader::fetch::{FetchLimits, HttpClient, HttpFetch};
use video_downloader::{AppOptions, OperationQueue};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let options = resolve_options(&args)?;
    let items = read_items(&args)?;
    let items = catalog::select_quality(items, options.video_quality.as_deref());
    if items.is_empty() {
        info!("No input provided. Pass URLs as arguments, --catalog FILE, or pipe them via stdin.");
        return Ok(());
    }

    tokio::fs::create_dir_all(&options.download_dir)
        .await
        .with_context(|| {
            format!(
                "cannot create download directory {}",
                options.download_dir.display()
            )
        })?;

    let client =
        HttpClient::try_new_with_timeouts(options.connect_timeout_secs, options.read_timeout_secs)
            .context("cannot build HTTP client")?;
    let limits = FetchLimits::default().with_maximum_response_size(options.max_response_size);
    let queue = OperationQueue::new(options.concurrency)?;

    info!(
        count = items.len(),
        concurrency = options.concurrency,
        dir = %options.download_dir.display(),
        "starting downloads"
    );

    let mut downloads: Vec<DownloadOperation> = Vec::with_capacity(items.len());
    for item in items {
        let operation = HttpFetch::download(
            client.clone(),
            item.url,
            options.download_dir.clone(),
            item.depth,
        )
        .with_limits(limits)
        .into_operation();
        queue.add(operation.clone())?;
        downloads.push(operation);
    }

    drain_or_interrupt(&queue, tokio::signal::ctrl_c()).await;

    let mut completed = 0usize;
    let mut failed = 0usize;
    for download in &downloads {
        match download.outcome() {
            Some(Ok(())) => {
                completed += 1;
                if let Some(path) = download.resolved_file_path() {
                    info!(url = %download.url(), path = %path.display(), "saved");
                }
            }
            Some(Err(e)) => {
                failed += 1;
                warn!(url = %download.url(), code = ?e.code(), error = %e, "download failed");
            }
            None => {
                failed += 1;
                warn!(url = %download.url(), "download did not finish");
            }
        }
    }

    info!(completed, failed, total = downloads.len(), "Download complete");
    if failed > 0 {
        bail!("{failed} of {} downloads failed", downloads.len());
    }
    Ok(())
}

/// Waits for the queue to drain, cancelling everything if `interrupt` fires.
///
/// A failed interrupt listener leaves the downloads running.
async fn drain_or_interrupt<F>(queue: &OperationQueue, interrupt: F)
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        biased;
        () = queue.wait_until_drained() => {}
        signal = interrupt => match signal {
            Ok(()) => {
                warn!("interrupted, cancelling downloads");
                queue.cancel_all();
                queue.wait_until_drained().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl-C");
                queue.wait_until_drained().await;
            }
        },
    }
}

fn resolve_options(args: &Args) -> Result<AppOptions> {
    let mut options = match &args.config {
        Some(path) => AppOptions::load(path)?,
        None => AppOptions::default(),
    };
    if let Some(dir) = &args.output_dir {
        options.download_dir.clone_from(dir);
    }
    if let Some(quality) = &args.quality {
        options.video_quality = Some(quality.clone());
    }
    if let Some(concurrency) = args.concurrency {
        options.concurrency = usize::from(concurrency);
    }
    if let Some(max_size) = args.max_size {
        options.max_response_size = max_size;
    }
    options.validate()?;
    debug!(?options, "resolved options");
    Ok(options)
}

fn read_items(args: &Args) -> Result<Vec<VideoItem>> {
    let mut items = Vec::new();
    if let Some(path) = &args.catalog {
        items.extend(catalog::load_catalog(path)?);
    }
    for (index, url) in args.urls.iter().enumerate() {
        items.push(VideoItem::new(catalog::parse_url(index, url)?));
    }

    if items.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        items = catalog::parse_catalog(&buffer)?;
    }
    Ok(items)
}
