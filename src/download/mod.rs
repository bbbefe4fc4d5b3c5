//! Download operations: HTTP fetches that stream into a unique local file.
//!
//! A download is an [`HttpFetch`] specialised by the [`DownloadTarget`]
//! delegate. When the first body bytes of an acceptable response arrive, the
//! delegate maps the response media type to a file extension and opens a new
//! file in the target directory; that file becomes the fetch sink. If the
//! download fails for any reason the partial file is removed.
//!
//! # Example
//!
//! ```no_run
//! use video_downloader::download::DownloadOperation;
//! use video_downloader::fetch::{HttpClient, HttpFetch};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = url::Url::parse("https://example.com/clips/intro.mp4")?;
//! let operation: DownloadOperation =
//!     HttpFetch::download(HttpClient::new(), url, "./downloads", 0).into_operation();
//! operation.start()?;
//! operation.wait().await.map_err(ToString::to_string)?;
//! if let Some(path) = operation.resolved_file_path() {
//!     println!("Downloaded: {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod filename;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

pub use filename::extension_for_media_type;

use crate::error::OperationError;
use crate::fetch::{FetchDelegate, FetchRequest, HttpClient, HttpFetch, ResponseHead, ResponseSink};
use crate::operation::Operation;

/// Maps a media type essence to a file extension without the leading dot.
pub type ExtensionMapper = fn(&str) -> Option<&'static str>;

/// Operation downloading one URL into a directory.
pub type DownloadOperation = Operation<HttpFetch<DownloadTarget>>;

/// Immutable download data exposed through the fetch observer.
#[derive(Debug, Clone)]
pub struct DownloadInfo {
    target_directory: PathBuf,
    depth: u32,
    resolved_file_path: Arc<watch::Sender<Option<PathBuf>>>,
}

impl DownloadInfo {
    /// Directory the file is created in.
    #[must_use]
    pub fn target_directory(&self) -> &Path {
        &self.target_directory
    }

    /// Caller metadata carried through unchanged.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Path of the opened destination file, if any.
    #[must_use]
    pub fn resolved_file_path(&self) -> Option<PathBuf> {
        self.resolved_file_path.borrow().clone()
    }

    /// Subscribes to destination file changes.
    #[must_use]
    pub fn subscribe_resolved_file_path(&self) -> watch::Receiver<Option<PathBuf>> {
        self.resolved_file_path.subscribe()
    }
}

/// Fetch delegate that stores the body in a newly created file.
#[derive(Debug)]
pub struct DownloadTarget {
    source_url: Url,
    target_directory: PathBuf,
    depth: u32,
    mapper: ExtensionMapper,
    resolved_file_path: Arc<watch::Sender<Option<PathBuf>>>,
}

impl DownloadTarget {
    /// Creates a target for `source_url` inside `target_directory`.
    ///
    /// The file is named after the last path segment of `source_url`.
    #[must_use]
    pub fn new(source_url: Url, target_directory: impl Into<PathBuf>, depth: u32) -> Self {
        Self {
            source_url,
            target_directory: target_directory.into(),
            depth,
            mapper: extension_for_media_type,
            resolved_file_path: Arc::new(watch::channel(None).0),
        }
    }

    /// Replaces the media type to extension mapping.
    #[must_use]
    pub fn with_extension_mapper(mut self, mapper: ExtensionMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Path of the opened destination file, if any.
    #[must_use]
    pub fn resolved_file_path(&self) -> Option<PathBuf> {
        self.resolved_file_path.borrow().clone()
    }

    async fn remove_partial_file(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed partial download"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial download"),
        }
    }
}

#[async_trait]
impl FetchDelegate for DownloadTarget {
    type Info = DownloadInfo;

    fn info(&self) -> DownloadInfo {
        DownloadInfo {
            target_directory: self.target_directory.clone(),
            depth: self.depth,
            resolved_file_path: Arc::clone(&self.resolved_file_path),
        }
    }

    async fn open_sink(
        &mut self,
        response: &ResponseHead,
    ) -> Result<Option<Box<dyn ResponseSink>>, OperationError> {
        let media_type = response.media_type();
        let Some(extension) = media_type.as_deref().and_then(self.mapper) else {
            warn!(
                url = %response.url(),
                content_type = media_type.as_deref().unwrap_or("<none>"),
                "no file extension for media type"
            );
            return Err(OperationError::unsupported_media_type(
                response.url().as_str(),
                media_type.as_deref(),
            ));
        };

        let stem = filename::stem_from_url(&self.source_url);
        let sink = filename::create_unique_file(&self.target_directory, &stem, extension)
            .await
            .map_err(|e| OperationError::io(&self.target_directory, e))?;

        let path = sink.path().to_path_buf();
        debug!(path = %path.display(), depth = self.depth, "opened download file");
        self.resolved_file_path.send_replace(Some(path));
        Ok(Some(Box::new(sink)))
    }

    async fn will_finish(&mut self, error: Option<&OperationError>) {
        match error {
            None => {
                if let Some(path) = self.resolved_file_path() {
                    info!(url = %self.source_url, path = %path.display(), "download complete");
                }
            }
            Some(error) => {
                let path = self.resolved_file_path.send_replace(None);
                if let Some(path) = path {
                    debug!(path = %path.display(), error = %error, "discarding failed download");
                    self.remove_partial_file(&path).await;
                }
            }
        }
    }
}

impl HttpFetch<DownloadTarget> {
    /// Creates a fetch that downloads `url` into `target_directory`.
    #[must_use]
    pub fn download(
        client: HttpClient,
        url: Url,
        target_directory: impl Into<PathBuf>,
        depth: u32,
    ) -> Self {
        let target = DownloadTarget::new(url.clone(), target_directory, depth);
        HttpFetch::with_delegate(client, FetchRequest::get(url), target)
    }
}

impl Operation<HttpFetch<DownloadTarget>> {
    /// Path of the destination file.
    ///
    /// Set once the file is opened, cleared again if the download fails.
    #[must_use]
    pub fn resolved_file_path(&self) -> Option<PathBuf> {
        self.observer().info().resolved_file_path()
    }

    /// Directory the file is created in.
    #[must_use]
    pub fn target_directory(&self) -> &Path {
        self.observer().info().target_directory()
    }

    /// Caller metadata carried through unchanged.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.observer().info().depth()
    }
}
