//! HTTP transport shared by fetch operations.
//!
//! The client never follows redirects itself: fetches follow them one hop at
//! a time so every hop can be latched. Responses are passed through without
//! transparent decompression, so downloaded bytes are stored verbatim.

use std::time::Duration;

use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::{debug, instrument};

use super::auth::Credential;
use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::request::FetchRequest;
use crate::error::OperationError;
use crate::user_agent;

/// HTTP client handle, cheap to clone and meant to be shared by many fetches.
///
/// # Example
///
/// ```no_run
/// use video_downloader::fetch::HttpClient;
///
/// let client = HttpClient::new_with_timeouts(10, 60);
/// let shared = client.clone();
/// # drop(shared);
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts (30s connect, 5min read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self::try_new_with_timeouts(connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    #[instrument(level = "debug")]
    pub fn try_new_with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .redirect(Policy::none())
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Sends one request hop and returns the response with its body unread.
    pub(crate) async fn send(
        &self,
        request: &FetchRequest,
        credential: Option<&Credential>,
    ) -> Result<reqwest::Response, OperationError> {
        debug!(method = %request.method(), url = %request.url(), "sending request");
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(credential) = credential {
            builder = credential.apply(builder);
        }
        builder
            .send()
            .await
            .map_err(|e| OperationError::transport(request.url().as_str(), e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_send_connection_refused_is_transport_error() {
        let client = HttpClient::new_with_timeouts(2, 2);
        let request = FetchRequest::parse("http://127.0.0.1:1/clip.mp4").unwrap();

        let error = tokio_test::block_on(client.send(&request, None)).unwrap_err();
        assert!(
            matches!(error, OperationError::Transport { .. } | OperationError::Timeout { .. }),
            "unexpected error: {error}"
        );
        assert_eq!(error.code(), None);
        assert!(error.to_string().contains("127.0.0.1"));
    }

    #[test]
    fn test_client_is_cloneable() {
        let client = HttpClient::new();
        let shared = client.clone();
        assert_eq!(format!("{client:?}"), format!("{shared:?}"));
    }
}
