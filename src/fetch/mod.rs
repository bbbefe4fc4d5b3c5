//! HTTP fetch operations.
//!
//! [`HttpFetch`] is an [`OperationStrategy`] that drives one HTTP
//! request/response exchange: it follows redirects hop by hop (latching the
//! latest request and response), routes authentication challenges to an
//! optional delegate, streams the body into memory or a [`ResponseSink`]
//! under a byte ceiling, and checks status-code and content-type
//! acceptability when the body completes.
//!
//! # Example
//!
//! ```no_run
//! use video_downloader::fetch::{FetchRequest, HttpClient, HttpFetch};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = FetchRequest::parse("https://example.com/index.json")?;
//! let operation = HttpFetch::new(HttpClient::new(), request).into_operation();
//! operation.start()?;
//! operation.wait().await.map_err(ToString::to_string)?;
//! let body = operation.response_body().unwrap_or_default();
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

mod acceptance;
mod auth;
mod client;
pub mod constants;
mod request;
mod sink;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
#[cfg(debug_assertions)]
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

pub use acceptance::{Acceptance, StatusCodes};
pub use auth::{
    AuthChallenge, AuthScheme, AuthenticationDelegate, ChallengeDisposition, Credential,
    ProtectionSpace,
};
pub use client::HttpClient;
pub use request::{FetchRequest, ResponseHead, media_type_essence};
pub use sink::{FileSink, ResponseSink};

use self::constants::{
    DEFAULT_RESPONSE_SIZE, MAX_AUTH_ATTEMPTS, MAX_REDIRECTS, MAXIMUM_RESPONSE_SIZE,
};
use crate::error::OperationError;
use crate::operation::{Operation, OperationStrategy};

/// Body size limits of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    default_response_size: u64,
    maximum_response_size: u64,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self::new(DEFAULT_RESPONSE_SIZE, MAXIMUM_RESPONSE_SIZE)
    }
}

impl FetchLimits {
    /// Creates limits; the pre-allocation is capped to the maximum.
    #[must_use]
    pub fn new(default_response_size: u64, maximum_response_size: u64) -> Self {
        Self {
            default_response_size: default_response_size.min(maximum_response_size),
            maximum_response_size,
        }
    }

    /// Quarter-sized defaults for memory-constrained targets.
    #[must_use]
    pub fn embedded() -> Self {
        Self::new(DEFAULT_RESPONSE_SIZE / 4, MAXIMUM_RESPONSE_SIZE / 4)
    }

    /// Returns a copy with a different maximum response size.
    #[must_use]
    pub fn with_maximum_response_size(self, maximum_response_size: u64) -> Self {
        Self::new(self.default_response_size, maximum_response_size)
    }

    /// Bytes pre-allocated for an in-memory body.
    #[must_use]
    pub fn default_response_size(&self) -> u64 {
        self.default_response_size
    }

    /// Ceiling on the bytes accepted from the transport.
    #[must_use]
    pub fn maximum_response_size(&self) -> u64 {
        self.maximum_response_size
    }
}

/// Extension point for specialising a fetch.
///
/// Hooks run on the fetch's execution context.
#[async_trait]
pub trait FetchDelegate: Send + 'static {
    /// Immutable data exposed through the operation's observer.
    type Info: Clone + fmt::Debug + Send + Sync + 'static;

    /// Returns the data exposed through the observer.
    fn info(&self) -> Self::Info;

    /// Picks a sink once the first body bytes of an acceptable response arrive.
    ///
    /// Returning `Ok(None)` keeps the body in memory. Returning an error fails
    /// the fetch before any byte is written.
    async fn open_sink(
        &mut self,
        _response: &ResponseHead,
    ) -> Result<Option<Box<dyn ResponseSink>>, OperationError> {
        Ok(None)
    }

    /// Runs right before the fetch outcome is published, after its sink is dropped.
    async fn will_finish(&mut self, _error: Option<&OperationError>) {}
}

/// Delegate of a plain fetch: bodies without a configured sink stay in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemory;

#[async_trait]
impl FetchDelegate for InMemory {
    type Info = ();

    fn info(&self) {}
}

#[derive(Debug)]
struct Exchange {
    request: FetchRequest,
    acceptance: Acceptance,
    last_request: watch::Sender<Option<FetchRequest>>,
    last_response: watch::Sender<Option<ResponseHead>>,
}

impl Exchange {
    fn new(request: FetchRequest, acceptance: Acceptance) -> Self {
        Self {
            request,
            acceptance,
            last_request: watch::channel(None).0,
            last_response: watch::channel(None).0,
        }
    }

    fn latch_request(&self, request: FetchRequest) {
        self.last_request.send_replace(Some(request));
    }

    fn latch_response(&self, response: ResponseHead) {
        self.last_response.send_replace(Some(response));
    }
}

/// Live view of a fetch: latched request/response and acceptability.
///
/// Only the latest request and response are retained. Subscribe to the
/// latches to see every redirect hop as it happens.
#[derive(Debug, Clone)]
pub struct FetchObserver<I = ()> {
    exchange: Arc<Exchange>,
    info: I,
}

impl<I> FetchObserver<I> {
    /// Returns the original request.
    #[must_use]
    pub fn request(&self) -> &FetchRequest {
        &self.exchange.request
    }

    /// Returns the acceptability rules.
    #[must_use]
    pub fn acceptance(&self) -> &Acceptance {
        &self.exchange.acceptance
    }

    /// Returns the delegate's info.
    #[must_use]
    pub fn info(&self) -> &I {
        &self.info
    }

    /// Returns the most recently sent request.
    #[must_use]
    pub fn last_request(&self) -> Option<FetchRequest> {
        self.exchange.last_request.borrow().clone()
    }

    /// Returns the most recently received response head.
    #[must_use]
    pub fn last_response(&self) -> Option<ResponseHead> {
        self.exchange.last_response.borrow().clone()
    }

    /// Subscribes to `last_request` updates.
    #[must_use]
    pub fn subscribe_last_request(&self) -> watch::Receiver<Option<FetchRequest>> {
        self.exchange.last_request.subscribe()
    }

    /// Subscribes to `last_response` updates.
    #[must_use]
    pub fn subscribe_last_response(&self) -> watch::Receiver<Option<ResponseHead>> {
        self.exchange.last_response.subscribe()
    }

    /// `None` until a response arrives.
    #[must_use]
    pub fn is_status_code_acceptable(&self) -> Option<bool> {
        self.exchange
            .last_response
            .borrow()
            .as_ref()
            .map(|r| self.exchange.acceptance.is_status_code_acceptable(r.status().as_u16()))
    }

    /// `None` until a response arrives.
    #[must_use]
    pub fn is_content_type_acceptable(&self) -> Option<bool> {
        self.exchange.last_response.borrow().as_ref().map(|r| {
            self.exchange
                .acceptance
                .is_content_type_acceptable(r.media_type().as_deref())
        })
    }
}

enum Destination {
    Memory(Vec<u8>),
    Sink(Box<dyn ResponseSink>),
}

/// Strategy driving a single HTTP exchange.
pub struct HttpFetch<D: FetchDelegate = InMemory> {
    client: HttpClient,
    request: FetchRequest,
    acceptance: Acceptance,
    limits: FetchLimits,
    authentication: Option<Arc<dyn AuthenticationDelegate>>,
    configured_sink: Option<Box<dyn ResponseSink>>,
    destination: Option<Destination>,
    received: u64,
    response_body: Option<Vec<u8>>,
    exchange: Arc<Exchange>,
    delegate: D,
    #[cfg(debug_assertions)]
    debug_delay: Option<Duration>,
    #[cfg(debug_assertions)]
    debug_error: Option<OperationError>,
}

/// Operation running a plain [`HttpFetch`].
pub type HttpFetchOperation = Operation<HttpFetch>;

impl<D: FetchDelegate> fmt::Debug for HttpFetch<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetch")
            .field("url", &self.request.url().as_str())
            .field("limits", &self.limits)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

impl HttpFetch {
    /// Creates a fetch whose body stays in memory unless a sink is configured.
    #[must_use]
    pub fn new(client: HttpClient, request: FetchRequest) -> Self {
        Self::with_delegate(client, request, InMemory)
    }
}

impl<D: FetchDelegate> HttpFetch<D> {
    /// Creates a fetch specialised by `delegate`.
    #[must_use]
    pub fn with_delegate(client: HttpClient, request: FetchRequest, delegate: D) -> Self {
        let acceptance = Acceptance::default();
        let exchange = Arc::new(Exchange::new(request.clone(), acceptance.clone()));
        Self {
            client,
            request,
            acceptance,
            limits: FetchLimits::default(),
            authentication: None,
            configured_sink: None,
            destination: None,
            received: 0,
            response_body: None,
            exchange,
            delegate,
            #[cfg(debug_assertions)]
            debug_delay: None,
            #[cfg(debug_assertions)]
            debug_error: None,
        }
    }

    /// Sets the acceptable status codes (default 200..=299).
    #[must_use]
    pub fn with_acceptable_status_codes(mut self, codes: impl Into<StatusCodes>) -> Self {
        self.acceptance = Acceptance::new(codes.into(), self.acceptance.content_types().cloned());
        self.rebuild_exchange();
        self
    }

    /// Sets the acceptable media types (default: anything).
    #[must_use]
    pub fn with_acceptable_content_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let types: BTreeSet<String> = types.into_iter().map(Into::into).collect();
        self.acceptance = Acceptance::new(self.acceptance.status_codes().clone(), Some(types));
        self.rebuild_exchange();
        self
    }

    /// Sets the body size limits.
    #[must_use]
    pub fn with_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Routes authentication challenges to `delegate`.
    #[must_use]
    pub fn with_authentication_delegate(mut self, delegate: Arc<dyn AuthenticationDelegate>) -> Self {
        self.authentication = Some(delegate);
        self
    }

    /// Streams response bodies into `sink` instead of memory.
    #[must_use]
    pub fn with_response_sink(mut self, sink: Box<dyn ResponseSink>) -> Self {
        self.configured_sink = Some(sink);
        self
    }

    /// Waits `delay` before issuing the request. Debug builds only.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn with_debug_delay(mut self, delay: Duration) -> Self {
        self.debug_delay = Some(delay);
        self
    }

    /// Finishes with `error` instead of issuing the request. Debug builds only.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn with_debug_error(mut self, error: OperationError) -> Self {
        self.debug_error = Some(error);
        self
    }

    /// Wraps this fetch into an operation.
    #[must_use]
    pub fn into_operation(self) -> Operation<Self> {
        Operation::new(self)
    }

    fn rebuild_exchange(&mut self) {
        self.exchange = Arc::new(Exchange::new(self.request.clone(), self.acceptance.clone()));
    }

    /// Returns the original request.
    #[must_use]
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// Returns the size limits.
    #[must_use]
    pub fn limits(&self) -> FetchLimits {
        self.limits
    }

    /// Body bytes accepted from the transport so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Accumulated body, when the destination was memory and the body completed.
    #[must_use]
    pub fn response_body(&self) -> Option<&[u8]> {
        self.response_body.as_deref()
    }

    /// Returns the delegate.
    #[must_use]
    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    /// Sends the request, following redirects and answering challenges, until
    /// a final response head arrives. Returns the request that produced it.
    async fn send(
        &mut self,
    ) -> Result<(FetchRequest, reqwest::Response, ResponseHead), OperationError> {
        let mut request = self.request.clone();
        let mut credential: Option<Credential> = None;
        let mut redirects = 0;
        let mut auth_failures = 0;
        self.exchange.latch_request(request.clone());

        loop {
            let response = self.client.send(&request, credential.as_ref()).await?;
            let head = ResponseHead::from_response(&response);

            if let Some(next) = request.redirected_by(&head) {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(OperationError::TooManyRedirects {
                        url: request.url().to_string(),
                        limit: MAX_REDIRECTS,
                    });
                }
                if !request::same_origin(request.url(), next.url()) {
                    credential = None;
                }
                debug!(
                    status = head.status().as_u16(),
                    from = %request.url(),
                    to = %next.url(),
                    "following redirect"
                );
                self.exchange.latch_response(head);
                self.exchange.latch_request(next.clone());
                request = next;
                continue;
            }

            if head.status() == StatusCode::UNAUTHORIZED {
                let failures = auth_failures + u32::from(credential.is_some());
                let delegate = self.authentication.clone();
                if let Some(answer) = answer_challenge(delegate.as_deref(), &head, failures).await {
                    auth_failures = failures;
                    credential = Some(answer);
                    self.exchange.latch_response(head);
                    continue;
                }
            }

            debug!(status = head.status().as_u16(), url = %head.url(), "response received");
            self.exchange.latch_response(head.clone());
            return Ok((request, response, head));
        }
    }

    async fn receive_body(
        &mut self,
        sent: &FetchRequest,
        response: reqwest::Response,
        head: &ResponseHead,
    ) -> Result<(), OperationError> {
        let url = head.url().as_str();
        let limit = self.limits.maximum_response_size;
        // HEAD, 1xx, 204 and 304 declare a length they never send.
        let declared = head
            .content_length()
            .filter(|_| request::response_carries_body(sent.method(), head.status()));
        if let Some(length) = declared.filter(|length| *length > limit) {
            warn!(url, length, limit, "declared content length exceeds limit");
            return Err(OperationError::response_too_large(url, limit));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| OperationError::transport(url, e))?;
            if chunk.is_empty() {
                continue;
            }
            self.ensure_destination(head).await?;
            self.append(url, &chunk).await?;
        }

        // An empty body still gets a destination, so downloads create their file.
        self.ensure_destination(head).await?;
        if let Some(Destination::Sink(sink)) = self.destination.as_mut() {
            sink.close()
                .await
                .map_err(|e| OperationError::sink(sink.describe(), e))?;
        }
        Ok(())
    }

    /// Decides where the body goes. Runs its decision once per fetch.
    async fn ensure_destination(&mut self, head: &ResponseHead) -> Result<(), OperationError> {
        if self.destination.is_some() {
            return Ok(());
        }

        // Error bodies never reach a delegate sink.
        let sink = match self.configured_sink.take() {
            Some(sink) => Some(sink),
            None if self
                .acceptance
                .is_status_code_acceptable(head.status().as_u16()) =>
            {
                self.delegate.open_sink(head).await?
            }
            None => None,
        };

        let destination = match sink {
            Some(sink) => {
                debug!(sink = %sink.describe(), "streaming body to sink");
                Destination::Sink(sink)
            }
            None => {
                let capacity = usize::try_from(self.limits.default_response_size).unwrap_or(0);
                debug!(capacity, "accumulating body in memory");
                Destination::Memory(Vec::with_capacity(capacity))
            }
        };
        self.destination = Some(destination);
        Ok(())
    }

    async fn append(&mut self, url: &str, chunk: &[u8]) -> Result<(), OperationError> {
        let limit = self.limits.maximum_response_size;
        let total = self.received.saturating_add(chunk.len() as u64);
        if total > limit {
            warn!(url, received = self.received, limit, "response exceeds limit");
            return Err(OperationError::response_too_large(url, limit));
        }

        match self
            .destination
            .get_or_insert_with(|| Destination::Memory(Vec::new()))
        {
            Destination::Memory(buffer) => buffer.extend_from_slice(chunk),
            Destination::Sink(sink) => sink
                .write_chunk(chunk)
                .await
                .map_err(|e| OperationError::sink(sink.describe(), e))?,
        }
        self.received = total;
        Ok(())
    }

    fn complete(&mut self, head: &ResponseHead) -> Result<(), OperationError> {
        match self.destination.take() {
            Some(Destination::Memory(buffer)) => self.response_body = Some(buffer),
            other => self.destination = other,
        }

        let url = head.url().as_str();
        let status = head.status().as_u16();
        if !self.acceptance.is_status_code_acceptable(status) {
            debug!(url, status, "status code not acceptable");
            return Err(OperationError::http_status(url, status));
        }
        if let Some(media_type) = head
            .media_type()
            .filter(|t| !self.acceptance.is_content_type_acceptable(Some(t.as_str())))
        {
            debug!(url, content_type = %media_type, "content type not acceptable");
            return Err(OperationError::bad_content_type(url, media_type));
        }

        info!(url, status, bytes = self.received, "fetch complete");
        Ok(())
    }

    #[cfg(debug_assertions)]
    async fn apply_debug_knobs(&mut self) -> Result<(), OperationError> {
        if let Some(delay) = self.debug_delay {
            debug!(delay_ms = delay.as_millis(), "debug delay before request");
            tokio::time::sleep(delay).await;
        }
        match self.debug_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Asks `delegate` to answer a 401 challenge; `None` makes the 401 final.
async fn answer_challenge(
    delegate: Option<&dyn AuthenticationDelegate>,
    head: &ResponseHead,
    failures: u32,
) -> Option<Credential> {
    let delegate = delegate?;
    let space = ProtectionSpace::from_response(head)?;
    if failures >= MAX_AUTH_ATTEMPTS {
        warn!(host = %space.host, failures, "giving up on authentication challenge");
        return None;
    }
    if !delegate.can_authenticate(&space) {
        debug!(host = %space.host, scheme = ?space.scheme, "delegate declined protection space");
        return None;
    }
    let challenge = AuthChallenge {
        space,
        previous_failure_count: failures,
        failure_response: head.clone(),
    };
    match delegate.handle_challenge(&challenge).await {
        ChallengeDisposition::UseCredential(credential) => {
            debug!(host = %challenge.space.host, "retrying with delegate credential");
            Some(credential)
        }
        ChallengeDisposition::ContinueWithoutCredential | ChallengeDisposition::Cancel => None,
    }
}

#[async_trait]
impl<D: FetchDelegate> OperationStrategy for HttpFetch<D> {
    type Observer = FetchObserver<D::Info>;

    fn observer(&self) -> Self::Observer {
        FetchObserver {
            exchange: Arc::clone(&self.exchange),
            info: self.delegate.info(),
        }
    }

    async fn on_start(&mut self) -> Result<(), OperationError> {
        #[cfg(debug_assertions)]
        self.apply_debug_knobs().await?;

        let (sent, response, head) = self.send().await?;
        self.receive_body(&sent, response, &head).await?;
        self.complete(&head)
    }

    fn on_cancel_requested(&mut self) -> OperationError {
        debug!(
            url = %self.request.url(),
            received = self.received,
            "fetch cancelled, transport exchange dropped"
        );
        OperationError::Cancelled
    }

    async fn on_before_finish(&mut self, error: Option<&OperationError>, _cancelled: bool) {
        // Drop the sink first so delegates can clean up what it wrote.
        self.destination = None;
        self.configured_sink = None;
        self.delegate.will_finish(error).await;
    }
}

impl<D: FetchDelegate> Operation<HttpFetch<D>> {
    /// Returns the URL of the original request.
    #[must_use]
    pub fn url(&self) -> &Url {
        self.observer().request().url()
    }

    /// Returns the most recently sent request.
    #[must_use]
    pub fn last_request(&self) -> Option<FetchRequest> {
        self.observer().last_request()
    }

    /// Returns the most recently received response head.
    #[must_use]
    pub fn last_response(&self) -> Option<ResponseHead> {
        self.observer().last_response()
    }

    /// `None` until a response arrives.
    #[must_use]
    pub fn is_status_code_acceptable(&self) -> Option<bool> {
        self.observer().is_status_code_acceptable()
    }

    /// `None` until a response arrives.
    #[must_use]
    pub fn is_content_type_acceptable(&self) -> Option<bool> {
        self.observer().is_content_type_acceptable()
    }

    /// Returns the in-memory body once finished.
    #[must_use]
    pub fn response_body(&self) -> Option<Vec<u8>> {
        self.inspect(|fetch| fetch.response_body().map(<[u8]>::to_vec))
            .flatten()
    }

    /// Body bytes accepted from the transport, once finished.
    #[must_use]
    pub fn bytes_received(&self) -> Option<u64> {
        self.inspect(HttpFetch::bytes_received)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = FetchLimits::default();
        assert_eq!(limits.default_response_size(), 1024 * 1024);
        assert_eq!(limits.maximum_response_size(), 4 * 1024 * 1024);
    }

    #[test]
    fn test_embedded_limits_are_quarter_sized() {
        let limits = FetchLimits::embedded();
        assert_eq!(limits.default_response_size(), 256 * 1024);
        assert_eq!(limits.maximum_response_size(), 1024 * 1024);
    }

    #[test]
    fn test_default_size_is_capped_to_maximum() {
        let limits = FetchLimits::default().with_maximum_response_size(10);
        assert_eq!(limits.default_response_size(), 10);
        assert_eq!(limits.maximum_response_size(), 10);
    }

    #[test]
    fn test_observer_reflects_configured_acceptance() {
        let request = FetchRequest::parse("https://example.com/a.png").unwrap();
        let fetch = HttpFetch::new(HttpClient::new(), request)
            .with_acceptable_status_codes(StatusCodes::set([200]))
            .with_acceptable_content_types(["image/png"]);
        let operation = fetch.into_operation();

        assert_eq!(operation.url().as_str(), "https://example.com/a.png");
        let acceptance = operation.observer().acceptance();
        assert!(acceptance.is_status_code_acceptable(200));
        assert!(!acceptance.is_status_code_acceptable(204));
        assert!(acceptance.is_content_type_acceptable(Some("image/png")));
        assert!(operation.is_status_code_acceptable().is_none());
        assert!(operation.last_request().is_none());
        assert!(operation.response_body().is_none());
    }
}
